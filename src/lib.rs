//! # p4topo - P4 switch topologies on a single Linux machine
//!
//! This library declares small virtual networks of hosts and P4-programmable
//! software switches, brings them up, configures host addressing and routing,
//! hands the live network to an interactive shell and tears everything down
//! again.
//!
//! ## Overview
//!
//! A topology is declared on a [`TopologyBuilder`](topology::TopologyBuilder)
//! and handed to a [`NetworkRuntime`](runtime::NetworkRuntime) in one step.
//! Once it is live, every host gets a static neighbor entry for its gateway
//! and exactly one default route. Packet forwarding is left to the P4 program
//! loaded into the switches by an external controller.
//!
//! ## Key Features
//!
//! - **Explicit lifecycle**: `Empty -> Declared -> Materialized -> Configured -> TornDown`
//! - **Pluggable dataplane**: hosts and switches come from a `DataplaneEntityFactory`
//! - **Linux backend**: network namespaces, veth pairs and `simple_switch_grpc` processes
//! - **Simulated backend**: records every action, for dry runs and tests
//! - **Guaranteed teardown**: on errors, early returns and panics
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: Type-safe topology file structures and validation
//! - `config_loader`: Topology file loading, plus the bundled basic topology
//! - `ip`: IPv4 interface addresses, MAC addresses, route directives
//! - `topology`: Declarations, lifecycle state and the topology builder
//! - `runtime`: Network runtime, dataplane plugins and live handles
//! - `session`: Interactive shell over a live topology
//! - `registry`: JSON registry of a live topology for external controllers
//! - `utils`: Utility functions and helpers
//! - `orchestrator`: High-level control flow with guaranteed teardown
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use p4topo::runtime::{Emulator, NetnsFactory};
//! use p4topo::topology::TopologyBuilder;
//! use std::net::Ipv4Addr;
//!
//! let mut topo = TopologyBuilder::new(Emulator::new(NetnsFactory::new()));
//! let h1 = topo.declare_host("h1", "10.0.1.2/24", "08:00:00:00:01:02")?;
//! let s1 = topo.declare_switch("s1", "simple_switch_grpc", 9559)?;
//! topo.declare_link(&h1, &s1, Some(1))?;
//!
//! topo.materialize()?;
//! topo.configure_host_network(&h1, Ipv4Addr::new(10, 0, 1, 1), "08:00:00:00:01:01".parse()?, "dev eth0 via 10.0.1.1")?;
//! println!("{}", topo.exec("h1", "ip route")?);
//! topo.teardown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! Library modules return typed errors (`TopologyError`, `RuntimeError`,
//! `ValidationError`). The orchestrator and the binary use `color_eyre` for
//! error reporting with context.

pub mod config;
pub mod config_loader;
pub mod ip;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod topology;
pub mod utils;
