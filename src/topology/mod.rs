//! Network topology module.
//!
//! This module contains the topology declaration records, the builder that
//! validates them and drives a network runtime, and the errors it raises.

pub mod builder;
pub mod error;
pub mod types;

// Re-export key types for easier access
pub use builder::TopologyBuilder;
pub use error::TopologyError;
pub use types::{
    Endpoint, HostHandle, HostSpec, LinkSpec, NodeKind, RouteConfig, SwitchHandle, SwitchSpec,
    TopologyDescription, TopologyState, DEFAULT_START_TIMEOUT, DEFAULT_SWITCH_EXECUTABLE,
};
