//! Network runtime module.
//!
//! A topology description is turned into live hosts, switches and links by a
//! [`NetworkRuntime`]. The crate's runtime, [`Emulator`], does the ordering,
//! port allocation and bookkeeping itself and delegates the actual entities
//! to a [`DataplaneEntityFactory`]:
//!
//! - [`netns`]: Linux network namespaces, veth pairs and a BMv2 switch process
//! - [`simulated`]: in-memory entities that only record what was asked of them
//!
//! ## Lifecycle
//!
//! ```text
//! start(description) -> RuntimeHandle
//!   live_host(name).set_static_neighbor(..) / .set_default_route(..)
//!   exec(node, command)
//! stop()
//! ```

mod command;
pub mod emulator;
pub mod netns;
pub mod simulated;

pub use emulator::Emulator;
pub use netns::NetnsFactory;
pub use simulated::{SimEvent, SimJournal, SimulatedFactory};

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::ip::{MacAddr, RouteDirective};
use crate::topology::{HostSpec, NodeKind, SwitchSpec, TopologyDescription};
use crate::utils::BinaryError;

/// Errors surfaced by runtimes and dataplane plugins
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Command `{command}` failed ({status}): {stderr}")]
    CommandFailed { command: String, status: String, stderr: String },

    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Switch '{name}' did not open control port {port} within {timeout:?}")]
    SwitchStartTimeout { name: String, port: u16, timeout: Duration },

    #[error("Switch '{name}' exited during start-up ({status}), see {log}")]
    SwitchExited { name: String, status: String, log: String },

    #[error("No live host named '{0}'")]
    UnknownHost(String),

    #[error("No live node named '{0}'")]
    UnknownNode(String),

    #[error("Runtime is already running a topology")]
    AlreadyStarted,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Interrupted during {0}")]
    Interrupted(String),

    #[error("Simulated failure: {0}")]
    Simulated(String),

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One end of a live link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Interface {
    pub node: String,
    pub kind: NodeKind,
    pub port: u16,
    /// Interface name at creation, `<node>-eth<port>`
    pub name: String,
}

impl Interface {
    pub fn new(node: impl Into<String>, kind: NodeKind, port: u16) -> Self {
        let node = node.into();
        let name = format!("{}-eth{}", node, port);
        Interface { node, kind, port, name }
    }
}

/// A live host entity produced by a plugin
pub trait HostRef {
    fn name(&self) -> &str;

    /// Take ownership of a link end. The default interface carries the host's
    /// address. Returns the interface name as seen inside the host.
    fn attach_interface(&mut self, intf: &Interface, default: bool) -> Result<String, RuntimeError>;

    fn set_static_neighbor(&mut self, ip: Ipv4Addr, mac: &MacAddr) -> Result<(), RuntimeError>;

    fn set_default_route(&mut self, route: &RouteDirective) -> Result<(), RuntimeError>;

    /// Run a shell command on the host and return its standard output
    fn exec(&mut self, command: &str) -> Result<String, RuntimeError>;

    fn stop(&mut self) -> Result<(), RuntimeError>;
}

/// A live switch entity produced by a plugin
pub trait SwitchRef {
    fn name(&self) -> &str;

    /// P4Runtime gRPC port the switch serves
    fn control_port(&self) -> u16;

    /// Start the dataplane process with the given ports, ordered by port index
    fn start(&mut self, ports: &[Interface]) -> Result<(), RuntimeError>;

    fn stop(&mut self) -> Result<(), RuntimeError>;
}

/// Capability interface implemented by each emulation backend
pub trait DataplaneEntityFactory {
    fn create_host(&mut self, spec: &HostSpec) -> Result<Box<dyn HostRef>, RuntimeError>;

    fn create_switch(&mut self, spec: &SwitchSpec) -> Result<Box<dyn SwitchRef>, RuntimeError>;

    /// Create a virtual cable between two interfaces
    fn create_link(&mut self, a: &Interface, b: &Interface) -> Result<(), RuntimeError>;

    fn delete_link(&mut self, a: &Interface, b: &Interface) -> Result<(), RuntimeError>;
}

/// Materializes topology descriptions into running networks
pub trait NetworkRuntime {
    /// Create and start every host, switch and link of `topology`.
    ///
    /// On failure nothing created by this call is left running.
    fn start(&mut self, topology: &TopologyDescription) -> Result<RuntimeHandle, RuntimeError>;

    fn live_host(&mut self, name: &str) -> Result<&mut LiveHost, RuntimeError>;

    fn exec(&mut self, node: &str, command: &str) -> Result<String, RuntimeError>;

    /// Stop and release all live entities. Calling it again is a no-op.
    fn stop(&mut self) -> Result<(), RuntimeError>;
}

/// A running host plus the network configuration issued to it
pub struct LiveHost {
    spec: HostSpec,
    plugin: Box<dyn HostRef>,
    interfaces: Vec<String>,
    neighbors: BTreeMap<Ipv4Addr, MacAddr>,
    default_route: Option<RouteDirective>,
}

impl LiveHost {
    pub fn new(spec: HostSpec, plugin: Box<dyn HostRef>) -> Self {
        LiveHost {
            spec,
            plugin,
            interfaces: Vec::new(),
            neighbors: BTreeMap::new(),
            default_route: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &HostSpec {
        &self.spec
    }

    /// Interface names inside the host, default interface first
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn default_interface(&self) -> Option<&str> {
        self.interfaces.first().map(String::as_str)
    }

    pub(crate) fn attach_interface(&mut self, intf: &Interface, default: bool) -> Result<(), RuntimeError> {
        let local = self.plugin.attach_interface(intf, default)?;
        if default {
            self.interfaces.insert(0, local);
        } else {
            self.interfaces.push(local);
        }
        Ok(())
    }

    /// Install a permanent neighbor (ARP) entry, replacing any entry for `ip`
    pub fn set_static_neighbor(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Result<(), RuntimeError> {
        self.plugin.set_static_neighbor(ip, &mac)?;
        self.neighbors.insert(ip, mac);
        Ok(())
    }

    /// Replace the host's default route
    pub fn set_default_route(&mut self, route: RouteDirective) -> Result<(), RuntimeError> {
        self.plugin.set_default_route(&route)?;
        self.default_route = Some(route);
        Ok(())
    }

    pub fn neighbors(&self) -> &BTreeMap<Ipv4Addr, MacAddr> {
        &self.neighbors
    }

    pub fn default_route(&self) -> Option<&RouteDirective> {
        self.default_route.as_ref()
    }

    /// Default routes in the host's route table; a host has at most one
    pub fn default_routes(&self) -> &[RouteDirective] {
        self.default_route.as_slice()
    }

    pub fn exec(&mut self, command: &str) -> Result<String, RuntimeError> {
        self.plugin.exec(command)
    }

    pub(crate) fn stop(&mut self) -> Result<(), RuntimeError> {
        self.plugin.stop()
    }
}

impl std::fmt::Debug for LiveHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveHost")
            .field("spec", &self.spec)
            .field("interfaces", &self.interfaces)
            .field("neighbors", &self.neighbors)
            .field("default_route", &self.default_route)
            .finish()
    }
}

/// A live node as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveNode {
    pub name: String,
    pub kind: NodeKind,
    /// Link ends owned by this node, ordered by port
    pub interfaces: Vec<Interface>,
}

/// A live link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveLink {
    pub a: Interface,
    pub b: Interface,
}

/// Snapshot of a started topology, keyed by declared name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeHandle {
    nodes: BTreeMap<String, LiveNode>,
    links: Vec<LiveLink>,
}

impl RuntimeHandle {
    pub fn new(nodes: impl IntoIterator<Item = LiveNode>, links: Vec<LiveLink>) -> Self {
        RuntimeHandle {
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            links,
        }
    }

    pub fn node(&self, name: &str) -> Option<&LiveNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &LiveNode> {
        self.nodes.values()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &LiveNode> {
        self.nodes.values().filter(|n| n.kind == NodeKind::Host)
    }

    pub fn switches(&self) -> impl Iterator<Item = &LiveNode> {
        self.nodes.values().filter(|n| n.kind == NodeKind::Switch)
    }

    pub fn links(&self) -> &[LiveLink] {
        &self.links
    }

    pub fn host_count(&self) -> usize {
        self.hosts().count()
    }

    pub fn switch_count(&self) -> usize {
        self.switches().count()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_naming() {
        let intf = Interface::new("s1", NodeKind::Switch, 2);
        assert_eq!(intf.name, "s1-eth2");
        assert_eq!(Interface::new("h1", NodeKind::Host, 0).name, "h1-eth0");
    }

    #[test]
    fn test_handle_counts() {
        let h1 = Interface::new("h1", NodeKind::Host, 0);
        let s1 = Interface::new("s1", NodeKind::Switch, 1);
        let handle = RuntimeHandle::new(
            vec![
                LiveNode { name: "h1".into(), kind: NodeKind::Host, interfaces: vec![h1.clone()] },
                LiveNode { name: "s1".into(), kind: NodeKind::Switch, interfaces: vec![s1.clone()] },
            ],
            vec![LiveLink { a: h1, b: s1 }],
        );

        assert_eq!(handle.host_count(), 1);
        assert_eq!(handle.switch_count(), 1);
        assert_eq!(handle.link_count(), 1);
        assert_eq!(handle.node("s1").map(|n| n.kind), Some(NodeKind::Switch));
    }
}
