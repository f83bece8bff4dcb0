//! Topology type definitions.
//!
//! This file contains the declaration records handed to the network runtime
//! (hosts, switches, links), the handles returned to callers, and the
//! lifecycle state of a topology.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::ip::{Ipv4Cidr, MacAddr, RouteDirective};

/// Default switch executable, a BMv2 switch with a P4Runtime server
pub const DEFAULT_SWITCH_EXECUTABLE: &str = "simple_switch_grpc";

/// How long a switch gets to open its control port
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Kind of a declared node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Host,
    Switch,
}

impl NodeKind {
    /// First port index handed out when a link leaves the port unspecified.
    /// Switch ports start at 1, host interfaces at 0.
    pub fn first_port(&self) -> u16 {
        match self {
            NodeKind::Host => 0,
            NodeKind::Switch => 1,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Host => f.write_str("host"),
            NodeKind::Switch => f.write_str("switch"),
        }
    }
}

/// A declared host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSpec {
    pub name: String,
    pub ip: Ipv4Cidr,
    pub mac: MacAddr,
}

/// A declared P4 switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchSpec {
    pub name: String,
    /// Switch executable, either a name looked up on `PATH` or a path
    pub executable: String,
    /// P4Runtime gRPC port
    pub control_port: u16,
    pub device_id: u64,
    /// Compiled P4 program; the switch starts with `--no-p4` when absent
    pub json_path: Option<PathBuf>,
    pub thrift_port: Option<u16>,
    pub log_file: Option<PathBuf>,
    pub log_console: bool,
    /// Directory for per-port pcap dumps
    pub pcap_dump: Option<PathBuf>,
    pub cpu_port: Option<u16>,
    pub start_timeout: Duration,
}

impl SwitchSpec {
    pub fn new(name: impl Into<String>, executable: impl Into<String>, control_port: u16) -> Self {
        SwitchSpec {
            name: name.into(),
            executable: executable.into(),
            control_port,
            device_id: 0,
            json_path: None,
            thrift_port: None,
            log_file: None,
            log_console: false,
            pcap_dump: None,
            cpu_port: None,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    /// Log file the switch output is written to
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/p4s.{}.log", self.name)))
    }
}

/// One side of a link: a declared node and, optionally, a port index on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub node: String,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(node: impl Into<String>) -> Self {
        Endpoint { node: node.into(), port: None }
    }

    pub fn with_port(node: impl Into<String>, port: u16) -> Self {
        Endpoint { node: node.into(), port: Some(port) }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.node, port),
            None => f.write_str(&self.node),
        }
    }
}

/// A declared link between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSpec {
    pub a: Endpoint,
    pub b: Endpoint,
}

/// Neighbor entry and default route issued to a running host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub host: String,
    pub neighbor_ip: Ipv4Addr,
    pub neighbor_mac: MacAddr,
    pub default_route: RouteDirective,
}

/// Everything the runtime needs to materialize a topology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyDescription {
    pub hosts: Vec<HostSpec>,
    pub switches: Vec<SwitchSpec>,
    pub links: Vec<LinkSpec>,
}

impl TopologyDescription {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.switches.is_empty()
    }

    pub fn host(&self, name: &str) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn switch(&self, name: &str) -> Option<&SwitchSpec> {
        self.switches.iter().find(|s| s.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<NodeKind> {
        if self.host(name).is_some() {
            Some(NodeKind::Host)
        } else if self.switch(name).is_some() {
            Some(NodeKind::Switch)
        } else {
            None
        }
    }
}

/// Handle to a declared host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostHandle {
    name: String,
}

impl HostHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        HostHandle { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint on a specific interface index of this host
    pub fn port(&self, port: u16) -> Endpoint {
        Endpoint::with_port(self.name.clone(), port)
    }
}

/// Handle to a declared switch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwitchHandle {
    name: String,
}

impl SwitchHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        SwitchHandle { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint on a specific port of this switch
    pub fn port(&self, port: u16) -> Endpoint {
        Endpoint::with_port(self.name.clone(), port)
    }
}

impl From<&HostHandle> for Endpoint {
    fn from(handle: &HostHandle) -> Self {
        Endpoint::new(handle.name.clone())
    }
}

impl From<&SwitchHandle> for Endpoint {
    fn from(handle: &SwitchHandle) -> Self {
        Endpoint::new(handle.name.clone())
    }
}

impl From<&str> for Endpoint {
    fn from(name: &str) -> Self {
        Endpoint::new(name)
    }
}

/// Lifecycle of a topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyState {
    /// Nothing declared yet
    Empty,
    /// At least one host or switch declared
    Declared,
    /// Handed to the runtime and running
    Materialized,
    /// Every host has received its network configuration
    Configured,
    /// Stopped; terminal
    TornDown,
}

impl TopologyState {
    /// Whether the runtime currently holds live entities for this topology
    pub fn is_live(&self) -> bool {
        matches!(self, TopologyState::Materialized | TopologyState::Configured)
    }
}

impl fmt::Display for TopologyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TopologyState::Empty => "empty",
            TopologyState::Declared => "declared",
            TopologyState::Materialized => "materialized",
            TopologyState::Configured => "configured",
            TopologyState::TornDown => "torn down",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_port_by_kind() {
        assert_eq!(NodeKind::Host.first_port(), 0);
        assert_eq!(NodeKind::Switch.first_port(), 1);
    }

    #[test]
    fn test_switch_spec_defaults() {
        let spec = SwitchSpec::new("s1", DEFAULT_SWITCH_EXECUTABLE, 9559);
        assert_eq!(spec.device_id, 0);
        assert_eq!(spec.json_path, None);
        assert_eq!(spec.start_timeout, DEFAULT_START_TIMEOUT);
        assert_eq!(spec.log_path(), PathBuf::from("/tmp/p4s.s1.log"));
    }

    #[test]
    fn test_description_lookup() {
        let description = TopologyDescription {
            hosts: vec![HostSpec {
                name: "h1".to_string(),
                ip: "10.0.1.2/24".parse().unwrap(),
                mac: "08:00:00:00:01:02".parse().unwrap(),
            }],
            switches: vec![SwitchSpec::new("s1", "simple_switch_grpc", 9559)],
            links: Vec::new(),
        };

        assert_eq!(description.kind_of("h1"), Some(NodeKind::Host));
        assert_eq!(description.kind_of("s1"), Some(NodeKind::Switch));
        assert_eq!(description.kind_of("h9"), None);
        assert!(!description.is_empty());
    }

    #[test]
    fn test_endpoint_display() {
        let handle = SwitchHandle::new("s1");
        assert_eq!(handle.port(2).to_string(), "s1:2");
        assert_eq!(Endpoint::from(&handle).to_string(), "s1");
    }

    #[test]
    fn test_live_states() {
        assert!(TopologyState::Materialized.is_live());
        assert!(TopologyState::Configured.is_live());
        assert!(!TopologyState::Declared.is_live());
        assert!(!TopologyState::TornDown.is_live());
    }
}
