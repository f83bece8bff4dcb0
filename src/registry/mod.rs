//! # Topology Registry Module
//!
//! Writes a JSON description of a live topology so that external tools (a
//! P4Runtime controller, test scripts) can find the switches and hosts
//! without parsing the topology file themselves.
//!
//! ## Example Registry Structure
//!
//! ```json
//! {
//!   "hosts": [
//!     {
//!       "name": "h1",
//!       "ip": "10.0.1.2/24",
//!       "mac": "08:00:00:00:01:02",
//!       "interfaces": ["h1-eth0"],
//!       "gateway": "10.0.1.1"
//!     }
//!   ],
//!   "switches": [
//!     {
//!       "name": "s1",
//!       "device_id": 0,
//!       "grpc_address": "127.0.0.1:9559",
//!       "ports": [{ "port": 1, "interface": "s1-eth1", "peer": "h1-eth0" }]
//!     }
//!   ],
//!   "links": [{ "a": "h1-eth0", "b": "s1-eth1" }]
//! }
//! ```

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::runtime::RuntimeHandle;
use crate::topology::{RouteConfig, TopologyDescription};

/// Registry of a live topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyRegistry {
    pub hosts: Vec<HostEntry>,
    pub switches: Vec<SwitchEntry>,
    pub links: Vec<LinkEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    pub ip: String,
    pub mac: String,
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchEntry {
    pub name: String,
    pub device_id: u64,
    pub grpc_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thrift_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_path: Option<PathBuf>,
    pub ports: Vec<PortEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortEntry {
    pub port: u16,
    pub interface: String,
    pub peer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub a: String,
    pub b: String,
}

impl TopologyRegistry {
    /// Build the registry from the declared topology, its live handle and the
    /// routes issued to the hosts.
    pub fn build(description: &TopologyDescription, handle: &RuntimeHandle, routes: &[RouteConfig]) -> Self {
        let gateways: HashMap<&str, Option<Ipv4Addr>> = routes
            .iter()
            .map(|r| (r.host.as_str(), r.default_route.gateway()))
            .collect();

        // interface name -> interface at the other end of its link
        let mut peers: HashMap<&str, &str> = HashMap::new();
        for link in handle.links() {
            peers.insert(&link.a.name, &link.b.name);
            peers.insert(&link.b.name, &link.a.name);
        }

        let hosts = description
            .hosts
            .iter()
            .map(|spec| HostEntry {
                name: spec.name.clone(),
                ip: spec.ip.to_string(),
                mac: spec.mac.to_string(),
                interfaces: handle
                    .node(&spec.name)
                    .map(|node| node.interfaces.iter().map(|i| i.name.clone()).collect())
                    .unwrap_or_default(),
                gateway: gateways.get(spec.name.as_str()).copied().flatten(),
            })
            .collect();

        let switches = description
            .switches
            .iter()
            .map(|spec| SwitchEntry {
                name: spec.name.clone(),
                device_id: spec.device_id,
                grpc_address: format!("127.0.0.1:{}", spec.control_port),
                thrift_port: spec.thrift_port,
                json_path: spec.json_path.clone(),
                ports: handle
                    .node(&spec.name)
                    .map(|node| {
                        node.interfaces
                            .iter()
                            .map(|i| PortEntry {
                                port: i.port,
                                interface: i.name.clone(),
                                peer: peers.get(i.name.as_str()).map(|p| p.to_string()).unwrap_or_default(),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();

        let links = handle
            .links()
            .iter()
            .map(|link| LinkEntry { a: link.a.name.clone(), b: link.b.name.clone() })
            .collect();

        TopologyRegistry { hosts, switches, links }
    }
}

/// Write the registry as pretty-printed JSON, creating parent directories
pub fn write_registry(registry: &TopologyRegistry, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create registry directory '{}'", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(registry)?;
    fs::write(path, &json).wrap_err_with(|| format!("Failed to write registry '{}'", path.display()))?;

    info!(
        "Wrote topology registry to {:?} ({} hosts, {} switches)",
        path,
        registry.hosts.len(),
        registry.switches.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Emulator, SimulatedFactory};
    use crate::topology::TopologyBuilder;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn basic_registry() -> TopologyRegistry {
        let mut topo = TopologyBuilder::new(Emulator::new(SimulatedFactory::new()));
        let h1 = topo.declare_host("h1", "10.0.1.2/24", "08:00:00:00:01:02").unwrap();
        let h2 = topo.declare_host("h2", "10.0.2.2/24", "08:00:00:00:02:02").unwrap();
        let s1 = topo.declare_switch("s1", "simple_switch_grpc", 9559).unwrap();
        topo.declare_link(&h1, &s1, Some(1)).unwrap();
        topo.declare_link(&h2, &s1, Some(2)).unwrap();
        topo.materialize().unwrap();

        let routes = vec![RouteConfig {
            host: "h1".to_string(),
            neighbor_ip: Ipv4Addr::new(10, 0, 1, 1),
            neighbor_mac: "08:00:00:00:01:01".parse().unwrap(),
            default_route: "dev eth0 via 10.0.1.1".into(),
        }];
        let handle = topo.handle().unwrap().clone();
        TopologyRegistry::build(topo.description(), &handle, &routes)
    }

    #[test]
    fn test_build_registry() {
        let registry = basic_registry();

        assert_eq!(registry.hosts.len(), 2);
        let h1 = &registry.hosts[0];
        assert_eq!(h1.ip, "10.0.1.2/24");
        assert_eq!(h1.interfaces, vec!["h1-eth0".to_string()]);
        assert_eq!(h1.gateway, Some(Ipv4Addr::new(10, 0, 1, 1)));
        assert_eq!(registry.hosts[1].gateway, None);

        let s1 = &registry.switches[0];
        assert_eq!(s1.grpc_address, "127.0.0.1:9559");
        assert_eq!(s1.device_id, 0);
        assert_eq!(s1.ports.len(), 2);
        assert_eq!(s1.ports[0].port, 1);
        assert_eq!(s1.ports[0].peer, "h1-eth0");
        assert_eq!(s1.ports[1].interface, "s1-eth2");

        assert_eq!(registry.links.len(), 2);
    }

    #[test]
    fn test_write_registry() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("topology.json");
        let registry = basic_registry();

        write_registry(&registry, &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: TopologyRegistry = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, registry);
        // Omitted when no route was issued
        assert!(!content.contains("\"gateway\": null"));
    }
}
