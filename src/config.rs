//! Topology file format.
//!
//! Topologies are described in YAML:
//!
//! ```yaml
//! general:
//!   backend: netns        # or simulated
//!   interactive: true
//! hosts:
//!   - name: h1
//!     ip: 10.0.1.2/24
//!     mac: "08:00:00:00:01:02"
//!     routing:
//!       neighbor_ip: 10.0.1.1
//!       neighbor_mac: "08:00:00:00:01:01"
//!       default_route: "dev eth0 via 10.0.1.1"
//! switches:
//!   - name: s1
//!     sw_path: simple_switch_grpc
//!     grpc_port: 9559
//! links:
//!   - { a: h1, b: s1, port: 1 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::ip::{Ipv4Cidr, MacAddr, RouteDirective};
use crate::topology::{RouteConfig, DEFAULT_START_TIMEOUT, DEFAULT_SWITCH_EXECUTABLE};

/// Emulation backend used to materialize the topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Linux network namespaces, veth pairs and switch processes
    #[default]
    Netns,
    /// In-memory backend that only records actions
    Simulated,
}

/// A complete topology file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hosts.is_empty() && self.switches.is_empty() {
            return Err(ValidationError::InvalidGeneral(
                "topology declares no hosts or switches".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for host in &self.hosts {
            if host.name.trim().is_empty() {
                return Err(ValidationError::InvalidHost("host name cannot be empty".to_string()));
            }
            if !names.insert(host.name.as_str()) {
                return Err(ValidationError::InvalidHost(format!("duplicate node name '{}'", host.name)));
            }
            if let Some(routing) = &host.routing {
                if routing.default_route.as_str().trim().is_empty() {
                    return Err(ValidationError::InvalidHost(format!(
                        "default_route for host '{}' cannot be empty",
                        host.name
                    )));
                }
            }
        }

        for switch in &self.switches {
            if switch.name.trim().is_empty() {
                return Err(ValidationError::InvalidSwitch("switch name cannot be empty".to_string()));
            }
            if !names.insert(switch.name.as_str()) {
                return Err(ValidationError::InvalidSwitch(format!("duplicate node name '{}'", switch.name)));
            }
            if switch.sw_path.trim().is_empty() {
                return Err(ValidationError::InvalidSwitch(format!(
                    "sw_path for switch '{}' cannot be empty",
                    switch.name
                )));
            }
            if switch.grpc_port == 0 {
                return Err(ValidationError::InvalidSwitch(format!(
                    "grpc_port for switch '{}' cannot be 0",
                    switch.name
                )));
            }
        }

        for link in &self.links {
            for end in [&link.a, &link.b] {
                if !names.contains(end.as_str()) {
                    return Err(ValidationError::InvalidLink(format!(
                        "link {} <-> {} references undeclared node '{}'",
                        link.a, link.b, end
                    )));
                }
            }
            if link.port.is_some() && (link.a_port.is_some() || link.b_port.is_some()) {
                return Err(ValidationError::InvalidLink(format!(
                    "link {} <-> {} sets both port and a_port/b_port",
                    link.a, link.b
                )));
            }
        }

        Ok(())
    }

    /// Per-host neighbor/route records, in declaration order
    pub fn route_configs(&self) -> Vec<RouteConfig> {
        self.hosts
            .iter()
            .filter_map(|host| {
                host.routing.as_ref().map(|r| RouteConfig {
                    host: host.name.clone(),
                    neighbor_ip: r.neighbor_ip,
                    neighbor_mac: r.neighbor_mac,
                    default_route: r.default_route.clone(),
                })
            })
            .collect()
    }
}

/// Shared general configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Open the interactive shell once hosts are configured
    #[serde(default = "default_true")]
    pub interactive: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            interactive: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Host entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    pub ip: Ipv4Cidr,
    pub mac: MacAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingConfig>,
}

/// Neighbor entry and default route applied once the host is running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub neighbor_ip: Ipv4Addr,
    pub neighbor_mac: MacAddr,
    pub default_route: RouteDirective,
}

/// Switch entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    #[serde(default = "default_sw_path")]
    pub sw_path: String,
    pub grpc_port: u16,
    /// Allocated from 0 upwards when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thrift_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub log_console: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcap_dump: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_port: Option<u16>,
    #[serde(default = "default_start_timeout", with = "humantime_serde")]
    pub start_timeout: Duration,
}

fn default_sw_path() -> String {
    DEFAULT_SWITCH_EXECUTABLE.to_string()
}

fn default_start_timeout() -> Duration {
    DEFAULT_START_TIMEOUT
}

/// Link entry. `port` is the port on the switch end; `a_port`/`b_port` pin
/// the port on each end explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub a: String,
    pub b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b_port: Option<u16>,
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid host configuration: {0}")]
    InvalidHost(String),
    #[error("Invalid switch configuration: {0}")]
    InvalidSwitch(String),
    #[error("Invalid link configuration: {0}")]
    InvalidLink(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = include_str!("../topologies/basic.yaml");

    #[test]
    fn test_basic_topology_parsing() {
        let config: Config = serde_yaml::from_str(BASIC).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.general.backend, Backend::Netns);
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[0].ip.to_string(), "10.0.1.2/24");
        assert_eq!(config.hosts[1].mac.to_string(), "08:00:00:00:02:02");

        let s1 = &config.switches[0];
        assert_eq!(s1.sw_path, "simple_switch_grpc");
        assert_eq!(s1.grpc_port, 9559);
        assert_eq!(s1.device_id, None);
        assert_eq!(s1.start_timeout, DEFAULT_START_TIMEOUT);

        assert_eq!(config.links[1].port, Some(2));
    }

    #[test]
    fn test_route_configs() {
        let config: Config = serde_yaml::from_str(BASIC).unwrap();
        let routes = config.route_configs();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].host, "h1");
        assert_eq!(routes[0].neighbor_ip, Ipv4Addr::new(10, 0, 1, 1));
        assert_eq!(routes[1].default_route.as_str(), "dev eth0 via 10.0.2.1");
    }

    #[test]
    fn test_switch_defaults_and_durations() {
        let yaml = r#"
hosts: []
switches:
  - name: s1
    grpc_port: 50051
    json_path: build/basic.json
    start_timeout: "2s 500ms"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.general.interactive);
        assert_eq!(config.general.backend, Backend::Netns);

        let s1 = &config.switches[0];
        assert_eq!(s1.sw_path, DEFAULT_SWITCH_EXECUTABLE);
        assert_eq!(s1.json_path, Some(PathBuf::from("build/basic.json")));
        assert_eq!(s1.start_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_malformed_addresses_fail_to_parse() {
        let yaml = r#"
hosts:
  - name: h1
    ip: 10.0.1.2/24
    mac: "08:00:00:00:01"
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());

        let yaml = r#"
hosts:
  - name: h1
    ip: 10.0.1.300/24
    mac: "08:00:00:00:01:02"
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_validation_errors() {
        // Empty topology
        let config: Config = serde_yaml::from_str("hosts: []").unwrap();
        assert!(matches!(config.validate(), Err(ValidationError::InvalidGeneral(_))));

        // Link to an undeclared node
        let yaml = r#"
hosts:
  - name: h1
    ip: 10.0.1.2/24
    mac: "08:00:00:00:01:02"
links:
  - { a: h1, b: s1, port: 1 }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ValidationError::InvalidLink(_))));

        // Host and switch sharing a name
        let yaml = r#"
hosts:
  - name: n1
    ip: 10.0.1.2/24
    mac: "08:00:00:00:01:02"
switches:
  - name: n1
    grpc_port: 9559
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ValidationError::InvalidSwitch(_))));

        // Both port styles on one link
        let yaml = r#"
hosts:
  - name: h1
    ip: 10.0.1.2/24
    mac: "08:00:00:00:01:02"
switches:
  - name: s1
    grpc_port: 9559
links:
  - { a: h1, b: s1, port: 1, b_port: 1 }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ValidationError::InvalidLink(_))));
    }

    #[test]
    fn test_backend_names() {
        let general: GeneralConfig = serde_yaml::from_str("backend: simulated").unwrap();
        assert_eq!(general.backend, Backend::Simulated);
        assert!(serde_yaml::from_str::<GeneralConfig>("backend: docker").is_err());
    }
}
