//! Topology builder.
//!
//! [`TopologyBuilder`] owns the topology description and drives a
//! [`NetworkRuntime`] through a fixed sequence:
//!
//! ```text
//! Empty -> Declared -> Materialized -> Configured -> TornDown
//!          declare_*    materialize()   configure_host_network() for every host
//! ```
//!
//! `teardown()` moves to `TornDown` from any state. A builder that is dropped
//! while its network is live tears it down, so early returns and panics do
//! not leak namespaces or switch processes.

use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;

use super::error::TopologyError;
use super::types::{
    Endpoint, HostHandle, HostSpec, LinkSpec, NodeKind, RouteConfig, SwitchHandle, SwitchSpec,
    TopologyDescription, TopologyState,
};
use crate::ip::{AddressRegistry, Ipv4Cidr, MacAddr, RouteDirective};
use crate::runtime::{LiveHost, NetworkRuntime, RuntimeHandle};

/// Declares a topology and drives its runtime
pub struct TopologyBuilder<R: NetworkRuntime> {
    runtime: R,
    state: TopologyState,
    description: TopologyDescription,
    /// Declared name -> kind
    names: HashMap<String, NodeKind>,
    /// Control port -> switch name
    control_ports: HashMap<u16, String>,
    /// Device id -> switch name
    device_ids: HashMap<u64, String>,
    /// Ports reserved by links, per node
    link_ports: HashMap<String, BTreeSet<u16>>,
    addresses: AddressRegistry,
    configured: BTreeSet<String>,
    handle: Option<RuntimeHandle>,
}

impl<R: NetworkRuntime> TopologyBuilder<R> {
    pub fn new(runtime: R) -> Self {
        TopologyBuilder {
            runtime,
            state: TopologyState::Empty,
            description: TopologyDescription::default(),
            names: HashMap::new(),
            control_ports: HashMap::new(),
            device_ids: HashMap::new(),
            link_ports: HashMap::new(),
            addresses: AddressRegistry::new(),
            configured: BTreeSet::new(),
            handle: None,
        }
    }

    pub fn state(&self) -> TopologyState {
        self.state
    }

    pub fn description(&self) -> &TopologyDescription {
        &self.description
    }

    /// Live handle, present between materialize and teardown
    pub fn handle(&self) -> Option<&RuntimeHandle> {
        self.handle.as_ref()
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    /// Handle for a declared host, looked up by name
    pub fn host_handle(&self, name: &str) -> Option<HostHandle> {
        match self.names.get(name) {
            Some(NodeKind::Host) => Some(HostHandle::new(name)),
            _ => None,
        }
    }

    /// Handle for a declared switch, looked up by name
    pub fn switch_handle(&self, name: &str) -> Option<SwitchHandle> {
        match self.names.get(name) {
            Some(NodeKind::Switch) => Some(SwitchHandle::new(name)),
            _ => None,
        }
    }

    fn ensure_declarable(&self, operation: &'static str) -> Result<(), TopologyError> {
        match self.state {
            TopologyState::Empty | TopologyState::Declared => Ok(()),
            state => Err(TopologyError::InvalidState { operation, state }),
        }
    }

    fn ensure_unique_name(&self, name: &str) -> Result<(), TopologyError> {
        if self.names.contains_key(name) {
            return Err(TopologyError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Declare a host with its interface address and MAC.
    pub fn declare_host(&mut self, name: &str, ip: &str, mac: &str) -> Result<HostHandle, TopologyError> {
        self.ensure_declarable("declare a host")?;
        self.ensure_unique_name(name)?;

        let invalid = |source| TopologyError::InvalidAddress { host: name.to_string(), source };
        let ip: Ipv4Cidr = ip.parse().map_err(invalid)?;
        let mac: MacAddr = mac.parse().map_err(invalid)?;

        self.addresses
            .register(name, &ip, &mac)
            .map_err(|conflict| TopologyError::DuplicateAddress {
                host: name.to_string(),
                kind: conflict.kind,
                address: conflict.address,
                owner: conflict.owner,
            })?;

        debug!("Declared host {} ({} {})", name, ip, mac);
        self.names.insert(name.to_string(), NodeKind::Host);
        self.description.hosts.push(HostSpec { name: name.to_string(), ip, mac });
        self.state = TopologyState::Declared;
        Ok(HostHandle::new(name))
    }

    /// Declare a switch with default options and the next free device id.
    pub fn declare_switch(
        &mut self,
        name: &str,
        executable_path: &str,
        control_port: u16,
    ) -> Result<SwitchHandle, TopologyError> {
        let mut spec = SwitchSpec::new(name, executable_path, control_port);
        spec.device_id = self.next_device_id();
        self.declare_switch_spec(spec)
    }

    /// Declare a switch from a full spec.
    pub fn declare_switch_spec(&mut self, spec: SwitchSpec) -> Result<SwitchHandle, TopologyError> {
        self.ensure_declarable("declare a switch")?;
        self.ensure_unique_name(&spec.name)?;

        if let Some(owner) = self.control_ports.get(&spec.control_port) {
            return Err(TopologyError::PortConflict {
                switch: spec.name.clone(),
                port: spec.control_port,
                owner: owner.clone(),
            });
        }
        if let Some(owner) = self.device_ids.get(&spec.device_id) {
            return Err(TopologyError::DuplicateDeviceId {
                switch: spec.name.clone(),
                device_id: spec.device_id,
                owner: owner.clone(),
            });
        }

        debug!(
            "Declared switch {} ({} device {} grpc port {})",
            spec.name, spec.executable, spec.device_id, spec.control_port
        );
        self.names.insert(spec.name.clone(), NodeKind::Switch);
        self.control_ports.insert(spec.control_port, spec.name.clone());
        self.device_ids.insert(spec.device_id, spec.name.clone());
        let handle = SwitchHandle::new(spec.name.clone());
        self.description.switches.push(spec);
        self.state = TopologyState::Declared;
        Ok(handle)
    }

    /// Lowest device id not yet taken by a declared switch
    pub fn next_device_id(&self) -> u64 {
        let mut id = 0;
        while self.device_ids.contains_key(&id) {
            id += 1;
        }
        id
    }

    /// Declare a link; `port`, when given, is reserved on the switch end.
    ///
    /// When both ends are switches the port applies to `a`.
    pub fn declare_link(
        &mut self,
        a: impl Into<Endpoint>,
        b: impl Into<Endpoint>,
        port: Option<u16>,
    ) -> Result<(), TopologyError> {
        let mut a = a.into();
        let mut b = b.into();

        let Some(port) = port else {
            return self.declare_link_between(a, b);
        };

        self.ensure_declarable("declare a link")?;
        let kind_a = self.kind_of(&a)?;
        let kind_b = self.kind_of(&b)?;
        let link = format!("{} <-> {}", a, b);

        let target = if kind_a == NodeKind::Switch {
            &mut a
        } else if kind_b == NodeKind::Switch {
            &mut b
        } else {
            return Err(TopologyError::InvalidPort {
                link,
                reason: "a port index only applies to a switch end".to_string(),
            });
        };
        if target.port.is_some_and(|p| p != port) {
            return Err(TopologyError::InvalidPort {
                link,
                reason: format!("port {} conflicts with the port on the endpoint", port),
            });
        }
        target.port = Some(port);

        self.declare_link_between(a, b)
    }

    /// Declare a link with explicit per-end ports.
    pub fn declare_link_between(&mut self, a: Endpoint, b: Endpoint) -> Result<(), TopologyError> {
        self.ensure_declarable("declare a link")?;
        self.kind_of(&a)?;
        self.kind_of(&b)?;

        if a.node == b.node {
            return Err(TopologyError::SelfLink(a.node));
        }

        for end in [&a, &b] {
            let Some(port) = end.port else { continue };
            if port == 0 && self.names.get(&end.node) == Some(&NodeKind::Switch) {
                return Err(TopologyError::InvalidPort {
                    link: format!("{} <-> {}", a, b),
                    reason: "switch ports are numbered from 1".to_string(),
                });
            }
            if self.link_ports.get(&end.node).is_some_and(|used| used.contains(&port)) {
                return Err(TopologyError::PortInUse { node: end.node.clone(), port });
            }
        }

        for end in [&a, &b] {
            if let Some(port) = end.port {
                self.link_ports.entry(end.node.clone()).or_default().insert(port);
            }
        }

        debug!("Declared link {} <-> {}", a, b);
        self.description.links.push(LinkSpec { a, b });
        Ok(())
    }

    fn kind_of(&self, end: &Endpoint) -> Result<NodeKind, TopologyError> {
        self.names
            .get(&end.node)
            .copied()
            .ok_or_else(|| TopologyError::UnknownEndpoint(end.node.clone()))
    }

    /// Hand the description to the runtime, which creates and starts it.
    ///
    /// Allowed once. A runtime failure stops whatever was partially created
    /// and leaves the topology torn down.
    pub fn materialize(&mut self) -> Result<&RuntimeHandle, TopologyError> {
        match self.state {
            TopologyState::Declared => {}
            TopologyState::Empty => return Err(TopologyError::EmptyTopology),
            TopologyState::Materialized | TopologyState::Configured => {
                return Err(TopologyError::AlreadyMaterialized)
            }
            state @ TopologyState::TornDown => {
                return Err(TopologyError::InvalidState { operation: "materialize", state })
            }
        }

        info!(
            "Materializing topology: {} hosts, {} switches, {} links",
            self.description.hosts.len(),
            self.description.switches.len(),
            self.description.links.len()
        );

        match self.runtime.start(&self.description) {
            Ok(handle) => {
                self.state = TopologyState::Materialized;
                Ok(self.handle.insert(handle))
            }
            Err(e) => {
                error!("Failed to materialize topology: {}", e);
                if let Err(stop_err) = self.runtime.stop() {
                    warn!("Releasing the partial topology failed: {}", stop_err);
                }
                self.state = TopologyState::TornDown;
                Err(TopologyError::Runtime(e))
            }
        }
    }

    /// Install a static neighbor entry and the default route on a live host.
    pub fn configure_host_network(
        &mut self,
        host: &HostHandle,
        peer_ip: Ipv4Addr,
        peer_mac: MacAddr,
        default_route: impl Into<RouteDirective>,
    ) -> Result<(), TopologyError> {
        match self.state {
            TopologyState::Materialized | TopologyState::Configured => {}
            TopologyState::Empty | TopologyState::Declared => return Err(TopologyError::NotMaterialized),
            state @ TopologyState::TornDown => {
                return Err(TopologyError::InvalidState { operation: "configure a host", state })
            }
        }

        let spec = self
            .description
            .host(host.name())
            .ok_or_else(|| TopologyError::UnknownHost(host.name().to_string()))?;
        if !spec.ip.contains(peer_ip) {
            warn!("Host {}: neighbor {} is outside {}", spec.name, peer_ip, spec.ip);
        }

        let route = default_route.into();
        info!(
            "Configuring host {}: neighbor {} at {}, default route '{}'",
            host.name(),
            peer_ip,
            peer_mac,
            route
        );

        let live = self.runtime.live_host(host.name())?;
        live.set_static_neighbor(peer_ip, peer_mac)?;
        live.set_default_route(route)?;

        self.configured.insert(host.name().to_string());
        if self.description.hosts.iter().all(|h| self.configured.contains(&h.name)) {
            self.state = TopologyState::Configured;
        }
        Ok(())
    }

    /// Apply a [`RouteConfig`] record; the host is looked up by name.
    pub fn apply_route_config(&mut self, route: &RouteConfig) -> Result<(), TopologyError> {
        let host = HostHandle::new(route.host.clone());
        self.configure_host_network(&host, route.neighbor_ip, route.neighbor_mac, route.default_route.clone())
    }

    /// Run a command on a live node and return its output.
    pub fn exec(&mut self, node: &str, command: &str) -> Result<String, TopologyError> {
        self.ensure_live("run a command")?;
        if !self.names.contains_key(node) {
            return Err(TopologyError::UnknownEndpoint(node.to_string()));
        }
        Ok(self.runtime.exec(node, command)?)
    }

    /// The live host named `name`, with the neighbors and route issued to it.
    pub fn live_host(&mut self, name: &str) -> Result<&mut LiveHost, TopologyError> {
        self.ensure_live("inspect a host")?;
        if self.description.host(name).is_none() {
            return Err(TopologyError::UnknownHost(name.to_string()));
        }
        Ok(self.runtime.live_host(name)?)
    }

    fn ensure_live(&self, operation: &'static str) -> Result<(), TopologyError> {
        match self.state {
            TopologyState::Materialized | TopologyState::Configured => Ok(()),
            TopologyState::Empty | TopologyState::Declared => Err(TopologyError::NotMaterialized),
            state @ TopologyState::TornDown => Err(TopologyError::InvalidState { operation, state }),
        }
    }

    /// Stop the network if it is live. Always ends in `TornDown`.
    pub fn teardown(&mut self) -> Result<(), TopologyError> {
        let previous = std::mem::replace(&mut self.state, TopologyState::TornDown);
        self.handle = None;

        match previous {
            TopologyState::TornDown => {
                debug!("Topology already torn down");
                Ok(())
            }
            TopologyState::Empty | TopologyState::Declared => {
                debug!("Topology was never materialized, nothing to stop");
                Ok(())
            }
            TopologyState::Materialized | TopologyState::Configured => {
                info!("Tearing down topology");
                self.runtime.stop().map_err(TopologyError::from)
            }
        }
    }
}

impl<R: NetworkRuntime> Drop for TopologyBuilder<R> {
    fn drop(&mut self) {
        if self.state.is_live() {
            warn!("Topology dropped while live, tearing down");
            if let Err(e) = self.teardown() {
                error!("Teardown failed: {}", e);
            }
        }
    }
}
