//! Emulated network runtime.
//!
//! Drives a [`DataplaneEntityFactory`] through the start-up sequence:
//!
//! 1. create hosts
//! 2. create switches (not yet running)
//! 3. allocate ports and create links
//! 4. attach link ends to hosts, default interface first
//! 5. start switches with their port bindings
//!
//! Any failure releases what was created so far, in reverse order.

use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};

use super::{
    DataplaneEntityFactory, Interface, LiveHost, LiveLink, LiveNode, NetworkRuntime, RuntimeError,
    RuntimeHandle, SwitchRef,
};
use crate::topology::{LinkSpec, NodeKind, TopologyDescription};

struct LiveSwitch {
    plugin: Box<dyn SwitchRef>,
    ports: Vec<Interface>,
}

/// Network runtime backed by a dataplane plugin
pub struct Emulator<F: DataplaneEntityFactory> {
    factory: F,
    hosts: Vec<LiveHost>,
    switches: Vec<LiveSwitch>,
    links: Vec<LiveLink>,
    running: bool,
}

impl<F: DataplaneEntityFactory> Emulator<F> {
    pub fn new(factory: F) -> Self {
        Emulator {
            factory,
            hosts: Vec::new(),
            switches: Vec::new(),
            links: Vec::new(),
            running: false,
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn build(&mut self, topology: &TopologyDescription) -> Result<RuntimeHandle, RuntimeError> {
        for spec in &topology.hosts {
            debug!("Creating host {} ({} {})", spec.name, spec.ip, spec.mac);
            let plugin = self.factory.create_host(spec)?;
            self.hosts.push(LiveHost::new(spec.clone(), plugin));
        }

        for spec in &topology.switches {
            debug!("Creating switch {} (device {}, grpc port {})", spec.name, spec.device_id, spec.control_port);
            let plugin = self.factory.create_switch(spec)?;
            self.switches.push(LiveSwitch { plugin, ports: Vec::new() });
        }

        for (a, b) in allocate_interfaces(topology) {
            debug!("Creating link {} <-> {}", a.name, b.name);
            self.factory.create_link(&a, &b)?;
            self.links.push(LiveLink { a, b });
        }

        let mut by_node: HashMap<&str, Vec<&Interface>> = HashMap::new();
        for link in &self.links {
            by_node.entry(link.a.node.as_str()).or_default().push(&link.a);
            by_node.entry(link.b.node.as_str()).or_default().push(&link.b);
        }
        for intfs in by_node.values_mut() {
            intfs.sort_by_key(|i| i.port);
        }

        for host in &mut self.hosts {
            let Some(intfs) = by_node.get(host.name()) else {
                warn!("Host {} has no links", host.name());
                continue;
            };
            for (i, intf) in intfs.iter().enumerate() {
                host.attach_interface(intf, i == 0)?;
            }
        }

        for switch in &mut self.switches {
            switch.ports = by_node
                .get(switch.plugin.name())
                .map(|intfs| intfs.iter().map(|i| (*i).clone()).collect())
                .unwrap_or_default();
            info!(
                "Starting switch {} with {} ports, gRPC port {}",
                switch.plugin.name(),
                switch.ports.len(),
                switch.plugin.control_port()
            );
            switch.plugin.start(&switch.ports)?;
        }

        Ok(self.snapshot())
    }

    fn snapshot(&self) -> RuntimeHandle {
        let hosts = self.hosts.iter().map(|h| (h.name().to_string(), NodeKind::Host));
        let switches = self
            .switches
            .iter()
            .map(|s| (s.plugin.name().to_string(), NodeKind::Switch));

        let nodes = hosts.chain(switches).map(|(name, kind)| {
            let mut interfaces: Vec<Interface> = self
                .links
                .iter()
                .flat_map(|l| [&l.a, &l.b])
                .filter(|i| i.node == name)
                .cloned()
                .collect();
            interfaces.sort_by_key(|i| i.port);
            LiveNode { name, kind, interfaces }
        });

        RuntimeHandle::new(nodes.collect::<Vec<_>>(), self.links.clone())
    }

    /// Release everything in reverse creation order, continuing past failures.
    fn release(&mut self) -> Result<(), RuntimeError> {
        let mut first_error = None;
        let mut record = |what: String, result: Result<(), RuntimeError>| {
            if let Err(e) = result {
                error!("Failed to stop {}: {}", what, e);
                first_error.get_or_insert(e);
            }
        };

        while let Some(mut switch) = self.switches.pop() {
            let name = switch.plugin.name().to_string();
            debug!("Stopping switch {}", name);
            record(format!("switch {}", name), switch.plugin.stop());
        }
        while let Some(link) = self.links.pop() {
            debug!("Deleting link {} <-> {}", link.a.name, link.b.name);
            record(
                format!("link {} <-> {}", link.a.name, link.b.name),
                self.factory.delete_link(&link.a, &link.b),
            );
        }
        while let Some(mut host) = self.hosts.pop() {
            debug!("Stopping host {}", host.name());
            record(format!("host {}", host.name()), host.stop());
        }

        self.running = false;
        first_error.map_or(Ok(()), Err)
    }
}

impl<F: DataplaneEntityFactory> NetworkRuntime for Emulator<F> {
    fn start(&mut self, topology: &TopologyDescription) -> Result<RuntimeHandle, RuntimeError> {
        if self.running {
            return Err(RuntimeError::AlreadyStarted);
        }

        info!(
            "Starting network: {} hosts, {} switches, {} links",
            topology.hosts.len(),
            topology.switches.len(),
            topology.links.len()
        );

        match self.build(topology) {
            Ok(handle) => {
                self.running = true;
                Ok(handle)
            }
            Err(e) => {
                error!("Network start failed: {}", e);
                if let Err(cleanup) = self.release() {
                    warn!("Cleanup after failed start was incomplete: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    fn live_host(&mut self, name: &str) -> Result<&mut LiveHost, RuntimeError> {
        self.hosts
            .iter_mut()
            .find(|h| h.name() == name)
            .ok_or_else(|| RuntimeError::UnknownHost(name.to_string()))
    }

    fn exec(&mut self, node: &str, command: &str) -> Result<String, RuntimeError> {
        if let Some(host) = self.hosts.iter_mut().find(|h| h.name() == node) {
            return host.exec(command);
        }
        if self.switches.iter().any(|s| s.plugin.name() == node) {
            return Err(RuntimeError::Unsupported(format!(
                "switch '{}' does not run commands",
                node
            )));
        }
        Err(RuntimeError::UnknownNode(node.to_string()))
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        if !self.running && self.hosts.is_empty() && self.switches.is_empty() && self.links.is_empty() {
            debug!("Network already stopped");
            return Ok(());
        }
        info!("Stopping network");
        self.release()
    }
}

impl<F: DataplaneEntityFactory> Drop for Emulator<F> {
    fn drop(&mut self) {
        if self.running {
            warn!("Emulator dropped while running, stopping network");
            if let Err(e) = self.release() {
                error!("Failed to stop network: {}", e);
            }
        }
    }
}

/// Resolve every link end to a concrete interface.
///
/// Explicit ports are kept. Missing ports get the lowest free index on their
/// node, counting from [`NodeKind::first_port`].
pub fn allocate_interfaces(topology: &TopologyDescription) -> Vec<(Interface, Interface)> {
    let mut used: HashMap<&str, BTreeSet<u16>> = HashMap::new();
    for LinkSpec { a, b } in &topology.links {
        for end in [a, b] {
            if let Some(port) = end.port {
                used.entry(end.node.as_str()).or_default().insert(port);
            }
        }
    }

    let mut resolved = Vec::with_capacity(topology.links.len());
    for LinkSpec { a, b } in &topology.links {
        let mut pair = Vec::with_capacity(2);
        for end in [a, b] {
            let kind = topology.kind_of(&end.node).unwrap_or(NodeKind::Host);
            let port = match end.port {
                Some(port) => port,
                None => {
                    let taken = used.entry(end.node.as_str()).or_default();
                    let mut port = kind.first_port();
                    while taken.contains(&port) {
                        port += 1;
                    }
                    taken.insert(port);
                    port
                }
            };
            pair.push(Interface::new(end.node.clone(), kind, port));
        }
        let b = pair.pop();
        let a = pair.pop();
        if let (Some(a), Some(b)) = (a, b) {
            resolved.push((a, b));
        }
    }
    resolved
}
