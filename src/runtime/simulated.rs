//! In-memory dataplane backend.
//!
//! Nothing is created on the machine. Every call is appended to a shared
//! [`SimJournal`], which makes this backend suitable for dry runs and tests.

use log::info;
use std::cell::RefCell;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::rc::Rc;

use super::{DataplaneEntityFactory, HostRef, Interface, RuntimeError, SwitchRef};
use crate::ip::{MacAddr, RouteDirective};
use crate::topology::{HostSpec, SwitchSpec};

/// Something the simulated backend was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    HostCreated(String),
    SwitchCreated(String),
    LinkCreated { a: String, b: String },
    InterfaceAttached { host: String, interface: String, default: bool },
    SwitchStarted { name: String, ports: Vec<String> },
    NeighborSet { host: String, ip: Ipv4Addr, mac: MacAddr },
    DefaultRouteSet { host: String, route: String },
    Exec { node: String, command: String },
    SwitchStopped(String),
    LinkDeleted { a: String, b: String },
    HostStopped(String),
}

/// Shared, append-only record of simulated actions
#[derive(Debug, Clone, Default)]
pub struct SimJournal(Rc<RefCell<Vec<SimEvent>>>);

impl SimJournal {
    fn push(&self, event: SimEvent) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.0.borrow().clone()
    }
}

/// Factory for simulated hosts and switches
#[derive(Debug, Default)]
pub struct SimulatedFactory {
    journal: SimJournal,
    failing_hosts: HashSet<String>,
    failing_switches: HashSet<String>,
}

impl SimulatedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> SimJournal {
        self.journal.clone()
    }

    /// Make creation of the named host fail
    pub fn fail_host_creation(mut self, name: impl Into<String>) -> Self {
        self.failing_hosts.insert(name.into());
        self
    }

    /// Make the named switch fail when started
    pub fn fail_switch_start(mut self, name: impl Into<String>) -> Self {
        self.failing_switches.insert(name.into());
        self
    }
}

impl DataplaneEntityFactory for SimulatedFactory {
    fn create_host(&mut self, spec: &HostSpec) -> Result<Box<dyn HostRef>, RuntimeError> {
        if self.failing_hosts.contains(&spec.name) {
            return Err(RuntimeError::Simulated(format!("cannot create host {}", spec.name)));
        }
        self.journal.push(SimEvent::HostCreated(spec.name.clone()));
        Ok(Box::new(SimulatedHost {
            name: spec.name.clone(),
            journal: self.journal.clone(),
        }))
    }

    fn create_switch(&mut self, spec: &SwitchSpec) -> Result<Box<dyn SwitchRef>, RuntimeError> {
        self.journal.push(SimEvent::SwitchCreated(spec.name.clone()));
        Ok(Box::new(SimulatedSwitch {
            name: spec.name.clone(),
            control_port: spec.control_port,
            fail_start: self.failing_switches.contains(&spec.name),
            journal: self.journal.clone(),
        }))
    }

    fn create_link(&mut self, a: &Interface, b: &Interface) -> Result<(), RuntimeError> {
        self.journal.push(SimEvent::LinkCreated { a: a.name.clone(), b: b.name.clone() });
        Ok(())
    }

    fn delete_link(&mut self, a: &Interface, b: &Interface) -> Result<(), RuntimeError> {
        self.journal.push(SimEvent::LinkDeleted { a: a.name.clone(), b: b.name.clone() });
        Ok(())
    }
}

struct SimulatedHost {
    name: String,
    journal: SimJournal,
}

impl HostRef for SimulatedHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach_interface(&mut self, intf: &Interface, default: bool) -> Result<String, RuntimeError> {
        // Mirrors the netns plugin, which renames the default interface
        let local = if default { "eth0".to_string() } else { intf.name.clone() };
        self.journal.push(SimEvent::InterfaceAttached {
            host: self.name.clone(),
            interface: local.clone(),
            default,
        });
        Ok(local)
    }

    fn set_static_neighbor(&mut self, ip: Ipv4Addr, mac: &MacAddr) -> Result<(), RuntimeError> {
        self.journal.push(SimEvent::NeighborSet { host: self.name.clone(), ip, mac: *mac });
        Ok(())
    }

    fn set_default_route(&mut self, route: &RouteDirective) -> Result<(), RuntimeError> {
        self.journal.push(SimEvent::DefaultRouteSet {
            host: self.name.clone(),
            route: route.as_str().to_string(),
        });
        Ok(())
    }

    fn exec(&mut self, command: &str) -> Result<String, RuntimeError> {
        info!("[simulated] {}: {}", self.name, command);
        self.journal.push(SimEvent::Exec { node: self.name.clone(), command: command.to_string() });
        Ok(String::new())
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        self.journal.push(SimEvent::HostStopped(self.name.clone()));
        Ok(())
    }
}

struct SimulatedSwitch {
    name: String,
    control_port: u16,
    fail_start: bool,
    journal: SimJournal,
}

impl SwitchRef for SimulatedSwitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn control_port(&self) -> u16 {
        self.control_port
    }

    fn start(&mut self, ports: &[Interface]) -> Result<(), RuntimeError> {
        if self.fail_start {
            return Err(RuntimeError::Simulated(format!("switch {} refused to start", self.name)));
        }
        self.journal.push(SimEvent::SwitchStarted {
            name: self.name.clone(),
            ports: ports.iter().map(|p| p.name.clone()).collect(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        self.journal.push(SimEvent::SwitchStopped(self.name.clone()));
        Ok(())
    }
}
