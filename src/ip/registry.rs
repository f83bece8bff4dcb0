//! Address registry.
//!
//! Tracks which host owns each IP and MAC address so that two hosts in one
//! topology never share an address.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use super::{Ipv4Cidr, MacAddr};

/// Kind of address that collided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Ip,
    Mac,
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressKind::Ip => f.write_str("IP"),
            AddressKind::Mac => f.write_str("MAC"),
        }
    }
}

/// An address that is already owned by another host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressConflict {
    pub kind: AddressKind,
    pub address: String,
    pub owner: String,
}

/// Registry of addresses assigned to hosts
#[derive(Debug, Default)]
pub struct AddressRegistry {
    /// IP -> host name
    ips: HashMap<Ipv4Addr, String>,
    /// MAC -> host name
    macs: HashMap<MacAddr, String>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that neither address is owned by another host.
    pub fn check(&self, host: &str, ip: &Ipv4Cidr, mac: &MacAddr) -> Result<(), AddressConflict> {
        if let Some(owner) = self.ips.get(&ip.addr()) {
            if owner != host {
                return Err(AddressConflict {
                    kind: AddressKind::Ip,
                    address: ip.addr().to_string(),
                    owner: owner.clone(),
                });
            }
        }
        if let Some(owner) = self.macs.get(mac) {
            if owner != host {
                return Err(AddressConflict {
                    kind: AddressKind::Mac,
                    address: mac.to_string(),
                    owner: owner.clone(),
                });
            }
        }
        Ok(())
    }

    /// Register both addresses for `host`, failing on the first conflict.
    pub fn register(&mut self, host: &str, ip: &Ipv4Cidr, mac: &MacAddr) -> Result<(), AddressConflict> {
        self.check(host, ip, mac)?;
        self.ips.insert(ip.addr(), host.to_string());
        self.macs.insert(*mac, host.to_string());
        Ok(())
    }

    /// Get the host that owns a given IP
    pub fn owner_of_ip(&self, ip: Ipv4Addr) -> Option<&str> {
        self.ips.get(&ip).map(String::as_str)
    }

    /// Get the host that owns a given MAC
    pub fn owner_of_mac(&self, mac: &MacAddr) -> Option<&str> {
        self.macs.get(mac).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}
