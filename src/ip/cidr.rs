//! IPv4 addresses with a prefix length, as assigned to host interfaces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::AddressError;

/// An interface address such as `10.0.1.2/24`.
///
/// A bare address without a prefix parses as a `/32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, AddressError> {
        if prefix_len > 32 {
            return Err(AddressError::InvalidPrefix(prefix_len));
        }
        Ok(Ipv4Cidr { addr, prefix_len })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Network address of the subnet this interface address belongs to
    pub fn network(&self) -> Ipv4Addr {
        let mask = if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        };
        Ipv4Addr::from(u32::from(self.addr) & mask)
    }

    /// Whether `ip` is on the same subnet as this address
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        Ipv4Cidr { addr: ip, prefix_len: self.prefix_len }.network() == self.network()
    }
}

impl FromStr for Ipv4Cidr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| AddressError::InvalidCidr(s.to_string()))?;
        let prefix_len = match prefix {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| AddressError::InvalidCidr(s.to_string()))?,
            None => 32,
        };

        Ipv4Cidr::new(addr, prefix_len)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}
