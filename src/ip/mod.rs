//! Addressing module.
//!
//! This module contains the address value types used in topology
//! declarations (interface addresses, MAC addresses, route directives) and
//! the registry that keeps host addresses unique within a topology.

pub mod cidr;
pub mod mac;
pub mod registry;
pub mod route;

// Re-export commonly used types
pub use cidr::Ipv4Cidr;
pub use mac::MacAddr;
pub use registry::{AddressConflict, AddressKind, AddressRegistry};
pub use route::RouteDirective;

/// Errors raised while parsing addresses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Invalid IPv4 interface address: {0}")]
    InvalidCidr(String),

    #[error("Invalid prefix length: {0}")]
    InvalidPrefix(u8),
}
