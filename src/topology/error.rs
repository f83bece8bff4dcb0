//! Topology construction errors.

use crate::ip::{AddressError, AddressKind};
use crate::runtime::RuntimeError;

use super::types::TopologyState;

/// Errors raised while declaring, materializing or configuring a topology.
///
/// Everything except `Runtime` is a mistake in the topology description and
/// is never retried.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Name '{0}' is already declared in this topology")]
    DuplicateName(String),

    #[error("Control port {port} for switch '{switch}' is already assigned to switch '{owner}'")]
    PortConflict { switch: String, port: u16, owner: String },

    #[error("Device id {device_id} for switch '{switch}' is already assigned to switch '{owner}'")]
    DuplicateDeviceId { switch: String, device_id: u64, owner: String },

    #[error("Link endpoint '{0}' has not been declared")]
    UnknownEndpoint(String),

    #[error("Host '{0}' is not declared in this topology")]
    UnknownHost(String),

    #[error("Topology has not been materialized")]
    NotMaterialized,

    #[error("Topology has already been materialized")]
    AlreadyMaterialized,

    #[error("Cannot materialize an empty topology")]
    EmptyTopology,

    #[error("Cannot {operation} while the topology is {state}")]
    InvalidState { operation: &'static str, state: TopologyState },

    #[error("Invalid port on link {link}: {reason}")]
    InvalidPort { link: String, reason: String },

    #[error("Port {port} on '{node}' is already used by another link")]
    PortInUse { node: String, port: u16 },

    #[error("Link from '{0}' to itself")]
    SelfLink(String),

    #[error("Invalid address for host '{host}': {source}")]
    InvalidAddress {
        host: String,
        #[source]
        source: AddressError,
    },

    #[error("{kind} address {address} of host '{host}' is already used by host '{owner}'")]
    DuplicateAddress { host: String, kind: AddressKind, address: String, owner: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
