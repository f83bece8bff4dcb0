//! Shared utilities.

pub mod binary;
pub mod signals;

pub use binary::{resolve_binary_path, validate_binary, validate_binary_spec, BinaryError};
pub use signals::SignalFlags;
