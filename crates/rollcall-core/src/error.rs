//! Error types for rollcall-core.
//!
//! Slot and roster operations do not fail; these cover configuration and
//! decoding updates off the wire.

use thiserror::Error;

/// Result type for rollcall-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the membership protocol itself.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value was missing, unparsable or out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An inbound update could not be decoded.
    #[error("wire error: {0}")]
    Wire(#[from] rollcall_replica::WireError),
}
