//! Transport error types.
//!
//! A transmission attempt walks discovery, connection, service
//! verification, and the three writes; the error names the phase that
//! failed so per-neighbor log lines say something useful.

use thiserror::Error;

/// Errors from a single transmission attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer was not advertising / could not be discovered
    #[error("peer not discoverable")]
    Discovery,

    /// Connecting to the discovered peer failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// The peer does not expose the packet-processing service
    #[error("packet service not available on peer")]
    ServiceVerification,

    /// One of the three field writes failed
    #[error("write of {0} rejected by peer")]
    Write(&'static str),

    /// The attempt exceeded its bounded wait
    #[error("transmission attempt timed out")]
    Timeout,
}
