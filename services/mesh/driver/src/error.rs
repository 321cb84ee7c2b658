//! Driver bridge error types.

use thiserror::Error;

/// Errors surfaced by the driver bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The device could not be opened; fatal to service startup
    #[error("driver unavailable: {0}")]
    Unavailable(String),

    /// A bounded wait elapsed before the kernel completed the request
    #[error("listen wait timed out")]
    Timeout,

    /// The handle was closed while the request was pending
    #[error("operation cancelled")]
    Cancelled,

    /// The kernel completed the request with an error code
    #[error("device I/O failed with code {0}")]
    Io(u32),

    /// Listening requires a handle opened for asynchronous I/O
    #[error("handle not opened for asynchronous I/O")]
    Synchronous,

    /// The handle was already closed
    #[error("handle closed")]
    Closed,
}
