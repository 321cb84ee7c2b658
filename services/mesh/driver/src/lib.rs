//! User-space bridge to the kernel packet driver.
//!
//! The kernel side intercepts outbound IPv6 packets and parks them until
//! user mode asks for one. This crate wraps that interface: a device handle
//! opened for synchronous control calls or asynchronous listening, a listen
//! request whose owned buffer lives exactly as long as the kernel may write
//! into it, and a completion object that fires exactly once.
//!
//! Driver internals are out of scope; the seam is the [`DriverEndpoint`] /
//! [`DeviceChannel`] trait pair, and [`sim::SimDriver`] provides an
//! in-process implementation for tests and simulation runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handle;
pub mod request;
pub mod sim;

pub use error::DriverError;
pub use handle::{ControlCode, DeviceChannel, DeviceHandle, DriverEndpoint, ListOp, MeshRole};
pub use request::{Completion, ListenRequest};

/// Largest buffer a listen request may ask the driver for; larger requests
/// are rejected at the kernel boundary.
pub const MAX_LISTEN_BYTES: usize = 1280;
