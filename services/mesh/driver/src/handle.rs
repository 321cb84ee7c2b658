//! Device handles and control calls.
//!
//! A handle opened for asynchronous I/O feeds listen requests; a handle
//! opened synchronously carries one blocking control call and is closed on
//! return. The control surface mirrors the packet driver's interface:
//! listen, inbound/outbound injection, allow-list and mesh-list
//! maintenance, and the mesh-role query.

use crate::error::DriverError;
use crate::request::{Completion, ListenRequest};
use crate::MAX_LISTEN_BYTES;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Control operations understood by the packet driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// Park a listen until an outbound packet arrives (asynchronous)
    ListenInbound,
    /// Hand a packet to the host stack as inbound traffic
    InjectInbound,
    /// Hand a packet to the host stack as outbound traffic
    InjectOutbound,
    /// Add an address to the allow list
    AddToAllowList,
    /// Remove an address from the allow list
    RemoveFromAllowList,
    /// Purge the allow list
    PurgeAllowList,
    /// Add an address to the mesh list
    AddToMeshList,
    /// Remove an address from the mesh list
    RemoveFromMeshList,
    /// Purge the mesh list
    PurgeMeshList,
    /// Query whether this device is the border router
    QueryMeshRole,
}

/// Allow-list / mesh-list mutation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOp {
    /// Add to the allow list
    AllowAdd,
    /// Remove from the allow list
    AllowRemove,
    /// Add to the mesh list
    MeshAdd,
    /// Remove from the mesh list
    MeshRemove,
}

impl ListOp {
    fn control_code(self) -> ControlCode {
        match self {
            ListOp::AllowAdd => ControlCode::AddToAllowList,
            ListOp::AllowRemove => ControlCode::RemoveFromAllowList,
            ListOp::MeshAdd => ControlCode::AddToMeshList,
            ListOp::MeshRemove => ControlCode::RemoveFromMeshList,
        }
    }
}

/// Role of this device in the mesh, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshRole {
    /// Bridges the mesh into the host's uplink network
    BorderRouter,
    /// Relays and terminates packets inside the mesh only
    Node,
}

/// Factory for device channels; the user-space face of the installed
/// driver. Implemented by the in-process simulator and, on a real
/// deployment, by the platform binding.
pub trait DriverEndpoint: Send + Sync {
    /// Open the device at `path`. `async_io` selects overlapped completion
    /// for listening; synchronous handles serve one-shot control calls.
    fn open(&self, path: &str, async_io: bool) -> Result<Arc<dyn DeviceChannel>, DriverError>;
}

/// One opened device. Completions resolve on the driver's threads, not the
/// caller's.
pub trait DeviceChannel: Send + Sync {
    /// Submit a parked listen; the channel resolves the completion when a
    /// packet arrives, the operation fails, or the handle is closed.
    fn submit_listen(&self, completion: Completion) -> Result<(), DriverError>;

    /// Blocking control call with an opaque payload, returning the
    /// driver's output bytes.
    fn control(&self, code: ControlCode, payload: &[u8]) -> Result<Vec<u8>, DriverError>;

    /// Abandon pending operations; in-flight completions still resolve.
    fn close(&self);
}

/// A handle to the packet driver device.
pub struct DeviceHandle {
    channel: Arc<dyn DeviceChannel>,
    async_io: bool,
    closed: AtomicBool,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("async_io", &self.async_io)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl DeviceHandle {
    /// Open the device, failing with [`DriverError::Unavailable`] when it
    /// cannot be reached.
    pub fn open(
        endpoint: &dyn DriverEndpoint,
        path: &str,
        async_io: bool,
    ) -> Result<Self, DriverError> {
        let channel = endpoint.open(path, async_io)?;
        Ok(Self {
            channel,
            async_io,
            closed: AtomicBool::new(false),
        })
    }

    /// Issue a listen request for up to [`MAX_LISTEN_BYTES`] and return
    /// immediately. The request owns the buffer the kernel will fill.
    pub fn begin_listen(&self) -> Result<ListenRequest, DriverError> {
        if !self.async_io {
            return Err(DriverError::Synchronous);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }

        let (request, completion) = ListenRequest::new(MAX_LISTEN_BYTES);
        self.channel.submit_listen(completion)?;
        Ok(request)
    }

    /// Close the handle, signalling the driver to abandon pending
    /// operations. Every outstanding listen still resolves exactly once,
    /// with [`DriverError::Cancelled`], so no buffer leaks. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.channel.close();
        }
    }

    /// Blocking control call; the handle is closed on return regardless of
    /// the outcome. Returns whether the driver accepted the operation.
    pub fn synchronous_control(&self, code: ControlCode, payload: &[u8]) -> bool {
        if self.closed.load(Ordering::Acquire) {
            warn!(?code, "control call on a closed handle");
            return false;
        }

        let result = self.channel.control(code, payload);
        self.close();

        match result {
            Ok(_) => true,
            Err(err) => {
                warn!(?code, %err, "synchronous control call failed");
                false
            }
        }
    }

    /// Hand a packet to the host stack as inbound traffic. Consumes the
    /// handle's single synchronous control call.
    pub fn inject_inbound(&self, packet: &[u8]) -> bool {
        self.synchronous_control(ControlCode::InjectInbound, packet)
    }

    /// Hand a packet to the host stack as outbound traffic.
    pub fn inject_outbound(&self, packet: &[u8]) -> bool {
        self.synchronous_control(ControlCode::InjectOutbound, packet)
    }

    /// Allow-list / mesh-list maintenance; the address travels as text.
    pub fn mutate_list(&self, op: ListOp, address: &Ipv6Addr) -> bool {
        debug!(?op, %address, "mutating driver list");
        self.synchronous_control(op.control_code(), address.to_string().as_bytes())
    }

    /// Ask the driver whether this device is the border router.
    pub fn query_mesh_role(&self) -> Result<MeshRole, DriverError> {
        let output = self.channel.control(ControlCode::QueryMeshRole, &[]);
        self.close();

        let output = output?;
        match output.first() {
            Some(1) => Ok(MeshRole::BorderRouter),
            _ => Ok(MeshRole::Node),
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}
