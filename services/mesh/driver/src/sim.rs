//! In-process driver simulation.
//!
//! Stands in for the kernel packet driver behind the [`DriverEndpoint`]
//! seam: outbound packets queued by the harness satisfy parked listens,
//! inbound injections are observable through a channel, and the allow/mesh
//! lists are real sets. Completions resolve on whichever task queues the
//! packet, so the waiter and the completer run on different tasks exactly
//! as they do against the real driver's completion threads.

use crate::error::DriverError;
use crate::handle::{ControlCode, DeviceChannel, DriverEndpoint, MeshRole};
use crate::request::Completion;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

struct SimState {
    /// Listens parked until an outbound packet shows up
    parked: Mutex<VecDeque<Completion>>,
    /// Outbound packets queued before anyone was listening
    backlog: Mutex<VecDeque<Bytes>>,
    /// Packets handed to the (simulated) host stack
    injected_tx: mpsc::UnboundedSender<Bytes>,
    allow_list: Mutex<HashSet<String>>,
    mesh_list: Mutex<HashSet<String>>,
    role: MeshRole,
}

/// Simulated packet driver for tests and local runs.
pub struct SimDriver {
    device_path: String,
    state: Arc<SimState>,
    injected_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl SimDriver {
    /// Create a simulated driver reachable at `device_path`, acting as the
    /// border router.
    pub fn new(device_path: &str) -> Self {
        Self::with_role(device_path, MeshRole::BorderRouter)
    }

    /// Create a simulated driver with an explicit mesh role.
    pub fn with_role(device_path: &str, role: MeshRole) -> Self {
        let (injected_tx, injected_rx) = mpsc::unbounded_channel();
        Self {
            device_path: device_path.to_string(),
            state: Arc::new(SimState {
                parked: Mutex::new(VecDeque::new()),
                backlog: Mutex::new(VecDeque::new()),
                injected_tx,
                allow_list: Mutex::new(HashSet::new()),
                mesh_list: Mutex::new(HashSet::new()),
                role,
            }),
            injected_rx: Mutex::new(Some(injected_rx)),
        }
    }

    /// Queue an outbound packet as if the kernel had intercepted it; the
    /// oldest parked listen completes with it.
    pub fn queue_outbound(&self, packet: &[u8]) {
        let completion = self.state.parked.lock().unwrap().pop_front();
        match completion {
            Some(completion) => {
                let written = completion.copy_from(packet);
                completion.complete_once(Ok(written));
            }
            None => {
                self.state
                    .backlog
                    .lock()
                    .unwrap()
                    .push_back(Bytes::copy_from_slice(packet));
            }
        }
    }

    /// Take the receiver observing inbound-injected packets. Panics if
    /// taken twice.
    pub fn injected_packets(&self) -> mpsc::UnboundedReceiver<Bytes> {
        self.injected_rx
            .lock()
            .unwrap()
            .take()
            .expect("injected-packet receiver already taken")
    }

    /// Whether the allow list currently holds `address`.
    pub fn allow_list_contains(&self, address: &std::net::Ipv6Addr) -> bool {
        self.state
            .allow_list
            .lock()
            .unwrap()
            .contains(&address.to_string())
    }

    /// Whether the mesh list currently holds `address`.
    pub fn mesh_list_contains(&self, address: &std::net::Ipv6Addr) -> bool {
        self.state
            .mesh_list
            .lock()
            .unwrap()
            .contains(&address.to_string())
    }
}

impl DriverEndpoint for SimDriver {
    fn open(&self, path: &str, async_io: bool) -> Result<Arc<dyn DeviceChannel>, DriverError> {
        if path != self.device_path {
            return Err(DriverError::Unavailable(format!(
                "no device at {path}"
            )));
        }
        debug!(path, async_io, "opened simulated device");
        Ok(Arc::new(SimChannel {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SimChannel {
    state: Arc<SimState>,
    closed: AtomicBool,
}

impl DeviceChannel for SimChannel {
    fn submit_listen(&self, completion: Completion) -> Result<(), DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }

        // A queued packet satisfies the listen immediately; otherwise it
        // parks until one arrives or the handle closes.
        let backlogged = self.state.backlog.lock().unwrap().pop_front();
        match backlogged {
            Some(packet) => {
                let written = completion.copy_from(&packet);
                completion.complete_once(Ok(written));
            }
            None => self.state.parked.lock().unwrap().push_back(completion),
        }
        Ok(())
    }

    fn control(&self, code: ControlCode, payload: &[u8]) -> Result<Vec<u8>, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }

        let text = || String::from_utf8_lossy(payload).into_owned();
        match code {
            ControlCode::InjectInbound | ControlCode::InjectOutbound => {
                self.state
                    .injected_tx
                    .send(Bytes::copy_from_slice(payload))
                    .map_err(|_| DriverError::Io(1))?;
            }
            ControlCode::AddToAllowList => {
                self.state.allow_list.lock().unwrap().insert(text());
            }
            ControlCode::RemoveFromAllowList => {
                self.state.allow_list.lock().unwrap().remove(&text());
            }
            ControlCode::PurgeAllowList => {
                self.state.allow_list.lock().unwrap().clear();
            }
            ControlCode::AddToMeshList => {
                self.state.mesh_list.lock().unwrap().insert(text());
            }
            ControlCode::RemoveFromMeshList => {
                self.state.mesh_list.lock().unwrap().remove(&text());
            }
            ControlCode::PurgeMeshList => {
                self.state.mesh_list.lock().unwrap().clear();
            }
            ControlCode::QueryMeshRole => {
                let role = match self.state.role {
                    MeshRole::BorderRouter => 1u8,
                    MeshRole::Node => 0u8,
                };
                return Ok(vec![role]);
            }
            ControlCode::ListenInbound => return Err(DriverError::Synchronous),
        }
        Ok(Vec::new())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Abandon pending listens; each still resolves exactly once so the
        // owned buffers are released.
        let parked: Vec<Completion> = self.state.parked.lock().unwrap().drain(..).collect();
        for completion in parked {
            completion.try_cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{DeviceHandle, ListOp};
    use std::time::Duration;

    #[tokio::test]
    async fn test_queued_packet_satisfies_listen() {
        let driver = SimDriver::new("ipv6-mesh0");
        let handle = DeviceHandle::open(&driver, "ipv6-mesh0", true).unwrap();
        let request = handle.begin_listen().unwrap();

        driver.queue_outbound(b"intercepted packet");
        let bytes = request.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&bytes[..], b"intercepted packet");
    }

    #[tokio::test]
    async fn test_backlogged_packet_completes_new_listen() {
        let driver = SimDriver::new("ipv6-mesh0");
        driver.queue_outbound(b"early packet");

        let handle = DeviceHandle::open(&driver, "ipv6-mesh0", true).unwrap();
        let request = handle.begin_listen().unwrap();
        let bytes = request.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&bytes[..], b"early packet");
    }

    #[tokio::test]
    async fn test_listens_complete_in_order() {
        let driver = SimDriver::new("ipv6-mesh0");
        let handle = DeviceHandle::open(&driver, "ipv6-mesh0", true).unwrap();
        let first = handle.begin_listen().unwrap();
        let second = handle.begin_listen().unwrap();

        driver.queue_outbound(b"one");
        driver.queue_outbound(b"two");

        assert_eq!(&first.wait(Duration::from_secs(1)).await.unwrap()[..], b"one");
        assert_eq!(&second.wait(Duration::from_secs(1)).await.unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn test_inject_inbound_is_observable() {
        let driver = SimDriver::new("ipv6-mesh0");
        let mut injected = driver.injected_packets();

        let handle = DeviceHandle::open(&driver, "ipv6-mesh0", false).unwrap();
        assert!(handle.inject_inbound(b"delivered locally"));

        let packet = injected.recv().await.unwrap();
        assert_eq!(&packet[..], b"delivered locally");
    }

    #[tokio::test]
    async fn test_mesh_list_maintenance() {
        let driver = SimDriver::new("ipv6-mesh0");
        let address: std::net::Ipv6Addr = "fe80::291:a8ff:feeb:27b8".parse().unwrap();

        let handle = DeviceHandle::open(&driver, "ipv6-mesh0", false).unwrap();
        assert!(handle.mutate_list(ListOp::MeshAdd, &address));
        assert!(driver.mesh_list_contains(&address));

        let handle = DeviceHandle::open(&driver, "ipv6-mesh0", false).unwrap();
        assert!(handle.mutate_list(ListOp::MeshRemove, &address));
        assert!(!driver.mesh_list_contains(&address));
    }

    #[tokio::test]
    async fn test_query_mesh_role() {
        let driver = SimDriver::with_role("ipv6-mesh0", MeshRole::Node);
        let handle = DeviceHandle::open(&driver, "ipv6-mesh0", false).unwrap();
        assert_eq!(handle.query_mesh_role().unwrap(), MeshRole::Node);
    }
}
