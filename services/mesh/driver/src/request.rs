//! Listen requests and their exactly-once completion.
//!
//! A listen request owns the buffer the kernel will eventually fill. The
//! buffer must not move or be freed while the operation is in flight, so it
//! sits in a slot that only the completion path may empty, and the
//! completion fires exactly once: a second completion attempt is a contract
//! violation on the kernel side and panics rather than being ignored.
//!
//! State machine: `Pending -> Completed(Ok | Err)`, one transition, ever.

use crate::error::DriverError;
use crate::MAX_LISTEN_BYTES;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

struct RequestShared {
    /// Owned kernel-visible buffer; emptied exactly once on completion
    buffer: Mutex<Option<BytesMut>>,
    /// Stored outcome, set by the single completion
    result: Mutex<Option<Result<Bytes, DriverError>>>,
    /// Pending -> Completed latch
    completed: AtomicBool,
    notify: Notify,
}

impl RequestShared {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Some(BytesMut::zeroed(capacity))),
            result: Mutex::new(None),
            completed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn store(&self, outcome: Result<usize, DriverError>) {
        let buffer = self
            .buffer
            .lock()
            .unwrap()
            .take()
            .expect("listen buffer released twice");

        let result = match outcome {
            Ok(len) => {
                let mut buffer = buffer;
                buffer.truncate(len);
                Ok(buffer.freeze())
            }
            // The buffer is dropped here; failure still releases it.
            Err(err) => Err(err),
        };

        *self.result.lock().unwrap() = Some(result);
        self.notify.notify_waiters();
    }
}

/// One outstanding kernel read, owning its buffer until completion.
pub struct ListenRequest {
    shared: Arc<RequestShared>,
}

impl std::fmt::Debug for ListenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenRequest").finish_non_exhaustive()
    }
}

impl ListenRequest {
    /// Create a request with its owned buffer and the completion the kernel
    /// side will resolve it through.
    pub fn new(capacity: usize) -> (Self, Completion) {
        let capacity = capacity.min(MAX_LISTEN_BYTES);
        let shared = Arc::new(RequestShared::new(capacity));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Completion { shared },
        )
    }

    /// Block up to `timeout` for the completion. A timeout leaves the
    /// request valid: the caller must still eventually observe or cancel
    /// it. Waiting on a completed request returns the stored result
    /// immediately.
    pub async fn wait(&self, timeout: Duration) -> Result<Bytes, DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking so a completion landing
            // between the check and the sleep is not lost.
            notified.as_mut().enable();

            if let Some(result) = self.shared.result.lock().unwrap().clone() {
                return result;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("listen wait elapsed with no completion");
                return Err(DriverError::Timeout);
            }
        }
    }

    /// Whether the single completion has been observed.
    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Cancel the request if still pending, resolving it with
    /// [`DriverError::Cancelled`]. Idempotent; a no-op after completion.
    pub fn cancel(&self) {
        if self
            .shared
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.store(Err(DriverError::Cancelled));
        }
    }
}

/// The kernel-side half of a listen request. The kernel writes into the
/// owned buffer and then resolves the request exactly once.
pub struct Completion {
    shared: Arc<RequestShared>,
}

impl Completion {
    /// Copy packet bytes into the owned buffer, returning how many fit.
    /// Writing after completion is a no-op returning zero.
    pub fn copy_from(&self, data: &[u8]) -> usize {
        match self.shared.buffer.lock().unwrap().as_mut() {
            Some(buffer) => {
                let len = data.len().min(buffer.len());
                buffer[..len].copy_from_slice(&data[..len]);
                len
            }
            None => 0,
        }
    }

    /// Resolve the request: `Ok(len)` freezes the buffer to `len` bytes,
    /// an error releases it. Calling this twice is a kernel contract
    /// violation and panics.
    pub fn complete_once(&self, outcome: Result<usize, DriverError>) {
        if self.shared.completed.swap(true, Ordering::AcqRel) {
            panic!("listen request completed twice");
        }
        self.shared.store(outcome);
    }

    /// Resolve with [`DriverError::Cancelled`] unless already completed.
    /// Used on the handle-close path, where racing an in-flight kernel
    /// completion is expected rather than fatal.
    pub fn try_cancel(&self) -> bool {
        if self
            .shared
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.store(Err(DriverError::Cancelled));
            true
        } else {
            false
        }
    }

    /// Whether a listen buffer is still held. After completion this is
    /// always false; the buffer is released on the completion path.
    pub fn holds_buffer(&self) -> bool {
        self.shared.buffer.lock().unwrap().is_some()
    }
}
