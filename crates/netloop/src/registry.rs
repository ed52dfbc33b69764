//! Registry of active UDP receive loops.
//!
//! Every loop started by a [`crate::UdpConnectionManager`] is registered here
//! before its task is submitted and removed when the task exits, however it
//! exits. [`ListenerRegistry::halt_all`] sweeps the registry and requests
//! cancellation of every loop still running.
//!
//! The map sits behind a single mutex, so a sweep and concurrent
//! registrations never observe a half-updated set. Loops registered after a
//! sweep took the lock are not affected by it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// A cancellable handle to one receive loop.
///
/// Cancellation is cooperative: [`ListenerHandle::cancel`] returns at once and
/// the loop closes its socket and exits on its own worker thread. Await
/// [`ListenerHandle::finished`] to observe the exit.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requests the loop to stop. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `true` once the loop has exited and closed its socket.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Completes when the loop has exited.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Tracks the handles of every running receive loop.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, ListenerHandle>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and records a handle for a loop about to start.
    pub(crate) fn register(self: &Arc<Self>) -> (ListenerHandle, RegistrationGuard) {
        let handle = ListenerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        };
        self.active.lock().insert(handle.id, handle.clone());

        let guard = RegistrationGuard {
            registry: Arc::clone(self),
            handle: handle.clone(),
        };
        (handle, guard)
    }

    /// Number of loops that have not exited yet.
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests cancellation of every registered loop that is neither finished
    /// nor already cancelled, and returns how many were newly cancelled.
    ///
    /// Does not wait for the loops to exit. Calling it again, or with no
    /// active loops, does nothing and returns `0`.
    pub fn halt_all(&self) -> usize {
        let active = self.active.lock();
        let mut halted = 0;
        for handle in active.values() {
            if !handle.is_finished() && !handle.is_cancelled() {
                handle.cancel();
                halted += 1;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(halted, active = active.len(), "Halted UDP receive loops");

        halted
    }
}

/// Removes a loop from the registry and marks it finished when dropped.
///
/// Held by the loop's task, so the entry is cleared whether the loop returns,
/// panics, or is dropped by a shutting-down pool.
pub(crate) struct RegistrationGuard {
    registry: Arc<ListenerRegistry>,
    handle: ListenerHandle,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.handle.id);
        self.handle.finished.cancel();
    }
}
