//! Worker pool shared by HTTP dispatches and UDP receive loops.
//!
//! [`WorkerPool`] runs submitted futures on a multi-threaded Tokio runtime and
//! tracks them in a [`TaskTracker`]. The submission queue is unbounded: a busy
//! pool delays work but never rejects it. Only a pool that has been shut down
//! refuses new work.
//!
//! Shutting down is non-blocking. The tracker is closed to new work and, when
//! the pool owns its runtime, a reaper thread lets in-flight tasks run to
//! completion before dropping the runtime. With a bounded grace the reaper
//! gives up after it and the remaining tasks are dropped; each task carries an
//! [`AbandonNotice`] so its listener still hears about it.

use crate::{Error, Result};
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use parking_lot::Mutex;
use std::thread;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// A cloneable pool of worker threads for blocking network I/O.
pub struct WorkerPool {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    tracker: TaskTracker,
    submitted: AtomicUsize,
    shutdown_grace: Option<Duration>,
}

impl WorkerPool {
    /// Builds a pool that owns a multi-threaded runtime with `worker_threads`
    /// threads.
    ///
    /// `shutdown_grace` bounds how long a shut-down pool keeps running its
    /// in-flight tasks. `None` waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for zero threads and
    /// [`Error::InvalidState`] if the runtime cannot be created.
    pub fn new(worker_threads: usize, shutdown_grace: Option<Duration>) -> Result<Self> {
        if worker_threads == 0 {
            return Err(Error::invalid_argument("worker pool needs at least one thread"));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("netloop-worker")
            .enable_io()
            .enable_time()
            .build()
            .map_err(|e| Error::InvalidState {
                reason: format!("failed to build worker runtime: {e}"),
            })?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            tracker: TaskTracker::new(),
            submitted: AtomicUsize::new(0),
            shutdown_grace,
        })
    }

    /// Wraps a runtime owned by the host. Shutting the pool down stops
    /// submissions but leaves the runtime itself alone.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: Mutex::new(None),
            tracker: TaskTracker::new(),
            submitted: AtomicUsize::new(0),
            shutdown_grace: None,
        }
    }

    /// Submits a unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolShutdown`] if the pool has been shut down.
    pub fn spawn<F>(&self, task: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(Error::PoolShutdown);
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(self.tracker.spawn_on(task, &self.handle))
    }

    /// Number of tasks ever accepted by this pool.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Number of accepted tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stops accepting work and releases the runtime once in-flight tasks
    /// finish or the grace period, if any, elapses. Never blocks the caller.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.tracker.close() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(in_flight = self.tracker.len(), "Shutting down worker pool");

        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        let tracker = self.tracker.clone();
        let grace = self.shutdown_grace;
        let reaper = thread::Builder::new()
            .name("netloop-reaper".to_string())
            .spawn(move || reap(runtime, &tracker, grace));

        if let Err(_e) = reaper {
            // The runtime was moved into the failed closure and dropped with
            // it, which cancels whatever was still running.
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to spawn pool reaper: {_e}");
        }
    }
}

fn reap(runtime: Runtime, tracker: &TaskTracker, grace: Option<Duration>) {
    let drained = runtime.block_on(async {
        match grace {
            Some(grace) => tokio::time::timeout(grace, tracker.wait()).await,
            None => {
                tracker.wait().await;
                Ok(())
            }
        }
    });
    match drained {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker pool drained");
        }
        Err(_) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                remaining = tracker.len(),
                "Worker pool drain timed out, dropping remaining tasks"
            );
        }
    }
    runtime.shutdown_background();
}

/// Runs a report if the task that owns it is dropped before [`disarm`].
///
/// A task dropped by a pool whose grace ran out still gets to tell its
/// listener that it will not finish.
///
/// [`disarm`]: AbandonNotice::disarm
pub(crate) struct AbandonNotice {
    report: Option<Box<dyn FnOnce() + Send>>,
}

impl AbandonNotice {
    pub(crate) fn new(report: impl FnOnce() + Send + 'static) -> Self {
        Self {
            report: Some(Box::new(report)),
        }
    }

    /// The task reached its own terminal report.
    pub(crate) fn disarm(mut self) {
        self.report = None;
    }
}

impl Drop for AbandonNotice {
    fn drop(&mut self) {
        if let Some(report) = self.report.take() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Task dropped before finishing");
            report();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("submitted", &self.submitted())
            .field("in_flight", &self.in_flight())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
