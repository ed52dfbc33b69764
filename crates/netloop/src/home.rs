//! The home execution context: a single logical thread on which every
//! listener callback is observed.
//!
//! [`home_context`] returns a cloneable [`HomeHandle`] that any thread may post
//! work to, and the [`HomeLoop`] that drains it. The host decides where the
//! loop runs: on its main thread, on a dedicated thread via
//! [`HomeLoop::spawn`], or inside its own async task with
//! [`HomeLoop::run_async`].
//!
//! Tasks from one handle run in the order they were posted. The loop runs
//! until every handle has been dropped.

use std::{io, thread};
use tokio::sync::mpsc;

/// A zero-argument unit of work destined for the home context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts work and guarantees it eventually runs on the home context,
/// preserving submission order per submitter.
///
/// Posting must never block the calling thread.
pub trait HomeScheduler: Send + Sync {
    /// Enqueues `task` for execution on the home context.
    fn post(&self, task: Task);
}

/// Creates a connected handle/loop pair backed by an unbounded queue.
pub fn home_context() -> (HomeHandle, HomeLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HomeHandle { tx }, HomeLoop { rx })
}

/// Posting side of the home context.
#[derive(Clone, Debug)]
pub struct HomeHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl HomeHandle {
    /// Returns `true` once the [`HomeLoop`] has been dropped; posted tasks
    /// are discarded from then on.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl HomeScheduler for HomeHandle {
    fn post(&self, task: Task) {
        if self.tx.send(task).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Home loop is gone, dropping callback");
        }
    }
}

/// Draining side of the home context.
#[derive(Debug)]
pub struct HomeLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl HomeLoop {
    /// Runs tasks on the current thread until every [`HomeHandle`] is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; use
    /// [`HomeLoop::run_async`] there instead.
    pub fn run(mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Home loop started");

        while let Some(task) = self.rx.blocking_recv() {
            task();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Home loop stopped");
    }

    /// Runs tasks inside the calling task until every [`HomeHandle`] is
    /// dropped.
    pub async fn run_async(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
    }

    /// Runs every task that is already queued and returns how many ran.
    ///
    /// Never waits for new work, which makes it suitable for hosts that pump
    /// the queue from their own frame loop.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Moves the loop onto a dedicated, named OS thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread could not be spawned.
    pub fn spawn(self, name: &str) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run())
    }
}
