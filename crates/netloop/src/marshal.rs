//! Redirects listener calls onto the home execution context.
//!
//! [`CallbackMarshaler::wrap`] returns a [`Marshaled`] listener with the same
//! shape as the one it wraps. Each method call captures its arguments, posts a
//! task to the [`HomeScheduler`] and returns immediately; the task invokes the
//! wrapped listener on the home context. Calls through one wrapper are
//! delivered in the order they were made.

use crate::{
    Error, HomeScheduler, Packet, RequestListener, UdpConnection, UdpListener,
};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;

/// Produces home-bound wrappers around caller listeners.
#[derive(Clone)]
pub struct CallbackMarshaler {
    home: Arc<dyn HomeScheduler>,
}

impl CallbackMarshaler {
    pub fn new(home: Arc<dyn HomeScheduler>) -> Self {
        Self { home }
    }

    /// Wraps `listener` so every call is forwarded through the home context.
    pub fn wrap<L>(&self, listener: Arc<L>) -> Marshaled<L>
    where
        L: ?Sized + Send + Sync + 'static,
    {
        Marshaled {
            inner: listener,
            home: Arc::clone(&self.home),
        }
    }

    /// Runs `task` on the home context.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.home.post(Box::new(task));
    }
}

/// A listener whose calls are replayed on the home context.
pub struct Marshaled<L: ?Sized> {
    inner: Arc<L>,
    home: Arc<dyn HomeScheduler>,
}

impl<L: ?Sized> Clone for Marshaled<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            home: Arc::clone(&self.home),
        }
    }
}

impl<L> Marshaled<L>
where
    L: ?Sized + Send + Sync + 'static,
{
    /// The listener calls are forwarded to.
    pub fn inner(&self) -> &Arc<L> {
        &self.inner
    }

    fn forward(&self, call: impl FnOnce(&L) + Send + 'static) {
        let inner = Arc::clone(&self.inner);
        self.home.post(Box::new(move || call(&inner)));
    }
}

impl<L> RequestListener for Marshaled<L>
where
    L: ?Sized + RequestListener,
{
    fn on_success(&self, body: Value) {
        self.forward(move |l| l.on_success(body));
    }

    fn on_error(&self, body: Value, status: StatusCode) {
        self.forward(move |l| l.on_error(body, status));
    }

    fn on_failure(&self, error: Error) {
        self.forward(move |l| l.on_failure(error));
    }
}

impl<L> UdpListener for Marshaled<L>
where
    L: ?Sized + UdpListener,
{
    fn on_connect(&self, connection: UdpConnection) {
        self.forward(move |l| l.on_connect(connection));
    }

    fn on_error(&self, error: Error) {
        self.forward(move |l| l.on_error(error));
    }

    fn on_receive(&self, packet: Packet) {
        self.forward(move |l| l.on_receive(packet));
    }
}
