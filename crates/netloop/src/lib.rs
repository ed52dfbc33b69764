//! Asynchronous HTTP dispatch and UDP receive loops on a shared worker pool,
//! with every listener callback delivered on a single home execution context.
//!
//! ```no_run
//! use netloop::{ConnectivityFlag, Endpoint, Error, NetClient, RequestListener, home_context};
//! use reqwest::StatusCode;
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl RequestListener for Print {
//!     fn on_success(&self, body: Value) {
//!         println!("ok: {body}");
//!     }
//!     fn on_error(&self, body: Value, status: StatusCode) {
//!         println!("{status}: {body}");
//!     }
//!     fn on_failure(&self, error: Error) {
//!         println!("failed: {error}");
//!     }
//! }
//!
//! # fn main() -> netloop::Result<()> {
//! let (home, home_loop) = home_context();
//! let client = NetClient::builder()
//!     .connectivity(ConnectivityFlag::new(true))
//!     .home(home)
//!     .build()?;
//!
//! client
//!     .dispatcher()
//!     .send_get(&Endpoint::new("https://example.com/api").query("q", "rust"), Arc::new(Print));
//!
//! drop(client);
//! home_loop.run();
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod connectivity;
mod correlation;
mod dispatcher;
mod error;
mod home;
mod listener;
mod marshal;
mod pool;
mod rand;
mod registry;
mod request;
mod transport;
mod udp;

#[cfg(test)]
mod tests;

pub use crate::client::*;
pub use crate::config::*;
pub use crate::connectivity::*;
pub use crate::correlation::*;
pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::home::*;
pub use crate::listener::*;
pub use crate::marshal::*;
pub use crate::pool::*;
pub use crate::rand::*;
pub use crate::registry::*;
pub use crate::request::*;
pub use crate::transport::*;
pub use crate::udp::*;
