//! Network reachability gate queried before any work reaches the pool.
//!
//! The host environment owns the real signal (OS reachability callbacks,
//! link state, a settings toggle). The core only asks one question, once per
//! dispatch, on the caller's thread.

use crate::{Error, Result};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Boolean connectivity predicate supplied by the host environment.
///
/// # Errors
///
/// Implementations return [`Error::InvalidState`] when they cannot answer,
/// e.g. the environment handle they read from has been torn down.
pub trait Connectivity: Send + Sync {
    /// Returns whether an active network connection is available.
    fn is_connected(&self) -> Result<bool>;
}

/// Queries an optional gate, failing when none was supplied.
///
/// # Errors
///
/// Returns [`Error::InvalidState`] if `gate` is `None`, otherwise whatever the
/// gate itself returns.
pub fn is_connected(gate: Option<&dyn Connectivity>) -> Result<bool> {
    match gate {
        Some(gate) => gate.is_connected(),
        None => Err(Error::InvalidState {
            reason: "no connectivity gate supplied".to_string(),
        }),
    }
}

/// A connectivity gate backed by a shared flag.
///
/// Hosts flip the flag from their reachability callback; clones observe the
/// same state.
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
    connected: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    /// Creates a flag with the given initial state.
    pub fn new(connected: bool) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(connected)),
        }
    }

    /// Updates the reported connectivity.
    pub fn set(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Returns a gate that answers only while this flag is still alive.
    pub fn downgrade(&self) -> WeakConnectivity {
        WeakConnectivity {
            connected: Arc::downgrade(&self.connected),
        }
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_connected(&self) -> Result<bool> {
        Ok(self.connected.load(Ordering::Acquire))
    }
}

/// A gate that borrows its state from a [`ConnectivityFlag`] it does not own.
///
/// Once every owning flag is dropped the environment is considered gone and
/// queries fail with [`Error::InvalidState`].
#[derive(Debug, Clone)]
pub struct WeakConnectivity {
    connected: Weak<AtomicBool>,
}

impl Connectivity for WeakConnectivity {
    fn is_connected(&self) -> Result<bool> {
        self.connected
            .upgrade()
            .map(|flag| flag.load(Ordering::Acquire))
            .ok_or_else(|| Error::InvalidState {
                reason: "connectivity environment has been dropped".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_reports_latest_state_to_all_clones() {
        let flag = ConnectivityFlag::new(false);
        let clone = flag.clone();
        assert_eq!(clone.is_connected(), Ok(false));
        flag.set(true);
        assert_eq!(clone.is_connected(), Ok(true));
    }

    #[test]
    fn missing_gate_is_invalid_state() {
        assert!(matches!(is_connected(None), Err(Error::InvalidState { .. })));
        let flag = ConnectivityFlag::default();
        assert_eq!(is_connected(Some(&flag)), Ok(true));
    }

    #[test]
    fn weak_gate_fails_after_environment_drops() {
        let flag = ConnectivityFlag::new(true);
        let weak = flag.downgrade();
        assert_eq!(weak.is_connected(), Ok(true));
        drop(flag);
        assert!(matches!(
            weak.is_connected(),
            Err(Error::InvalidState { .. })
        ));
    }
}
