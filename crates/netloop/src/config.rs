use crate::{DEFAULT_ID_LENGTH, Error, Result};
use core::time::Duration;

/// Connect timeout used by the bundled HTTP transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Read timeout used by the bundled HTTP transport.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(7_000);

/// Size of the buffer each UDP receive loop reads datagrams into. Longer
/// datagrams are truncated.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;

/// Tunables shared by the dispatcher, the connection manager and the default
/// worker pool.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
    /// Length of the correlation id attached to each request and connection.
    pub id_length: usize,
    pub recv_buffer_size: usize,
    /// Threads in the worker pool created by the client builder.
    pub worker_threads: usize,
    /// How long a replaced pool may keep running in-flight work. `None` lets
    /// every in-flight task finish.
    pub shutdown_grace: Option<Duration>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: concat!("netloop/", env!("CARGO_PKG_VERSION")).to_string(),
            id_length: DEFAULT_ID_LENGTH,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            worker_threads: std::thread::available_parallelism().map_or(4, usize::from),
            shutdown_grace: None,
        }
    }
}

impl NetConfig {
    /// Rejects sizes that would make every id or datagram empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero `id_length` or
    /// `recv_buffer_size`.
    pub fn validate(&self) -> Result<()> {
        if self.id_length == 0 {
            return Err(Error::invalid_argument("id_length must be at least 1"));
        }
        if self.recv_buffer_size == 0 {
            return Err(Error::invalid_argument(
                "recv_buffer_size must be at least 1 byte",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(NetConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = NetConfig {
            recv_buffer_size: 0,
            ..NetConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument { .. })));

        let config = NetConfig {
            id_length: 0,
            ..NetConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument { .. })));
    }
}
