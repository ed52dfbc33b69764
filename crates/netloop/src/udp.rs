//! UDP connections and their background receive loops.
//!
//! [`UdpConnectionManager::open`] resolves, binds, and connects a socket on
//! the worker pool and hands the resulting [`UdpConnection`] to
//! `on_connect`. [`UdpConnectionManager::listen`] starts a receive loop that
//! reports each datagram through `on_receive` until it is cancelled.
//!
//! ## Receive loop states
//!
//! `Created → Running → {Cancelled, Closed, ClosedOnError, Abandoned}`
//!
//! - `Running` loops on every datagram and on every non-fatal receive error.
//! - `Cancelled`: its [`ListenerHandle`] was cancelled, directly or through
//!   [`UdpConnectionManager::halt_all`]. Exits silently.
//! - `Closed`: some holder of the connection called
//!   [`UdpConnection::close`]. Exits silently.
//! - `ClosedOnError`: the socket became unusable; reported once via
//!   `on_error`. The same error coming back [`MAX_REPEATED_ERRORS`] times
//!   with no datagram in between counts as unusable too.
//! - `Abandoned`: the worker pool dropped the loop before it ended, e.g.
//!   after a bounded shutdown grace ran out. Reported once via `on_error` as
//!   [`Error::PoolShutdown`].
//!
//! Every terminal state closes the connection exactly once, so callers holding
//! a clone observe it as closed. Cancellation also interrupts a receive that
//! is already pending, and callbacks that were queued but not yet delivered
//! when the loop was cancelled are discarded on the home context.

use crate::{
    Error, ListenerHandle, ListenerRegistry, Result, UdpListener, client::Shared,
    pool::AbandonNotice, registry::RegistrationGuard,
};
use core::fmt;
use parking_lot::RwLock;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{UdpSocket, lookup_host};
use tokio_util::sync::CancellationToken;

/// A datagram received from the connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    peer: SocketAddr,
}

impl Packet {
    pub fn new(data: Vec<u8>, peer: SocketAddr) -> Self {
        Self { data, peer }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Address the datagram came from.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An open UDP socket connected to a single peer.
///
/// Clones share the socket. Closing any clone closes it for all of them and
/// stops any receive loop reading from it.
#[derive(Clone)]
pub struct UdpConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    local: SocketAddr,
    peer: SocketAddr,
    closed: CancellationToken,
}

impl UdpConnection {
    /// Resolves `host`, binds an ephemeral local port of the matching address
    /// family, and connects to the first resolved address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Socket`] if resolution, binding, or connecting fails.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let peer = lookup_host((host, port))
            .await
            .map_err(|e| Error::socket(&e, &format!("failed to resolve '{host}'")))?
            .next()
            .ok_or_else(|| Error::Socket {
                kind: io::ErrorKind::NotFound,
                context: format!("no address found for '{host}'"),
            })?;

        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| Error::socket(&e, "failed to bind local socket"))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| Error::socket(&e, &format!("failed to connect to {peer}")))?;

        Self::from_socket(socket)
    }

    /// Adopts a socket that is already connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the socket has no peer.
    pub fn from_socket(socket: UdpSocket) -> Result<Self> {
        let peer = socket.peer_addr().map_err(|_| {
            Error::invalid_argument("socket must be connected before it can be used")
        })?;
        let local = socket
            .local_addr()
            .map_err(|e| Error::socket(&e, "failed to read local address"))?;

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                socket: RwLock::new(Some(Arc::new(socket))),
                local,
                peer,
                closed: CancellationToken::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Sends one datagram to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Socket`] if the connection is closed or the send fails.
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        let socket = self.socket().ok_or_else(|| Error::Socket {
            kind: io::ErrorKind::NotConnected,
            context: "connection is closed".to_string(),
        })?;
        socket
            .send(data)
            .await
            .map_err(|e| Error::socket(&e, "send failed"))
    }

    /// Closes the socket. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let socket = self.inner.socket.write().take();
        self.inner.closed.cancel();
        socket.is_some()
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.inner.socket.read().clone()
    }
}

impl fmt::Debug for UdpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpConnection")
            .field("local", &self.inner.local)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Opens UDP connections and owns the registry of their receive loops.
///
/// Clones share the registry, so `halt_all` on any clone stops every loop
/// started through any of them.
#[derive(Clone)]
pub struct UdpConnectionManager {
    shared: Arc<Shared>,
    registry: Arc<ListenerRegistry>,
}

impl UdpConnectionManager {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            registry: Arc::new(ListenerRegistry::new()),
        }
    }

    /// Opens a connection to `host:port` in the background.
    ///
    /// On success `on_connect` receives the connection; with `auto_listen` a
    /// receive loop is then started from the home context. Failures to open
    /// are reported through `on_error`. Without connectivity `on_error`
    /// receives [`Error::NoConnectivity`] and nothing is submitted to the pool.
    ///
    /// # Errors
    ///
    /// Returns synchronously, without calling the listener:
    /// - [`Error::InvalidArgument`] for an empty host,
    /// - [`Error::InvalidState`] if the connectivity gate cannot answer,
    /// - [`Error::PoolShutdown`] if the pool is already shut down.
    pub fn open(
        &self,
        host: &str,
        port: u16,
        listener: Arc<dyn UdpListener>,
        auto_listen: bool,
    ) -> Result<()> {
        if host.trim().is_empty() {
            return Err(Error::invalid_argument("host cannot be empty"));
        }

        let _connection_id = self.shared.next_id();
        let marshaled = self.shared.marshaler.wrap(Arc::clone(&listener));

        if !self.shared.connectivity.is_connected()? {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = %_connection_id, host, port, "UDP open skipped, no connectivity");
            marshaled.on_error(Error::NoConnectivity);
            return Ok(());
        }

        let pool = self.shared.pool();
        if pool.is_shutdown() {
            return Err(Error::PoolShutdown);
        }

        let manager = self.clone();
        let host = host.to_string();
        let notice = {
            let marshaled = marshaled.clone();
            AbandonNotice::new(move || marshaled.on_error(Error::PoolShutdown))
        };
        let task = async move {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = %_connection_id, %host, port, "Opening UDP connection");

            let connected = UdpConnection::connect(&host, port).await;
            notice.disarm();
            match connected {
                Ok(connection) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        id = %_connection_id,
                        local = %connection.local_addr(),
                        peer = %connection.peer_addr(),
                        "UDP connection open"
                    );
                    marshaled.on_connect(connection.clone());
                    if auto_listen {
                        let marshaler = manager.shared.marshaler.clone();
                        marshaler.post(move || {
                            if let Err(e) = manager.listen(connection, Arc::clone(&listener)) {
                                // Already on the home context.
                                listener.on_error(e);
                            }
                        });
                    }
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(id = %_connection_id, "UDP open failed: {e}");
                    marshaled.on_error(e);
                }
            }
        };

        // A refused task is dropped on the spot and its notice reports it.
        if let Err(_e) = pool.spawn(task) {
            #[cfg(feature = "tracing")]
            tracing::debug!("UDP open not queued: {_e}");
        }
        Ok(())
    }

    /// Starts a receive loop on `connection` and returns its handle.
    ///
    /// Each datagram (truncated to the configured buffer size) is delivered
    /// through `on_receive`; receive errors go to `on_error` and the loop keeps
    /// going until it is cancelled, the connection is closed, or the socket
    /// turns out to be unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the connection is already closed
    /// and [`Error::PoolShutdown`] if the pool is already shut down.
    pub fn listen(
        &self,
        connection: UdpConnection,
        listener: Arc<dyn UdpListener>,
    ) -> Result<ListenerHandle> {
        let Some(socket) = connection.socket() else {
            return Err(Error::invalid_argument(
                "socket must be open and connected before attempting to listen",
            ));
        };

        let pool = self.shared.pool();
        if pool.is_shutdown() {
            return Err(Error::PoolShutdown);
        }

        let (handle, guard) = self.registry.register();
        let gated = Arc::new(Gated {
            inner: listener,
            cancel: handle.cancel_token().clone(),
        });
        let receiver = ReceiveLoop {
            handle: handle.clone(),
            socket,
            buffer_size: self.shared.config.recv_buffer_size,
            teardown: Teardown {
                connection,
                listener: Arc::new(self.shared.marshaler.wrap(gated)),
                exit: None,
                _registration: guard,
            },
        };

        // A refused loop is dropped on the spot; its teardown closes the
        // connection and reports `PoolShutdown`.
        if let Err(_e) = pool.spawn(receiver.run()) {
            #[cfg(feature = "tracing")]
            tracing::debug!(listener = handle.id(), "Receive loop not started: {_e}");
        }
        Ok(handle)
    }

    /// Requests cancellation of every receive loop that is still running and
    /// returns how many were newly cancelled.
    ///
    /// Returns immediately; sockets are closed by the loops themselves.
    /// Idempotent.
    pub fn halt_all(&self) -> usize {
        self.registry.halt_all()
    }

    /// Registry of the loops started through this manager.
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }
}

/// Drops events that reach the home context after their loop was cancelled.
struct Gated {
    inner: Arc<dyn UdpListener>,
    cancel: CancellationToken,
}

impl UdpListener for Gated {
    fn on_connect(&self, connection: UdpConnection) {
        self.inner.on_connect(connection);
    }

    fn on_error(&self, error: Error) {
        if !self.cancel.is_cancelled() {
            self.inner.on_error(error);
        }
    }

    fn on_receive(&self, packet: Packet) {
        if !self.cancel.is_cancelled() {
            self.inner.on_receive(packet);
        }
    }
}

/// Consecutive identical receive errors after which a loop gives up.
pub const MAX_REPEATED_ERRORS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Cancelled,
    Closed,
    ClosedOnError,
}

/// Counts back-to-back receive errors of the same kind.
#[derive(Debug, Default)]
struct ErrorStreak {
    kind: Option<io::ErrorKind>,
    count: usize,
}

impl ErrorStreak {
    /// Records an error and returns `true` once the socket should be treated
    /// as unusable.
    fn record(&mut self, err: &io::Error) -> bool {
        if self.kind == Some(err.kind()) {
            self.count += 1;
        } else {
            self.kind = Some(err.kind());
            self.count = 1;
        }
        is_fatal(err) || self.count >= MAX_REPEATED_ERRORS
    }

    fn reset(&mut self) {
        self.kind = None;
        self.count = 0;
    }
}

struct ReceiveLoop {
    handle: ListenerHandle,
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    teardown: Teardown,
}

/// Closes the connection and deregisters the loop however it ends.
///
/// Dropped without an exit, the loop was abandoned by its pool and the
/// listener is told so.
struct Teardown {
    connection: UdpConnection,
    listener: Arc<dyn UdpListener>,
    exit: Option<LoopExit>,
    _registration: RegistrationGuard,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        let _closed_here = self.connection.close();
        if self.exit.is_none() {
            self.listener.on_error(Error::PoolShutdown);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            peer = %self.connection.peer_addr(),
            exit = ?self.exit,
            closed_here = _closed_here,
            "Receive loop finished"
        );
    }
}

impl ReceiveLoop {
    async fn run(self) {
        let Self {
            handle,
            socket,
            buffer_size,
            mut teardown,
        } = self;
        let connection = teardown.connection.clone();
        let listener = Arc::clone(&teardown.listener);
        let peer = connection.peer_addr();
        let mut buf = vec![0_u8; buffer_size];
        let mut streak = ErrorStreak::default();

        #[cfg(feature = "tracing")]
        tracing::debug!(listener = handle.id(), %peer, "Receive loop started");

        let exit = loop {
            tokio::select! {
                biased;
                () = handle.cancel_token().cancelled() => break LoopExit::Cancelled,
                () = connection.inner.closed.cancelled() => break LoopExit::Closed,
                received = socket.recv(&mut buf) => match received {
                    Ok(len) => {
                        streak.reset();
                        listener.on_receive(Packet::new(buf[..len].to_vec(), peer));
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(listener = handle.id(), "Receive error: {e}");
                        let unusable = streak.record(&e);
                        listener.on_error(Error::socket(&e, "receive failed"));
                        if unusable {
                            break LoopExit::ClosedOnError;
                        }
                    }
                },
            }
        };

        drop(socket);
        teardown.exit = Some(exit);
    }
}

/// Errors after which the socket cannot receive again.
///
/// `Other` is what Tokio reports for a socket whose runtime has shut down.
fn is_fatal(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::Other
    )
}
