//! Composition root of the library.
//!
//! [`NetClient`] owns the collaborators shared by the [`RequestDispatcher`]
//! and the [`UdpConnectionManager`]: configuration, connectivity gate, home
//! scheduler, correlation-id generator, and the replaceable [`WorkerPool`].

use crate::{
    CallbackMarshaler, Connectivity, CorrelationId, Error, HomeScheduler, HttpTransport,
    NetConfig, RequestDispatcher, RequestIdGenerator, Result, Transport, UdpConnectionManager,
    WorkerPool,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// State shared by every operation of one client.
pub(crate) struct Shared {
    pub(crate) config: NetConfig,
    pub(crate) connectivity: Arc<dyn Connectivity>,
    pub(crate) marshaler: CallbackMarshaler,
    ids: RequestIdGenerator,
    pool: RwLock<Arc<WorkerPool>>,
}

impl Shared {
    /// The pool new work is submitted to.
    pub(crate) fn pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool.read())
    }

    pub(crate) fn next_id(&self) -> CorrelationId {
        self.ids.next(self.config.id_length)
    }
}

/// Entry point for HTTP dispatch and UDP connections.
///
/// Cheap to clone; clones share the pool, the home scheduler and the UDP
/// listener registry.
///
/// The client keeps a handle to the home scheduler, so a [`crate::HomeLoop`]
/// keeps running until every clone of the client is dropped.
#[derive(Clone)]
pub struct NetClient {
    shared: Arc<Shared>,
    dispatcher: RequestDispatcher,
    udp: UdpConnectionManager,
}

impl NetClient {
    pub fn builder() -> NetClientBuilder {
        NetClientBuilder::default()
    }

    /// Sends HTTP requests; see [`RequestDispatcher`].
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Opens and listens to UDP connections; see [`UdpConnectionManager`].
    pub fn udp(&self) -> &UdpConnectionManager {
        &self.udp
    }

    pub fn config(&self) -> &NetConfig {
        &self.shared.config
    }

    /// Queries the connectivity gate.
    ///
    /// # Errors
    ///
    /// Returns whatever the gate returns, typically [`Error::InvalidState`].
    pub fn is_connected(&self) -> Result<bool> {
        self.shared.connectivity.is_connected()
    }

    /// The pool currently receiving new work.
    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        self.shared.pool()
    }

    /// Installs a new worker pool and shuts the previous one down.
    ///
    /// Work submitted after this call goes to `pool`. The previous pool stops
    /// accepting work immediately and drains in the background; this call does
    /// not wait for it. Requests already in flight finish on the previous pool,
    /// and receive loops already running keep going there until they end.
    ///
    /// With a bounded [`NetConfig::shutdown_grace`] whatever is still running
    /// when it elapses is dropped: a request reports [`Error::PoolShutdown`]
    /// through `on_failure`, a receive loop closes its connection and reports
    /// it through `on_error`.
    pub fn set_worker_pool(&self, pool: WorkerPool) {
        let previous = core::mem::replace(&mut *self.shared.pool.write(), Arc::new(pool));

        #[cfg(feature = "tracing")]
        tracing::info!(
            previous_in_flight = previous.in_flight(),
            "Installed replacement worker pool"
        );

        previous.shutdown();
    }
}

/// Assembles a [`NetClient`].
///
/// A connectivity gate and a home scheduler are required. The transport
/// defaults to [`HttpTransport`] and the pool to a [`WorkerPool`] sized by
/// [`NetConfig::worker_threads`].
#[derive(Default)]
pub struct NetClientBuilder {
    config: NetConfig,
    transport: Option<Arc<dyn Transport>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    home: Option<Arc<dyn HomeScheduler>>,
    pool: Option<WorkerPool>,
}

impl NetClientBuilder {
    #[must_use]
    pub fn config(mut self, config: NetConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn transport<T: Transport + 'static>(mut self, transport: Arc<T>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn connectivity<C: Connectivity + 'static>(mut self, connectivity: C) -> Self {
        self.connectivity = Some(Arc::new(connectivity));
        self
    }

    #[must_use]
    pub fn home<H: HomeScheduler + 'static>(mut self, home: H) -> Self {
        self.home = Some(Arc::new(home));
        self
    }

    #[must_use]
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the connectivity gate or home scheduler is
    ///   missing, or the default pool cannot start.
    /// - [`Error::InvalidArgument`] if the configuration asks for zero worker
    ///   threads, a zero `id_length` or a zero `recv_buffer_size`.
    /// - [`Error::Transport`] if the default HTTP client cannot be built.
    pub fn build(self) -> Result<NetClient> {
        self.config.validate()?;
        let connectivity = self.connectivity.ok_or_else(|| Error::InvalidState {
            reason: "no connectivity gate supplied".to_string(),
        })?;
        let home = self.home.ok_or_else(|| Error::InvalidState {
            reason: "no home scheduler supplied".to_string(),
        })?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let pool = match self.pool {
            Some(pool) => pool,
            None => WorkerPool::new(self.config.worker_threads, self.config.shutdown_grace)?,
        };

        let shared = Arc::new(Shared {
            config: self.config,
            connectivity,
            marshaler: CallbackMarshaler::new(home),
            ids: RequestIdGenerator::new(),
            pool: RwLock::new(Arc::new(pool)),
        });

        Ok(NetClient {
            dispatcher: RequestDispatcher::new(Arc::clone(&shared), transport),
            udp: UdpConnectionManager::new(Arc::clone(&shared)),
            shared,
        })
    }
}
