//! Asynchronous HTTP request dispatch.
//!
//! Every `send_*` call follows the same path:
//!
//! 1. Build and validate a [`RequestDescriptor`]. A bad address or header is
//!    reported through `on_failure` on the caller's thread; nothing is queued.
//! 2. Tag the request with a [`crate::CorrelationId`] for its log lines.
//! 3. Ask the connectivity gate. When offline, `on_failure` receives
//!    [`Error::NoConnectivity`] on the home context and nothing is queued.
//! 4. Submit one task to the worker pool that performs a single transport
//!    attempt, classifies the outcome, and reports it on the home context.
//!    A task the pool refuses or drops reports [`Error::PoolShutdown`]
//!    instead.

use crate::{
    Endpoint, Error, RequestDescriptor, RequestListener, Result, Transport, TransportResponse,
    client::Shared, pool::AbandonNotice,
};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;

/// Sends HTTP requests on the worker pool and reports outcomes to listeners.
///
/// Obtained from [`crate::NetClient::dispatcher`]. None of the methods block;
/// the outcome of a dispatched request is delivered exactly once through the
/// listener.
#[derive(Clone)]
pub struct RequestDispatcher {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
}

impl RequestDispatcher {
    pub(crate) fn new(shared: Arc<Shared>, transport: Arc<dyn Transport>) -> Self {
        Self { shared, transport }
    }

    /// Sends a GET request with the endpoint's query arguments appended.
    pub fn send_get(&self, endpoint: &Endpoint, listener: Arc<dyn RequestListener>) {
        self.dispatch(RequestDescriptor::get(endpoint), listener);
    }

    /// Sends a POST request with a JSON body. `None` is sent as `{}`.
    pub fn send_post_json(
        &self,
        endpoint: &Endpoint,
        body: Option<&Value>,
        listener: Arc<dyn RequestListener>,
    ) {
        self.dispatch(RequestDescriptor::post_json(endpoint, body), listener);
    }

    /// Sends a POST request with a form-encoded body.
    pub fn send_post_form<I, K, V>(
        &self,
        endpoint: &Endpoint,
        fields: I,
        listener: Arc<dyn RequestListener>,
    ) where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.dispatch(RequestDescriptor::post_form(endpoint, fields), listener);
    }

    fn dispatch(&self, request: Result<RequestDescriptor>, listener: Arc<dyn RequestListener>) {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Rejected request: {e}");
                listener.on_failure(e);
                return;
            }
        };

        let _id = self.shared.next_id();

        #[cfg(feature = "tracing")]
        tracing::debug!(%_id, method = %request.method(), "Executing request");

        let connected = match self.shared.connectivity.is_connected() {
            Ok(connected) => connected,
            Err(e) => {
                listener.on_failure(e);
                return;
            }
        };

        let marshaled = self.shared.marshaler.wrap(listener);
        if !connected {
            #[cfg(feature = "tracing")]
            tracing::debug!(%_id, "No connectivity, request not sent");
            marshaled.on_failure(Error::NoConnectivity);
            return;
        }

        let transport = Arc::clone(&self.transport);
        let reporter = marshaled.clone();
        let notice = AbandonNotice::new(move || marshaled.on_failure(Error::PoolShutdown));
        let task = async move {
            #[cfg(feature = "tracing")]
            {
                tracing::debug!(%_id, url = %request.url(), "Sending request");
                if let Some(body) = request.body() {
                    tracing::trace!(%_id, body, "Request body");
                }
            }

            let outcome = Outcome::classify(transport.execute(&request).await);

            #[cfg(feature = "tracing")]
            tracing::debug!(%_id, outcome = outcome.label(), "Request finished");

            notice.disarm();
            outcome.deliver(&reporter);
        };

        // A refused task is dropped on the spot and its notice reports it.
        if let Err(_e) = self.shared.pool().spawn(task) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Request not queued: {_e}");
        }
    }
}

/// The single terminal result of a request.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Success(Value),
    Rejected(Value, StatusCode),
    Failed(Error),
}

impl Outcome {
    /// Maps a transport result onto exactly one listener channel.
    ///
    /// Only `200 OK` counts as success. The body must be JSON whatever the
    /// status; an unreadable body is a transport failure.
    fn classify(response: Result<TransportResponse>) -> Self {
        let TransportResponse { status, body } = match response {
            Ok(response) => response,
            Err(e) => return Self::Failed(e),
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(%status, body = body.as_str(), "Response received");

        match serde_json::from_str::<Value>(&body) {
            Ok(value) if status == StatusCode::OK => Self::Success(value),
            Ok(value) => Self::Rejected(value, status),
            Err(e) => Self::Failed(e.into()),
        }
    }

    fn deliver(self, listener: &dyn RequestListener) {
        match self {
            Self::Success(body) => listener.on_success(body),
            Self::Rejected(body, status) => listener.on_error(body, status),
            Self::Failed(error) => listener.on_failure(error),
        }
    }

    #[cfg(feature = "tracing")]
    fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Rejected(..) => "error",
            Self::Failed(_) => "failure",
        }
    }
}
