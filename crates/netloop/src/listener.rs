use crate::{Error, Packet, UdpConnection};
use serde_json::Value;

pub use reqwest::StatusCode;

/// Outcomes of a single HTTP request.
///
/// Exactly one method is called per dispatched request. When the request was
/// accepted for dispatch, the call happens on the home execution context.
pub trait RequestListener: Send + Sync + 'static {
    /// The server answered `200 OK` with a JSON body.
    fn on_success(&self, body: Value);

    /// The server answered with another status and a JSON body.
    fn on_error(&self, body: Value, status: StatusCode);

    /// The request could not be sent, or the response could not be decoded.
    fn on_failure(&self, error: Error);
}

/// Events of a UDP connection and its receive loop.
///
/// Calls are delivered on the home execution context, in the order the
/// connection produced them.
pub trait UdpListener: Send + Sync + 'static {
    /// The socket is open and connected to its peer.
    fn on_connect(&self, connection: UdpConnection);

    /// Opening the socket failed, or a receive failed.
    fn on_error(&self, error: Error);

    /// A datagram arrived from the peer.
    fn on_receive(&self, packet: Packet);
}
