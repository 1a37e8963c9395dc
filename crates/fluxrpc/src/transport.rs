//! # Transport Abstraction
//!
//! The multiplexed streaming connection the proxy dispatches onto.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about codecs, values or
//!   interfaces. It moves `(data, metadata)` pairs.
//! - **Four Patterns**: fire-and-forget, request-response, request-stream and
//!   request-channel are the whole surface. Framing and flow control live
//!   beneath it.

use bytes::Bytes;
use futures::stream::BoxStream;

/// One message: body bytes plus composite metadata bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub data: Bytes,
    pub metadata: Bytes,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>, metadata: impl Into<Bytes>) -> Self {
        Self { data: data.into(), metadata: metadata.into() }
    }
}

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// No connection is currently available for the service.
    #[error("no live connection for {0}")]
    NoLiveConnection(String),
    /// The responder answered with an application error.
    #[error("remote error {code:#x}: {message}")]
    Remote { code: u32, message: String },
    /// The responder refused the request before handling it.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// Generic I/O error or internal transport failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// True for failures of the connection rather than of the request.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::NoLiveConnection(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Inbound side of a stream or channel.
pub type PayloadStream = BoxStream<'static, Result<Payload>>;

/// A live connection to a responder.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
///
/// # Invariants
/// - Streams are lazy and cancel the interaction when dropped.
/// - Per-direction message order is preserved.
/// - Implementations must not interpret payload contents.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one message with no reply. Resolves once the message is written.
    async fn fire_and_forget(&self, payload: Payload) -> Result<()>;

    /// Sends one message and waits for exactly one reply.
    async fn request_response(&self, payload: Payload) -> Result<Payload>;

    /// Sends one message and receives zero or more replies.
    fn request_stream(&self, payload: Payload) -> PayloadStream;

    /// Opens a bidirectional channel. The first outbound message carries the routing.
    fn request_channel(&self, outbound: BoxStream<'static, Payload>) -> PayloadStream;
}
