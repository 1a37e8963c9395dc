//! Call arguments and the caller-facing reply adapters.

use std::fmt;

use fluxcodec::Value;
use futures::FutureExt;
use futures::Stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::Error;
use crate::Result;
use crate::metadata::ReplyShape;
use crate::transport;

/// A single deferred result, shared by every holder.
pub type SharedResult = Shared<BoxFuture<'static, Result<Option<Value>>>>;

/// A lazy stream of decoded results.
pub type ValueStream = BoxStream<'static, Result<Value>>;

/// Arguments of one call: the value parameters plus an optional outbound stream.
#[derive(Default)]
pub struct Args {
    pub values: Vec<Value>,
    pub stream: Option<BoxStream<'static, Value>>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, v: impl Into<Value>) -> Self {
        self.values.push(v.into());
        self
    }

    pub fn stream<S>(mut self, s: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        self.stream = Some(s.boxed());
        self
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self { values, stream: None }
    }
}

impl From<Value> for Args {
    fn from(v: Value) -> Self {
        Self { values: vec![v], stream: None }
    }
}

impl From<()> for Args {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("values", &self.values)
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

/// Completion handle of a fire-and-forget send.
///
/// Dropping it does not cancel the send.
pub struct Delivery {
    rx: oneshot::Receiver<transport::Result<()>>,
}

impl Delivery {
    pub(crate) fn new(rx: oneshot::Receiver<transport::Result<()>>) -> Self {
        Self { rx }
    }

    /// A delivery that already succeeded.
    pub fn delivered() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self { rx }
    }

    /// Waits for the send to finish and reports its outcome.
    pub async fn outcome(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Transport(transport::Error::ConnectionLost(
                "delivery task ended without reporting".into(),
            ))),
        }
    }
}

/// What `Proxy::invoke` hands back, by reply shape.
pub enum Reply {
    Sent(Delivery),
    Single(SharedResult),
    Stream(ValueStream),
}

impl Reply {
    /// A single reply that is already resolved.
    pub fn ready(value: Option<Value>) -> Self {
        Reply::Single(futures::future::ready(Ok(value)).boxed().shared())
    }

    pub fn from_stream<S>(s: S) -> Self
    where
        S: Stream<Item = Result<Value>> + Send + 'static,
    {
        Reply::Stream(s.boxed())
    }

    pub fn shape(&self) -> ReplyShape {
        match self {
            Reply::Sent(_) => ReplyShape::Ack,
            Reply::Single(_) => ReplyShape::Single,
            Reply::Stream(_) => ReplyShape::Many,
        }
    }

    pub fn into_delivery(self) -> Result<Delivery> {
        match self {
            Reply::Sent(d) => Ok(d),
            other => Err(Error::ReplyShape { expected: ReplyShape::Ack, found: other.shape() }),
        }
    }

    pub fn into_shared(self) -> Result<SharedResult> {
        match self {
            Reply::Single(s) => Ok(s),
            other => Err(Error::ReplyShape { expected: ReplyShape::Single, found: other.shape() }),
        }
    }

    pub fn into_stream(self) -> Result<ValueStream> {
        match self {
            Reply::Stream(s) => Ok(s),
            other => Err(Error::ReplyShape { expected: ReplyShape::Many, found: other.shape() }),
        }
    }

    /// Awaits a single reply.
    pub async fn single(self) -> Result<Option<Value>> {
        self.into_shared()?.await
    }

    /// Awaits a single reply and converts it into `T`.
    pub async fn value<T: DeserializeOwned>(self) -> Result<Option<T>> {
        match self.single().await? {
            Some(v) => v.deserialize_into().map(Some).map_err(Error::Decode),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reply::{:?}", self.shape())
    }
}
