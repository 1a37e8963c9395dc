//! Scripted in-memory transport for tests. Enabled by the `test-util` feature.
//!
//! By default every pattern echoes: a request-response or stream returns the
//! request body once, and a channel returns every message after the routing
//! message. Channel replies flow through a bounded channel, so dropping the
//! reply stream stops the echo task and drops the outbound stream.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use fluxmeta::Encoder;
use fluxmeta::MessageMimeType;
use fluxmeta::MessageTags;
use fluxmeta::MimeType;
use futures::SinkExt;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::Serialize;

use crate::transport;
use crate::transport::Payload;
use crate::transport::PayloadStream;
use crate::transport::Transport;

const CHANNEL_CAPACITY: usize = 8;

type RespondFn = Arc<dyn Fn(&Payload) -> transport::Result<Payload> + Send + Sync>;
type StreamFn = Arc<dyn Fn(&Payload) -> Vec<transport::Result<Payload>> + Send + Sync>;

#[derive(Clone)]
enum Script {
    Echo,
    Respond(RespondFn),
    Fail(transport::Error),
    Hang,
}

pub struct MockTransport {
    script: Script,
    stream: Option<StreamFn>,
    delay: Option<Duration>,
    requests: AtomicUsize,
    received: Arc<Mutex<Vec<Payload>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Script::Echo,
            stream: None,
            delay: None,
            requests: AtomicUsize::new(0),
            received: Arc::default(),
        }
    }

    /// Answers single requests with `f`.
    pub fn respond_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) -> transport::Result<Payload> + Send + Sync + 'static,
    {
        self.script = Script::Respond(Arc::new(f));
        self
    }

    /// Answers stream requests with the items `f` returns.
    pub fn stream_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) -> Vec<transport::Result<Payload>> + Send + Sync + 'static,
    {
        self.stream = Some(Arc::new(f));
        self
    }

    /// Fails single requests and fire-and-forget sends with `error`.
    pub fn fail_with(mut self, error: transport::Error) -> Self {
        self.script = Script::Fail(error);
        self
    }

    /// Never answers single requests or completes sends.
    pub fn hang(mut self) -> Self {
        self.script = Script::Hang;
        self
    }

    /// Waits `delay` before every single answer.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn into_shared(self) -> Arc<dyn Transport> {
        Arc::new(self)
    }

    /// Number of interactions started.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Every payload received so far, channel messages included.
    pub fn received(&self) -> Vec<Payload> {
        self.received.lock().clone()
    }

    pub fn last_request(&self) -> Option<Payload> {
        self.received.lock().last().cloned()
    }

    fn record(&self, payload: &Payload) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(payload.clone());
    }

    async fn answer(&self, payload: &Payload) -> transport::Result<Payload> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Echo => Ok(Payload::new(payload.data.clone(), Bytes::new())),
            Script::Respond(f) => f(payload),
            Script::Fail(e) => Err(e.clone()),
            Script::Hang => futures::future::pending().await,
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn fire_and_forget(&self, payload: Payload) -> transport::Result<()> {
        self.record(&payload);
        match &self.script {
            Script::Fail(e) => Err(e.clone()),
            Script::Hang => futures::future::pending().await,
            _ => Ok(()),
        }
    }

    async fn request_response(&self, payload: Payload) -> transport::Result<Payload> {
        self.record(&payload);
        self.answer(&payload).await
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        self.record(&payload);
        let items = match &self.stream {
            Some(f) => f(&payload),
            None => vec![Ok(Payload::new(payload.data.clone(), Bytes::new()))],
        };
        stream::iter(items).boxed()
    }

    fn request_channel(&self, outbound: BoxStream<'static, Payload>) -> PayloadStream {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let (mut tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let received = Arc::clone(&self.received);
        let mut outbound = outbound;
        tokio::spawn(async move {
            let mut routing = true;
            while let Some(p) = outbound.next().await {
                received.lock().push(p.clone());
                if std::mem::take(&mut routing) {
                    continue;
                }
                let echo = Ok(Payload::new(p.data, Bytes::new()));
                if tx.send(echo).await.is_err() {
                    break;
                }
            }
        });
        rx.boxed()
    }
}

/// A JSON reply body with no metadata.
pub fn json<T: Serialize + ?Sized>(value: &T) -> Payload {
    let data = serde_json::to_vec(value).unwrap_or_default();
    Payload::new(data, Bytes::new())
}

/// A reply that names its body encoding.
pub fn with_mime(mut payload: Payload, mime: MimeType) -> Payload {
    let mut enc = Encoder::with_prefix(&payload.metadata);
    if enc.segment(&MessageMimeType::new(mime)).is_ok() {
        if let Ok(metadata) = enc.into_bytes() {
            payload.metadata = metadata;
        }
    }
    payload
}

/// A reply carrying context tags.
pub fn with_tags(mut payload: Payload, tags: &MessageTags) -> Payload {
    let mut enc = Encoder::with_prefix(&payload.metadata);
    if enc.segment(tags).is_ok() {
        if let Ok(metadata) = enc.into_bytes() {
            payload.metadata = metadata;
        }
    }
    payload
}
