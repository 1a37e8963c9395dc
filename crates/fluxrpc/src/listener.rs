//! # Invalidation Listener
//!
//! Applies broker notifications to the local result cache and the upstream
//! clusters. Notifications arrive at least once and unordered, so every
//! handler is idempotent.
//!
//! Notifications travel as CloudEvent-style JSON envelopes:
//!
//! ```json
//! {"type": "com.example.InvalidCacheEvent", "data": {"keys": ["user:42"]}}
//! ```

use std::sync::Arc;

use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing::debug;
use tracing::warn;

use crate::cache::ResultCache;
use crate::upstream::UpstreamManager;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("malformed notification: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, Error>;

const UPSTREAM_CHANGED: &str = "upstreamclusterchangedevent";
const INVALIDATE_CACHE: &str = "invalidcacheevent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The live URIs of a service changed.
    UpstreamChanged { service_id: String, uris: Vec<String> },
    /// Cache keys to evict.
    InvalidateCache { keys: Vec<String> },
    /// Any other event type; ignored.
    Other { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamChangedData {
    #[serde(default)]
    group: String,
    interface_name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    uris: Vec<String>,
}

#[derive(Deserialize)]
struct InvalidateCacheData {
    #[serde(default)]
    keys: Vec<String>,
}

impl Notification {
    /// Parses a JSON envelope. The event type is matched on its last
    /// dot-separated part, case-insensitively.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(json).map_err(|e| Error::Json(e.to_string()))?;
        let short = envelope.kind.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        let parse_err = |e: serde_json::Error| Error::Json(format!("{}: {e}", envelope.kind));
        match short.as_str() {
            UPSTREAM_CHANGED => {
                let data: UpstreamChangedData = serde_json::from_value(envelope.data.clone()).map_err(parse_err)?;
                let locator = fluxmeta::ServiceLocator::new(data.group, data.interface_name, data.version);
                Ok(Notification::UpstreamChanged { service_id: locator.service_id(), uris: data.uris })
            }
            INVALIDATE_CACHE => {
                let data: InvalidateCacheData = serde_json::from_value(envelope.data.clone()).map_err(parse_err)?;
                Ok(Notification::InvalidateCache { keys: data.keys })
            }
            _ => Ok(Notification::Other { kind: envelope.kind.clone() }),
        }
    }
}

/// A secondary cache that mirrors evictions.
pub trait ExternalCache: Send + Sync + 'static {
    fn evict(&self, cache_name: &str, hash: u64);
}

impl<F> ExternalCache for F
where
    F: Fn(&str, u64) + Send + Sync + 'static,
{
    fn evict(&self, cache_name: &str, hash: u64) {
        self(cache_name, hash)
    }
}

pub struct InvalidationListener {
    cache: Arc<ResultCache>,
    upstreams: Option<Arc<UpstreamManager>>,
    external: Option<Arc<dyn ExternalCache>>,
}

impl InvalidationListener {
    pub fn new(cache: Arc<ResultCache>) -> Self {
        Self { cache, upstreams: None, external: None }
    }

    pub fn with_upstreams(mut self, upstreams: Arc<UpstreamManager>) -> Self {
        self.upstreams = Some(upstreams);
        self
    }

    pub fn with_external(mut self, external: Arc<dyn ExternalCache>) -> Self {
        self.external = Some(external);
        self
    }

    /// Applies one notification.
    pub fn handle(&self, notification: Notification) {
        match notification {
            Notification::InvalidateCache { keys } => {
                let removed = self.cache.invalidate_all(&keys);
                debug!(requested = keys.len(), removed, "invalidated cache keys");
                if let Some(external) = &self.external {
                    for key in &keys {
                        evict_external(external.as_ref(), key);
                    }
                }
            }
            Notification::UpstreamChanged { service_id, uris } => {
                let applied = self.upstreams.as_ref().is_some_and(|m| m.refresh(&service_id, uris));
                if !applied {
                    warn!(%service_id, "topology change for a service with no cluster");
                }
            }
            Notification::Other { kind } => debug!(%kind, "ignored notification"),
        }
    }

    /// Consumes `notifications` until the stream ends.
    pub async fn run<S>(&self, notifications: S)
    where
        S: Stream<Item = Notification>,
    {
        futures::pin_mut!(notifications);
        while let Some(n) = notifications.next().await {
            self.handle(n);
        }
    }

    /// Runs the listener on its own task.
    pub fn spawn<S>(self, notifications: S) -> JoinHandle<()>
    where
        S: Stream<Item = Notification> + Send + 'static,
    {
        tokio::spawn(async move { self.run(notifications).await }.in_current_span())
    }
}

fn evict_external(external: &dyn ExternalCache, key: &str) {
    let parsed = key
        .split_once(':')
        .and_then(|(name, hash)| hash.parse::<u64>().ok().map(|h| (name, h)));
    match parsed {
        Some((name, hash)) => external.evict(name, hash),
        None => warn!(%key, "skipped external eviction of malformed key"),
    }
}
