//! # Invocation Proxy
//!
//! Turns `(method, args)` into traffic on one of the four interaction patterns
//! and adapts the replies back into values.
//!
//! The proxy holds no per-call state. Method metadata is derived on first use
//! and memoized; everything else flows through the call.
//!
//! ## Invariants
//!
//! - Metadata and argument failures are returned from `invoke` before anything
//!   is sent. Transport failures arrive through the reply.
//! - Local methods never touch the network.
//! - A cacheable hit returns the stored shared result itself.
//! - Response items that decode to nothing are skipped on streams.
//! - The request counter moves once per completed call: when a single
//!   response settles, a fire-and-forget send finishes, or a stream is drained.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use fluxcodec::CodecRegistry;
use fluxcodec::Value;
use fluxmeta::CompositeMetadata;
use fluxmeta::Encoder;
use fluxmeta::MimeType;
use fluxmeta::ServiceLocator;
use futures::FutureExt;
use futures::StreamExt;
use futures::future;
use futures::future::BoxFuture;
use futures::stream;
use futures::stream::BoxStream;
use metrics::Label;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::Instrument;
use tracing::debug;
use tracing::warn;

use crate::Error;
use crate::Result;
use crate::cache::ResultCache;
use crate::context;
use crate::context::CallContext;
use crate::interface::InterfaceDescriptor;
use crate::metadata;
use crate::metadata::DeriveContext;
use crate::metadata::InteractionPattern;
use crate::metadata::MethodMetadata;
use crate::reply::Args;
use crate::reply::Delivery;
use crate::reply::Reply;
use crate::reply::ValueStream;
use crate::transport;
use crate::transport::Payload;
use crate::transport::PayloadStream;
use crate::transport::Transport;
use crate::upstream::UpstreamCluster;
use crate::upstream::UpstreamManager;

/// Where a proxy picks its connection for each call.
#[derive(Clone)]
pub(crate) enum Upstream {
    Cluster(Arc<dyn UpstreamCluster>),
    Managed(Arc<UpstreamManager>),
}

impl Upstream {
    fn pick(&self, service_id: &str) -> transport::Result<Arc<dyn Transport>> {
        match self {
            Upstream::Cluster(c) => c.pick(),
            Upstream::Managed(m) => m.pick_connection(service_id),
        }
    }
}

pub(crate) struct ProxyInner {
    pub(crate) interface: Arc<InterfaceDescriptor>,
    pub(crate) locator: ServiceLocator,
    pub(crate) service_id: String,
    pub(crate) endpoint: Option<String>,
    pub(crate) default_encoding: MimeType,
    pub(crate) accept: Vec<MimeType>,
    pub(crate) timeout: Duration,
    pub(crate) registry: Arc<CodecRegistry>,
    pub(crate) upstream: Upstream,
    pub(crate) cache: Option<Arc<ResultCache>>,
    pub(crate) methods: DashMap<String, Arc<MethodMetadata>>,
}

/// A client-side stand-in for one remote interface.
///
/// Cheap to clone; clones share memoized metadata.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub(crate) fn from_inner(inner: ProxyInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.inner.interface
    }

    pub fn locator(&self) -> &ServiceLocator {
        &self.inner.locator
    }

    pub fn service_id(&self) -> &str {
        &self.inner.service_id
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.inner.cache.as_ref()
    }

    /// Returns the memoized metadata for `method`, deriving it on first use.
    ///
    /// Concurrent first calls may each derive; the last insert wins.
    pub fn method_metadata(&self, method: &str) -> Result<Arc<MethodMetadata>> {
        if let Some(meta) = self.inner.methods.get(method) {
            return Ok(Arc::clone(meta.value()));
        }
        let inner = &self.inner;
        let descriptor = inner.interface.method(method).ok_or_else(|| metadata::Error::UnknownMethod {
            interface: inner.interface.name().to_string(),
            method: method.to_string(),
        })?;
        let ctx = DeriveContext {
            locator: &inner.locator,
            endpoint: inner.endpoint.as_deref(),
            interface_encoding: inner.interface.encoding(),
            default_encoding: inner.default_encoding,
            accept: &inner.accept,
            registry: &inner.registry,
        };
        let derived = Arc::new(MethodMetadata::derive(descriptor, ctx)?);
        inner.methods.insert(method.to_string(), Arc::clone(&derived));
        Ok(derived)
    }

    /// Invokes `method` and returns its reply adapter.
    pub fn invoke(&self, method: &str, args: impl Into<Args>) -> Result<Reply> {
        let args = args.into();
        if let Some(body) = self.inner.interface.method(method).and_then(|m| m.local.as_ref()) {
            return body(self, args);
        }

        let meta = self.method_metadata(method)?;
        let Args { values, stream } = args;
        let values = check_args(&meta, values, stream.is_some())?;
        let ctx = context::current();

        match meta.pattern {
            InteractionPattern::FireAndForget => self.fire_and_forget(&meta, &values, ctx.as_ref()),
            InteractionPattern::RequestResponse => self.request_response(meta, values, ctx),
            InteractionPattern::RequestStream => {
                let payload = encode_request(&meta, &values, ctx.as_ref())?;
                let inbound = match self.pick() {
                    Ok(t) => t.request_stream(payload),
                    Err(e) => failed(e),
                };
                let labels = meta.labels.clone();
                Ok(Reply::Stream(count_on_end(self.decode_stream(meta, inbound, ctx), labels)))
            }
            InteractionPattern::RequestChannel => {
                let outbound = stream.unwrap_or_else(|| stream::empty().boxed());
                self.request_channel(meta, values, outbound, ctx)
            }
        }
    }

    /// Invokes a single-response method and awaits its value.
    pub async fn call(&self, method: &str, args: impl Into<Args>) -> Result<Option<Value>> {
        self.invoke(method, args)?.single().await
    }

    fn pick(&self) -> transport::Result<Arc<dyn Transport>> {
        self.inner.upstream.pick(&self.inner.service_id)
    }

    fn fire_and_forget(&self, meta: &MethodMetadata, values: &[Value], ctx: Option<&CallContext>) -> Result<Reply> {
        let payload = encode_request(meta, values, ctx)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| transport::Error::Io(format!("no async runtime: {e}")))?;
        let (tx, rx) = oneshot::channel();
        let upstream = self.inner.upstream.clone();
        let service_id = self.inner.service_id.clone();
        let method = meta.name.clone();
        let labels = meta.labels.clone();
        runtime.spawn(async move {
            let result = match upstream.pick(&service_id) {
                Ok(t) => t.fire_and_forget(payload).await,
                Err(e) => Err(e),
            };
            completed(&labels);
            if let Err(error) = &result {
                warn!(%service_id, %method, %error, "fire-and-forget delivery failed");
            }
            let _ = tx.send(result);
        }
        .in_current_span());
        Ok(Reply::Sent(Delivery::new(rx)))
    }

    fn request_response(&self, meta: Arc<MethodMetadata>, values: Vec<Value>, ctx: Option<CallContext>) -> Result<Reply> {
        let cache = self.inner.cache.as_ref().zip(meta.cache_name.as_deref());
        let Some((cache, cache_name)) = cache else {
            let call = self.single_call(Arc::clone(&meta), &values, ctx)?;
            return Ok(Reply::Single(call.shared()));
        };
        let key = ResultCache::cache_key(cache_name, &values);
        let shared = cache.get_or_start(key, || self.single_call(Arc::clone(&meta), &values, ctx))?;
        Ok(Reply::Single(shared))
    }

    fn single_call(
        &self,
        meta: Arc<MethodMetadata>,
        values: &[Value],
        ctx: Option<CallContext>,
    ) -> Result<BoxFuture<'static, Result<Option<Value>>>> {
        let payload = encode_request(&meta, values, ctx.as_ref())?;
        let transport = self.pick();
        let registry = Arc::clone(&self.inner.registry);
        let timeout = self.inner.timeout;
        Ok(async move {
            let response = match transport {
                Ok(t) => tokio::time::timeout(timeout, t.request_response(payload))
                    .await
                    .map_err(|_| Error::Timeout(timeout))
                    .and_then(|r| r.map_err(Error::from)),
                Err(e) => Err(Error::from(e)),
            };
            completed(&meta.labels);
            decode_response(&registry, &meta, ctx.as_ref(), &response?)
        }
        .boxed())
    }

    fn request_channel(
        &self,
        meta: Arc<MethodMetadata>,
        values: Vec<Value>,
        outbound: BoxStream<'static, Value>,
        ctx: Option<CallContext>,
    ) -> Result<Reply> {
        let metadata = request_metadata(&meta, ctx.as_ref())?;
        let header = meta.codec.encode_params(&values).map_err(Error::Encode)?;
        let route = Payload::new(header, metadata.clone());

        // An outbound item that cannot be encoded ends the outbound side and
        // is reported after the inbound side finishes.
        let failure: Arc<Mutex<Option<Error>>> = Arc::default();
        let slot = Arc::clone(&failure);
        let codec = Arc::clone(&meta.codec);
        let elem = meta.stream_type.clone().unwrap_or_default();
        let method = meta.name.clone();
        let items = outbound.scan((), move |_, v| {
            let encoded = match elem.conform(v) {
                Ok(v) => codec.encode_value(&v).map_err(Error::Encode),
                Err(e) => Err(Error::BadArguments { method: method.clone(), details: format!("stream item: {e}") }),
            };
            future::ready(match encoded {
                Ok(data) => Some(Payload::new(data, metadata.clone())),
                Err(e) => {
                    *slot.lock() = Some(e);
                    None
                }
            })
        });
        let outbound = stream::once(future::ready(route)).chain(items).boxed();

        debug!(service_id = %self.inner.service_id, method = %meta.name, "opening channel");
        let inbound = match self.pick() {
            Ok(t) => t.request_channel(outbound),
            Err(e) => failed(e),
        };
        let tail = stream::once(async move { failure.lock().take() }).filter_map(|e| future::ready(e.map(Err)));
        let labels = meta.labels.clone();
        let items = self.decode_stream(meta, inbound, ctx).chain(tail).boxed();
        Ok(Reply::Stream(count_on_end(items, labels)))
    }

    fn decode_stream(&self, meta: Arc<MethodMetadata>, inbound: PayloadStream, ctx: Option<CallContext>) -> ValueStream {
        let registry = Arc::clone(&self.inner.registry);
        inbound
            .filter_map(move |item| {
                let out = match item {
                    Ok(p) => decode_response(&registry, &meta, ctx.as_ref(), &p).transpose(),
                    Err(e) => Some(Err(Error::from(e))),
                };
                future::ready(out)
            })
            .boxed()
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("interface", &self.inner.interface.name())
            .field("service_id", &self.inner.service_id)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

/// Counts one call that ran to completion, successful or not.
fn completed(labels: &[Label]) {
    metrics::counter!("fluxrpc.requests", labels.to_vec()).increment(1);
}

/// Counts the call once the caller has drained `items`.
fn count_on_end(items: ValueStream, labels: Vec<Label>) -> ValueStream {
    let end = stream::once(future::lazy(move |_| {
        completed(&labels);
        None::<Result<Value>>
    }));
    items.chain(end.filter_map(future::ready)).boxed()
}

fn failed(e: transport::Error) -> PayloadStream {
    stream::once(future::ready(Err(e))).boxed()
}

fn check_args(meta: &MethodMetadata, values: Vec<Value>, has_stream: bool) -> Result<Vec<Value>> {
    let bad = |details: String| Error::BadArguments { method: meta.name.clone(), details };
    if values.len() != meta.param_types.len() {
        return Err(bad(format!("expected {} values, got {}", meta.param_types.len(), values.len())));
    }
    match (meta.stream_type.is_some(), has_stream) {
        (true, false) => return Err(bad("missing stream argument".into())),
        (false, true) => return Err(bad("unexpected stream argument".into())),
        _ => {}
    }
    values
        .into_iter()
        .zip(&meta.param_types)
        .enumerate()
        .map(|(i, (v, ty))| ty.conform(v).map_err(|e| bad(format!("argument {i}: {e}"))))
        .collect()
}

/// The prebuilt metadata, plus the context's outbound tags when there are any.
fn request_metadata(meta: &MethodMetadata, ctx: Option<&CallContext>) -> Result<Bytes> {
    match ctx.map(CallContext::outbound_tags) {
        Some(tags) if !tags.is_empty() => {
            let mut enc = Encoder::with_prefix(&meta.metadata);
            enc.segment(tags)?;
            Ok(enc.into_bytes()?)
        }
        _ => Ok(meta.metadata.clone()),
    }
}

fn encode_request(meta: &MethodMetadata, values: &[Value], ctx: Option<&CallContext>) -> Result<Payload> {
    let data = meta.codec.encode_params(values).map_err(Error::Encode)?;
    Ok(Payload::new(data, request_metadata(meta, ctx)?))
}

fn decode_response(
    registry: &CodecRegistry,
    meta: &MethodMetadata,
    ctx: Option<&CallContext>,
    payload: &Payload,
) -> Result<Option<Value>> {
    let composite = CompositeMetadata::parse(&payload.metadata)?;
    if let (Some(ctx), Some(tags)) = (ctx, composite.tags()?) {
        ctx.merge_inbound(&tags);
    }
    let codec = match composite.message_mime_type()? {
        None => Arc::clone(&meta.codec),
        Some(mime) => match mime.well_known() {
            Some(m) if m == meta.param_mime => Arc::clone(&meta.codec),
            Some(m) => registry.get(m).map_err(|_| Error::UnsupportedEncoding(m.to_string()))?,
            None => return Err(Error::UnsupportedEncoding(mime.to_string())),
        },
    };
    codec.decode_result(&payload.data, &meta.return_type).map_err(Error::Decode)
}
