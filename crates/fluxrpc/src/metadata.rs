//! # Method Metadata
//!
//! Everything the proxy needs to dispatch one method, derived once from its
//! descriptor and then shared read-only.
//!
//! ## Invariants
//!
//! - **Shape Decides Pattern**: the interaction pattern follows only from the
//!   declared parameters and return.
//! - **Registered Codecs Only**: every mime type a method names resolves in the
//!   registry, or derivation fails before anything is sent.
//! - **Prebuilt Metadata**: Route, MessageMimeType and MessageAcceptMimeTypes
//!   are encoded once here, never per call.

use std::sync::Arc;

use bytes::Bytes;
use fluxcodec::Codec;
use fluxcodec::CodecRegistry;
use fluxcodec::TypeDesc;
use fluxmeta::AcceptMimeTypes;
use fluxmeta::Encoder;
use fluxmeta::MessageMimeType;
use fluxmeta::MimeType;
use fluxmeta::RoutingMetadata;
use fluxmeta::ServiceLocator;
use metrics::Label;
use tracing::debug;

use crate::interface::MethodDescriptor;
use crate::interface::ParamDesc;
use crate::interface::ReturnDesc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{interface} has no method {method}")]
    UnknownMethod { interface: String, method: String },
    #[error("{method}: unsupported method shape: {reason}")]
    UnsupportedShape { method: String, reason: &'static str },
    #[error("{method}: no codec registered for {mime}")]
    UnregisteredCodec { method: String, mime: MimeType },
    #[error("{method}: only single-response methods can be cached")]
    NotCacheable { method: String },
    #[error("{method}: {source}")]
    Route { method: String, source: fluxmeta::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The wire interaction a method maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionPattern {
    FireAndForget,
    RequestResponse,
    RequestStream,
    RequestChannel,
}

impl InteractionPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FireAndForget => "fire_and_forget",
            Self::RequestResponse => "request_response",
            Self::RequestStream => "request_stream",
            Self::RequestChannel => "request_channel",
        }
    }

    /// How the reply is handed back to the caller.
    pub fn reply_shape(self) -> ReplyShape {
        match self {
            Self::FireAndForget => ReplyShape::Ack,
            Self::RequestResponse => ReplyShape::Single,
            Self::RequestStream | Self::RequestChannel => ReplyShape::Many,
        }
    }
}

/// Caller-facing reply adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyShape {
    /// Completion-only delivery handle.
    Ack,
    /// One shared deferred result.
    Single,
    /// A lazy stream of results.
    Many,
}

/// Proxy-level inputs to derivation.
#[derive(Debug, Clone, Copy)]
pub struct DeriveContext<'a> {
    pub locator: &'a ServiceLocator,
    pub endpoint: Option<&'a str>,
    pub interface_encoding: Option<MimeType>,
    pub default_encoding: MimeType,
    /// Proxy-configured accept list; empty means "derive from the registry".
    pub accept: &'a [MimeType],
    pub registry: &'a CodecRegistry,
}

pub struct MethodMetadata {
    pub name: String,
    pub pattern: InteractionPattern,
    pub shape: ReplyShape,
    pub param_mime: MimeType,
    /// Reply encodings in preference order.
    pub accept: Vec<MimeType>,
    /// Declared types of the value (non-stream) parameters.
    pub param_types: Vec<TypeDesc>,
    /// Element type of the declared stream parameter.
    pub stream_type: Option<TypeDesc>,
    pub return_type: TypeDesc,
    pub cache_name: Option<String>,
    pub route: RoutingMetadata,
    /// Route + MessageMimeType + MessageAcceptMimeTypes, encoded.
    pub metadata: Bytes,
    pub labels: Vec<Label>,
    pub codec: Arc<dyn Codec>,
}

impl MethodMetadata {
    pub fn derive(method: &MethodDescriptor, ctx: DeriveContext<'_>) -> Result<Self> {
        let (pattern, param_types, stream_type, return_type) = classify(method)?;

        if method.cache_name.is_some() && pattern != InteractionPattern::RequestResponse {
            return Err(Error::NotCacheable { method: method.name.clone() });
        }

        let param_mime = method
            .encoding
            .or(ctx.interface_encoding)
            .unwrap_or(ctx.default_encoding);
        let unregistered = |mime| Error::UnregisteredCodec { method: method.name.clone(), mime };
        let codec = ctx.registry.get(param_mime).map_err(|_| unregistered(param_mime))?;

        let accept = if !method.accept.is_empty() {
            method.accept.clone()
        } else if !ctx.accept.is_empty() {
            ctx.accept.to_vec()
        } else {
            ctx.registry.default_accept(param_mime)
        };
        if let Some(missing) = accept.iter().find(|m| !ctx.registry.contains(**m)) {
            return Err(unregistered(*missing));
        }

        let mut route = RoutingMetadata::new(ctx.locator.clone(), method.name.clone());
        if let Some(endpoint) = ctx.endpoint {
            route = route.with_endpoint(endpoint);
        }
        let metadata = prebuild(&route, param_mime, &accept)
            .map_err(|source| Error::Route { method: method.name.clone(), source })?;

        let labels = vec![
            Label::new("service", ctx.locator.service_id()),
            Label::new("method", method.name.clone()),
            Label::new("signature", method.signature()),
            Label::new("pattern", pattern.as_str()),
        ];

        debug!(
            service_id = %ctx.locator,
            method = %method.name,
            pattern = pattern.as_str(),
            encoding = %param_mime,
            "derived method metadata"
        );

        Ok(Self {
            name: method.name.clone(),
            pattern,
            shape: pattern.reply_shape(),
            param_mime,
            accept,
            param_types,
            stream_type,
            return_type,
            cache_name: method.cache_name.clone(),
            route,
            metadata,
            labels,
            codec,
        })
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache_name.is_some()
    }
}

impl std::fmt::Debug for MethodMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodMetadata")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("param_mime", &self.param_mime)
            .field("accept", &self.accept)
            .field("return_type", &self.return_type)
            .field("cache_name", &self.cache_name)
            .finish_non_exhaustive()
    }
}

type Classified = (InteractionPattern, Vec<TypeDesc>, Option<TypeDesc>, TypeDesc);

fn classify(method: &MethodDescriptor) -> Result<Classified> {
    let unsupported = |reason| Error::UnsupportedShape { method: method.name.clone(), reason };

    let mut values = Vec::new();
    let mut stream = None;
    for (i, p) in method.params.iter().enumerate() {
        match p {
            ParamDesc::Value(t) => values.push(t.clone()),
            ParamDesc::Stream(_) if i + 1 != method.params.len() => {
                return Err(unsupported("a stream parameter must be the last parameter"));
            }
            ParamDesc::Stream(t) => stream = Some(t.clone()),
        }
    }

    match (&method.returns, stream) {
        (ReturnDesc::Unit, None) => Ok((InteractionPattern::FireAndForget, values, None, TypeDesc::Unit)),
        (ReturnDesc::Single(t), None) => Ok((InteractionPattern::RequestResponse, values, None, t.clone())),
        (ReturnDesc::Stream(t), None) => Ok((InteractionPattern::RequestStream, values, None, t.clone())),
        (ReturnDesc::Stream(t), Some(s)) if values.len() <= 1 => {
            Ok((InteractionPattern::RequestChannel, values, Some(s), t.clone()))
        }
        (ReturnDesc::Stream(_), Some(_)) => {
            Err(unsupported("a channel takes at most one value before its stream"))
        }
        (_, Some(_)) => Err(unsupported("a stream parameter requires a stream return")),
    }
}

fn prebuild(route: &RoutingMetadata, mime: MimeType, accept: &[MimeType]) -> fluxmeta::Result<Bytes> {
    let mut enc = Encoder::new();
    enc.segment(route)?;
    enc.segment(&MessageMimeType::new(mime))?;
    enc.segment(&AcceptMimeTypes::new(accept.iter().copied()))?;
    enc.into_bytes()
}
