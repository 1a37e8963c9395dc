//! # Error Definitions
//!
//! The unified failure type of an invocation. Every variant is `Clone`: one
//! shared single-response result fans out to every waiter.

use std::time::Duration;

use crate::config;
use crate::interface;
use crate::metadata;
use crate::metadata::ReplyShape;
use crate::transport;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Interface(#[from] interface::Error),
    #[error(transparent)]
    Metadata(#[from] metadata::Error),
    #[error(transparent)]
    Config(#[from] config::Error),
    /// The call's arguments do not fit the method's declared parameters.
    #[error("bad arguments for {method}: {details}")]
    BadArguments { method: String, details: String },
    #[error("expected a {expected:?} reply, got {found:?}")]
    ReplyShape { expected: ReplyShape, found: ReplyShape },
    #[error("failed to encode payload: {0}")]
    Encode(#[source] fluxcodec::Error),
    #[error("failed to decode payload: {0}")]
    Decode(#[source] fluxcodec::Error),
    /// The response named an encoding with no codec behind it.
    #[error("response encoding {0} is not supported")]
    UnsupportedEncoding(String),
    #[error("malformed composite metadata: {0}")]
    CompositeMetadata(#[from] fluxmeta::Error),
    /// No response arrived within the configured timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The proxy or interface is set up wrongly; retrying cannot help.
    Configuration,
    /// Bytes could not be turned into values or back.
    Protocol,
    Timeout,
    Transport,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Interface(_) | Self::Metadata(_) | Self::Config(_) => ErrorKind::Configuration,
            Self::BadArguments { .. } | Self::ReplyShape { .. } => ErrorKind::Configuration,
            Self::Encode(_) | Self::Decode(_) | Self::UnsupportedEncoding(_) => ErrorKind::Protocol,
            Self::CompositeMetadata(_) => ErrorKind::Protocol,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Timeouts and connection-level transport failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Transport(e) => e.is_connection_level(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
