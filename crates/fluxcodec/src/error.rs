//! # Error Definitions
//!
//! Every codec failure is `Clone`; a single decoded result may be handed to
//! many waiters. Foreign sources are kept behind an `Arc`.

use std::sync::Arc;

use fluxmeta::MimeType;

type Source = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No codec is registered for the mime type.
    #[error("no codec registered for {0}")]
    Unregistered(MimeType),
    /// Serialization failed inside a codec.
    #[error("failed to encode {mime}: {source}")]
    Encode { mime: MimeType, source: Source },
    /// Deserialization failed inside a codec.
    #[error("failed to decode {mime}: {source}")]
    Decode { mime: MimeType, source: Source },
    /// The codec has no representation for this kind of value.
    #[error("{mime} cannot carry a {kind} value")]
    Unsupported { mime: MimeType, kind: &'static str },
    /// A decoded value did not match the declared type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: &'static str },
    /// Conversion through the serde data model failed.
    #[error("value conversion failed: {0}")]
    Conversion(Source),
    /// The nested depth of the value exceeded the safety limit.
    #[error("value nesting exceeds the recursion limit")]
    RecursionLimitExceeded,
}

impl Error {
    pub fn encode<E: std::error::Error + Send + Sync + 'static>(mime: MimeType, e: E) -> Self {
        Self::Encode { mime, source: Arc::new(e) }
    }

    pub fn decode<E: std::error::Error + Send + Sync + 'static>(mime: MimeType, e: E) -> Self {
        Self::Decode { mime, source: Arc::new(e) }
    }

    pub(crate) fn convert(e: serde_json::Error) -> Self {
        Self::Conversion(Arc::new(e))
    }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
