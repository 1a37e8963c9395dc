//! # Codec
//!
//! The contract a payload encoding implements, and the bundled encodings.
//!
//! ## Invariants
//! - **First Argument Only**: `encode_params` serializes `args[0]`; further
//!   arguments travel only through the result cache key.
//! - **Empty Is Absent**: empty input decodes to `None`, never to an error.
//! - **Typed Results**: every decoded value is conformed to the declared type.

use bytes::Bytes;
use fluxmeta::MimeType;

use crate::Error;
use crate::Result;
use crate::TypeDesc;
use crate::Value;

/// A payload encoding, selected by mime type.
///
/// Implementors provide the two primitives; the call-level policies are
/// provided methods.
pub trait Codec: Send + Sync + 'static {
    fn mime_type(&self) -> MimeType;

    /// Serializes one value.
    fn encode_value(&self, value: &Value) -> Result<Bytes>;

    /// Deserializes one non-empty payload into a value of type `target`.
    fn decode_value(&self, data: &[u8], target: &TypeDesc) -> Result<Value>;

    /// Encodes the request body from the call arguments.
    fn encode_params(&self, args: &[Value]) -> Result<Bytes> {
        match args.first() {
            Some(first) => self.encode_value(first),
            None => Ok(Bytes::new()),
        }
    }

    /// Decodes a request body back into one value per target type.
    ///
    /// The body holds at most the first argument; the remaining slots are `Null`.
    fn decode_params(&self, data: &[u8], targets: &[TypeDesc]) -> Result<Vec<Value>> {
        let mut out = vec![Value::Null; targets.len()];
        if let (Some(slot), Some(target)) = (out.first_mut(), targets.first()) {
            if !data.is_empty() {
                *slot = self.decode_value(data, target)?;
            }
        }
        Ok(out)
    }

    /// Encodes a result body; `None` encodes as empty.
    fn encode_result(&self, value: Option<&Value>) -> Result<Bytes> {
        match value {
            Some(v) => self.encode_value(v),
            None => Ok(Bytes::new()),
        }
    }

    /// Decodes a result body. Empty input is `Ok(None)`.
    fn decode_result(&self, data: &[u8], target: &TypeDesc) -> Result<Option<Value>> {
        if data.is_empty() {
            return Ok(None);
        }
        self.decode_value(data, target).map(Some)
    }
}

// ============================================================================
//  BUNDLED ENCODINGS
// ============================================================================

/// `application/json`, via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn mime_type(&self) -> MimeType { MimeType::Json }

    fn encode_value(&self, value: &Value) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::encode(MimeType::Json, e))
    }

    fn decode_value(&self, data: &[u8], target: &TypeDesc) -> Result<Value> {
        let raw: Value = serde_json::from_slice(data).map_err(|e| Error::decode(MimeType::Json, e))?;
        target.conform(raw)
    }
}

/// `application/cbor`, via `ciborium`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn mime_type(&self) -> MimeType { MimeType::Cbor }

    fn encode_value(&self, value: &Value) -> Result<Bytes> {
        let mut out = Vec::with_capacity(64);
        ciborium::into_writer(value, &mut out).map_err(|e| Error::encode(MimeType::Cbor, e))?;
        Ok(Bytes::from(out))
    }

    fn decode_value(&self, data: &[u8], target: &TypeDesc) -> Result<Value> {
        let raw: Value = ciborium::from_reader(data).map_err(|e| Error::decode(MimeType::Cbor, e))?;
        target.conform(raw)
    }
}

/// `text/plain`: UTF-8 text of a scalar value.
///
/// Decoding parses the text according to the target type.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn mime_type(&self) -> MimeType { MimeType::Text }

    fn encode_value(&self, value: &Value) -> Result<Bytes> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => value.to_string(),
            Value::Null => String::new(),
            other => return Err(Error::Unsupported { mime: MimeType::Text, kind: other.kind() }),
        };
        Ok(Bytes::from(text))
    }

    fn decode_value(&self, data: &[u8], target: &TypeDesc) -> Result<Value> {
        let text = std::str::from_utf8(data).map_err(|e| Error::decode(MimeType::Text, e))?;
        let target = match target {
            TypeDesc::Optional(inner) => inner.as_ref(),
            other => other,
        };
        match target {
            TypeDesc::Any | TypeDesc::String => Ok(Value::String(text.to_string())),
            TypeDesc::Int => text.trim().parse().map(Value::Int).map_err(|e| Error::decode(MimeType::Text, e)),
            TypeDesc::Float => text.trim().parse().map(Value::Float).map_err(|e| Error::decode(MimeType::Text, e)),
            TypeDesc::Bool => text.trim().parse().map(Value::Bool).map_err(|e| Error::decode(MimeType::Text, e)),
            TypeDesc::Bytes => Ok(Value::Bytes(data.to_vec())),
            other => Err(Error::TypeMismatch { expected: other.to_string(), found: "string" }),
        }
    }
}

/// `application/octet-stream`: opaque bytes passed through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn mime_type(&self) -> MimeType { MimeType::Binary }

    fn encode_value(&self, value: &Value) -> Result<Bytes> {
        match value {
            Value::Bytes(b) => Ok(Bytes::copy_from_slice(b)),
            Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Value::Null => Ok(Bytes::new()),
            other => Err(Error::Unsupported { mime: MimeType::Binary, kind: other.kind() }),
        }
    }

    fn decode_value(&self, data: &[u8], target: &TypeDesc) -> Result<Value> {
        match target {
            TypeDesc::String => std::str::from_utf8(data)
                .map(|s| Value::String(s.to_string()))
                .map_err(|e| Error::decode(MimeType::Binary, e)),
            other => other.conform(Value::Bytes(data.to_vec())),
        }
    }
}
