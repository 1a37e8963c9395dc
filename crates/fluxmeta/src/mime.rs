//! Mime type identifiers and their one-entry wire form.
//!
//! Well-known types travel as a single byte `0x80 | id`. Anything else travels
//! as an ASCII string of 1..=128 bytes prefixed by `len - 1`.

use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use bytes::BytesMut;

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::MetadataSegment;
use crate::Result;

const MAX_MIME_LEN: usize = 128;

macro_rules! well_known {
    ($( $(#[$doc:meta])* $name:ident = $id:literal, $text:literal $(, $alias:literal)*; )+) => {
        /// A mime type with a compact well-known id.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MimeType {
            $( $(#[$doc])* $name, )+
        }

        impl MimeType {
            /// Every well-known type, in id order.
            pub const ALL: &'static [MimeType] = &[$(MimeType::$name,)+];

            /// The 7-bit compact id.
            pub const fn id(self) -> u8 {
                match self { $(MimeType::$name => $id,)+ }
            }

            /// Looks up a type by its compact id.
            pub fn from_id(id: u8) -> Option<Self> {
                match id { $($id => Some(MimeType::$name),)+ _ => None }
            }

            /// The canonical mime string.
            pub const fn as_str(self) -> &'static str {
                match self { $(MimeType::$name => $text,)+ }
            }

            fn from_name(s: &str) -> Option<Self> {
                match s {
                    $($text $(| $alias)* => Some(MimeType::$name),)+
                    _ => None,
                }
            }
        }
    };
}

well_known! {
    Avro = 0x00, "application/avro", "avro";
    Cbor = 0x01, "application/cbor", "cbor";
    Json = 0x05, "application/json", "json";
    Binary = 0x06, "application/octet-stream", "binary", "bytes";
    Thrift = 0x08, "application/vnd.apache.thrift.binary", "thrift";
    Protobuf = 0x09, "application/vnd.google.protobuf", "protobuf";
    Xml = 0x0A, "application/xml", "xml";
    Text = 0x21, "text/plain", "text";
    Hessian = 0x6F, "application/x-hessian", "hessian";
    /// Context tags attached to a message.
    MessageTags = 0x71, "message/x.rsocket.message-tags.v0";
    /// Expiry hint for a cacheable response.
    CacheControl = 0x72, "message/x.rsocket.cache-control.v0";
    /// Encoding of the message body.
    MessageMimeType = 0x7A, "message/x.rsocket.mime-type.v0";
    /// Encodings the sender can decode in reply.
    MessageAcceptMimeTypes = 0x7B, "message/x.rsocket.accept-mime-types.v0";
    Authentication = 0x7C, "message/x.rsocket.authentication.v0";
    Tracing = 0x7D, "message/x.rsocket.tracing-zipkin.v0";
    Route = 0x7E, "message/x.rsocket.routing.v0";
    Composite = 0x7F, "message/x.rsocket.composite-metadata.v0";
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MimeType {
    type Err = Error;

    /// Parses a canonical mime string or a short alias (`json`, `cbor`, ...).
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        MimeType::from_name(trimmed)
            .or_else(|| MimeType::from_name(&trimmed.to_ascii_lowercase()))
            .ok_or_else(|| Error::InvalidMime(s.to_string()))
    }
}

/// The mime header of one segment, kept in the form it was read in.
///
/// Keeping the form makes decode/encode lossless even for ids this crate does
/// not know, and for well-known types spelled out as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SegmentMime {
    Known(MimeType),
    UnknownId(u8),
    Custom(String),
}

impl SegmentMime {
    /// An extension mime string. Fails unless 1..=128 ASCII bytes.
    pub fn custom(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() || s.len() > MAX_MIME_LEN || !s.is_ascii() {
            return Err(Error::InvalidMime(s));
        }
        Ok(SegmentMime::Custom(s))
    }

    /// True if this header names `mime`, in either its id or string form.
    pub fn is(&self, mime: MimeType) -> bool {
        match self {
            SegmentMime::Known(m) => *m == mime,
            SegmentMime::UnknownId(_) => false,
            SegmentMime::Custom(s) => s == mime.as_str(),
        }
    }

    /// Resolves the header to a well-known type, if it names one.
    pub fn well_known(&self) -> Option<MimeType> {
        match self {
            SegmentMime::Known(m) => Some(*m),
            SegmentMime::UnknownId(_) => None,
            SegmentMime::Custom(s) => MimeType::from_name(s),
        }
    }
}

impl From<MimeType> for SegmentMime {
    fn from(m: MimeType) -> Self {
        SegmentMime::Known(m)
    }
}

impl fmt::Display for SegmentMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentMime::Known(m) => f.write_str(m.as_str()),
            SegmentMime::UnknownId(id) => write!(f, "mime-id:{id:#04x}"),
            SegmentMime::Custom(s) => f.write_str(s),
        }
    }
}

pub(crate) fn write_mime(buf: &mut BytesMut, mime: &SegmentMime) -> Result<()> {
    match mime {
        SegmentMime::Known(m) => buf.put_u8(0x80 | m.id()),
        SegmentMime::UnknownId(id) => buf.put_u8(0x80 | (id & 0x7F)),
        SegmentMime::Custom(s) => {
            if s.is_empty() || s.len() > MAX_MIME_LEN || !s.is_ascii() {
                return Err(Error::InvalidMime(s.clone()));
            }
            buf.put_u8((s.len() - 1) as u8);
            buf.extend_from_slice(s.as_bytes());
        }
    }
    Ok(())
}

pub(crate) fn read_mime(dec: &mut Decoder<'_>) -> Result<SegmentMime> {
    let head = dec.u8()?;
    if head & 0x80 != 0 {
        let id = head & 0x7F;
        return Ok(match MimeType::from_id(id) {
            Some(m) => SegmentMime::Known(m),
            None => SegmentMime::UnknownId(id),
        });
    }
    let raw = dec.read_bytes(head as usize + 1)?;
    if !raw.is_ascii() {
        return Err(Error::InvalidMime(String::from_utf8_lossy(raw).into_owned()));
    }
    let s = std::str::from_utf8(raw).map_err(|_| Error::InvalidUtf8)?;
    Ok(SegmentMime::Custom(s.to_string()))
}

/// The MessageMimeType segment: encoding of the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMimeType(pub SegmentMime);

impl MessageMimeType {
    pub fn new(mime: impl Into<SegmentMime>) -> Self {
        Self(mime.into())
    }
}

impl MetadataSegment for MessageMimeType {
    const MIME: MimeType = MimeType::MessageMimeType;

    fn encode_payload(&self, enc: &mut Encoder) -> Result<()> {
        enc.mime(&self.0)
    }

    fn decode_payload(mut dec: Decoder<'_>) -> Result<Self> {
        let mime = dec.mime()?;
        if dec.remaining() != 0 {
            return Err(Error::Malformed {
                kind: "mime-type",
                details: format!("{} trailing bytes", dec.remaining()),
            });
        }
        Ok(Self(mime))
    }
}

/// The MessageAcceptMimeTypes segment: ordered reply encodings, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AcceptMimeTypes(pub Vec<SegmentMime>);

impl AcceptMimeTypes {
    pub fn new(mimes: impl IntoIterator<Item = MimeType>) -> Self {
        Self(mimes.into_iter().map(SegmentMime::Known).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentMime> {
        self.0.iter()
    }
}

impl MetadataSegment for AcceptMimeTypes {
    const MIME: MimeType = MimeType::MessageAcceptMimeTypes;

    fn encode_payload(&self, enc: &mut Encoder) -> Result<()> {
        for mime in &self.0 {
            enc.mime(mime)?;
        }
        Ok(())
    }

    fn decode_payload(mut dec: Decoder<'_>) -> Result<Self> {
        let mut out = Vec::new();
        while dec.remaining() > 0 {
            out.push(dec.mime()?);
        }
        Ok(Self(out))
    }
}
