//! The composite block: an ordered list of segments.

use std::ops::Range;

use bytes::Bytes;

use crate::CacheControl;
use crate::Decoder;
use crate::Encoder;
use crate::MessageMimeType;
use crate::MessageTags;
use crate::MimeType;
use crate::Result;
use crate::RoutingMetadata;
use crate::SegmentMime;
use crate::AcceptMimeTypes;
use crate::TracingMetadata;

/// A segment kind with a typed payload.
pub trait MetadataSegment: Sized {
    /// Mime type the segment is written under.
    const MIME: MimeType;

    /// Writes the payload into the encoder's open segment.
    fn encode_payload(&self, enc: &mut Encoder) -> Result<()>;

    /// Reads the payload from a decoder bounded to the segment.
    fn decode_payload(dec: Decoder<'_>) -> Result<Self>;
}

/// One segment, payload kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub mime: SegmentMime,
    pub payload: Bytes,
}

/// A decoded composite metadata block.
///
/// Segment order is the wire order. Lookups return the first match; a missing
/// segment is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompositeMetadata {
    segments: Vec<Segment>,
}

impl CompositeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a block, copying payloads.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(&Bytes::copy_from_slice(bytes))
    }

    /// Parses a block. Payloads share the input buffer.
    pub fn parse(bytes: &Bytes) -> Result<Self> {
        let mut segments = Vec::new();
        for entry in walk(bytes) {
            let (mime, range) = entry?;
            segments.push(Segment { mime, payload: bytes.slice(range) });
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Appends a raw segment.
    pub fn push(&mut self, mime: impl Into<SegmentMime>, payload: impl Into<Bytes>) {
        self.segments.push(Segment { mime: mime.into(), payload: payload.into() });
    }

    /// Appends a typed segment.
    pub fn push_segment<M: MetadataSegment>(&mut self, segment: &M) -> Result<()> {
        let mut enc = Encoder::new();
        enc.segment(segment)?;
        let bytes = enc.into_bytes()?;
        let (_, range) = walk(&bytes).next().ok_or(crate::Error::UnexpectedEnd)??;
        self.push(M::MIME, bytes.slice(range));
        Ok(())
    }

    /// Builder form of [`CompositeMetadata::push_segment`].
    pub fn with<M: MetadataSegment>(mut self, segment: &M) -> Result<Self> {
        self.push_segment(segment)?;
        Ok(self)
    }

    pub fn contains(&self, mime: MimeType) -> bool {
        self.segments.iter().any(|s| s.mime.is(mime))
    }

    /// Raw payload of the first segment of kind `mime`.
    pub fn get(&self, mime: MimeType) -> Option<&Bytes> {
        self.segments.iter().find(|s| s.mime.is(mime)).map(|s| &s.payload)
    }

    /// Decodes the first segment of kind `M`, if present.
    pub fn decode<M: MetadataSegment>(&self) -> Result<Option<M>> {
        match self.get(M::MIME) {
            Some(payload) => M::decode_payload(Decoder::new(payload)).map(Some),
            None => Ok(None),
        }
    }

    pub fn route(&self) -> Result<Option<RoutingMetadata>> {
        self.decode()
    }

    /// The body encoding named by the MessageMimeType segment.
    pub fn message_mime_type(&self) -> Result<Option<SegmentMime>> {
        Ok(self.decode::<MessageMimeType>()?.map(|m| m.0))
    }

    pub fn accept_mime_types(&self) -> Result<Option<AcceptMimeTypes>> {
        self.decode()
    }

    pub fn tags(&self) -> Result<Option<MessageTags>> {
        self.decode()
    }

    pub fn cache_control(&self) -> Result<Option<CacheControl>> {
        self.decode()
    }

    pub fn tracing(&self) -> Result<Option<TracingMetadata>> {
        self.decode()
    }

    /// Serializes every segment in order.
    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = Encoder::new();
        for s in &self.segments {
            enc.raw_segment(&s.mime, &s.payload)?;
        }
        enc.into_bytes()
    }
}

/// Walks segment headers, yielding each mime and its payload range in `bytes`.
fn walk(bytes: &[u8]) -> impl Iterator<Item = Result<(SegmentMime, Range<usize>)>> + '_ {
    let mut dec = Decoder::new(bytes);
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed || dec.remaining() == 0 {
            return None;
        }
        match dec.segment() {
            Ok((mime, payload)) => {
                let end = bytes.len() - dec.remaining();
                let start = end - payload.remaining();
                Some(Ok((mime, start..end)))
            }
            Err(e) => {
                failed = true;
                Some(Err(e))
            }
        }
    })
}
