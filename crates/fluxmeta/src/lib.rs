//! # Fluxmeta
//!
//! A small, strict codec for composite metadata: the segmented block that rides
//! next to every message body and carries routing, codec selection, context tags
//! and cache control.
//!
//! ## Philosophy
//!
//! - **Self-Describing**: Every segment names its own mime type, so a reader can
//!   skip kinds it does not understand.
//! - **Bounded**: The encoder tracks the open segment explicitly and back-patches
//!   the length. Decoders are zero-copy, bounds-checked views.
//! - **Lossless**: Unknown segment kinds survive a decode/encode cycle byte for byte.
//!
//! ## Format
//!
//! - **Segment**: `[Mime][Len: u24][Payload: Len]`, concatenated with no padding.
//! - **Mime (well-known)**: `[0x80 | id]`, one byte.
//! - **Mime (extension)**: `[len - 1][ASCII: len]`, at most 128 bytes.
//!
//! All integers are Big-Endian.

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

mod cache_control;
mod composite;
mod mime;
mod route;
mod tags;
mod trace;

pub use cache_control::CacheControl;
pub use composite::CompositeMetadata;
pub use composite::MetadataSegment;
pub use composite::Segment;
pub use mime::AcceptMimeTypes;
pub use mime::MessageMimeType;
pub use mime::MimeType;
pub use mime::SegmentMime;
pub use route::RoutingMetadata;
pub use route::ServiceLocator;
pub use tags::MessageTags;
pub use trace::Sampling;
pub use trace::TracingMetadata;


/// Largest payload a single segment can carry (24-bit length field).
pub const MAX_SEGMENT_LEN: usize = 0x00FF_FFFF;

/// Composite metadata serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Buffer exhausted while reading.
    #[error("unexpected end of metadata block")]
    UnexpectedEnd,
    /// String data is not valid UTF-8.
    #[error("string data is not valid UTF-8")]
    InvalidUtf8,
    /// Extension mime strings must be 1..=128 ASCII bytes.
    #[error("invalid mime type string {0:?}: must be 1..=128 ASCII bytes")]
    InvalidMime(String),
    /// A well-known mime id that this codec cannot name was required.
    #[error("unknown well-known mime id {0:#04x}")]
    UnknownMimeId(u8),
    /// Segment payload does not fit the 24-bit length field.
    #[error("segment payload of {0} bytes exceeds the 24-bit length field")]
    SegmentTooLarge(usize),
    /// A length-prefixed field does not fit its prefix.
    #[error("field of {len} bytes exceeds its {max} byte prefix limit")]
    FieldTooLong { len: usize, max: usize },
    /// Attempted to begin a segment while another one is open.
    #[error("a segment is already open")]
    SegmentAlreadyOpen,
    /// Attempted to write payload or close a segment with none open.
    #[error("no segment is open")]
    NoOpenSegment,
    /// Attempted to finalize the buffer with an open segment.
    #[error("segment still open")]
    SegmentStillOpen,
    /// A segment payload did not follow its declared layout.
    #[error("malformed {kind} segment: {details}")]
    Malformed { kind: &'static str, details: String },
}

/// Specialized `Result` for Fluxmeta operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A segment-at-a-time encoder.
///
/// # Structural Invariants
///
/// 1. Payload writes are only valid inside an open segment.
/// 2. Segments do not nest; `segment_begin` fails while one is open.
/// 3. The encoder must have no open segment to finalize bytes.
pub struct Encoder {
    buf: BytesMut,
    /// Start of the open segment's payload, just after the length placeholder.
    open: Option<usize>,
}

impl Encoder {
    /// Creates a new, empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(128),
            open: None,
        }
    }

    /// Creates an encoder that continues an already-encoded block.
    ///
    /// Composite metadata is a plain concatenation, so appending segments to a
    /// valid block yields a valid block.
    pub fn with_prefix(prefix: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(prefix.len() + 64);
        buf.extend_from_slice(prefix);
        Self { buf, open: None }
    }

    /// Consumes the encoder and returns the final bytes.
    ///
    /// # Errors
    /// Returns `Error::SegmentStillOpen` if a segment was not closed.
    pub fn into_bytes(self) -> Result<Bytes> {
        if self.open.is_some() {
            return Err(Error::SegmentStillOpen);
        }
        Ok(self.buf.freeze())
    }

    /// Begins a segment of the given mime type.
    pub fn segment_begin(&mut self, mime: &SegmentMime) -> Result<()> {
        if self.open.is_some() {
            return Err(Error::SegmentAlreadyOpen);
        }
        mime::write_mime(&mut self.buf, mime)?;
        self.buf.extend_from_slice(&[0, 0, 0]); // Length placeholder
        self.open = Some(self.buf.len());
        Ok(())
    }

    /// Ends the open segment, back-patching its length.
    pub fn segment_end(&mut self) -> Result<()> {
        let start = self.open.take().ok_or(Error::NoOpenSegment)?;
        let len = self.buf.len() - start;
        if len > MAX_SEGMENT_LEN {
            return Err(Error::SegmentTooLarge(len));
        }
        let len_bytes = (len as u32).to_be_bytes();
        self.buf[start - 3..start].copy_from_slice(&len_bytes[1..]);
        Ok(())
    }

    /// Encodes one typed segment.
    pub fn segment<M: MetadataSegment>(&mut self, segment: &M) -> Result<()> {
        self.segment_begin(&SegmentMime::Known(M::MIME))?;
        segment.encode_payload(self)?;
        self.segment_end()
    }

    /// Encodes one segment whose payload is already serialized.
    pub fn raw_segment(&mut self, mime: &SegmentMime, payload: &[u8]) -> Result<()> {
        self.segment_begin(mime)?;
        self.bytes(payload)?;
        self.segment_end()
    }

    fn check_open(&self) -> Result<()> {
        match self.open {
            Some(_) => Ok(()),
            None => Err(Error::NoOpenSegment),
        }
    }

    /// Writes one byte.
    pub fn u8(&mut self, v: u8) -> Result<()> { self.check_open()?; self.buf.put_u8(v); Ok(()) }
    /// Writes a u16 (BE).
    pub fn u16(&mut self, v: u16) -> Result<()> { self.check_open()?; self.buf.put_u16(v); Ok(()) }
    /// Writes a u64 (BE).
    pub fn u64(&mut self, v: u64) -> Result<()> { self.check_open()?; self.buf.put_u64(v); Ok(()) }
    /// Writes an i64 (BE).
    pub fn i64(&mut self, v: i64) -> Result<()> { self.check_open()?; self.buf.put_i64(v); Ok(()) }

    /// Writes raw bytes with no length prefix.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.check_open()?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Writes a string with a one-byte length prefix.
    pub fn str8(&mut self, v: &str) -> Result<()> {
        self.check_open()?;
        if v.len() > u8::MAX as usize {
            return Err(Error::FieldTooLong { len: v.len(), max: u8::MAX as usize });
        }
        self.buf.put_u8(v.len() as u8);
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Writes a string with a two-byte length prefix.
    pub fn str16(&mut self, v: &str) -> Result<()> {
        self.check_open()?;
        if v.len() > u16::MAX as usize {
            return Err(Error::FieldTooLong { len: v.len(), max: u16::MAX as usize });
        }
        self.buf.put_u16(v.len() as u16);
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Writes a mime entry in its id-or-string form.
    pub fn mime(&mut self, v: &SegmentMime) -> Result<()> {
        self.check_open()?;
        mime::write_mime(&mut self.buf, v)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the internal cursor. `segment` returns a new `Decoder`
/// restricted to the segment's payload.
///
/// # Errors
/// All read operations return `Error::UnexpectedEnd` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Returns the unread bytes without advancing.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    /// Reads `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() { return Err(Error::UnexpectedEnd); }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Reads one byte.
    pub fn u8(&mut self) -> Result<u8> { Ok(self.read_array::<1>()?[0]) }
    /// Reads a u16 (BE).
    pub fn u16(&mut self) -> Result<u16> { Ok(u16::from_be_bytes(self.read_array()?)) }
    /// Reads a u24 (BE).
    pub fn u24(&mut self) -> Result<u32> {
        let [a, b, c] = self.read_array::<3>()?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }
    /// Reads a u64 (BE).
    pub fn u64(&mut self) -> Result<u64> { Ok(u64::from_be_bytes(self.read_array()?)) }
    /// Reads an i64 (BE).
    pub fn i64(&mut self) -> Result<i64> { Ok(i64::from_be_bytes(self.read_array()?)) }

    /// Reads a string with a one-byte length prefix.
    pub fn str8(&mut self) -> Result<&'a str> {
        let len = self.u8()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Reads a string with a two-byte length prefix.
    pub fn str16(&mut self) -> Result<&'a str> {
        let len = self.u16()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Reads a mime entry in its id-or-string form.
    pub fn mime(&mut self) -> Result<SegmentMime> {
        mime::read_mime(self)
    }

    /// Reads the next segment header and returns `(Mime, PayloadDecoder)`.
    pub fn segment(&mut self) -> Result<(SegmentMime, Decoder<'a>)> {
        let mime = self.mime()?;
        let len = self.u24()? as usize;
        let payload = self.read_bytes(len)?;
        Ok((mime, Decoder::new(payload)))
    }

    /// Skips the next segment without interpreting it.
    pub fn skip(&mut self) -> Result<()> {
        self.segment().map(|_| ())
    }
}
