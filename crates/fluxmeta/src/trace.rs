//! The zipkin-style Tracing segment.
//!
//! Layout: `[flags][trace id: 8 | 16][span id: 8][parent id: 8?]`.

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::MetadataSegment;
use crate::MimeType;
use crate::Result;

const FLAG_DEBUG: u8 = 0b1000_0000;
const FLAG_SAMPLED: u8 = 0b0100_0000;
const FLAG_NOT_SAMPLED: u8 = 0b0010_0000;
const FLAG_TRACE_ID_128: u8 = 0b0001_0000;
const FLAG_PARENT: u8 = 0b0000_1000;

/// Sampling decision carried in the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sampling {
    #[default]
    Unspecified,
    Sampled,
    NotSampled,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TracingMetadata {
    /// High 64 bits of a 128-bit trace id.
    pub trace_id_high: Option<u64>,
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_span_id: Option<u64>,
    pub sampling: Sampling,
}

impl TracingMetadata {
    pub fn new(trace_id: u64, span_id: u64) -> Self {
        Self {
            trace_id_high: None,
            trace_id,
            span_id,
            parent_span_id: None,
            sampling: Sampling::Unspecified,
        }
    }

    pub fn with_parent(mut self, parent: u64) -> Self {
        self.parent_span_id = Some(parent);
        self
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Full trace id; the high bits are zero for 64-bit ids.
    pub fn trace_id_u128(&self) -> u128 {
        (u128::from(self.trace_id_high.unwrap_or(0)) << 64) | u128::from(self.trace_id)
    }
}

impl MetadataSegment for TracingMetadata {
    const MIME: MimeType = MimeType::Tracing;

    fn encode_payload(&self, enc: &mut Encoder) -> Result<()> {
        let mut flags = match self.sampling {
            Sampling::Unspecified => 0,
            Sampling::Sampled => FLAG_SAMPLED,
            Sampling::NotSampled => FLAG_NOT_SAMPLED,
            Sampling::Debug => FLAG_DEBUG,
        };
        if self.trace_id_high.is_some() {
            flags |= FLAG_TRACE_ID_128;
        }
        if self.parent_span_id.is_some() {
            flags |= FLAG_PARENT;
        }
        enc.u8(flags)?;
        if let Some(high) = self.trace_id_high {
            enc.u64(high)?;
        }
        enc.u64(self.trace_id)?;
        enc.u64(self.span_id)?;
        if let Some(parent) = self.parent_span_id {
            enc.u64(parent)?;
        }
        Ok(())
    }

    fn decode_payload(mut dec: Decoder<'_>) -> Result<Self> {
        let flags = dec.u8()?;
        let sampling = if flags & FLAG_DEBUG != 0 {
            Sampling::Debug
        } else if flags & FLAG_SAMPLED != 0 {
            Sampling::Sampled
        } else if flags & FLAG_NOT_SAMPLED != 0 {
            Sampling::NotSampled
        } else {
            Sampling::Unspecified
        };
        let trace_id_high = if flags & FLAG_TRACE_ID_128 != 0 { Some(dec.u64()?) } else { None };
        let trace_id = dec.u64()?;
        let span_id = dec.u64()?;
        let parent_span_id = if flags & FLAG_PARENT != 0 { Some(dec.u64()?) } else { None };
        if dec.remaining() != 0 {
            return Err(Error::Malformed {
                kind: "tracing",
                details: format!("{} trailing bytes", dec.remaining()),
            });
        }
        Ok(Self { trace_id_high, trace_id, span_id, parent_span_id, sampling })
    }
}
