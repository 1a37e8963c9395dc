use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::MetadataSegment;
use crate::MimeType;
use crate::Result;

/// The CacheControl segment: absolute expiry of a response, in epoch millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheControl {
    pub expires_at: i64,
}

impl CacheControl {
    pub fn new(expires_at: i64) -> Self {
        Self { expires_at }
    }

    /// Expiry `ttl` from now.
    pub fn expires_in(ttl: Duration) -> Self {
        let now = epoch_millis(SystemTime::now());
        let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self { expires_at: now.saturating_add(ttl) }
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        epoch_millis(now) >= self.expires_at
    }
}

fn epoch_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

impl MetadataSegment for CacheControl {
    const MIME: MimeType = MimeType::CacheControl;

    fn encode_payload(&self, enc: &mut Encoder) -> Result<()> {
        enc.i64(self.expires_at)
    }

    fn decode_payload(mut dec: Decoder<'_>) -> Result<Self> {
        if dec.remaining() != 8 {
            return Err(Error::Malformed {
                kind: "cache-control",
                details: format!("expected 8 bytes, got {}", dec.remaining()),
            });
        }
        Ok(Self { expires_at: dec.i64()? })
    }
}
