//! # Requester Configuration
//!
//! Serde-loadable settings for proxies and the shared result cache. Mime types
//! are written as canonical strings or short aliases:
//!
//! ```toml
//! [proxy]
//! service = "com.example.UserService"
//! version = "1.0.0"
//! encoding = "json"
//! accept = ["json", "cbor"]
//! timeout_ms = 3000
//!
//! [cache]
//! max_entries = 500000
//! ttl_secs = 300
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fluxmeta::MimeType;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid TOML: {0}")]
    Toml(#[source] Arc<toml::de::Error>),
    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    /// No upstream cluster or transport was supplied for the service.
    #[error("no upstream for {0}")]
    MissingUpstream(String),
    #[error("encoding {0} has no registered codec")]
    UnregisteredEncoding(MimeType),
}

pub type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_CACHE_ENTRIES: usize = 500_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Settings of one proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub group: Option<String>,
    pub service: String,
    pub version: Option<String>,
    /// Pins calls to one endpoint of the service.
    pub endpoint: Option<String>,
    #[serde(with = "mime_serde")]
    pub encoding: MimeType,
    /// Reply encodings in preference order; empty derives them from the registry.
    #[serde(with = "mime_list_serde")]
    pub accept: Vec<MimeType>,
    pub timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            group: None,
            service: String::new(),
            version: None,
            endpoint: None,
            encoding: MimeType::Json,
            accept: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ProxyConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into(), ..Self::default() }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(Error::Invalid { field: "service", reason: "must not be empty".into() });
        }
        if self.timeout_ms == 0 {
            return Err(Error::Invalid { field: "timeout_ms", reason: "must be positive".into() });
        }
        Ok(())
    }
}

/// Settings of the shared result cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: DEFAULT_CACHE_ENTRIES, ttl_secs: DEFAULT_CACHE_TTL_SECS }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// A whole requester: one proxy plus the cache it shares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequesterConfig {
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
}

impl RequesterConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Toml(Arc::new(e)))?;
        config.proxy.validate()?;
        Ok(config)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }
}

mod mime_serde {
    use fluxmeta::MimeType;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(mime: &MimeType, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(mime.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<MimeType, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod mime_list_serde {
    use fluxmeta::MimeType;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(mimes: &[MimeType], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(mimes.len()))?;
        for mime in mimes {
            seq.serialize_element(mime.as_str())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<MimeType>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}
