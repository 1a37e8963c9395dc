//! Service identity and the Route segment.

use std::fmt;
use std::str::FromStr;

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::MetadataSegment;
use crate::MimeType;
use crate::Result;

/// Identifies a remote service by `(group, service, version)`.
///
/// The `service_id` form is `[group ":"] service [":" version]`, with empty
/// parts omitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceLocator {
    group: String,
    service: String,
    version: String,
}

impl ServiceLocator {
    pub fn new(group: impl Into<String>, service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            service: service.into(),
            version: version.into(),
        }
    }

    /// A locator with no group or version.
    pub fn service(service: impl Into<String>) -> Self {
        Self::new("", service, "")
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The stable string key for this service.
    pub fn service_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServiceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.group.is_empty() {
            write!(f, "{}:", self.group)?;
        }
        f.write_str(&self.service)?;
        if !self.version.is_empty() {
            write!(f, ":{}", self.version)?;
        }
        Ok(())
    }
}

impl FromStr for ServiceLocator {
    type Err = Error;

    /// Parses a service id.
    ///
    /// One part is the service. Two parts are resolved as `service:version`
    /// when the second part starts with a digit, else `group:service`.
    fn from_str(s: &str) -> Result<Self> {
        let malformed = |details: &str| Error::Malformed { kind: "service id", details: format!("{details}: {s:?}") };
        let parts: Vec<&str> = s.split(':').collect();
        let locator = match parts.as_slice() {
            [service] => Self::new("", *service, ""),
            [a, b] if b.starts_with(|c: char| c.is_ascii_digit()) => Self::new("", *a, *b),
            [group, service] => Self::new(*group, *service, ""),
            [group, service, version] => Self::new(*group, *service, *version),
            _ => return Err(malformed("too many ':' separated parts")),
        };
        if locator.service.is_empty() {
            return Err(malformed("empty service name"));
        }
        Ok(locator)
    }
}

/// The Route segment: where a message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingMetadata {
    pub locator: ServiceLocator,
    pub method: String,
    pub endpoint: Option<String>,
}

impl RoutingMetadata {
    pub fn new(locator: ServiceLocator, method: impl Into<String>) -> Self {
        Self { locator, method: method.into(), endpoint: None }
    }

    /// Pins the call to one endpoint, such as a specific instance id.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// `service_id + "." + method`, the routing key seen by the broker.
    pub fn routing_key(&self) -> String {
        format!("{}.{}", self.locator, self.method)
    }
}

impl MetadataSegment for RoutingMetadata {
    const MIME: MimeType = MimeType::Route;

    // Routing tags: `s=` service and `m=` method always, the rest when set.
    fn encode_payload(&self, enc: &mut Encoder) -> Result<()> {
        enc.str8(&format!("s={}", self.locator.service))?;
        enc.str8(&format!("m={}", self.method))?;
        if !self.locator.group.is_empty() {
            enc.str8(&format!("g={}", self.locator.group))?;
        }
        if !self.locator.version.is_empty() {
            enc.str8(&format!("v={}", self.locator.version))?;
        }
        if let Some(endpoint) = &self.endpoint {
            enc.str8(&format!("e={endpoint}"))?;
        }
        Ok(())
    }

    fn decode_payload(mut dec: Decoder<'_>) -> Result<Self> {
        let (mut service, mut method) = (None, None);
        let (mut group, mut version, mut endpoint) = (String::new(), String::new(), None);
        while dec.remaining() > 0 {
            let tag = dec.str8()?;
            match tag.split_once('=') {
                Some(("s", v)) => service = Some(v.to_string()),
                Some(("m", v)) => method = Some(v.to_string()),
                Some(("g", v)) => group = v.to_string(),
                Some(("v", v)) => version = v.to_string(),
                Some(("e", v)) => endpoint = Some(v.to_string()),
                // Tags from newer writers.
                _ => {}
            }
        }
        let missing = |tag: &str| Error::Malformed { kind: "route", details: format!("missing {tag} tag") };
        let service = service.ok_or_else(|| missing("s="))?;
        let method = method.ok_or_else(|| missing("m="))?;
        Ok(Self {
            locator: ServiceLocator::new(group, service, version),
            method,
            endpoint,
        })
    }
}
