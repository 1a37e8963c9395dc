use crate::Decoder;
use crate::Encoder;
use crate::MetadataSegment;
use crate::MimeType;
use crate::Result;

/// The MessageTags segment: ordered key/value context tags.
///
/// Insertion order is preserved and duplicate keys are allowed.
/// Wire form: `([u16 klen][key][u16 vlen][value])*`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageTags {
    entries: Vec<(String, String)>,
}

impl MessageTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn extend(&mut self, other: &MessageTags) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MessageTags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

impl MetadataSegment for MessageTags {
    const MIME: MimeType = MimeType::MessageTags;

    fn encode_payload(&self, enc: &mut Encoder) -> Result<()> {
        for (k, v) in &self.entries {
            enc.str16(k)?;
            enc.str16(v)?;
        }
        Ok(())
    }

    fn decode_payload(mut dec: Decoder<'_>) -> Result<Self> {
        let mut entries = Vec::new();
        while dec.remaining() > 0 {
            let k = dec.str16()?;
            let v = dec.str16()?;
            entries.push((k.to_string(), v.to_string()));
        }
        Ok(Self { entries })
    }
}
