use std::collections::HashMap;
use std::sync::Arc;

use fluxmeta::MimeType;

use crate::BinaryCodec;
use crate::CborCodec;
use crate::Codec;
use crate::Error;
use crate::JsonCodec;
use crate::Result;
use crate::TextCodec;

/// Immutable mapping from mime type to codec.
///
/// Built once through [`RegistryBuilder`], then shared read-only; lookups take
/// no locks.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<MimeType, Arc<dyn Codec>>,
    /// Registration order, used to build default accept lists.
    order: Vec<MimeType>,
}

impl CodecRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// A registry holding the bundled codecs: JSON, CBOR, text and binary.
    pub fn with_defaults() -> Self {
        Self::builder().with_defaults().build()
    }

    /// Looks up the codec for `mime`.
    ///
    /// # Errors
    /// Returns `Error::Unregistered` when nothing was registered for it.
    pub fn get(&self, mime: MimeType) -> Result<Arc<dyn Codec>> {
        self.codecs.get(&mime).cloned().ok_or(Error::Unregistered(mime))
    }

    pub fn contains(&self, mime: MimeType) -> bool {
        self.codecs.contains_key(&mime)
    }

    /// Registered mime types in registration order.
    pub fn mime_types(&self) -> &[MimeType] {
        &self.order
    }

    /// `[primary]` followed by every other registered type.
    pub fn default_accept(&self, primary: MimeType) -> Vec<MimeType> {
        std::iter::once(primary)
            .chain(self.order.iter().copied().filter(|m| *m != primary))
            .collect()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry").field("mime_types", &self.order).finish()
    }
}

/// Collects codecs before freezing them into a [`CodecRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    codecs: HashMap<MimeType, Arc<dyn Codec>>,
    order: Vec<MimeType>,
}

impl RegistryBuilder {
    /// Registers a codec under its own mime type.
    ///
    /// A later registration for the same type replaces the earlier codec and
    /// keeps its position.
    pub fn with_codec(mut self, codec: impl Codec) -> Self {
        self.insert(Arc::new(codec));
        self
    }

    pub fn with_shared(mut self, codec: Arc<dyn Codec>) -> Self {
        self.insert(codec);
        self
    }

    pub fn with_defaults(self) -> Self {
        self.with_codec(JsonCodec)
            .with_codec(CborCodec)
            .with_codec(TextCodec)
            .with_codec(BinaryCodec)
    }

    fn insert(&mut self, codec: Arc<dyn Codec>) {
        let mime = codec.mime_type();
        if self.codecs.insert(mime, codec).is_none() {
            self.order.push(mime);
        }
    }

    pub fn build(self) -> CodecRegistry {
        CodecRegistry { codecs: self.codecs, order: self.order }
    }
}
