//! # Interface Descriptors
//!
//! The declared shape of a remote interface, registered once before any proxy
//! is built. Descriptors are the source of truth for method metadata.
//!
//! ## Philosophy
//!
//! - **Registration-Time Checks**: Names are validated when the interface is
//!   built. Shape rules that need the codec registry run at metadata derivation.
//! - **Local Methods**: A method with a body runs in-process and never touches
//!   the network.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use fluxcodec::TypeDesc;
use fluxmeta::MimeType;

use crate::Proxy;
use crate::reply::Args;
use crate::reply::Reply;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("interface name is empty")]
    EmptyName,
    #[error("interface {interface} declares {method} twice")]
    DuplicateMethod { interface: String, method: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A parameter: one value, or a caller-supplied stream of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamDesc {
    Value(TypeDesc),
    Stream(TypeDesc),
}

/// What a method hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnDesc {
    /// Nothing; the call completes once sent.
    Unit,
    /// One deferred value.
    Single(TypeDesc),
    /// A lazy stream of values.
    Stream(TypeDesc),
}

/// Body of a local method.
pub type LocalFn = Arc<dyn Fn(&Proxy, Args) -> crate::Result<Reply> + Send + Sync>;

#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<ParamDesc>,
    pub returns: ReturnDesc,
    /// Overrides the interface and proxy parameter encoding.
    pub encoding: Option<MimeType>,
    /// Overrides the proxy accept list when non-empty.
    pub accept: Vec<MimeType>,
    /// Cache name for cacheable single-response methods.
    pub cache_name: Option<String>,
    pub local: Option<LocalFn>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: ReturnDesc::Unit,
            encoding: None,
            accept: Vec::new(),
            cache_name: None,
            local: None,
        }
    }

    pub fn param(mut self, ty: TypeDesc) -> Self {
        self.params.push(ParamDesc::Value(ty));
        self
    }

    pub fn stream_param(mut self, ty: TypeDesc) -> Self {
        self.params.push(ParamDesc::Stream(ty));
        self
    }

    pub fn returns(mut self, returns: ReturnDesc) -> Self {
        self.returns = returns;
        self
    }

    pub fn returns_single(self, ty: TypeDesc) -> Self {
        self.returns(ReturnDesc::Single(ty))
    }

    pub fn returns_stream(self, ty: TypeDesc) -> Self {
        self.returns(ReturnDesc::Stream(ty))
    }

    pub fn encoding(mut self, mime: MimeType) -> Self {
        self.encoding = Some(mime);
        self
    }

    pub fn accept(mut self, mimes: impl IntoIterator<Item = MimeType>) -> Self {
        self.accept = mimes.into_iter().collect();
        self
    }

    /// Caches successful results under `cache_name`.
    pub fn cacheable(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = Some(cache_name.into());
        self
    }

    /// Runs `body` in-process instead of calling out.
    pub fn local<F>(mut self, body: F) -> Self
    where
        F: Fn(&Proxy, Args) -> crate::Result<Reply> + Send + Sync + 'static,
    {
        self.local = Some(Arc::new(body));
        self
    }

    pub fn is_local(&self) -> bool {
        self.local.is_some()
    }

    /// Human-readable signature, e.g. `findById(int) -> single<any>`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match p {
                ParamDesc::Value(t) => t.to_string(),
                ParamDesc::Stream(t) => format!("stream<{t}>"),
            })
            .collect();
        let returns = match &self.returns {
            ReturnDesc::Unit => "unit".to_string(),
            ReturnDesc::Single(t) => format!("single<{t}>"),
            ReturnDesc::Stream(t) => format!("stream<{t}>"),
        };
        format!("{}({}) -> {}", self.name, params.join(", "), returns)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("signature", &self.signature())
            .field("encoding", &self.encoding)
            .field("accept", &self.accept)
            .field("cache_name", &self.cache_name)
            .field("local", &self.local.is_some())
            .finish()
    }
}

/// A named set of methods.
#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    name: String,
    encoding: Option<MimeType>,
    methods: Vec<MethodDescriptor>,
    index: HashMap<String, usize>,
}

impl InterfaceDescriptor {
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            name: name.into(),
            encoding: None,
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interface-level parameter encoding, if declared.
    pub fn encoding(&self) -> Option<MimeType> {
        self.encoding
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.index.get(name).map(|&i| &self.methods[i])
    }

    /// Methods in declaration order.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }
}

pub struct InterfaceBuilder {
    name: String,
    encoding: Option<MimeType>,
    methods: Vec<MethodDescriptor>,
}

impl InterfaceBuilder {
    pub fn encoding(mut self, mime: MimeType) -> Self {
        self.encoding = Some(mime);
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn build(self) -> Result<InterfaceDescriptor> {
        if self.name.is_empty() {
            return Err(Error::EmptyName);
        }
        let mut index = HashMap::with_capacity(self.methods.len());
        for (i, m) in self.methods.iter().enumerate() {
            if index.insert(m.name.clone(), i).is_some() {
                return Err(Error::DuplicateMethod { interface: self.name, method: m.name.clone() });
            }
        }
        Ok(InterfaceDescriptor {
            name: self.name,
            encoding: self.encoding,
            methods: self.methods,
            index,
        })
    }
}
