//! # Proxy Builder
//!
//! Fluent composition of a [`Proxy`] from an interface, a configuration and
//! the shared pieces it calls through.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fluxcodec::CodecRegistry;
use fluxmeta::MimeType;
use fluxmeta::ServiceLocator;

use crate::Result;
use crate::cache::ResultCache;
use crate::config;
use crate::config::ProxyConfig;
use crate::interface::InterfaceDescriptor;
use crate::proxy::Proxy;
use crate::proxy::ProxyInner;
use crate::proxy::Upstream;
use crate::transport::Transport;
use crate::upstream::SingleConnection;
use crate::upstream::UpstreamCluster;
use crate::upstream::UpstreamManager;

/// Fluent builder for a [`Proxy`].
///
/// The service name defaults to the interface name.
pub struct ProxyBuilder {
    interface: Arc<InterfaceDescriptor>,
    config: ProxyConfig,
    registry: Option<Arc<CodecRegistry>>,
    upstream: Option<Upstream>,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<ResultCache>>,
}

impl ProxyBuilder {
    pub fn new(interface: impl Into<Arc<InterfaceDescriptor>>) -> Self {
        let interface = interface.into();
        let config = ProxyConfig::new(interface.name());
        Self {
            interface,
            config,
            registry: None,
            upstream: None,
            transport: None,
            cache: None,
        }
    }

    /// Replaces every configurable setting. An empty service keeps the interface name.
    pub fn config(mut self, config: ProxyConfig) -> Self {
        let service = std::mem::take(&mut self.config.service);
        self.config = config;
        if self.config.service.is_empty() {
            self.config.service = service;
        }
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.config.group = Some(group.into());
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.config.service = service.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = Some(version.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    pub fn encoding(mut self, mime: MimeType) -> Self {
        self.config.encoding = mime;
        self
    }

    pub fn accept(mut self, mimes: impl IntoIterator<Item = MimeType>) -> Self {
        self.config.accept = mimes.into_iter().collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn registry(mut self, registry: Arc<CodecRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Calls go through `cluster`.
    pub fn upstream(mut self, cluster: Arc<dyn UpstreamCluster>) -> Self {
        self.upstream = Some(Upstream::Cluster(cluster));
        self
    }

    /// Calls go through the cluster `manager` resolves for this service on each call.
    pub fn upstream_manager(mut self, manager: Arc<UpstreamManager>) -> Self {
        self.upstream = Some(Upstream::Managed(manager));
        self
    }

    /// Calls go through one fixed connection.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Enables result caching for cacheable methods.
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Proxy> {
        let config = self.config;
        config.validate()?;

        let registry = self.registry.unwrap_or_else(|| Arc::new(CodecRegistry::with_defaults()));
        if let Some(missing) = std::iter::once(&config.encoding)
            .chain(&config.accept)
            .find(|m| !registry.contains(**m))
        {
            return Err(config::Error::UnregisteredEncoding(*missing).into());
        }

        let locator = ServiceLocator::new(
            config.group.clone().unwrap_or_default(),
            config.service.clone(),
            config.version.clone().unwrap_or_default(),
        );
        let service_id = locator.service_id();

        let upstream = match (self.upstream, self.transport) {
            (Some(upstream), _) => upstream,
            (None, Some(transport)) => {
                Upstream::Cluster(Arc::new(SingleConnection::new(service_id.clone(), transport)))
            }
            (None, None) => return Err(config::Error::MissingUpstream(service_id).into()),
        };

        Ok(Proxy::from_inner(ProxyInner {
            interface: self.interface,
            locator,
            service_id,
            endpoint: config.endpoint.clone(),
            default_encoding: config.encoding,
            accept: config.accept.clone(),
            timeout: config.timeout(),
            registry,
            upstream,
            cache: self.cache,
            methods: DashMap::new(),
        }))
    }
}
