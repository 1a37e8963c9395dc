//! # Upstream Clusters
//!
//! Where a proxy gets a live connection for each call.
//!
//! A cluster owns the connections for one service id. The manager maps service
//! ids to clusters and falls back to a default cluster, typically the broker,
//! when a service has no dedicated one. Topology-change notifications replace a
//! cluster's URI set at runtime.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::transport;
use crate::transport::Transport;

/// The set of connections serving one service id.
pub trait UpstreamCluster: Send + Sync + 'static {
    fn service_id(&self) -> &str;

    /// Returns a live connection.
    ///
    /// # Errors
    /// `transport::Error::NoLiveConnection` when the cluster is empty.
    fn pick(&self) -> transport::Result<Arc<dyn Transport>>;

    /// Replaces the cluster's URI set.
    fn set_uris(&self, uris: Vec<String>);

    fn uris(&self) -> Vec<String>;
}

/// Opens a connection to a URI.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, uri: &str) -> transport::Result<Arc<dyn Transport>>;
}

impl<F> Connector for F
where
    F: Fn(&str) -> transport::Result<Arc<dyn Transport>> + Send + Sync + 'static,
{
    fn connect(&self, uri: &str) -> transport::Result<Arc<dyn Transport>> {
        self(uri)
    }
}

/// A cluster over one fixed connection.
///
/// `set_uris` only records the advertised URIs.
pub struct SingleConnection {
    service_id: String,
    transport: Arc<dyn Transport>,
    uris: RwLock<Vec<String>>,
}

impl SingleConnection {
    pub fn new(service_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            service_id: service_id.into(),
            transport,
            uris: RwLock::new(Vec::new()),
        }
    }
}

impl UpstreamCluster for SingleConnection {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn pick(&self) -> transport::Result<Arc<dyn Transport>> {
        Ok(Arc::clone(&self.transport))
    }

    fn set_uris(&self, uris: Vec<String>) {
        *self.uris.write() = uris;
    }

    fn uris(&self) -> Vec<String> {
        self.uris.read().clone()
    }
}

/// A cluster that spreads calls round-robin over one connection per URI.
///
/// # Invariants
/// - Connections for URIs kept across `set_uris` are reused, not reopened.
/// - URIs that fail to connect are skipped and logged.
pub struct RoundRobinCluster {
    service_id: String,
    connector: Arc<dyn Connector>,
    members: RwLock<Vec<(String, Arc<dyn Transport>)>>,
    next: AtomicUsize,
}

impl RoundRobinCluster {
    pub fn new(service_id: impl Into<String>, connector: Arc<dyn Connector>, uris: Vec<String>) -> Self {
        let cluster = Self {
            service_id: service_id.into(),
            connector,
            members: RwLock::new(Vec::new()),
            next: AtomicUsize::new(0),
        };
        cluster.set_uris(uris);
        cluster
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl UpstreamCluster for RoundRobinCluster {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn pick(&self) -> transport::Result<Arc<dyn Transport>> {
        let members = self.members.read();
        if members.is_empty() {
            return Err(transport::Error::NoLiveConnection(self.service_id.clone()));
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % members.len();
        Ok(Arc::clone(&members[idx].1))
    }

    fn set_uris(&self, uris: Vec<String>) {
        let previous = self.members.read().clone();
        let mut next = Vec::with_capacity(uris.len());
        for uri in uris {
            if next.iter().any(|(u, _)| *u == uri) {
                continue;
            }
            if let Some((_, conn)) = previous.iter().find(|(u, _)| *u == uri) {
                next.push((uri, Arc::clone(conn)));
                continue;
            }
            match self.connector.connect(&uri) {
                Ok(conn) => {
                    debug!(service_id = %self.service_id, %uri, "connected upstream");
                    next.push((uri, conn));
                }
                Err(error) => warn!(service_id = %self.service_id, %uri, %error, "upstream connect failed"),
            }
        }
        *self.members.write() = next;
    }

    fn uris(&self) -> Vec<String> {
        self.members.read().iter().map(|(u, _)| u.clone()).collect()
    }
}

/// Registry of clusters by service id.
#[derive(Default)]
pub struct UpstreamManager {
    clusters: DashMap<String, Arc<dyn UpstreamCluster>>,
    default: Option<Arc<dyn UpstreamCluster>>,
}

impl UpstreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cluster used for service ids with no dedicated cluster.
    pub fn with_default(mut self, cluster: Arc<dyn UpstreamCluster>) -> Self {
        self.default = Some(cluster);
        self
    }

    /// Registers a cluster under its own service id, replacing any previous one.
    pub fn add(&self, cluster: Arc<dyn UpstreamCluster>) {
        self.clusters.insert(cluster.service_id().to_string(), cluster);
    }

    pub fn remove(&self, service_id: &str) -> Option<Arc<dyn UpstreamCluster>> {
        self.clusters.remove(service_id).map(|(_, c)| c)
    }

    /// The dedicated cluster for `service_id`, with no fallback.
    pub fn get(&self, service_id: &str) -> Option<Arc<dyn UpstreamCluster>> {
        self.clusters.get(service_id).map(|c| Arc::clone(c.value()))
    }

    /// The dedicated cluster for `service_id`, else the default cluster.
    pub fn find_cluster(&self, service_id: &str) -> Option<Arc<dyn UpstreamCluster>> {
        self.get(service_id).or_else(|| self.default.clone())
    }

    pub fn pick_connection(&self, service_id: &str) -> transport::Result<Arc<dyn Transport>> {
        match self.find_cluster(service_id) {
            Some(cluster) => cluster.pick(),
            None => Err(transport::Error::NoLiveConnection(service_id.to_string())),
        }
    }

    /// Applies a topology change to the dedicated cluster for `service_id`.
    ///
    /// Returns false when the service has no dedicated cluster.
    pub fn refresh(&self, service_id: &str, uris: Vec<String>) -> bool {
        let Some(cluster) = self.get(service_id) else { return false };
        let joined = uris.join(",");
        cluster.set_uris(uris);
        info!(%service_id, uris = %joined, "upstream cluster changed");
        true
    }
}
