//! Immutable snapshots and where they are published

use super::resources::{check_references, Resource, ResourceKind, Resources};
use crate::error::{Error, Result};
use crate::lock::{safe_read, safe_write};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Node group every proxy is served from
pub const NODE_GROUP: &str = "all";

/// A versioned, complete resource set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    version: String,
    resources: Resources,
}

impl Snapshot {
    pub fn new(version: impl Into<String>, resources: Resources) -> Self {
        Self {
            version: version.into(),
            resources,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Resources of one kind (empty if the kind is absent)
    pub fn get(&self, kind: ResourceKind) -> &[Resource] {
        self.resources.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Verify that listeners only reference clusters present in the snapshot
    pub fn consistent(&self) -> Result<()> {
        check_references(&self.resources)
            .map_err(|e| Error::Translation(format!("snapshot {}: {}", self.version, e)))
    }

    /// Resources keyed by type URL, rendered as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        let by_url: BTreeMap<&str, &Vec<Resource>> = self
            .resources
            .iter()
            .map(|(kind, items)| (kind.type_url(), items))
            .collect();
        let dump = serde_json::json!({
            "version": self.version,
            "resources": by_url,
        });
        Ok(serde_json::to_string_pretty(&dump)?)
    }
}

/// Receives every snapshot the aggregator decides to publish
#[async_trait]
pub trait DistributionSink: Send + Sync {
    /// Atomically replace the served configuration
    async fn publish(&self, snapshot: Arc<Snapshot>) -> Result<()>;
}

/// In-memory sink holding the latest snapshot per node group
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: RwLock<HashMap<String, Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot currently served to [`NODE_GROUP`]
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        safe_read(&self.snapshots).get(NODE_GROUP).cloned()
    }

    /// Pretty JSON of the served snapshot, if any
    pub fn dump_json(&self) -> Result<Option<String>> {
        self.latest().map(|snapshot| snapshot.to_json()).transpose()
    }
}

#[async_trait]
impl DistributionSink for SnapshotCache {
    async fn publish(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        snapshot
            .consistent()
            .map_err(|e| Error::Publish(e.to_string()))?;

        let mut snapshots = safe_write(&self.snapshots);
        if let Some(current) = snapshots.get(NODE_GROUP) {
            if current.version() == snapshot.version() {
                debug!("Snapshot {} already cached", snapshot.version());
                return Ok(());
            }
        }
        info!(
            node_group = NODE_GROUP,
            version = %snapshot.version(),
            "Snapshot cached"
        );
        snapshots.insert(NODE_GROUP.to_string(), snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::resources::{
        Cluster, FilterChain, Listener, NetworkFilter, SocketAddress, TcpProxy,
    };
    use std::time::Duration;

    fn listener_to(cluster: &str) -> Resource {
        Resource::Listener(Listener {
            name: "https_listener".to_string(),
            address: SocketAddress::new("0.0.0.0", 443),
            stat_prefix: "https".to_string(),
            listener_filters: vec![],
            filter_chains: vec![FilterChain {
                filter_chain_match: None,
                filters: vec![NetworkFilter::TcpProxy(TcpProxy {
                    stat_prefix: format!("{}.", cluster),
                    cluster: cluster.to_string(),
                })],
            }],
            default_filter_chain: None,
        })
    }

    fn snapshot(version: &str, with_cluster: bool) -> Snapshot {
        let mut resources = Resources::new();
        let clusters = if with_cluster {
            vec![Resource::Cluster(Cluster::static_cluster(
                "edge.https.web",
                Duration::from_secs(1),
                vec![SocketAddress::new("10.0.0.1", 443)],
            ))]
        } else {
            vec![]
        };
        resources.insert(ResourceKind::Cluster, clusters);
        resources.insert(ResourceKind::Listener, vec![listener_to("edge.https.web")]);
        Snapshot::new(version, resources)
    }

    #[test]
    fn test_consistency_check() {
        assert!(snapshot("v1", true).consistent().is_ok());
        let err = snapshot("v1", false).consistent().unwrap_err();
        assert!(matches!(err, Error::Translation(_)));
    }

    #[test]
    fn test_get_missing_kind_is_empty() {
        let snapshot = Snapshot::new("v0", Resources::new());
        assert!(snapshot.get(ResourceKind::Listener).is_empty());
    }

    #[tokio::test]
    async fn test_cache_serves_latest() {
        let cache = SnapshotCache::new();
        assert!(cache.latest().is_none());
        assert!(cache.dump_json().unwrap().is_none());

        cache.publish(Arc::new(snapshot("v1", true))).await.unwrap();
        cache.publish(Arc::new(snapshot("v2", true))).await.unwrap();

        assert_eq!(cache.latest().unwrap().version(), "v2");
        let dump = cache.dump_json().unwrap().unwrap();
        assert!(dump.contains("\"version\": \"v2\""));
        assert!(dump.contains("type.googleapis.com/envoy.config.cluster.v3.Cluster"));
    }

    #[tokio::test]
    async fn test_cache_rejects_inconsistent_snapshot() {
        let cache = SnapshotCache::new();
        cache.publish(Arc::new(snapshot("v1", true))).await.unwrap();

        let err = cache
            .publish(Arc::new(snapshot("v2", false)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
        assert_eq!(
            cache.latest().unwrap().version(),
            "v1",
            "Rejected snapshot must not replace the served one"
        );
    }
}
