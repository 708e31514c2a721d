use super::ClusterProvider;
use crate::error::Result;
use async_trait::async_trait;
use common::RoutingCluster;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Serves one fixed routing cluster
#[derive(Debug, Clone)]
pub struct StaticProvider {
    cluster: Arc<RoutingCluster>,
}

impl StaticProvider {
    pub fn new(cluster: RoutingCluster) -> Self {
        Self {
            cluster: Arc::new(cluster),
        }
    }

    /// Load and validate a JSON routing cluster document
    ///
    /// Any read, parse or validation failure is returned; nothing is served
    /// from a document that did not validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let cluster: RoutingCluster = serde_json::from_str(&raw)?;
        cluster.validate()?;

        info!(
            "Loaded static cluster {:?} ({} ingresses) from {}",
            cluster.name,
            cluster.ingresses.len(),
            path.display()
        );
        Ok(Self::new(cluster))
    }
}

#[async_trait]
impl ClusterProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.cluster.name
    }

    async fn routing_cluster(&self) -> Result<Arc<RoutingCluster>> {
        Ok(Arc::clone(&self.cluster))
    }
}
