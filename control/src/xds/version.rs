//! Content-derived snapshot versions
//!
//! The version token is a SHA-256 over the canonical JSON of every resource.
//! Per kind (in kind order) each resource is hashed on its own, the resources
//! are sorted by that digest, and their bytes are fed into the overall hash.
//! Neither resource order nor the order of unordered fields inside a resource
//! can change the token; any content change does.

use super::resources::Resources;
use crate::error::Result;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `bytes`
fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute the version token for a resource set
pub fn compute_version(resources: &Resources) -> Result<String> {
    let mut overall = Sha256::new();

    for (kind, items) in resources {
        let mut encoded = Vec::with_capacity(items.len());
        for resource in items {
            let bytes = serde_json::to_vec(&resource.canonical())?;
            encoded.push((hex_digest(&bytes), bytes));
        }
        encoded.sort();

        overall.update(kind.type_url().as_bytes());
        for (_, bytes) in &encoded {
            overall.update(bytes);
        }
    }

    Ok(format!("{:x}", overall.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::resources::{Cluster, Resource, ResourceKind, SocketAddress};
    use std::time::Duration;

    fn cluster(name: &str, addrs: &[&str]) -> Resource {
        Resource::Cluster(Cluster::static_cluster(
            name,
            Duration::from_secs(1),
            addrs.iter().map(|a| SocketAddress::new(*a, 80)).collect(),
        ))
    }

    fn resources(clusters: Vec<Resource>) -> Resources {
        let mut resources = Resources::new();
        resources.insert(ResourceKind::Cluster, clusters);
        resources
    }

    #[test]
    fn test_version_is_hex_sha256() {
        let version = compute_version(&resources(vec![cluster("a", &["10.0.0.1"])])).unwrap();
        assert_eq!(version.len(), 64);
        assert!(version.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_version_is_deterministic() {
        let set = resources(vec![cluster("a", &["10.0.0.1"]), cluster("b", &["10.0.0.2"])]);
        assert_eq!(compute_version(&set).unwrap(), compute_version(&set).unwrap());
    }

    #[test]
    fn test_resource_order_does_not_matter() {
        let forward = resources(vec![cluster("a", &["10.0.0.1"]), cluster("b", &["10.0.0.2"])]);
        let reverse = resources(vec![cluster("b", &["10.0.0.2"]), cluster("a", &["10.0.0.1"])]);
        assert_eq!(
            compute_version(&forward).unwrap(),
            compute_version(&reverse).unwrap()
        );
    }

    #[test]
    fn test_endpoint_order_does_not_matter() {
        let a = resources(vec![cluster("a", &["10.0.0.1", "10.0.0.2"])]);
        let b = resources(vec![cluster("a", &["10.0.0.2", "10.0.0.1"])]);
        assert_eq!(compute_version(&a).unwrap(), compute_version(&b).unwrap());
    }

    #[test]
    fn test_content_change_changes_version() {
        let a = resources(vec![cluster("a", &["10.0.0.1"])]);
        let b = resources(vec![cluster("a", &["10.0.0.9"])]);
        let c = resources(vec![cluster("renamed", &["10.0.0.1"])]);

        let va = compute_version(&a).unwrap();
        assert_ne!(va, compute_version(&b).unwrap(), "Address change must bump version");
        assert_ne!(va, compute_version(&c).unwrap(), "Name change must bump version");
    }

    #[test]
    fn test_empty_kind_still_contributes() {
        let empty = Resources::new();
        let empty_clusters = resources(vec![]);
        assert_ne!(
            compute_version(&empty).unwrap(),
            compute_version(&empty_clusters).unwrap()
        );
    }
}
