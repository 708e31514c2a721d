//! Routing cluster providers
//!
//! A provider owns exactly one [`RoutingCluster`] and hands out the latest
//! complete version on request. Implementations:
//!
//! - [`StaticProvider`]: a document loaded once at startup
//! - [`IngressProvider`](crate::apis::ingress::IngressProvider): derived from Kubernetes Ingress objects

mod static_provider;

pub use static_provider::StaticProvider;

use crate::error::Result;
use async_trait::async_trait;
use common::RoutingCluster;
use std::sync::Arc;

#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Latest complete routing cluster
    ///
    /// The returned value is never mutated afterwards; a provider that has not
    /// produced anything yet returns [`Error::NotReady`](crate::Error::NotReady).
    async fn routing_cluster(&self) -> Result<Arc<RoutingCluster>>;
}
