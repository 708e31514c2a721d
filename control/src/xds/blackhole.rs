//! Catch-all sink for traffic that matches no frontend

use super::resources::{Cluster, FilterChain, NetworkFilter, TcpProxy};
use std::time::Duration;

pub const BLACKHOLE_CLUSTER_NAME: &str = "blackhole";

const BLACKHOLE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// STATIC cluster with no endpoints: connections routed here are dropped
pub fn blackhole_cluster() -> Cluster {
    Cluster::static_cluster(BLACKHOLE_CLUSTER_NAME, BLACKHOLE_CONNECT_TIMEOUT, Vec::new())
}

/// Unmatched filter chain proxying to [`blackhole_cluster`]
pub fn blackhole_filter_chain() -> FilterChain {
    FilterChain {
        filter_chain_match: None,
        filters: vec![NetworkFilter::TcpProxy(TcpProxy {
            stat_prefix: format!("{}.", BLACKHOLE_CLUSTER_NAME),
            cluster: BLACKHOLE_CLUSTER_NAME.to_string(),
        })],
    }
}
