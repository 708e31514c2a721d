//! Proxy resource model
//!
//! Serializable mirrors of the Envoy v3 resources sluice generates. Only the
//! fields the translator sets are modelled. Field names follow the Envoy JSON
//! representation so a dumped snapshot reads like an Envoy config dump.
//!
//! All types are totally ordered so that semantically unordered collections
//! can be sorted by [`Resource::canonical`] before hashing.

use common::duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

// =============================================================================
// ResourceKind
// =============================================================================

/// Resource type, ordered by type URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Cluster,
    Listener,
}

impl ResourceKind {
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            ResourceKind::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_url())
    }
}

/// Generated resources grouped by kind
pub type Resources = BTreeMap<ResourceKind, Vec<Resource>>;

// =============================================================================
// Cluster
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u16,
}

impl SocketAddress {
    pub fn new(address: impl Into<String>, port_value: u16) -> Self {
        Self {
            address: address.into(),
            port_value,
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port_value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LbEndpoint {
    pub address: SocketAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalityLbEndpoints {
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

/// Upstream cluster with a static endpoint list
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(with = "duration::serde_string")]
    pub connect_timeout: Duration,
    #[serde(rename = "type")]
    pub discovery_type: DiscoveryType,
    pub load_assignment: ClusterLoadAssignment,
}

impl Cluster {
    /// STATIC cluster with a single locality holding `endpoints`
    pub fn static_cluster(
        name: impl Into<String>,
        connect_timeout: Duration,
        endpoints: Vec<SocketAddress>,
    ) -> Self {
        let name = name.into();
        let locality = LocalityLbEndpoints {
            lb_endpoints: endpoints
                .into_iter()
                .map(|address| LbEndpoint { address })
                .collect(),
        };
        Self {
            load_assignment: ClusterLoadAssignment {
                cluster_name: name.clone(),
                endpoints: vec![locality],
            },
            name,
            connect_timeout,
            discovery_type: DiscoveryType::Static,
        }
    }

    /// All endpoint addresses across localities
    pub fn endpoints(&self) -> impl Iterator<Item = &SocketAddress> {
        self.load_assignment
            .endpoints
            .iter()
            .flat_map(|locality| locality.lb_endpoints.iter().map(|e| &e.address))
    }

    fn canonical(&self) -> Self {
        let mut cluster = self.clone();
        for locality in &mut cluster.load_assignment.endpoints {
            locality.lb_endpoints.sort();
        }
        cluster.load_assignment.endpoints.sort();
        cluster
    }
}

// =============================================================================
// Listener
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteMatch {
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteAction {
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    pub route: RouteAction,
    pub stat_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteConfiguration {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum HttpFilter {
    #[serde(rename = "envoy.filters.http.router")]
    Router,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HttpConnectionManager {
    pub stat_prefix: String,
    pub route_config: RouteConfiguration,
    pub http_filters: Vec<HttpFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TcpProxy {
    pub stat_prefix: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "name", content = "typed_config")]
pub enum NetworkFilter {
    #[serde(rename = "envoy.filters.network.http_connection_manager")]
    HttpConnectionManager(HttpConnectionManager),
    #[serde(rename = "envoy.filters.network.tcp_proxy")]
    TcpProxy(TcpProxy),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum ListenerFilter {
    #[serde(rename = "envoy.filters.listener.tls_inspector")]
    TlsInspector,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilterChainMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilterChain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_chain_match: Option<FilterChainMatch>,
    pub filters: Vec<NetworkFilter>,
}

impl FilterChain {
    fn canonical(&self) -> Self {
        let mut chain = self.clone();
        if let Some(m) = chain.filter_chain_match.as_mut() {
            m.server_names.sort();
        }
        for filter in &mut chain.filters {
            if let NetworkFilter::HttpConnectionManager(hcm) = filter {
                for vhost in &mut hcm.route_config.virtual_hosts {
                    vhost.domains.sort();
                }
                hcm.route_config.virtual_hosts.sort();
            }
        }
        chain
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub address: SocketAddress,
    pub stat_prefix: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listener_filters: Vec<ListenerFilter>,
    pub filter_chains: Vec<FilterChain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_filter_chain: Option<FilterChain>,
}

impl Listener {
    fn chains(&self) -> impl Iterator<Item = &FilterChain> {
        self.filter_chains
            .iter()
            .chain(self.default_filter_chain.iter())
    }

    /// Names of every upstream cluster this listener can send traffic to
    pub fn referenced_clusters(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for chain in self.chains() {
            for filter in &chain.filters {
                match filter {
                    NetworkFilter::TcpProxy(proxy) => {
                        names.insert(proxy.cluster.as_str());
                    }
                    NetworkFilter::HttpConnectionManager(hcm) => {
                        for vhost in &hcm.route_config.virtual_hosts {
                            for route in &vhost.routes {
                                names.insert(route.route.cluster.as_str());
                            }
                        }
                    }
                }
            }
        }
        names
    }

    /// Virtual hosts of every HTTP connection manager on this listener
    pub fn virtual_hosts(&self) -> impl Iterator<Item = &VirtualHost> {
        self.chains()
            .flat_map(|chain| chain.filters.iter())
            .filter_map(|filter| match filter {
                NetworkFilter::HttpConnectionManager(hcm) => Some(&hcm.route_config.virtual_hosts),
                NetworkFilter::TcpProxy(_) => None,
            })
            .flatten()
    }

    fn canonical(&self) -> Self {
        let mut listener = self.clone();
        listener.filter_chains = self.filter_chains.iter().map(FilterChain::canonical).collect();
        listener.filter_chains.sort();
        listener.default_filter_chain = self.default_filter_chain.as_ref().map(FilterChain::canonical);
        listener.listener_filters.sort();
        listener
    }
}

// =============================================================================
// Resource
// =============================================================================

/// One generated resource of any kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resource {
    Cluster(Cluster),
    Listener(Listener),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Cluster(_) => ResourceKind::Cluster,
            Resource::Listener(_) => ResourceKind::Listener,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Cluster(c) => &c.name,
            Resource::Listener(l) => &l.name,
        }
    }

    pub fn as_cluster(&self) -> Option<&Cluster> {
        match self {
            Resource::Cluster(c) => Some(c),
            Resource::Listener(_) => None,
        }
    }

    pub fn as_listener(&self) -> Option<&Listener> {
        match self {
            Resource::Listener(l) => Some(l),
            Resource::Cluster(_) => None,
        }
    }

    /// Copy with every order-insensitive collection sorted
    ///
    /// Endpoints, virtual hosts, filter chains, domains and server names are
    /// matched by the proxy regardless of position, so their order must not
    /// influence the version token.
    pub fn canonical(&self) -> Self {
        match self {
            Resource::Cluster(c) => Resource::Cluster(c.canonical()),
            Resource::Listener(l) => Resource::Listener(l.canonical()),
        }
    }
}

/// Check that every cluster a listener references exists and that names are
/// unique within a kind
pub fn check_references(resources: &Resources) -> Result<(), String> {
    for (kind, items) in resources {
        let mut seen = BTreeSet::new();
        for resource in items {
            if resource.kind() != *kind {
                return Err(format!(
                    "resource {:?} filed under {} but is a {}",
                    resource.name(),
                    kind,
                    resource.kind()
                ));
            }
            if !seen.insert(resource.name()) {
                return Err(format!("duplicate {} {:?}", kind, resource.name()));
            }
        }
    }

    let clusters: BTreeSet<&str> = resources
        .get(&ResourceKind::Cluster)
        .into_iter()
        .flatten()
        .map(Resource::name)
        .collect();

    for listener in resources
        .get(&ResourceKind::Listener)
        .into_iter()
        .flatten()
        .filter_map(Resource::as_listener)
    {
        for name in listener.referenced_clusters() {
            if !clusters.contains(name) {
                return Err(format!(
                    "listener {:?} references unknown cluster {:?}",
                    listener.name, name
                ));
            }
        }
    }
    Ok(())
}
