//! Logical view to proxy resources
//!
//! ## Output
//!
//! ```text
//! per ingress:   {cluster}.http.{ingress}   STATIC cluster
//!                {cluster}.https.{ingress}  STATIC cluster
//! http_listener  0.0.0.0:http_port   HTTP connection manager, one vhost per ingress
//! https_listener 0.0.0.0:https_port  TLS inspector, one SNI chain per ingress (TCP proxy)
//! ```
//!
//! Translation is a pure function of the view and [`TranslatorOptions`]:
//! the same input always yields the same resources in the same order.

use super::blackhole::{blackhole_cluster, blackhole_filter_chain};
use super::resources::{
    check_references, Cluster, FilterChain, FilterChainMatch, HttpConnectionManager, HttpFilter,
    Listener, ListenerFilter, NetworkFilter, Resource, ResourceKind, Resources, Route,
    RouteAction, RouteConfiguration, RouteMatch, SocketAddress, TcpProxy, VirtualHost,
};
use crate::error::{Error, Result};
use common::{LogicalView, RoutingCluster, RoutingIngress, StaticAddresses, Upstream};
use tracing::debug;

pub const HTTP_LISTENER_NAME: &str = "http_listener";
pub const HTTPS_LISTENER_NAME: &str = "https_listener";

const LISTEN_ADDRESS: &str = "0.0.0.0";
const HTTP_STAT_PREFIX: &str = "http";
const HTTPS_STAT_PREFIX: &str = "https";
const HCM_STAT_PREFIX: &str = "ingress_http";
const ROUTE_CONFIG_NAME: &str = "local_route";
const TLS_TRANSPORT: &str = "tls";

/// Translation switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslatorOptions {
    /// Emit the blackhole cluster and make it the HTTPS listener's default chain
    pub catch_all_blackhole: bool,
}

/// Upstream kinds that can be materialised as a proxy cluster
pub trait ClusterSource {
    fn proxy_cluster(&self, name: &str) -> Cluster;
}

impl ClusterSource for StaticAddresses {
    fn proxy_cluster(&self, name: &str) -> Cluster {
        let endpoints = self
            .static_addresses
            .iter()
            .map(|addr| SocketAddress::new(addr.clone(), self.port))
            .collect();
        Cluster::static_cluster(name, self.connect_timeout, endpoints)
    }
}

impl ClusterSource for Upstream {
    fn proxy_cluster(&self, name: &str) -> Cluster {
        match self {
            Upstream::StaticAddresses(upstream) => upstream.proxy_cluster(name),
        }
    }
}

pub fn http_cluster_name(cluster: &str, ingress: &str) -> String {
    format!("{}.http.{}", cluster, ingress)
}

pub fn https_cluster_name(cluster: &str, ingress: &str) -> String {
    format!("{}.https.{}", cluster, ingress)
}

/// Translate a validated view
///
/// Returns [`Error::Translation`] when an ingress lacks an upstream or the
/// generated listeners reference a cluster that was not generated.
pub fn translate(view: &LogicalView, options: &TranslatorOptions) -> Result<Resources> {
    let mut clusters = Vec::new();
    let mut virtual_hosts = Vec::new();
    let mut tls_chains = Vec::new();

    for cluster in &view.clusters {
        for ingress in &cluster.ingresses {
            let IngressResources {
                http_cluster,
                https_cluster,
                virtual_host,
                tls_chain,
            } = translate_ingress(cluster, ingress)?;
            clusters.push(Resource::Cluster(http_cluster));
            clusters.push(Resource::Cluster(https_cluster));
            virtual_hosts.push(virtual_host);
            tls_chains.push(tls_chain);
        }
    }

    let default_chain = if options.catch_all_blackhole {
        clusters.push(Resource::Cluster(blackhole_cluster()));
        Some(blackhole_filter_chain())
    } else {
        None
    };

    let listeners = vec![
        Resource::Listener(http_listener(view.http_port, virtual_hosts)),
        Resource::Listener(https_listener(view.https_port, tls_chains, default_chain)),
    ];

    let mut resources = Resources::new();
    resources.insert(ResourceKind::Cluster, clusters);
    resources.insert(ResourceKind::Listener, listeners);

    check_references(&resources).map_err(Error::Translation)?;

    debug!(
        "Translated {} routing clusters into {} proxy clusters",
        view.clusters.len(),
        resources[&ResourceKind::Cluster].len()
    );
    Ok(resources)
}

struct IngressResources {
    http_cluster: Cluster,
    https_cluster: Cluster,
    virtual_host: VirtualHost,
    tls_chain: FilterChain,
}

fn translate_ingress(cluster: &RoutingCluster, ingress: &RoutingIngress) -> Result<IngressResources> {
    let http_name = http_cluster_name(&cluster.name, &ingress.name);
    let https_name = https_cluster_name(&cluster.name, &ingress.name);

    let http_upstream = ingress.http_upstream.as_ref().ok_or_else(|| {
        Error::Translation(format!("ingress {:?} has no http upstream", ingress.name))
    })?;
    let https_upstream = ingress.https_upstream.as_ref().ok_or_else(|| {
        Error::Translation(format!("ingress {:?} has no https upstream", ingress.name))
    })?;

    let domains = ingress.domains();

    let virtual_host = VirtualHost {
        name: http_name.clone(),
        domains: domains.clone(),
        routes: vec![Route {
            name: http_name.clone(),
            route_match: RouteMatch {
                prefix: "/".to_string(),
            },
            route: RouteAction {
                cluster: http_name.clone(),
            },
            stat_prefix: format!("{}.", http_name),
        }],
    };

    let tls_chain = FilterChain {
        filter_chain_match: Some(FilterChainMatch {
            transport_protocol: Some(TLS_TRANSPORT.to_string()),
            server_names: domains,
        }),
        filters: vec![NetworkFilter::TcpProxy(TcpProxy {
            stat_prefix: format!("{}.", https_name),
            cluster: https_name.clone(),
        })],
    };

    Ok(IngressResources {
        http_cluster: http_upstream.proxy_cluster(&http_name),
        https_cluster: https_upstream.proxy_cluster(&https_name),
        virtual_host,
        tls_chain,
    })
}

fn http_listener(port: u16, virtual_hosts: Vec<VirtualHost>) -> Listener {
    let manager = HttpConnectionManager {
        stat_prefix: HCM_STAT_PREFIX.to_string(),
        route_config: RouteConfiguration {
            name: ROUTE_CONFIG_NAME.to_string(),
            virtual_hosts,
        },
        http_filters: vec![HttpFilter::Router],
    };

    Listener {
        name: HTTP_LISTENER_NAME.to_string(),
        address: SocketAddress::new(LISTEN_ADDRESS, port),
        stat_prefix: HTTP_STAT_PREFIX.to_string(),
        listener_filters: Vec::new(),
        filter_chains: vec![FilterChain {
            filter_chain_match: None,
            filters: vec![NetworkFilter::HttpConnectionManager(manager)],
        }],
        default_filter_chain: None,
    }
}

fn https_listener(
    port: u16,
    filter_chains: Vec<FilterChain>,
    default_filter_chain: Option<FilterChain>,
) -> Listener {
    Listener {
        name: HTTPS_LISTENER_NAME.to_string(),
        address: SocketAddress::new(LISTEN_ADDRESS, port),
        stat_prefix: HTTPS_STAT_PREFIX.to_string(),
        listener_filters: vec![ListenerFilter::TlsInspector],
        filter_chains,
        default_filter_chain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Frontend, RoutingCluster};
    use std::sync::Arc;
    use std::time::Duration;

    fn example_view() -> LogicalView {
        LogicalView::new(vec![Arc::new(RoutingCluster::example())], 80, 443)
    }

    fn listener<'a>(resources: &'a Resources, name: &str) -> &'a Listener {
        resources[&ResourceKind::Listener]
            .iter()
            .filter_map(Resource::as_listener)
            .find(|l| l.name == name)
            .expect("listener should exist")
    }

    #[test]
    fn test_example_translation() {
        let resources = translate(&example_view(), &TranslatorOptions::default()).unwrap();

        let cluster_names: Vec<&str> = resources[&ResourceKind::Cluster]
            .iter()
            .map(Resource::name)
            .collect();
        assert_eq!(cluster_names, ["static.http.example", "static.https.example"]);

        let http = resources[&ResourceKind::Cluster][0].as_cluster().unwrap();
        assert_eq!(
            http.endpoints().collect::<Vec<_>>(),
            [&SocketAddress::new("10.10.10.10", 80)]
        );
        assert_eq!(http.connect_timeout, Duration::from_secs(1));

        let https = resources[&ResourceKind::Cluster][1].as_cluster().unwrap();
        assert_eq!(
            https.endpoints().collect::<Vec<_>>(),
            [&SocketAddress::new("12.12.12.12", 443)]
        );
    }

    #[test]
    fn test_http_listener_has_one_vhost_per_ingress() {
        let resources = translate(&example_view(), &TranslatorOptions::default()).unwrap();
        let http = listener(&resources, HTTP_LISTENER_NAME);

        assert_eq!(http.address, SocketAddress::new("0.0.0.0", 80));
        assert_eq!(http.stat_prefix, "http");

        let vhosts: Vec<&VirtualHost> = http.virtual_hosts().collect();
        assert_eq!(vhosts.len(), 1);
        assert_eq!(vhosts[0].name, "static.http.example");
        assert_eq!(vhosts[0].domains, ["first.example.com", "second.example.com"]);

        let route = &vhosts[0].routes[0];
        assert_eq!(route.name, "static.http.example");
        assert_eq!(route.route_match.prefix, "/");
        assert_eq!(route.route.cluster, "static.http.example");
        assert_eq!(route.stat_prefix, "static.http.example.");
    }

    #[test]
    fn test_https_listener_routes_by_sni() {
        let resources = translate(&example_view(), &TranslatorOptions::default()).unwrap();
        let https = listener(&resources, HTTPS_LISTENER_NAME);

        assert_eq!(https.address, SocketAddress::new("0.0.0.0", 443));
        assert_eq!(https.listener_filters, [ListenerFilter::TlsInspector]);
        assert!(https.default_filter_chain.is_none());
        assert_eq!(https.filter_chains.len(), 1);

        let chain = &https.filter_chains[0];
        let chain_match = chain.filter_chain_match.as_ref().unwrap();
        assert_eq!(chain_match.transport_protocol.as_deref(), Some("tls"));
        assert_eq!(
            chain_match.server_names,
            ["first.example.com", "second.example.com"]
        );
        assert_eq!(
            chain.filters,
            [NetworkFilter::TcpProxy(TcpProxy {
                stat_prefix: "static.https.example.".to_string(),
                cluster: "static.https.example".to_string(),
            })]
        );
    }

    #[test]
    fn test_catch_all_blackhole_adds_cluster_and_default_chain() {
        let options = TranslatorOptions {
            catch_all_blackhole: true,
        };
        let resources = translate(&example_view(), &options).unwrap();

        assert!(resources[&ResourceKind::Cluster]
            .iter()
            .any(|r| r.name() == "blackhole"));
        assert_eq!(
            listener(&resources, HTTPS_LISTENER_NAME).default_filter_chain,
            Some(blackhole_filter_chain())
        );
    }

    #[test]
    fn test_empty_cluster_still_produces_listeners() {
        let view = LogicalView::new(vec![Arc::new(RoutingCluster::empty("k8s-local"))], 80, 443);
        let resources = translate(&view, &TranslatorOptions::default()).unwrap();

        assert!(resources[&ResourceKind::Cluster].is_empty());
        assert_eq!(resources[&ResourceKind::Listener].len(), 2);
    }

    #[test]
    fn test_virtual_hosts_follow_iteration_order() {
        let mut second = RoutingCluster::example();
        second.name = "k8s".to_string();
        second.ingresses[0].name = "default/web".to_string();
        second.ingresses[0].frontends = vec![Frontend::new("web.example.com")];

        let view = LogicalView::new(
            vec![Arc::new(RoutingCluster::example()), Arc::new(second)],
            80,
            443,
        );
        let resources = translate(&view, &TranslatorOptions::default()).unwrap();
        let names: Vec<&str> = listener(&resources, HTTP_LISTENER_NAME)
            .virtual_hosts()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(names, ["static.http.example", "k8s.http.default/web"]);
    }

    #[test]
    fn test_missing_upstream_is_translation_error() {
        let mut cluster = RoutingCluster::example();
        cluster.ingresses[0].https_upstream = None;
        let view = LogicalView::new(vec![Arc::new(cluster)], 80, 443);

        let err = translate(&view, &TranslatorOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Translation(_)), "got {}", err);
    }
}
