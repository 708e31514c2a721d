//! Ingress object to routing intent
//!
//! Pure functions: filtering decides which Ingress objects are routed, and
//! projection turns each survivor into a [`RoutingIngress`].
//!
//! ## Filter (an object is skipped when any holds)
//!
//! 1. annotation `sluice.io/enabled` is not exactly `"true"`
//! 2. a class allow-list is configured and the effective class is not in it
//!    (`spec.ingressClassName` wins over `kubernetes.io/ingress.class`)
//! 3. `status.loadBalancer.ingress` is empty
//! 4. no usable hostname
//! 5. no balancer IP

use common::duration::parse_duration;
use common::{Frontend, RoutingCluster, RoutingIngress, Upstream};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub const ENABLED_ANNOTATION: &str = "sluice.io/enabled";
pub const CONNECT_TIMEOUT_ANNOTATION: &str = "sluice.io/connect-timeout";
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
pub const SERVER_ALIAS_ANNOTATION: &str = "nginx.ingress.kubernetes.io/server-alias";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const UPSTREAM_HTTP_PORT: u16 = 80;
const UPSTREAM_HTTPS_PORT: u16 = 443;

/// Why an Ingress was not routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    NotEnabled,
    ClassNotAllowed(Option<String>),
    NoLoadBalancer,
    NoHosts,
    NoAddresses,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::NotEnabled => write!(f, "{} is not \"true\"", ENABLED_ANNOTATION),
            Exclusion::ClassNotAllowed(Some(class)) => {
                write!(f, "ingress class {:?} is not allowed", class)
            }
            Exclusion::ClassNotAllowed(None) => write!(f, "no ingress class"),
            Exclusion::NoLoadBalancer => write!(f, "no load balancer status"),
            Exclusion::NoHosts => write!(f, "no hosts"),
            Exclusion::NoAddresses => write!(f, "no load balancer IPs"),
        }
    }
}

/// `{namespace}/{name}`
pub fn ingress_key(ingress: &Ingress) -> String {
    format!(
        "{}/{}",
        ingress.namespace().unwrap_or_default(),
        ingress.name_any()
    )
}

/// Class from `spec.ingressClassName`, falling back to the legacy annotation
pub fn effective_class(ingress: &Ingress) -> Option<String> {
    ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.ingress_class_name.clone())
        .or_else(|| ingress.annotations().get(INGRESS_CLASS_ANNOTATION).cloned())
}

/// Rule hosts followed by server-alias entries, first occurrence kept
pub fn collect_hosts(ingress: &Ingress) -> Vec<String> {
    let rule_hosts = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|rule| rule.host.as_deref())
        .filter(|host| !host.is_empty());

    let aliases = ingress
        .annotations()
        .get(SERVER_ALIAS_ANNOTATION)
        .map(|raw| raw.split(',').map(str::trim).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut hosts: Vec<String> = Vec::new();
    for host in rule_hosts.chain(aliases.into_iter().filter(|h| !h.is_empty())) {
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
    }
    hosts
}

/// Load balancer IPs; hostname-only entries are dropped
pub fn collect_balancer_ips(ingress: &Ingress) -> Vec<String> {
    ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ip.clone())
        .filter(|ip| !ip.is_empty())
        .collect()
}

fn has_load_balancer_status(ingress: &Ingress) -> bool {
    ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|entries| !entries.is_empty())
}

/// Connect timeout from the annotation; malformed values fall back to the default
pub fn connect_timeout(ingress: &Ingress) -> Duration {
    let Some(raw) = ingress.annotations().get(CONNECT_TIMEOUT_ANNOTATION) else {
        return DEFAULT_CONNECT_TIMEOUT;
    };
    if raw.is_empty() {
        return DEFAULT_CONNECT_TIMEOUT;
    }
    match parse_duration(raw) {
        Ok(timeout) if !timeout.is_zero() => timeout,
        Ok(_) => {
            warn!(
                "Ingress {} has zero {}, using {:?}",
                ingress_key(ingress),
                CONNECT_TIMEOUT_ANNOTATION,
                DEFAULT_CONNECT_TIMEOUT
            );
            DEFAULT_CONNECT_TIMEOUT
        }
        Err(e) => {
            warn!(
                "Failed to parse {} on Ingress {}: {}, using {:?}",
                CONNECT_TIMEOUT_ANNOTATION,
                ingress_key(ingress),
                e,
                DEFAULT_CONNECT_TIMEOUT
            );
            DEFAULT_CONNECT_TIMEOUT
        }
    }
}

/// Apply the filter rules in order
pub fn check_routable(ingress: &Ingress, allowed_classes: &[String]) -> Result<(), Exclusion> {
    if ingress.annotations().get(ENABLED_ANNOTATION).map(String::as_str) != Some("true") {
        return Err(Exclusion::NotEnabled);
    }

    if !allowed_classes.is_empty() {
        let class = effective_class(ingress);
        let allowed = class
            .as_ref()
            .is_some_and(|c| allowed_classes.iter().any(|a| a == c));
        if !allowed {
            return Err(Exclusion::ClassNotAllowed(class));
        }
    }

    if !has_load_balancer_status(ingress) {
        return Err(Exclusion::NoLoadBalancer);
    }
    if collect_hosts(ingress).is_empty() {
        return Err(Exclusion::NoHosts);
    }
    if collect_balancer_ips(ingress).is_empty() {
        return Err(Exclusion::NoAddresses);
    }
    Ok(())
}

/// Project a routable Ingress
pub fn project_ingress(ingress: &Ingress) -> RoutingIngress {
    let ips = collect_balancer_ips(ingress);
    let timeout = connect_timeout(ingress);

    RoutingIngress {
        name: ingress_key(ingress),
        http_upstream: Some(Upstream::static_addresses(
            UPSTREAM_HTTP_PORT,
            ips.iter().cloned(),
            timeout,
        )),
        https_upstream: Some(Upstream::static_addresses(UPSTREAM_HTTPS_PORT, ips, timeout)),
        frontends: collect_hosts(ingress).into_iter().map(Frontend::new).collect(),
    }
}

/// Build the routing cluster for a set of Ingress objects
///
/// Output is sorted by `{namespace}/{name}` so the result does not depend on
/// store iteration order.
pub fn project_cluster<'a, I>(name: &str, ingresses: I, allowed_classes: &[String]) -> RoutingCluster
where
    I: IntoIterator<Item = &'a Ingress>,
{
    let mut routed: Vec<RoutingIngress> = ingresses
        .into_iter()
        .filter(|ingress| match check_routable(ingress, allowed_classes) {
            Ok(()) => true,
            Err(reason) => {
                debug!("Skipping Ingress {}: {}", ingress_key(ingress), reason);
                false
            }
        })
        .map(project_ingress)
        .collect();
    routed.sort_by(|a, b| a.name.cmp(&b.name));

    RoutingCluster {
        name: name.to_string(),
        ingresses: routed,
    }
}
