//! sluice Common Types
//!
//! Proxy-agnostic routing intent: which domains route to which backend
//! addresses. Providers (a static file, the Kubernetes Ingress reconciler)
//! produce one [`RoutingCluster`] each; the aggregator wraps all of them into a
//! [`LogicalView`] and validates it before translating it to proxy resources.
//!
//! ## Graph
//!
//! ```text
//! LogicalView
//!  └─ RoutingCluster (name)
//!      └─ RoutingIngress (name)
//!          ├─ http_upstream:  Upstream
//!          ├─ https_upstream: Upstream
//!          └─ frontends:      [Frontend (domain)]
//! ```
//!
//! Validation is top-down and fails fast: the first invalid child at a level
//! stops validation of its later siblings, and the returned
//! [`ValidationError`] carries the path to the offending element.

pub mod duration;
mod error;

pub use error::ValidationError;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default HTTP listener port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTPS listener port
pub const DEFAULT_HTTPS_PORT: u16 = 443;

// =============================================================================
// Frontend
// =============================================================================

/// A domain matched by Host header (HTTP) or SNI (HTTPS)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frontend {
    #[serde(default)]
    pub domain: String,
}

impl Frontend {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.domain.is_empty() {
            return Err(ValidationError::new("domain is required"));
        }
        Ok(())
    }
}

// =============================================================================
// Upstream
// =============================================================================

/// Fixed list of backend addresses sharing one port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAddresses {
    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub static_addresses: Vec<String>,

    #[serde(default, with = "duration::serde_string")]
    pub connect_timeout: Duration,
}

impl StaticAddresses {
    pub fn new(port: u16, addresses: Vec<String>, connect_timeout: Duration) -> Self {
        Self {
            port,
            static_addresses: addresses,
            connect_timeout,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::new(
                "port is required and must be greater than 0",
            ));
        }
        if self.static_addresses.is_empty() {
            return Err(ValidationError::new(
                "static_addresses is required and must contain at least one address",
            ));
        }
        for (i, addr) in self.static_addresses.iter().enumerate() {
            if addr.is_empty() {
                return Err(ValidationError::new(format!(
                    "static_addresses[{}] is empty",
                    i
                )));
            }
        }
        if self.connect_timeout.is_zero() {
            return Err(ValidationError::new(
                "connect_timeout is required and must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Where an ingress sends its traffic
///
/// Only static address lists exist today. The enum serializes untagged so
/// that the configuration document stays a plain object. Deserialization goes
/// straight to the single variant so field errors (a bad `connect_timeout`)
/// reach the caller instead of a generic "no variant matched".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Upstream {
    StaticAddresses(StaticAddresses),
}

impl<'de> Deserialize<'de> for Upstream {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        StaticAddresses::deserialize(deserializer).map(Upstream::StaticAddresses)
    }
}

impl Upstream {
    /// Shorthand for a static upstream
    pub fn static_addresses<I, S>(port: u16, addresses: I, connect_timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Upstream::StaticAddresses(StaticAddresses::new(
            port,
            addresses.into_iter().map(Into::into).collect(),
            connect_timeout,
        ))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Upstream::StaticAddresses(upstream) => upstream.validate(),
        }
    }
}

// =============================================================================
// RoutingIngress
// =============================================================================

/// One routed application: a set of domains plus its HTTP and HTTPS backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingIngress {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub http_upstream: Option<Upstream>,

    #[serde(default)]
    pub https_upstream: Option<Upstream>,

    #[serde(default)]
    pub frontends: Vec<Frontend>,
}

impl RoutingIngress {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("ingress name is required"));
        }
        let scope = format!("ingress {:?}", self.name);

        let http = self
            .http_upstream
            .as_ref()
            .ok_or_else(|| ValidationError::new("http_upstream is required").within(&scope))?;
        http.validate()
            .map_err(|e| e.within("http_upstream").within(&scope))?;

        let https = self
            .https_upstream
            .as_ref()
            .ok_or_else(|| ValidationError::new("https_upstream is required").within(&scope))?;
        https
            .validate()
            .map_err(|e| e.within("https_upstream").within(&scope))?;

        if self.frontends.is_empty() {
            return Err(ValidationError::new(
                "frontends is required and must contain at least one frontend",
            )
            .within(&scope));
        }
        for (i, frontend) in self.frontends.iter().enumerate() {
            frontend
                .validate()
                .map_err(|e| e.within(format!("frontends[{}]", i)).within(&scope))?;
        }
        Ok(())
    }

    /// Frontend domains in declaration order
    pub fn domains(&self) -> Vec<String> {
        self.frontends.iter().map(|f| f.domain.clone()).collect()
    }
}

// =============================================================================
// RoutingCluster
// =============================================================================

/// Named routing graph produced by exactly one provider
///
/// Never mutated after it is handed out: providers build a fresh value on
/// every poll or reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingCluster {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub ingresses: Vec<RoutingIngress>,
}

impl RoutingCluster {
    /// Cluster with no ingresses
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ingresses: Vec::new(),
        }
    }

    /// A cluster with zero ingresses is valid: a watched namespace can
    /// legitimately have nothing to route.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("cluster name is required"));
        }
        let scope = format!("cluster {:?}", self.name);
        for (i, ingress) in self.ingresses.iter().enumerate() {
            ingress
                .validate()
                .map_err(|e| e.within(format!("ingresses[{}]", i)).within(&scope))?;
        }
        Ok(())
    }

    /// The reference document printed by `sluice example`
    pub fn example() -> Self {
        Self {
            name: "static".to_string(),
            ingresses: vec![RoutingIngress {
                name: "example".to_string(),
                http_upstream: Some(Upstream::static_addresses(
                    80,
                    ["10.10.10.10"],
                    Duration::from_secs(1),
                )),
                https_upstream: Some(Upstream::static_addresses(
                    443,
                    ["12.12.12.12"],
                    Duration::from_secs(1),
                )),
                frontends: vec![
                    Frontend::new("first.example.com"),
                    Frontend::new("second.example.com"),
                ],
            }],
        }
    }
}

// =============================================================================
// LogicalView
// =============================================================================

/// Everything that will be published as one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalView {
    pub clusters: Vec<Arc<RoutingCluster>>,
    pub http_port: u16,
    pub https_port: u16,
}

impl LogicalView {
    pub fn new(clusters: Vec<Arc<RoutingCluster>>, http_port: u16, https_port: u16) -> Self {
        Self {
            clusters,
            http_port,
            https_port,
        }
    }

    /// Validate the whole view; one bad element invalidates everything
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.http_port == 0 {
            return Err(ValidationError::new(
                "http_port is required and must be greater than 0",
            ));
        }
        if self.https_port == 0 {
            return Err(ValidationError::new(
                "https_port is required and must be greater than 0",
            ));
        }
        if self.clusters.is_empty() {
            return Err(ValidationError::new(
                "logical_clusters is required and must contain at least one cluster",
            ));
        }
        for (i, cluster) in self.clusters.iter().enumerate() {
            cluster
                .validate()
                .map_err(|e| e.within(format!("logical_clusters[{}]", i)))?;
        }
        Ok(())
    }

    /// Domains claimed by more than one ingress, with the claiming ingresses
    ///
    /// Validation does not reject these; the aggregator only reports them.
    pub fn duplicate_domains(&self) -> BTreeMap<String, Vec<String>> {
        let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for cluster in &self.clusters {
            for ingress in &cluster.ingresses {
                for frontend in &ingress.frontends {
                    owners
                        .entry(frontend.domain.clone())
                        .or_default()
                        .push(format!("{}/{}", cluster.name, ingress.name));
                }
            }
        }
        owners.retain(|_, claimed_by| claimed_by.len() > 1);
        owners
    }
}
