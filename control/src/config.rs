//! Configuration for the sluice controller
//!
//! Every setting has a default. An optional JSON file named by `SLUICE_CONFIG`
//! replaces the defaults it mentions, and environment variables prefixed with
//! `SLUICE_` override both. See [`ControllerConfig::from_env`].

use crate::error::{Error, Result};
use common::{DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Path to a static routing cluster document (static provider disabled when unset)
    pub static_path: Option<PathBuf>,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    #[serde(default)]
    pub listeners: ListenerConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,
}

/// Kubernetes Ingress provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KubernetesConfig {
    /// Watch Ingress objects (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the routing cluster produced from Ingress objects
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Ingress classes to accept; empty accepts every class
    #[serde(default)]
    pub ingress_classes: Vec<String>,

    /// Forced reconcile interval in seconds (default: 24h)
    #[serde(default = "default_resync_secs")]
    pub resync_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_cluster_name() -> String {
    "k8s-local".to_string()
}

fn default_resync_secs() -> u64 {
    24 * 60 * 60
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            cluster_name: default_cluster_name(),
            ingress_classes: Vec::new(),
            resync_secs: default_resync_secs(),
        }
    }
}

impl KubernetesConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

/// Ports the generated proxy listeners bind to
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_https_port")]
    pub https_port: u16,
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_https_port() -> u16 {
    DEFAULT_HTTPS_PORT
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            https_port: default_https_port(),
        }
    }
}

/// Aggregation loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationConfig {
    /// Deadline for the first successful cycle in seconds (default: 30s)
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Delay between cycles in seconds (default: 15s)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Emit the blackhole cluster and use it as the HTTPS default chain
    #[serde(default)]
    pub catch_all_blackhole: bool,
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_interval() -> u64 {
    15
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: default_startup_timeout(),
            interval_secs: default_interval(),
            catch_all_blackhole: false,
        }
    }
}

impl AggregationConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `SLUICE_CONFIG` names the base file; the other keys override it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("SLUICE_CONFIG").filter(|path| !path.is_empty()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(val) = lookup("SLUICE_STATIC_PATH") {
            if !val.is_empty() {
                config.static_path = Some(PathBuf::from(val));
            }
        }

        // Kubernetes provider
        if let Some(val) = lookup("SLUICE_K8S_ENABLED") {
            config.kubernetes.enabled = parse_var("SLUICE_K8S_ENABLED", &val)?;
        }
        if let Some(val) = lookup("SLUICE_K8S_CLUSTER_NAME") {
            config.kubernetes.cluster_name = val;
        }
        if let Some(val) = lookup("SLUICE_K8S_INGRESS_CLASSES") {
            config.kubernetes.ingress_classes = val
                .split(',')
                .map(str::trim)
                .filter(|class| !class.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(val) = lookup("SLUICE_K8S_RESYNC_SECS") {
            config.kubernetes.resync_secs = parse_var("SLUICE_K8S_RESYNC_SECS", &val)?;
        }

        // Listeners
        if let Some(val) = lookup("SLUICE_HTTP_PORT") {
            config.listeners.http_port = parse_var("SLUICE_HTTP_PORT", &val)?;
        }
        if let Some(val) = lookup("SLUICE_HTTPS_PORT") {
            config.listeners.https_port = parse_var("SLUICE_HTTPS_PORT", &val)?;
        }

        // Aggregation
        if let Some(val) = lookup("SLUICE_STARTUP_TIMEOUT_SECS") {
            config.aggregation.startup_timeout_secs =
                parse_var("SLUICE_STARTUP_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = lookup("SLUICE_SYNC_INTERVAL_SECS") {
            config.aggregation.interval_secs = parse_var("SLUICE_SYNC_INTERVAL_SECS", &val)?;
        }
        if let Some(val) = lookup("SLUICE_CATCH_ALL_BLACKHOLE") {
            config.aggregation.catch_all_blackhole =
                parse_var("SLUICE_CATCH_ALL_BLACKHOLE", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.aggregation.interval_secs == 0 {
            return Err(Error::Config(
                "SLUICE_SYNC_INTERVAL_SECS (aggregation.interval_secs) must be greater than 0"
                    .to_string(),
            ));
        }
        if self.kubernetes.resync_secs == 0 {
            return Err(Error::Config(
                "SLUICE_K8S_RESYNC_SECS (kubernetes.resync_secs) must be greater than 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}={:?}: {}", key, value, e)))
}
