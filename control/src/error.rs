use common::ValidationError;
use std::time::Duration;
use thiserror::Error;

/// sluice control plane errors
#[derive(Error, Debug)]
pub enum Error {
    /// Routing intent is malformed; the message carries the path to the bad element
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A provider could not supply its current routing cluster
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// A provider has not completed its first reconciliation yet
    #[error("provider {provider} is not ready")]
    NotReady { provider: String },

    /// Generated resources violate an internal invariant
    #[error("translation error: {0}")]
    Translation(String),

    /// The distribution sink refused the snapshot
    #[error("publish error: {0}")]
    Publish(String),

    /// No valid view could be assembled before the startup deadline
    #[error("no valid configuration within {timeout:?}: {last_error}")]
    StartupTimeout {
        timeout: Duration,
        last_error: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn not_ready(provider: impl Into<String>) -> Self {
        Self::NotReady {
            provider: provider.into(),
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Provider { .. } | Error::NotReady { .. } => "provider",
            Error::Translation(_) => "translation",
            Error::Publish(_) => "publish",
            Error::StartupTimeout { .. } => "startup_timeout",
            Error::Config(_) => "config",
            Error::Kubernetes(_) => "kubernetes",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
