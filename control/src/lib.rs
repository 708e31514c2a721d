//! sluice Control Plane Library
//!
//! Aggregates routing intent from providers (a static document, Kubernetes
//! Ingress objects) into one validated view, translates it into proxy
//! resources, and publishes a new snapshot whenever the content-derived
//! version changes.

pub mod apis;
pub mod config;
pub mod error;
mod lock;
pub mod provider;
pub mod xds;

pub use error::{Error, Result};
