//! Kubernetes Ingress support (networking.k8s.io/v1)

#[allow(clippy::module_inception)]
mod ingress;
pub mod projection;

pub use ingress::{IngressProvider, RECONCILE_KEY};
