//! Kubernetes API integrations
//!
//! This module contains the Ingress watcher with its reconcile loop, and the
//! controller metrics.

pub mod ingress;
pub mod metrics;
