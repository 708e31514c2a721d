//! Proxy configuration generation
//!
//! - [`translator`]: logical view to Envoy-style listeners and clusters
//! - [`version`]: content-derived version tokens
//! - [`snapshot`]: immutable snapshots and the distribution sink contract
//! - [`aggregator`]: the collect/translate/publish loop

pub mod aggregator;
pub mod blackhole;
pub mod resources;
pub mod snapshot;
pub mod translator;
pub mod version;

pub use aggregator::{Aggregator, PublishOutcome};
pub use snapshot::{DistributionSink, Snapshot, SnapshotCache};
pub use translator::{translate, TranslatorOptions};
pub use version::compute_version;
