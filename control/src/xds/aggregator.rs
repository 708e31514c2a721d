//! Aggregation and publish loop
//!
//! ## Cycle
//!
//! ```text
//! providers ─▶ LogicalView ─▶ validate ─▶ translate ─▶ version ─┬─ same as current ─▶ Unchanged
//!                                                              └─ new ─▶ publish ─▶ Published
//! ```
//!
//! Any failure aborts the cycle and leaves the last published snapshot in
//! place. The current version only advances after the sink accepted the
//! snapshot, so a failed publish is retried on the next cycle even if nothing
//! changed upstream.

use super::snapshot::{DistributionSink, Snapshot};
use super::translator::{translate, TranslatorOptions};
use super::version::compute_version;
use crate::apis::metrics::record_aggregation_cycle;
use crate::error::{Error, Result};
use crate::lock::{safe_read, safe_write};
use crate::provider::ClusterProvider;
use common::{LogicalView, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay between startup attempts
pub const STARTUP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A new snapshot was handed to the sink
    Published { version: String },
    /// The assembled configuration matches the current version
    Unchanged { version: String },
}

impl PublishOutcome {
    pub fn version(&self) -> &str {
        match self {
            PublishOutcome::Published { version } | PublishOutcome::Unchanged { version } => {
                version
            }
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            PublishOutcome::Published { .. } => "published",
            PublishOutcome::Unchanged { .. } => "unchanged",
        }
    }
}

#[derive(Debug, Default)]
struct PublishState {
    current: Option<String>,
    previous: Option<String>,
    last: Option<Arc<Snapshot>>,
}

/// Merges provider output into versioned snapshots
pub struct Aggregator {
    providers: Vec<Arc<dyn ClusterProvider>>,
    sink: Arc<dyn DistributionSink>,
    http_port: u16,
    https_port: u16,
    options: TranslatorOptions,
    state: RwLock<PublishState>,
}

impl Aggregator {
    pub fn new(providers: Vec<Arc<dyn ClusterProvider>>, sink: Arc<dyn DistributionSink>) -> Self {
        Self {
            providers,
            sink,
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            options: TranslatorOptions::default(),
            state: RwLock::new(PublishState::default()),
        }
    }

    /// Listener ports for the generated view
    pub fn with_ports(mut self, http_port: u16, https_port: u16) -> Self {
        self.http_port = http_port;
        self.https_port = https_port;
        self
    }

    pub fn with_options(mut self, options: TranslatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Version of the snapshot the sink currently serves
    pub fn current_version(&self) -> Option<String> {
        safe_read(&self.state).current.clone()
    }

    /// Version that was current before the last publish
    pub fn previous_version(&self) -> Option<String> {
        safe_read(&self.state).previous.clone()
    }

    /// Last snapshot the sink accepted
    pub fn last_snapshot(&self) -> Option<Arc<Snapshot>> {
        safe_read(&self.state).last.clone()
    }

    /// Poll every provider and assemble a validated view
    ///
    /// The first provider error aborts; nothing is merged from a partial poll.
    pub async fn take_view(&self) -> Result<LogicalView> {
        let mut clusters = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let cluster = provider.routing_cluster().await.map_err(|e| {
                debug!("Provider {} failed: {}", provider.name(), e);
                e
            })?;
            clusters.push(cluster);
        }

        let view = LogicalView::new(clusters, self.http_port, self.https_port);
        view.validate()?;

        for (domain, owners) in view.duplicate_domains() {
            warn!(
                "Domain {} is claimed by several ingresses: {}",
                domain,
                owners.join(", ")
            );
        }
        Ok(view)
    }

    /// Translate and version `view`, publishing it if the version changed
    pub async fn update_view(&self, view: &LogicalView) -> Result<PublishOutcome> {
        let resources = translate(view, &self.options)?;
        let version = compute_version(&resources)?;

        if self.current_version().as_deref() == Some(version.as_str()) {
            info!("Snapshot unchanged (version {})", version);
            return Ok(PublishOutcome::Unchanged { version });
        }

        let snapshot = Arc::new(Snapshot::new(version.clone(), resources));
        snapshot.consistent()?;

        self.sink
            .publish(Arc::clone(&snapshot))
            .await
            .map_err(|e| match e {
                Error::Publish(_) => e,
                other => Error::Publish(other.to_string()),
            })?;

        {
            let mut state = safe_write(&self.state);
            state.previous = state.current.replace(version.clone());
            state.last = Some(snapshot);
        }

        info!("Published snapshot version {}", version);
        Ok(PublishOutcome::Published { version })
    }

    /// One full collect/validate/translate/publish pass
    pub async fn run_cycle(&self) -> Result<PublishOutcome> {
        let start = std::time::Instant::now();

        let result = match self.take_view().await {
            Ok(view) => self.update_view(&view).await,
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.kind(),
        };
        record_aggregation_cycle(outcome, start.elapsed().as_secs_f64());
        result
    }

    /// Run cycles until one succeeds or `timeout` elapses
    ///
    /// Every attempt is bounded by the same deadline, so a provider or sink
    /// that never answers cannot hold startup open. Fails closed with
    /// [`Error::StartupTimeout`] carrying the last error.
    pub async fn initialize(&self, timeout: Duration) -> Result<PublishOutcome> {
        let deadline = Instant::now() + timeout;

        loop {
            let attempt = match tokio::time::timeout_at(deadline, self.run_cycle()).await {
                Ok(attempt) => attempt,
                Err(_) => {
                    return Err(Error::StartupTimeout {
                        timeout,
                        last_error: "aggregation cycle still running at the deadline".to_string(),
                    });
                }
            };

            match attempt {
                Ok(outcome) => {
                    info!("Initial configuration ready (version {})", outcome.version());
                    return Ok(outcome);
                }
                Err(e) => {
                    if Instant::now() + STARTUP_RETRY_INTERVAL > deadline {
                        return Err(Error::StartupTimeout {
                            timeout,
                            last_error: e.to_string(),
                        });
                    }
                    warn!(
                        "Initial aggregation failed, retrying in {:?}: {}",
                        STARTUP_RETRY_INTERVAL, e
                    );
                    tokio::time::sleep(STARTUP_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Run a cycle every `interval` until `cancel` fires
    ///
    /// Cycle errors are logged and never end the loop.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting aggregation loop (every {:?})", interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stopping aggregation loop");
                    return;
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(_) => {}
                        Err(e @ Error::Translation(_)) => {
                            error!("Aggregation cycle failed: {}", e);
                        }
                        Err(e) => {
                            warn!("Aggregation cycle failed: {}", e);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use crate::xds::snapshot::SnapshotCache;
    use async_trait::async_trait;
    use common::RoutingCluster;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that is not ready for its first `failures` polls
    struct WarmingProvider {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClusterProvider for WarmingProvider {
        fn name(&self) -> &str {
            "warming"
        }

        async fn routing_cluster(&self) -> Result<Arc<RoutingCluster>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(Error::not_ready("warming"))
            } else {
                Ok(Arc::new(RoutingCluster::empty("warming")))
            }
        }
    }

    fn aggregator(providers: Vec<Arc<dyn ClusterProvider>>) -> (Aggregator, Arc<SnapshotCache>) {
        let cache = Arc::new(SnapshotCache::new());
        (Aggregator::new(providers, cache.clone()), cache)
    }

    #[tokio::test]
    async fn test_no_providers_is_a_validation_error() {
        let (aggregator, cache) = aggregator(vec![]);
        let err = aggregator.run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {}", err);
        assert!(cache.latest().is_none());
    }

    #[tokio::test]
    async fn test_versions_rotate_on_change() {
        let (aggregator, _cache) = aggregator(vec![]);
        let first = LogicalView::new(vec![Arc::new(RoutingCluster::example())], 80, 443);
        let second = LogicalView::new(vec![Arc::new(RoutingCluster::empty("static"))], 80, 443);

        let v1 = aggregator.update_view(&first).await.unwrap();
        let v2 = aggregator.update_view(&second).await.unwrap();

        assert!(v1.is_published() && v2.is_published());
        assert_eq!(aggregator.current_version().as_deref(), Some(v2.version()));
        assert_eq!(aggregator.previous_version().as_deref(), Some(v1.version()));
        assert_eq!(
            aggregator.last_snapshot().unwrap().version(),
            v2.version()
        );
    }

    #[tokio::test]
    async fn test_custom_ports_reach_listeners() {
        let provider: Arc<dyn ClusterProvider> =
            Arc::new(StaticProvider::new(RoutingCluster::example()));
        let (aggregator, _cache) = aggregator(vec![provider]);
        let aggregator = aggregator.with_ports(8080, 8443);

        let view = aggregator.take_view().await.unwrap();
        assert_eq!((view.http_port, view.https_port), (8080, 8443));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_retries_until_ready() {
        let provider = Arc::new(WarmingProvider {
            failures: 3,
            calls: AtomicUsize::new(0),
        });
        let (aggregator, cache) = aggregator(vec![provider.clone() as Arc<dyn ClusterProvider>]);

        let outcome = aggregator.initialize(Duration::from_secs(30)).await.unwrap();
        assert!(outcome.is_published());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert!(cache.latest().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_fails_closed_after_deadline() {
        let provider = Arc::new(WarmingProvider {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let (aggregator, cache) = aggregator(vec![provider.clone() as Arc<dyn ClusterProvider>]);

        let start = Instant::now();
        let err = aggregator.initialize(Duration::from_secs(5)).await.unwrap_err();

        match err {
            Error::StartupTimeout {
                timeout,
                last_error,
            } => {
                assert_eq!(timeout, Duration::from_secs(5));
                assert!(last_error.contains("not ready"), "got {}", last_error);
            }
            other => panic!("Expected StartupTimeout, got {}", other),
        }
        assert!(start.elapsed() <= Duration::from_secs(5));
        assert!(provider.calls.load(Ordering::SeqCst) >= 5);
        assert!(cache.latest().is_none(), "Nothing may be published");
    }

    /// Sink that accepts the call and never answers
    struct StalledSink;

    #[async_trait]
    impl DistributionSink for StalledSink {
        async fn publish(&self, _snapshot: Arc<Snapshot>) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_bounds_a_stalled_publish() {
        let provider: Arc<dyn ClusterProvider> =
            Arc::new(StaticProvider::new(RoutingCluster::example()));
        let aggregator = Aggregator::new(vec![provider], Arc::new(StalledSink));

        let start = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(600),
            aggregator.initialize(Duration::from_secs(2)),
        )
        .await
        .expect("initialize must return at its own deadline");

        match result {
            Err(Error::StartupTimeout { timeout, last_error }) => {
                assert_eq!(timeout, Duration::from_secs(2));
                assert!(last_error.contains("deadline"), "got {}", last_error);
            }
            other => panic!("Expected StartupTimeout, got {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(aggregator.current_version().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_stops_on_cancel() {
        let provider: Arc<dyn ClusterProvider> =
            Arc::new(StaticProvider::new(RoutingCluster::example()));
        let (aggregator, cache) = aggregator(vec![provider]);
        let aggregator = Arc::new(aggregator);
        let cancel = CancellationToken::new();

        let handle = {
            let aggregator = Arc::clone(&aggregator);
            let cancel = cancel.clone();
            tokio::spawn(async move { aggregator.run(Duration::from_secs(15), cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(cache.latest().is_some(), "First tick should publish");

        cancel.cancel();
        handle.await.unwrap();
    }
}
