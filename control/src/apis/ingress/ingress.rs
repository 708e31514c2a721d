//! Ingress watcher
//!
//! Watches `networking.k8s.io/v1` Ingress objects into a reflector store and
//! rebuilds the provider's routing cluster from the whole store whenever
//! anything changes.
//!
//! ## Flow
//!
//! ```text
//! watcher ──events──▶ Writer (store) ──▶ ScheduleRequest("reconcile")
//! resync tick ──────────────────────────▶ ScheduleRequest("reconcile")
//!                                              │ debounced_scheduler
//!                            worker ◀──────────┘
//!                              │ project_cluster(store.state())
//!                              ▼
//!                   RwLock<Option<Arc<RoutingCluster>>> ◀── routing_cluster()
//! ```
//!
//! Every request carries the same message, so kube-runtime's scheduler
//! collapses bursts of changes into one reconcile. Failed reconciles are
//! rescheduled through the same scheduler with exponential backoff. Nothing is
//! scheduled before the initial list completes: an unsynced store would
//! publish a cluster missing live Ingresses.

use super::projection::project_cluster;
use crate::apis::metrics::{record_ingress_reconciliation, set_ingresses_routed};
use crate::config::KubernetesConfig;
use crate::error::{Error, Result};
use crate::lock::{safe_lock, safe_read, safe_write};
use crate::provider::ClusterProvider;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use common::RoutingCluster;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::scheduler::{debounced_scheduler, ScheduleRequest};
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The single scheduled message: "rebuild from the store"
pub const RECONCILE_KEY: &str = "reconcile";

/// Quiet period before a requested reconcile runs
pub const RECONCILE_DEBOUNCE: Duration = Duration::from_millis(100);

/// First retry delay after a failed reconcile
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(5);

/// Upper bound for the retry delay
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(1000);

type ReconcileRequest = ScheduleRequest<&'static str>;

fn retry_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(RETRY_BASE_DELAY)
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_interval(RETRY_MAX_DELAY)
        .with_max_elapsed_time(None)
        .build()
}

/// Routing cluster provider backed by live Ingress objects
pub struct IngressProvider {
    cluster_name: String,
    ingress_classes: Vec<String>,
    store: Store<Ingress>,
    synced: AtomicBool,
    cluster: RwLock<Option<Arc<RoutingCluster>>>,
    trigger: UnboundedSender<ReconcileRequest>,
    requests: Mutex<Option<UnboundedReceiver<ReconcileRequest>>>,
}

impl IngressProvider {
    /// Create a provider and the store writer its watch loop feeds
    pub fn new(config: &KubernetesConfig) -> (Self, Writer<Ingress>) {
        let (store, writer) = reflector::store();
        let provider = Self::with_store(
            config.cluster_name.clone(),
            config.ingress_classes.clone(),
            store,
        );
        (provider, writer)
    }

    /// Create a provider reading from an existing store
    pub fn with_store(
        cluster_name: impl Into<String>,
        ingress_classes: Vec<String>,
        store: Store<Ingress>,
    ) -> Self {
        let (trigger, requests) = mpsc::unbounded();
        Self {
            cluster_name: cluster_name.into(),
            ingress_classes,
            store,
            synced: AtomicBool::new(false),
            cluster: RwLock::new(None),
            trigger,
            requests: Mutex::new(Some(requests)),
        }
    }

    /// Whether the initial list has been applied to the store
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Apply one watch event to the store
    ///
    /// Returns whether the event calls for a reconcile. Events seen before the
    /// initial list completes never do.
    pub fn handle_event(&self, writer: &mut Writer<Ingress>, event: watcher::Event<Ingress>) -> bool {
        writer.apply_watcher_event(&event);

        match event {
            watcher::Event::Init => {
                debug!("Ingress watcher (re)listing");
                false
            }
            watcher::Event::InitApply(_) => false,
            watcher::Event::InitDone => {
                let first = !self.synced.swap(true, Ordering::AcqRel);
                if first {
                    info!("Ingress watcher initial sync complete");
                } else {
                    debug!("Ingress watcher relist complete");
                }
                true
            }
            watcher::Event::Apply(ingress) => {
                debug!(
                    "Ingress applied: {}/{}",
                    ingress.namespace().unwrap_or_default(),
                    ingress.name_any()
                );
                self.is_synced()
            }
            watcher::Event::Delete(ingress) => {
                debug!(
                    "Ingress deleted: {}/{}",
                    ingress.namespace().unwrap_or_default(),
                    ingress.name_any()
                );
                self.is_synced()
            }
        }
    }

    /// Ask the worker for a reconcile
    pub fn schedule(&self) {
        self.schedule_at(tokio::time::Instant::now());
    }

    fn schedule_at(&self, run_at: tokio::time::Instant) {
        let request = ScheduleRequest {
            message: RECONCILE_KEY,
            run_at,
        };
        if self.trigger.unbounded_send(request).is_err() {
            debug!("Ingress reconcile requested after shutdown");
        }
    }

    /// Rebuild the routing cluster from the current store contents
    ///
    /// The cluster is built without holding the lock; the write lock is only
    /// taken to swap the new value in.
    pub fn reconcile(&self) -> Result<Arc<RoutingCluster>> {
        let start = Instant::now();

        if !self.is_synced() {
            record_ingress_reconciliation(
                &self.cluster_name,
                start.elapsed().as_secs_f64(),
                "not_ready",
            );
            return Err(Error::not_ready(&self.cluster_name));
        }

        let objects = self.store.state();
        let cluster = Arc::new(project_cluster(
            &self.cluster_name,
            objects.iter().map(|obj| &**obj),
            &self.ingress_classes,
        ));

        *safe_write(&self.cluster) = Some(Arc::clone(&cluster));

        record_ingress_reconciliation(
            &self.cluster_name,
            start.elapsed().as_secs_f64(),
            "success",
        );
        set_ingresses_routed(&self.cluster_name, cluster.ingresses.len());
        info!(
            "Reconciled cluster {}: {} of {} Ingresses routed",
            self.cluster_name,
            cluster.ingresses.len(),
            objects.len()
        );
        Ok(cluster)
    }

    /// Run scheduled reconciles until `cancel` fires or the provider shuts down
    ///
    /// A failed reconcile is rescheduled after an exponentially growing delay
    /// that resets on the next success. Only one worker may run per provider.
    pub async fn run_worker(&self, cancel: CancellationToken) {
        let requests = safe_lock(&self.requests).take();
        let Some(requests) = requests else {
            warn!("Ingress worker for {} is already running", self.cluster_name);
            return;
        };

        let reconciles = debounced_scheduler(requests, RECONCILE_DEBOUNCE);
        futures::pin_mut!(reconciles);
        let mut backoff = retry_backoff();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = reconciles.next() => {
                    if next.is_none() {
                        break;
                    }
                    match self.reconcile() {
                        Ok(_) => backoff.reset(),
                        Err(e) => {
                            let delay = backoff.next_backoff().unwrap_or(RETRY_MAX_DELAY);
                            error!("Ingress reconciliation failed, retrying in {:?}: {}", delay, e);
                            self.schedule_at(tokio::time::Instant::now() + delay);
                        }
                    }
                }
            }
        }
        debug!("Ingress worker stopped");
    }

    /// Stop accepting reconcile requests; the worker exits once idle
    pub fn shut_down(&self) {
        self.trigger.close_channel();
    }

    /// Watch Ingress objects until `cancel` fires
    ///
    /// Spawns the worker, feeds the store, and forces a reconcile every
    /// `resync`. When the watch stops, the request channel is closed, pending
    /// retries are dropped and the worker is awaited.
    pub async fn run(
        self: Arc<Self>,
        client: Client,
        mut writer: Writer<Ingress>,
        resync: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        let api: Api<Ingress> = Api::all(client);
        let stream = watcher(api, WatcherConfig::default()).default_backoff();
        futures::pin_mut!(stream);

        info!("Starting Ingress watcher for cluster {}", self.cluster_name);

        let worker_cancel = cancel.child_token();
        let worker = {
            let provider = Arc::clone(&self);
            let cancel = worker_cancel.clone();
            tokio::spawn(async move { provider.run_worker(cancel).await })
        };

        let mut resync_tick = tokio::time::interval_at(tokio::time::Instant::now() + resync, resync);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutting down Ingress watcher");
                    break;
                }
                _ = resync_tick.tick() => {
                    debug!("Ingress resync");
                    if self.is_synced() {
                        self.schedule();
                    }
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if self.handle_event(&mut writer, event) {
                            self.schedule();
                        }
                    }
                    Some(Err(e)) => warn!("Ingress watcher error: {}", e),
                    None => {
                        warn!("Ingress watch stream ended");
                        break;
                    }
                }
            }
        }

        self.shut_down();
        worker_cancel.cancel();
        if let Err(e) = worker.await {
            error!("Ingress worker task failed: {}", e);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterProvider for IngressProvider {
    fn name(&self) -> &str {
        &self.cluster_name
    }

    async fn routing_cluster(&self) -> Result<Arc<RoutingCluster>> {
        let cached = safe_read(&self.cluster).clone();
        cached.ok_or_else(|| Error::not_ready(&self.cluster_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::ingress::projection::ENABLED_ANNOTATION;
    use crate::apis::metrics::ingress_reconciliations;
    use k8s_openapi::api::networking::v1::{
        IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressRule, IngressSpec,
        IngressStatus,
    };
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn ingress(name: &str, enabled: bool, host: &str) -> Ingress {
        let mut annotations = BTreeMap::new();
        annotations.insert(ENABLED_ANNOTATION.to_string(), enabled.to_string());
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(host.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: Some(IngressStatus {
                load_balancer: Some(IngressLoadBalancerStatus {
                    ingress: Some(vec![IngressLoadBalancerIngress {
                        ip: Some("1.2.3.4".to_string()),
                        ..Default::default()
                    }]),
                }),
            }),
        }
    }

    fn provider_named(name: &str) -> (IngressProvider, Writer<Ingress>) {
        let (store, writer) = reflector::store();
        (IngressProvider::with_store(name, vec![], store), writer)
    }

    fn provider() -> (IngressProvider, Writer<Ingress>) {
        provider_named("k8s-local")
    }

    /// Replay an initial list; returns whether the last event asked for a reconcile
    fn initial_sync(provider: &IngressProvider, writer: &mut Writer<Ingress>, objects: Vec<Ingress>) -> bool {
        provider.handle_event(writer, watcher::Event::Init);
        for obj in objects {
            provider.handle_event(writer, watcher::Event::InitApply(obj));
        }
        provider.handle_event(writer, watcher::Event::InitDone)
    }

    fn spawn_worker(provider: &Arc<IngressProvider>, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
        let provider = Arc::clone(provider);
        let cancel = cancel.clone();
        tokio::spawn(async move { provider.run_worker(cancel).await })
    }

    #[tokio::test]
    async fn test_not_ready_before_first_reconcile() {
        let (provider, _writer) = provider();

        let err = provider.routing_cluster().await.unwrap_err();
        assert!(
            matches!(err, Error::NotReady { ref provider } if provider == "k8s-local"),
            "Expected NotReady, got: {}",
            err
        );
        assert!(
            matches!(provider.reconcile(), Err(Error::NotReady { .. })),
            "Reconcile must refuse to run on an unsynced store"
        );
    }

    #[tokio::test]
    async fn test_empty_is_distinct_from_not_ready() {
        let (provider, mut writer) = provider();
        initial_sync(&provider, &mut writer, vec![]);
        provider.reconcile().unwrap();

        let cluster = provider.routing_cluster().await.unwrap();
        assert_eq!(cluster.name, "k8s-local");
        assert!(cluster.ingresses.is_empty(), "Synced empty store is a valid empty cluster");
    }

    #[tokio::test]
    async fn test_reconcile_projects_enabled_ingresses() {
        let (provider, mut writer) = provider();
        initial_sync(
            &provider,
            &mut writer,
            vec![
                ingress("web", true, "a.example.com"),
                ingress("hidden", false, "b.example.com"),
            ],
        );
        provider.reconcile().unwrap();

        let cluster = provider.routing_cluster().await.unwrap();
        assert_eq!(cluster.ingresses.len(), 1);
        assert_eq!(cluster.ingresses[0].name, "default/web");
        assert_eq!(cluster.ingresses[0].domains(), ["a.example.com"]);
    }

    #[tokio::test]
    async fn test_events_before_sync_do_not_request_reconcile() {
        let (provider, mut writer) = provider();
        assert!(!provider.handle_event(&mut writer, watcher::Event::Init));
        assert!(!provider.handle_event(
            &mut writer,
            watcher::Event::InitApply(ingress("web", true, "a.example.com")),
        ));
        assert!(!provider.is_synced());

        assert!(provider.handle_event(&mut writer, watcher::Event::InitDone));
        assert!(provider.is_synced());

        assert!(provider.handle_event(
            &mut writer,
            watcher::Event::Apply(ingress("api", true, "api.example.com")),
        ));
        assert!(provider.handle_event(
            &mut writer,
            watcher::Event::Delete(ingress("api", true, "api.example.com")),
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_ingress_on_next_reconcile() {
        let (provider, mut writer) = provider();
        let web = ingress("web", true, "a.example.com");
        initial_sync(&provider, &mut writer, vec![web.clone()]);
        provider.reconcile().unwrap();
        let before = provider.routing_cluster().await.unwrap();

        provider.handle_event(&mut writer, watcher::Event::Delete(web));
        provider.reconcile().unwrap();
        let after = provider.routing_cluster().await.unwrap();

        assert!(after.ingresses.is_empty());
        assert_eq!(
            before.ingresses.len(),
            1,
            "Previously handed out cluster must stay untouched"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_reconciles_and_stops_on_cancel() {
        let (provider, mut writer) = provider();
        let provider = Arc::new(provider);
        let cancel = CancellationToken::new();
        let worker = spawn_worker(&provider, &cancel);

        if initial_sync(&provider, &mut writer, vec![ingress("web", true, "a.example.com")]) {
            provider.schedule();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let cluster = provider
            .routing_cluster()
            .await
            .expect("Worker should reconcile after sync");
        assert_eq!(cluster.ingresses.len(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("Worker should exit after cancel")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_events_coalesces_into_one_reconcile() {
        let (provider, mut writer) = provider_named("burst-cluster");
        let provider = Arc::new(provider);
        let cancel = CancellationToken::new();
        let worker = spawn_worker(&provider, &cancel);

        if initial_sync(&provider, &mut writer, vec![]) {
            provider.schedule();
        }
        for i in 0..10 {
            let obj = ingress(&format!("web-{}", i), true, &format!("web-{}.example.com", i));
            if provider.handle_event(&mut writer, watcher::Event::Apply(obj)) {
                provider.schedule();
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            ingress_reconciliations("burst-cluster", "success"),
            1,
            "Eleven requests inside the debounce window should run one reconcile"
        );
        assert_eq!(provider.routing_cluster().await.unwrap().ingresses.len(), 10);

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconcile_is_retried() {
        let (provider, mut writer) = provider_named("retry-cluster");
        let provider = Arc::new(provider);
        let cancel = CancellationToken::new();
        let worker = spawn_worker(&provider, &cancel);

        // Requested before the store is synced: the first attempt fails
        provider.schedule();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(ingress_reconciliations("retry-cluster", "not_ready") >= 1);
        assert!(provider.routing_cluster().await.is_err());

        // Sync without asking for a reconcile; the pending retry picks it up
        initial_sync(&provider, &mut writer, vec![ingress("web", true, "a.example.com")]);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let cluster = provider
            .routing_cluster()
            .await
            .expect("Retry should reconcile once the store is synced");
        assert_eq!(cluster.ingresses.len(), 1);
        assert_eq!(ingress_reconciliations("retry-cluster", "success"), 1);

        cancel.cancel();
        worker.await.unwrap();
    }
}
