use anyhow::{bail, Context, Result};
use common::RoutingCluster;
use control::apis::ingress::IngressProvider;
use control::config::ControllerConfig;
use control::provider::{ClusterProvider, StaticProvider};
use control::xds::{Aggregator, SnapshotCache, TranslatorOptions};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// sluice control plane
///
/// `sluice example` prints the reference static document; without arguments
/// the controller runs with configuration from `SLUICE_*` variables.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Some(command) = env::args().nth(1) {
        match command.as_str() {
            "example" => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&RoutingCluster::example())?
                );
                return Ok(());
            }
            other => bail!("unknown command {:?} (supported: example)", other),
        }
    }

    let config = ControllerConfig::from_env()?;
    info!("🦀 sluice control plane starting");

    let cancel = CancellationToken::new();
    let mut providers: Vec<Arc<dyn ClusterProvider>> = Vec::new();
    let mut tasks: Vec<JoinHandle<control::Result<()>>> = Vec::new();

    if let Some(path) = &config.static_path {
        let provider = StaticProvider::from_file(path)
            .with_context(|| format!("Failed to load static cluster from {}", path.display()))?;
        info!("   Static provider: {}", provider.name());
        providers.push(Arc::new(provider));
    }

    if config.kubernetes.enabled {
        let client = kube::Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        let (provider, writer) = IngressProvider::new(&config.kubernetes);
        let provider = Arc::new(provider);
        info!("   Ingress provider: {}", provider.name());
        if !config.kubernetes.ingress_classes.is_empty() {
            info!(
                "   Ingress classes: {}",
                config.kubernetes.ingress_classes.join(", ")
            );
        }

        providers.push(provider.clone());
        tasks.push(tokio::spawn(provider.run(
            client,
            writer,
            config.kubernetes.resync_interval(),
            cancel.clone(),
        )));
    }

    if providers.is_empty() {
        bail!("no providers configured: set SLUICE_STATIC_PATH or SLUICE_K8S_ENABLED=true");
    }

    let cache = Arc::new(SnapshotCache::new());
    let aggregator = Arc::new(
        Aggregator::new(providers, cache.clone())
            .with_ports(config.listeners.http_port, config.listeners.https_port)
            .with_options(TranslatorOptions {
                catch_all_blackhole: config.aggregation.catch_all_blackhole,
            }),
    );

    // Fail closed: nothing is served until one full cycle succeeds
    tokio::select! {
        result = aggregator.initialize(config.aggregation.startup_timeout()) => {
            if let Err(e) = result {
                shutdown(cancel, tasks).await;
                return Err(e.into());
            }
        }
        signal = shutdown_signal() => {
            let signal = signal.context("Failed to listen for shutdown signals")?;
            info!("{} received during startup", signal);
            shutdown(cancel, tasks).await;
            return Ok(());
        }
    }

    if let Some(dump) = cache.dump_json()? {
        debug!("Serving snapshot:\n{}", dump);
    }

    tasks.push({
        let aggregator = Arc::clone(&aggregator);
        let interval = config.aggregation.interval();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            aggregator.run(interval, cancel).await;
            Ok(())
        })
    });

    info!("Press Ctrl-C or send SIGTERM to exit.");
    let signal = shutdown_signal()
        .await
        .context("Failed to listen for shutdown signals")?;
    info!("{} received, shutting down", signal);

    shutdown(cancel, tasks).await;
    Ok(())
}

/// Resolve on Ctrl-C, or on SIGTERM where the platform has it
async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result.map(|_| "Ctrl-C"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|_| "Ctrl-C")
    }
}

/// Cancel background tasks and wait for them to finish
async fn shutdown(cancel: CancellationToken, tasks: Vec<JoinHandle<control::Result<()>>>) {
    cancel.cancel();
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Background task failed: {}", e),
            Err(e) => error!("Background task panicked: {}", e),
        }
    }
}
