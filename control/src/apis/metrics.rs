//! Controller metrics

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Ingress reconciliation duration
    static ref INGRESS_RECONCILIATION_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "ingress_reconciliation_duration_seconds",
            "Ingress reconciliation duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["cluster"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Ingress reconciliations total
    static ref INGRESS_RECONCILIATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "ingress_reconciliations_total",
            "Total number of ingress reconciliations",
        );
        let counter = IntCounterVec::new(opts, &["cluster", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Ingress objects that survived filtering in the last reconcile
    static ref INGRESS_ROUTED: IntGaugeVec = {
        let opts = Opts::new(
            "ingress_routed_total",
            "Number of Ingress objects routed by the last reconciliation",
        );
        let gauge = IntGaugeVec::new(opts, &["cluster"])
            .expect("Failed to create gauge");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("Failed to register gauge");
        gauge
    };

    /// Aggregation cycles by outcome
    static ref AGGREGATION_CYCLES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "aggregation_cycles_total",
            "Total number of aggregation cycles",
        );
        let counter = IntCounterVec::new(opts, &["outcome"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Aggregation cycle duration
    static ref AGGREGATION_CYCLE_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "aggregation_cycle_duration_seconds",
            "Aggregation cycle duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["outcome"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };
}

/// Record one pass of the Ingress reconciler
pub fn record_ingress_reconciliation(cluster: &str, duration_secs: f64, result: &str) {
    INGRESS_RECONCILIATION_DURATION
        .with_label_values(&[cluster])
        .observe(duration_secs);

    INGRESS_RECONCILIATIONS_TOTAL
        .with_label_values(&[cluster, result])
        .inc();
}

/// Reconciliations recorded so far for `cluster` with `result`
pub fn ingress_reconciliations(cluster: &str, result: &str) -> u64 {
    INGRESS_RECONCILIATIONS_TOTAL
        .with_label_values(&[cluster, result])
        .get()
}

/// Record how many Ingress objects the reconciler projected
pub fn set_ingresses_routed(cluster: &str, count: usize) {
    INGRESS_ROUTED
        .with_label_values(&[cluster])
        .set(count as i64);
}

/// Record one aggregation cycle
///
/// `outcome` is `published`, `unchanged`, or the failing error kind.
pub fn record_aggregation_cycle(outcome: &str, duration_secs: f64) {
    AGGREGATION_CYCLE_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);

    AGGREGATION_CYCLES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Gather controller metrics in the Prometheus text format
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}
