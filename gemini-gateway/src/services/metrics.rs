//! Prometheus metrics for the gateway.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub static GATEWAY_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static GATEWAY_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static GATEWAY_STAGED_FILES: OnceLock<IntGauge> = OnceLock::new();
pub static GATEWAY_GENERATION_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics. Must be called once at startup.
pub fn init_metrics() {
    let registry = Registry::new();

    let requests_total = IntCounterVec::new(
        Opts::new("gateway_requests_total", "Total generation requests"),
        &["route", "outcome"],
    )
    .expect("Failed to create gateway_requests_total metric");

    // outcome: success, upstream_error, no_artifact, normalization_failure
    let attempts_total = IntCounterVec::new(
        Opts::new("gateway_attempts_total", "Total backend submission attempts"),
        &["outcome"],
    )
    .expect("Failed to create gateway_attempts_total metric");

    let staged_files = IntGauge::new(
        "gateway_staged_files",
        "Uploaded files currently staged on disk",
    )
    .expect("Failed to create gateway_staged_files metric");

    let generation_duration = HistogramVec::new(
        HistogramOpts::new(
            "gateway_generation_duration_seconds",
            "End-to-end generation latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["route"],
    )
    .expect("Failed to create gateway_generation_duration_seconds metric");

    registry
        .register(Box::new(requests_total.clone()))
        .expect("Failed to register gateway_requests_total");
    registry
        .register(Box::new(attempts_total.clone()))
        .expect("Failed to register gateway_attempts_total");
    registry
        .register(Box::new(staged_files.clone()))
        .expect("Failed to register gateway_staged_files");
    registry
        .register(Box::new(generation_duration.clone()))
        .expect("Failed to register gateway_generation_duration_seconds");

    let _ = REGISTRY.set(registry);
    let _ = GATEWAY_REQUESTS_TOTAL.set(requests_total);
    let _ = GATEWAY_ATTEMPTS_TOTAL.set(attempts_total);
    let _ = GATEWAY_STAGED_FILES.set(staged_files);
    let _ = GATEWAY_GENERATION_DURATION_SECONDS.set(generation_duration);

    tracing::info!("Prometheus metrics initialized");
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => return "# Metrics registry not initialized\n".to_string(),
    };

    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
        format!("# Failed to convert metrics to UTF-8: {}\n", e)
    })
}

pub fn record_request(route: &str, outcome: &str, duration_secs: f64) {
    if let Some(counter) = GATEWAY_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[route, outcome]).inc();
    }
    if let Some(histogram) = GATEWAY_GENERATION_DURATION_SECONDS.get() {
        histogram.with_label_values(&[route]).observe(duration_secs);
    }
}

pub fn record_attempt(outcome: &str) {
    if let Some(counter) = GATEWAY_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Gauge the staging area keeps in step with its live file count.
pub fn staged_files_gauge() -> Option<IntGauge> {
    GATEWAY_STAGED_FILES.get().cloned()
}
