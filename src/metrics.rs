//! Prometheus metrics registry and instruments.
//!
//! Instruments are process-global; `init_metrics` registers them once.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pixora_http_requests_total", "Total number of backend requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "pixora_http_request_duration_seconds",
            "Backend request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pixora_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pixora_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pixora_cache_size", "Current number of items in cache"),
        &["cache_name"]
    ).expect("metric can be created");

    // Store Metrics
    pub static ref OPTIMISTIC_ROLLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pixora_optimistic_rollbacks_total", "Optimistic mutations reverted after a failed request"),
        &["operation"]
    ).expect("metric can be created");
    pub static ref DEDUPLICATED_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pixora_deduplicated_requests_total", "Callers served by an already in-flight request"),
        &["operation"]
    ).expect("metric can be created");
    pub static ref REFRESH_TICKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pixora_refresh_ticks_total", "Background refreshes by feed and outcome"),
        &["feed", "source", "status"]
    ).expect("metric can be created");

    // Upload Metrics
    pub static ref UPLOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pixora_uploads_total", "Upload attempts by phase and outcome"),
        &["phase", "status"]
    ).expect("metric can be created");
    pub static ref UPLOAD_BYTES_TOTAL: IntCounter = IntCounter::new(
        "pixora_upload_bytes_total",
        "Total bytes sent to temporary upload storage"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pixora_errors_total", "Total number of client errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
            .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("CACHE_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("CACHE_MISSES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_SIZE.clone()))
            .expect("CACHE_SIZE can be registered");
        REGISTRY
            .register(Box::new(OPTIMISTIC_ROLLBACKS_TOTAL.clone()))
            .expect("OPTIMISTIC_ROLLBACKS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DEDUPLICATED_REQUESTS_TOTAL.clone()))
            .expect("DEDUPLICATED_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(REFRESH_TICKS_TOTAL.clone()))
            .expect("REFRESH_TICKS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(UPLOADS_TOTAL.clone()))
            .expect("UPLOADS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(UPLOAD_BYTES_TOTAL.clone()))
            .expect("UPLOAD_BYTES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(%error, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
