// Prometheus metrics definitions for the Nexus backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("nexus_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    /// Catalog stat rolls served, by catalog and tier.
    pub static ref STAT_ROLLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("nexus_stat_rolls_total", "Catalog stat rolls served"),
        &["catalog", "level"],
    )
    .unwrap();

    /// Total adoptions performed.
    pub static ref ADOPTIONS_TOTAL: IntCounter = IntCounter::new(
        "nexus_adoptions_total",
        "Owned instances created by adoption",
    )
    .unwrap();

    /// Total owned instances released.
    pub static ref RELEASES_TOTAL: IntCounter = IntCounter::new(
        "nexus_releases_total",
        "Owned instances released",
    )
    .unwrap();

    /// Total active-instance swaps.
    pub static ref ACTIVATIONS_TOTAL: IntCounter = IntCounter::new(
        "nexus_activations_total",
        "Active-instance swaps",
    )
    .unwrap();

    /// Insight generation outcomes (generated vs fallback).
    pub static ref INSIGHTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("nexus_insights_total", "Insight generation outcomes"),
        &["outcome"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "nexus_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(STAT_ROLLS_TOTAL.clone()),
        Box::new(ADOPTIONS_TOTAL.clone()),
        Box::new(RELEASES_TOTAL.clone()),
        Box::new(ACTIVATIONS_TOTAL.clone()),
        Box::new(INSIGHTS_TOTAL.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Normalize a URL path for metric labels: replace numeric path segments with `:id`
/// to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
