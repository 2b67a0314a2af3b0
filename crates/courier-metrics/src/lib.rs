//! Prometheus metrics for the Courier email system
//!
//! Provides centralized metrics collection for monitoring:
//! - Email delivery outcomes
//! - Queue depth and DLQ size
//! - Provider send latency and rate limiting
//! - Worker pool health

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounterVec, IntGauge, TextEncoder, opts,
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
};

// ============================================================================
// Email Metrics
// ============================================================================

/// Emails processed, by terminal status, priority and provider.
pub static EMAILS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("courier_emails_total", "Total number of emails processed"),
        &["status", "priority", "provider"]
    )
    .expect("Failed to register EMAILS_TOTAL metric")
});

/// Duration of the provider send call only.
pub static SEND_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "courier_send_duration_seconds",
        "Duration of the provider dispatch call",
        &["provider", "status"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register SEND_DURATION_SECONDS metric")
});

/// Dispatches refused by the rate gate (per bucket squeeze, not per job).
pub static RATE_LIMITED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "courier_rate_limited_total",
            "Rate-bucket refusals observed by workers"
        ),
        &["provider"]
    )
    .expect("Failed to register RATE_LIMITED_TOTAL metric")
});

// ============================================================================
// Queue Metrics
// ============================================================================

/// Ready-stream depth per priority, refreshed by the stats aggregator.
pub static QUEUE_DEPTH: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!("courier_queue_depth", "Current number of jobs per ready stream"),
        &["priority"]
    )
    .expect("Failed to register QUEUE_DEPTH metric")
});

/// Dead-letter queue size.
pub static DLQ_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "courier_dlq_size",
        "Number of jobs in the dead letter queue"
    ))
    .expect("Failed to register DLQ_SIZE metric")
});

/// Parked (future-dated) job count.
pub static PARKED_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "courier_parked_size",
        "Number of future-dated jobs in the parked set"
    ))
    .expect("Failed to register PARKED_SIZE metric")
});

/// Jobs promoted from the parked set to ready streams.
pub static PROMOTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "courier_promoted_total",
            "Parked jobs promoted to ready streams"
        ),
        &["reason"]
    )
    .expect("Failed to register PROMOTED_TOTAL metric")
});

// ============================================================================
// Worker Metrics
// ============================================================================

/// Worker restarts performed by the supervisor.
pub static WORKER_RESTARTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "courier_worker_restarts_total",
            "Worker task restarts performed by the supervisor"
        ),
        &["worker"]
    )
    .expect("Failed to register WORKER_RESTARTS_TOTAL metric")
});

/// Pending entries reclaimed from dead consumers.
pub static RECLAIMED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "courier_reclaimed_total",
            "Pending entries reclaimed after the idle timeout"
        ),
        &["priority"]
    )
    .expect("Failed to register RECLAIMED_TOTAL metric")
});

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Ingress requests by path and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("courier_http_requests_total", "Ingress HTTP requests"),
        &["path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL metric")
});

// ============================================================================
// Metrics Collection
// ============================================================================

/// Gather all registered metrics and encode as Prometheus text format.
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
