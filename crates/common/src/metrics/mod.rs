//! Metrics and observability utilities
//!
//! Prometheus metrics for the answer cycle with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Tripwise metrics
pub const METRICS_PREFIX: &str = "tripwise";

/// Histogram buckets for a full answer cycle (in seconds)
/// Cycles are dominated by two or more LM round trips
pub const CYCLE_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    4.000,  // 4s
    8.000,  // 8s
    15.00,  // 15s
    30.00,  // 30s
    60.00,  // 60s
];

/// Buckets for single upstream calls (LM or connector)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_cycles_total", METRICS_PREFIX),
        Unit::Count,
        "Answer cycles by outcome"
    );

    describe_histogram!(
        format!("{}_cycle_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end answer cycle latency in seconds"
    );

    describe_counter!(
        format!("{}_connector_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Connector calls by source and outcome"
    );

    describe_histogram!(
        format!("{}_connector_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Connector call latency in seconds"
    );

    describe_counter!(
        format!("{}_llm_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Language model calls by purpose and status"
    );

    describe_histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Language model call latency in seconds"
    );

    describe_counter!(
        format!("{}_validation_verdicts_total", METRICS_PREFIX),
        Unit::Count,
        "Draft validation verdicts"
    );

    describe_counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Cycles routed back to classification"
    );

    tracing::info!("Metrics registered");
}

/// Helper to time one answer cycle
pub struct CycleMetrics {
    start: Instant,
}

impl CycleMetrics {
    /// Start tracking a cycle
    pub fn start() -> Self {
        counter!(
            format!("{}_cycles_total", METRICS_PREFIX),
            "outcome" => "started"
        )
        .increment(1);

        Self { start: Instant::now() }
    }

    /// Record cycle completion; `outcome` is one of completed, failed
    pub fn finish(self, outcome: &'static str) {
        counter!(
            format!("{}_cycles_total", METRICS_PREFIX),
            "outcome" => outcome
        )
        .increment(1);

        histogram!(
            format!("{}_cycle_duration_seconds", METRICS_PREFIX),
            "outcome" => outcome
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// Helper to record connector metrics
pub fn record_connector(source: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_connector_calls_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_connector_duration_seconds", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .record(duration_secs);
}

/// Helper to record LM gateway metrics
pub fn record_llm(purpose: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_calls_total", METRICS_PREFIX),
        "purpose" => purpose.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_llm_duration_seconds", METRICS_PREFIX),
            "purpose" => purpose.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record a validation verdict (passed, failed, skipped, unparsable)
pub fn record_verdict(verdict: &str) {
    counter!(
        format!("{}_validation_verdicts_total", METRICS_PREFIX),
        "verdict" => verdict.to_string()
    )
    .increment(1);
}

/// Helper to record a retry back to classification
pub fn record_retry(attempt: u32) {
    counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        "attempt" => attempt.to_string()
    )
    .increment(1);
}
