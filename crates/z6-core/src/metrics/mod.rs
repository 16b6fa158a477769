//! Metrics value types and assertion evaluation.

pub mod export;
pub mod histogram;
pub mod reducer;

pub use histogram::Histogram;
pub use reducer::reduce;

use serde::{Deserialize, Serialize};

use crate::scenario::model::Assertions;

/// Nanoseconds per logical tick (100 ticks per second).
pub const TICK_NS: u64 = 10_000_000;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Request counters. `by_method` is indexed GET, POST, PUT, DELETE,
/// PATCH, HEAD, OPTIONS, other; `by_status_class` is indexed 1xx..5xx,
/// other.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequestMetrics {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub by_method: [u64; 8],
    pub by_status_class: [u64; 6],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LatencyMetrics {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub p50_ns: u64,
    pub p90_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThroughputMetrics {
    pub total_duration_ticks: u64,
    pub requests_per_tick: f64,
    pub response_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionMetrics {
    pub total: u64,
    pub errors: u64,
    pub avg_time_ns: f64,
    pub total_time_ns: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorMetrics {
    pub total: u64,
    pub dns: u64,
    pub tcp: u64,
    pub tls: u64,
    pub http: u64,
    pub timeout: u64,
    pub protocol: u64,
    pub resource: u64,
    pub error_rate: f64,
}

/// The reducer's output for one event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Metrics {
    pub requests: RequestMetrics,
    pub latency: LatencyMetrics,
    pub throughput: ThroughputMetrics,
    pub connections: ConnectionMetrics,
    pub errors: ErrorMetrics,
    pub start_tick: u64,
    pub end_tick: u64,
}

/// `by_method` slot for a payload method code.
pub fn method_index(code: u8) -> usize {
    match code {
        1..=7 => code as usize - 1,
        _ => 7,
    }
}

/// `by_status_class` slot for a status code.
pub fn status_class_index(status: u16) -> usize {
    match status / 100 {
        1 => 0,
        2 => 1,
        3 => 2,
        4 => 3,
        5 => 4,
        _ => 5,
    }
}

// ---------------------------------------------------------------------------
// Assertion evaluation
// ---------------------------------------------------------------------------

/// Result of checking one scenario assertion against final metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AssertionOutcome {
    pub name: String,
    /// Payload kind code: 0 = p99 latency, 1 = error rate, 2 = success rate.
    pub kind: u8,
    pub passed: bool,
    pub measured: f64,
    pub threshold: f64,
}

/// Evaluate the scenario's configured assertions. Unconfigured checks
/// produce no outcome.
pub fn evaluate_assertions(metrics: &Metrics, assertions: &Assertions) -> Vec<AssertionOutcome> {
    let mut outcomes = Vec::new();

    if let Some(threshold_ms) = assertions.p99_latency_ms {
        let measured = metrics.latency.p99_ns as f64 / 1_000_000.0;
        outcomes.push(AssertionOutcome {
            name: "p99_latency_ms".to_string(),
            kind: 0,
            passed: measured <= threshold_ms as f64,
            measured,
            threshold: threshold_ms as f64,
        });
    }
    if let Some(max_rate) = assertions.error_rate_max {
        let measured = metrics.errors.error_rate;
        outcomes.push(AssertionOutcome {
            name: "error_rate_max".to_string(),
            kind: 1,
            passed: measured <= max_rate,
            measured,
            threshold: max_rate,
        });
    }
    if let Some(min_rate) = assertions.success_rate_min {
        let measured = metrics.requests.success_rate;
        outcomes.push(AssertionOutcome {
            name: "success_rate_min".to_string(),
            kind: 2,
            passed: measured >= min_rate,
            measured,
            threshold: min_rate,
        });
    }

    outcomes
}
