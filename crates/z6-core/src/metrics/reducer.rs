//! Single-pass event log reduction.
//!
//! One O(N) walk over the log produces the full [`Metrics`] value.
//! Every record's checksum is validated on the way through; any
//! integrity failure aborts the pass — partial metrics are never
//! emitted from a damaged log. Only tick ordering matters; the log's
//! (tick, insertion index) order is already total.

use crate::error::{LogFileError, Z6Error};
use crate::event::record::{
    ConnEstablishedPayload, EventType, ResponseReceivedPayload,
};
use crate::event::EventLog;
use crate::metrics::histogram::Histogram;
use crate::metrics::{method_index, status_class_index, Metrics, TICK_NS};

/// Latency histogram configuration: nanoseconds, 1ns to 1 hour, 3
/// significant figures.
const LATENCY_LOWEST_NS: u64 = 1;
const LATENCY_HIGHEST_NS: u64 = 3_600_000_000_000;
const LATENCY_SIG_FIGS: u8 = 3;

/// Reduce `log` into aggregate metrics.
pub fn reduce(log: &EventLog) -> Result<Metrics, Z6Error> {
    let mut metrics = Metrics::default();
    let mut histogram = Histogram::new(LATENCY_LOWEST_NS, LATENCY_HIGHEST_NS, LATENCY_SIG_FIGS)?;
    let mut start_tick = u64::MAX;
    let mut end_tick = 0u64;

    for (index, event) in log.iter().enumerate() {
        if !event.validate_checksum() {
            return Err(LogFileError::RecordChecksum {
                index: index as u64,
            }
            .into());
        }
        start_tick = start_tick.min(event.tick);
        end_tick = end_tick.max(event.tick);

        match event.event_type {
            EventType::RequestIssued => {
                metrics.requests.total += 1;
                // Method code sits at payload offset 24.
                metrics.requests.by_method[method_index(event.payload[24])] += 1;
            }
            EventType::ResponseReceived => {
                let payload = ResponseReceivedPayload::decode(&event.payload);
                metrics.throughput.response_count += 1;
                metrics.requests.by_status_class[status_class_index(payload.status_code)] += 1;
                if payload.status_code < 400 {
                    metrics.requests.success += 1;
                } else {
                    metrics.requests.failed += 1;
                }
                histogram.record_value(payload.latency_ticks * TICK_NS);
            }
            EventType::ResponseError => {
                metrics.requests.failed += 1;
            }
            EventType::ConnEstablished => {
                let payload = ConnEstablishedPayload::decode(&event.payload);
                metrics.connections.total += 1;
                metrics.connections.total_time_ns += payload.connect_ticks * TICK_NS;
            }
            EventType::ConnError => {
                metrics.connections.errors += 1;
            }
            EventType::ErrorDns => metrics.errors.dns += 1,
            EventType::ErrorTcp => metrics.errors.tcp += 1,
            EventType::ErrorTls => metrics.errors.tls += 1,
            EventType::ErrorHttp => metrics.errors.http += 1,
            EventType::ErrorTimeout => metrics.errors.timeout += 1,
            EventType::ErrorProtocolViolation => metrics.errors.protocol += 1,
            EventType::ErrorResourceExhausted => metrics.errors.resource += 1,
            // Lifecycle, scheduler, cancellation, and assertion events
            // contribute only to the observed time window.
            EventType::VuSpawned
            | EventType::VuReady
            | EventType::VuComplete
            | EventType::RequestTimeout
            | EventType::RequestCancelled
            | EventType::ConnClosed
            | EventType::SchedulerTick
            | EventType::AssertionPassed
            | EventType::AssertionFailed => {}
        }
    }

    metrics.errors.total = metrics.errors.dns
        + metrics.errors.tcp
        + metrics.errors.tls
        + metrics.errors.http
        + metrics.errors.timeout
        + metrics.errors.protocol
        + metrics.errors.resource;

    if metrics.requests.total > 0 {
        metrics.requests.success_rate =
            metrics.requests.success as f64 / metrics.requests.total as f64;
        metrics.errors.error_rate = metrics.errors.total as f64 / metrics.requests.total as f64;
    }

    if start_tick == u64::MAX {
        start_tick = 0;
    }
    metrics.start_tick = start_tick;
    metrics.end_tick = end_tick;
    let duration = end_tick.saturating_sub(start_tick);
    metrics.throughput.total_duration_ticks = duration;
    if duration > 0 {
        metrics.throughput.requests_per_tick =
            metrics.throughput.response_count as f64 / duration as f64;
    }

    metrics.latency.min_ns = histogram.min();
    metrics.latency.max_ns = histogram.max();
    metrics.latency.mean_ns = histogram.mean();
    metrics.latency.p50_ns = histogram.value_at_percentile(50.0);
    metrics.latency.p90_ns = histogram.value_at_percentile(90.0);
    metrics.latency.p95_ns = histogram.value_at_percentile(95.0);
    metrics.latency.p99_ns = histogram.value_at_percentile(99.0);
    metrics.latency.p999_ns = histogram.value_at_percentile(99.9);
    metrics.latency.sample_count = histogram.total_count();

    if metrics.connections.total > 0 {
        metrics.connections.avg_time_ns =
            metrics.connections.total_time_ns as f64 / metrics.connections.total as f64;
    }

    Ok(metrics)
}
