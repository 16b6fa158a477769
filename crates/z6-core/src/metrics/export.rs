//! Rendering of a [`Metrics`] value for the CLI's output formats.

use crate::error::Z6Error;
use crate::metrics::{AssertionOutcome, Metrics};

const METHOD_NAMES: [&str; 8] = [
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "OTHER",
];
const STATUS_CLASS_NAMES: [&str; 6] = ["1xx", "2xx", "3xx", "4xx", "5xx", "other"];

// ---------------------------------------------------------------------------
// Human-readable summary
// ---------------------------------------------------------------------------

/// Render the fixed-width text summary printed after a run.
pub fn format_summary(metrics: &Metrics, assertions: &[AssertionOutcome]) -> String {
    let mut out = String::new();
    let r = &metrics.requests;
    let l = &metrics.latency;

    out.push_str("== requests ==\n");
    out.push_str(&format!(
        "  total {}  success {}  failed {}  success_rate {:.2}%\n",
        r.total,
        r.success,
        r.failed,
        r.success_rate * 100.0
    ));
    for (name, count) in METHOD_NAMES.iter().zip(r.by_method.iter()) {
        if *count > 0 {
            out.push_str(&format!("  {name:<8} {count}\n"));
        }
    }
    for (name, count) in STATUS_CLASS_NAMES.iter().zip(r.by_status_class.iter()) {
        if *count > 0 {
            out.push_str(&format!("  {name:<8} {count}\n"));
        }
    }

    out.push_str("== latency ==\n");
    out.push_str(&format!(
        "  min {}  mean {}  max {}\n",
        format_ns(l.min_ns),
        format_ns(l.mean_ns as u64),
        format_ns(l.max_ns)
    ));
    out.push_str(&format!(
        "  p50 {}  p90 {}  p95 {}  p99 {}  p99.9 {}\n",
        format_ns(l.p50_ns),
        format_ns(l.p90_ns),
        format_ns(l.p95_ns),
        format_ns(l.p99_ns),
        format_ns(l.p999_ns)
    ));

    out.push_str("== throughput ==\n");
    out.push_str(&format!(
        "  {} responses over {} ticks ({:.3} req/tick)\n",
        metrics.throughput.response_count,
        metrics.throughput.total_duration_ticks,
        metrics.throughput.requests_per_tick
    ));

    out.push_str("== connections ==\n");
    out.push_str(&format!(
        "  opened {}  errors {}\n",
        metrics.connections.total, metrics.connections.errors
    ));

    let e = &metrics.errors;
    out.push_str("== errors ==\n");
    out.push_str(&format!(
        "  total {}  (dns {} tcp {} tls {} http {} timeout {} protocol {} resource {})\n",
        e.total, e.dns, e.tcp, e.tls, e.http, e.timeout, e.protocol, e.resource
    ));

    if !assertions.is_empty() {
        out.push_str("== assertions ==\n");
        for a in assertions {
            let verdict = if a.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!(
                "  [{verdict}] {} (measured {:.3}, threshold {:.3})\n",
                a.name, a.measured, a.threshold
            ));
        }
    }

    out
}

fn format_ns(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.2}s", ns as f64 / 1e9)
    } else if ns >= 1_000_000 {
        format!("{:.1}ms", ns as f64 / 1e6)
    } else if ns >= 1_000 {
        format!("{:.1}us", ns as f64 / 1e3)
    } else {
        format!("{ns}ns")
    }
}

// ---------------------------------------------------------------------------
// JSON / CSV
// ---------------------------------------------------------------------------

/// Pretty-printed JSON form of the metrics.
pub fn to_json(metrics: &Metrics) -> Result<String, Z6Error> {
    Ok(serde_json::to_string_pretty(metrics)?)
}

/// Flat `metric,value` CSV of every scalar the metrics carry.
pub fn to_csv(metrics: &Metrics) -> Result<String, Z6Error> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(["metric", "value"]).map_err(csv_err)?;

    let r = &metrics.requests;
    let rows: Vec<(String, String)> = vec![
        ("requests_total".into(), r.total.to_string()),
        ("requests_success".into(), r.success.to_string()),
        ("requests_failed".into(), r.failed.to_string()),
        ("success_rate".into(), format!("{:.6}", r.success_rate)),
        ("latency_min_ns".into(), metrics.latency.min_ns.to_string()),
        ("latency_max_ns".into(), metrics.latency.max_ns.to_string()),
        (
            "latency_mean_ns".into(),
            format!("{:.1}", metrics.latency.mean_ns),
        ),
        ("latency_p50_ns".into(), metrics.latency.p50_ns.to_string()),
        ("latency_p90_ns".into(), metrics.latency.p90_ns.to_string()),
        ("latency_p95_ns".into(), metrics.latency.p95_ns.to_string()),
        ("latency_p99_ns".into(), metrics.latency.p99_ns.to_string()),
        (
            "latency_p999_ns".into(),
            metrics.latency.p999_ns.to_string(),
        ),
        (
            "latency_samples".into(),
            metrics.latency.sample_count.to_string(),
        ),
        (
            "duration_ticks".into(),
            metrics.throughput.total_duration_ticks.to_string(),
        ),
        (
            "requests_per_tick".into(),
            format!("{:.6}", metrics.throughput.requests_per_tick),
        ),
        (
            "responses".into(),
            metrics.throughput.response_count.to_string(),
        ),
        (
            "connections_total".into(),
            metrics.connections.total.to_string(),
        ),
        (
            "connections_errors".into(),
            metrics.connections.errors.to_string(),
        ),
        ("errors_total".into(), metrics.errors.total.to_string()),
        ("errors_dns".into(), metrics.errors.dns.to_string()),
        ("errors_tcp".into(), metrics.errors.tcp.to_string()),
        ("errors_tls".into(), metrics.errors.tls.to_string()),
        ("errors_http".into(), metrics.errors.http.to_string()),
        ("errors_timeout".into(), metrics.errors.timeout.to_string()),
        (
            "errors_protocol".into(),
            metrics.errors.protocol.to_string(),
        ),
        (
            "errors_resource".into(),
            metrics.errors.resource.to_string(),
        ),
        (
            "error_rate".into(),
            format!("{:.6}", metrics.errors.error_rate),
        ),
        ("start_tick".into(), metrics.start_tick.to_string()),
        ("end_tick".into(), metrics.end_tick.to_string()),
    ];
    let mut all = rows;
    for (name, count) in METHOD_NAMES.iter().zip(metrics.requests.by_method.iter()) {
        all.push((format!("requests_{}", name.to_lowercase()), count.to_string()));
    }
    for (name, count) in STATUS_CLASS_NAMES
        .iter()
        .zip(metrics.requests.by_status_class.iter())
    {
        all.push((format!("status_{name}"), count.to_string()));
    }

    for (metric, value) in all {
        w.write_record([metric.as_str(), value.as_str()])
            .map_err(csv_err)?;
    }
    let bytes = w.into_inner().map_err(|e| Z6Error::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|_| Z6Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "csv")))
}

fn csv_err(e: csv::Error) -> Z6Error {
    Z6Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
