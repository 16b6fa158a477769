//! Per-VU execution context and request selection.

use crate::http::request::Request;
use crate::rng::Rng;
use crate::scenario::model::{RequestSpec, Scenario};

/// Ticks a VU pauses between requests when the scenario does not say.
pub const DEFAULT_THINK_TIME_TICKS: u64 = 10;

/// Mutable per-VU execution state, owned by the executor.
#[derive(Debug, Clone, Default)]
pub struct VuContext {
    pub request_count: u64,
    pub last_request_tick: u64,
    pub current_request_index: Option<usize>,
}

/// Weighted request selection: draw `u` uniformly over the total weight
/// and take the first request whose accumulated weight exceeds it. With
/// equal weights this reduces to a uniform pick.
pub fn select_request(rng: &mut Rng, requests: &[RequestSpec], total_weight: f64) -> usize {
    debug_assert!(!requests.is_empty());
    let u = rng.next_float() * total_weight;
    let mut accumulated = 0.0;
    for (index, request) in requests.iter().enumerate() {
        accumulated += request.weight as f64;
        if accumulated > u {
            return index;
        }
    }
    requests.len() - 1
}

/// Materialize a scenario request for a VU. Header order follows the
/// scenario's sorted map so serialized bytes are stable.
pub fn build_request(spec: &RequestSpec, vu_id: u32) -> Request {
    Request {
        method: spec.method,
        path: spec.path.clone(),
        headers: spec
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        body: spec.body.as_ref().map(|b| b.clone().into_bytes()),
        timeout_ticks: timeout_ticks(spec.timeout_ms),
        vu_id,
    }
}

/// Milliseconds to ticks at 100 ticks/s, never rounding to zero.
pub fn timeout_ticks(ms: u64) -> u64 {
    (ms / 10).max(1)
}

/// The scenario's think time in ticks.
pub fn think_time_ticks(scenario: &Scenario) -> u64 {
    scenario
        .runtime
        .think_time_ms
        .map(|ms| (ms / 10).max(1))
        .unwrap_or(DEFAULT_THINK_TIME_TICKS)
}
