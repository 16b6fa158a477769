//! The scenario value type.
//!
//! Scenarios arrive from the external TOML parser already deserialized;
//! the core consumes them read-only. Header maps are `BTreeMap` rather
//! than `HashMap`: map iteration order feeds the serialized request
//! bytes, and a randomized order would break byte-identical logs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// HttpMethod
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// Compact code used in event payloads. Zero is reserved for
    /// "other/unknown" so decoders can bucket unrecognised codes.
    pub fn code(self) -> u8 {
        match self {
            HttpMethod::Get => 1,
            HttpMethod::Post => 2,
            HttpMethod::Put => 3,
            HttpMethod::Delete => 4,
            HttpMethod::Patch => 5,
            HttpMethod::Head => 6,
            HttpMethod::Options => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => HttpMethod::Get,
            2 => HttpMethod::Post,
            3 => HttpMethod::Put,
            4 => HttpMethod::Delete,
            5 => HttpMethod::Patch,
            6 => HttpMethod::Head,
            7 => HttpMethod::Options,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HttpVersion / ScheduleKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpVersion {
    H1_1,
    H2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// All VUs spawn at the start of the run.
    #[default]
    Constant,
    /// Spawns spread evenly over the first half of the run.
    Ramp,
    /// Half the VUs at the start, the rest at the midpoint.
    Spike,
    /// Four equal batches at 0, 1/4, 1/2, and 3/4 of the run.
    Steps,
}

// ---------------------------------------------------------------------------
// Scenario sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    pub duration_seconds: u64,
    /// Number of virtual users, `1..=10_000`.
    pub vus: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prng_seed: Option<u64>,
    /// Pause between a VU's requests; default 100 ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    pub http_version: HttpVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequestSpec {
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Schedule {
    #[serde(default)]
    pub kind: ScheduleKind,
    #[serde(default)]
    pub vus: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Assertions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate_min: Option<f64>,
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Scenario {
    pub runtime: RuntimeConfig,
    pub target: TargetConfig,
    pub requests: Vec<RequestSpec>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub assertions: Assertions,
}

impl Scenario {
    /// Sum of request weights; validation guarantees this is positive.
    pub fn total_weight(&self) -> f64 {
        self.requests.iter().map(|r| r.weight as f64).sum()
    }

    /// SHA-256 over the canonical JSON form, stored in log file headers
    /// so a log can be matched back to the scenario that produced it.
    pub fn hash(&self) -> [u8; 32] {
        let json = serde_json::to_vec(self).unwrap_or_default();
        Sha256::digest(json).into()
    }
}
