use crate::scenario::model::HttpMethod;

/// Identifies one issued request for its whole lifetime.
pub type RequestId = u64;

/// Index of a connection in its engine's pool.
pub type ConnectionId = u32;

/// HTTP/2 stream identifier (31-bit, client streams odd).
pub type StreamId = u32;

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// A `(host, port)` pair a connection is opened to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One request handed from the VU engine to a protocol engine.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: HttpMethod,
    pub path: String,
    /// User headers in scenario order. `Host`/`:authority` and
    /// `Content-Length` are synthesized by the engines.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Per-request timeout in logical ticks.
    pub timeout_ticks: u64,
    /// The VU this request belongs to.
    pub vu_id: u32,
}
