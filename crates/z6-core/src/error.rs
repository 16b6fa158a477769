use serde::Serialize;

// ---------------------------------------------------------------------------
// ErrorClass — the seven-way taxonomy used by events and metrics
// ---------------------------------------------------------------------------

/// Coarse classification of a failure, matching the seven error counters in
/// the metrics output and the `error_*` event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Dns,
    Tcp,
    Tls,
    Http,
    Timeout,
    Protocol,
    Resource,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Dns => "dns",
            ErrorClass::Tcp => "tcp",
            ErrorClass::Tls => "tls",
            ErrorClass::Http => "http",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Resource => "resource",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("DNS resolution failed")]
    Dns,

    #[error("TCP connection failed")]
    Tcp,

    #[error("TLS is not supported by this transport")]
    Tls,

    #[error("request timed out")]
    Timeout,

    #[error("connection reset by peer")]
    ConnectionReset,
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Dns => ErrorClass::Dns,
            TransportError::Tcp | TransportError::ConnectionReset => ErrorClass::Tcp,
            TransportError::Tls => ErrorClass::Tls,
            TransportError::Timeout => ErrorClass::Timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP/1.1 parse errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid status line")]
    InvalidStatusLine,

    #[error("invalid header")]
    InvalidHeader,

    #[error("too many headers")]
    TooManyHeaders,

    #[error("header exceeds size limit")]
    HeaderTooLarge,

    #[error("body exceeds size limit")]
    BodyTooLarge,

    #[error("invalid chunk size")]
    InvalidChunkSize,

    #[error("malformed chunked body")]
    MalformedChunkedBody,

    #[error("incomplete response")]
    IncompleteResponse,

    #[error("unsupported transfer encoding")]
    UnsupportedTransferEncoding,
}

// ---------------------------------------------------------------------------
// HTTP/2 errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Http2Error {
    #[error("frame too short")]
    FrameTooShort,

    #[error("frame exceeds maximum size")]
    FrameTooLarge,

    #[error("invalid frame type")]
    InvalidFrameType,

    #[error("protocol error")]
    ProtocolError,

    #[error("flow control error")]
    FlowControlError,

    #[error("concurrent stream limit exceeded")]
    StreamLimitExceeded,

    #[error("stream reset by peer")]
    StreamReset,
}

// ---------------------------------------------------------------------------
// HPACK errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    #[error("output buffer too small")]
    BufferTooSmall,

    #[error("invalid header table index")]
    InvalidIndex,

    #[error("invalid HPACK encoding")]
    InvalidEncoding,
}

// ---------------------------------------------------------------------------
// Scheduler errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("virtual user limit reached")]
    TooManyVus,

    #[error("invalid state transition")]
    InvalidTransition,

    #[error("unknown virtual user")]
    UnknownVu,
}

// ---------------------------------------------------------------------------
// Event log errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("event log is full")]
    Full,
}

/// Integrity failures raised while reading an event log file. Any of these
/// aborts replay; partial metrics are never produced from a damaged log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LogFileError {
    #[error("bad magic number")]
    BadMagic,

    #[error("unsupported log version")]
    UnsupportedVersion,

    #[error("log file truncated")]
    Truncated,

    #[error("record {index} failed checksum validation")]
    RecordChecksum { index: u64 },

    #[error("footer event count does not match records read")]
    CountMismatch,

    #[error("log checksum mismatch")]
    LogChecksumMismatch,
}

// ---------------------------------------------------------------------------
// Scenario errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioError {
    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("scenario file too large")]
    FileTooLarge,

    #[error("too many requests in scenario")]
    TooManyRequests,
}

// ---------------------------------------------------------------------------
// Z6Error — top-level error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum Z6Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP/1.1 parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("HTTP/2 error: {0}")]
    Http2(#[from] Http2Error),

    #[error("HPACK error: {0}")]
    Hpack(#[from] HpackError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("event log error: {0}")]
    Log(#[from] LogError),

    #[error("log file error: {0}")]
    LogFile(#[from] LogFileError),

    #[error("scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("connection pool exhausted")]
    ConnectionPoolExhausted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Z6Error {
    /// Map this error onto the seven-way class used by events and metrics.
    pub fn class(&self) -> ErrorClass {
        match self {
            Z6Error::Transport(e) => e.class(),
            Z6Error::Parse(_) => ErrorClass::Http,
            Z6Error::Http2(Http2Error::StreamLimitExceeded) => ErrorClass::Resource,
            Z6Error::Http2(_) => ErrorClass::Protocol,
            Z6Error::Hpack(_) => ErrorClass::Protocol,
            Z6Error::Scheduler(_) => ErrorClass::Resource,
            Z6Error::Log(_) => ErrorClass::Resource,
            Z6Error::LogFile(_) => ErrorClass::Resource,
            Z6Error::Scenario(_) => ErrorClass::Resource,
            Z6Error::ConnectionPoolExhausted => ErrorClass::Resource,
            Z6Error::Io(_) => ErrorClass::Tcp,
            Z6Error::Serde(_) => ErrorClass::Resource,
        }
    }
}

impl Serialize for Z6Error {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = Z6Error::from(ParseError::InvalidStatusLine);
        assert_eq!(err.to_string(), "HTTP/1.1 parse error: invalid status line");
    }

    #[test]
    fn transport_error_display() {
        let err = Z6Error::from(TransportError::ConnectionReset);
        assert_eq!(err.to_string(), "transport error: connection reset by peer");
    }

    #[test]
    fn scenario_error_display() {
        let err = Z6Error::from(ScenarioError::InvalidValue("vus must be >= 1".to_string()));
        assert_eq!(err.to_string(), "scenario error: invalid value: vus must be >= 1");
    }

    #[test]
    fn log_file_record_checksum_display() {
        let err = LogFileError::RecordChecksum { index: 7 };
        assert_eq!(err.to_string(), "record 7 failed checksum validation");
    }

    #[test]
    fn transport_classes() {
        assert_eq!(TransportError::Dns.class(), ErrorClass::Dns);
        assert_eq!(TransportError::Tcp.class(), ErrorClass::Tcp);
        assert_eq!(TransportError::Tls.class(), ErrorClass::Tls);
        assert_eq!(TransportError::Timeout.class(), ErrorClass::Timeout);
        assert_eq!(TransportError::ConnectionReset.class(), ErrorClass::Tcp);
    }

    #[test]
    fn parse_errors_class_as_http() {
        assert_eq!(Z6Error::from(ParseError::BodyTooLarge).class(), ErrorClass::Http);
        assert_eq!(
            Z6Error::from(ParseError::MalformedChunkedBody).class(),
            ErrorClass::Http
        );
    }

    #[test]
    fn http2_errors_class_as_protocol_except_stream_limit() {
        assert_eq!(
            Z6Error::from(Http2Error::ProtocolError).class(),
            ErrorClass::Protocol
        );
        assert_eq!(
            Z6Error::from(Http2Error::StreamLimitExceeded).class(),
            ErrorClass::Resource
        );
    }

    #[test]
    fn pool_exhausted_classes_as_resource() {
        assert_eq!(Z6Error::ConnectionPoolExhausted.class(), ErrorClass::Resource);
    }

    #[test]
    fn serialize_produces_string() {
        let err = Z6Error::from(LogError::Full);
        let json = serde_json::to_string(&err).expect("serialize should succeed");
        assert_eq!(json, "\"event log error: event log is full\"");
    }

    #[test]
    fn error_class_display() {
        assert_eq!(ErrorClass::Dns.to_string(), "dns");
        assert_eq!(ErrorClass::Protocol.to_string(), "protocol");
        assert_eq!(ErrorClass::Resource.to_string(), "resource");
    }

    #[test]
    fn io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Z6Error = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }
}
