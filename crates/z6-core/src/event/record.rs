//! Fixed-size event records.
//!
//! Every externally observable action in a run becomes one immutable
//! 272-byte [`Event`]: a 24-byte header, a 240-byte type-specific payload,
//! and an 8-byte CRC-64 over everything before it. Fixed records keep the
//! log file seekable and make byte-for-byte comparison between runs
//! trivial.
//!
//! All multibyte fields are serialised little-endian so a log written on
//! one host replays identically on another.

use crc::{Crc, CRC_64_XZ};

/// Total serialised size of one event.
pub const EVENT_SIZE: usize = 272;
/// Header bytes: tick (8) + vu_id (4) + event_type (2) + pad (2) + reserved (8).
pub const HEADER_SIZE: usize = 24;
/// Payload bytes following the header.
pub const PAYLOAD_SIZE: usize = 240;
/// Offset of the trailing CRC.
pub const CHECKSUM_OFFSET: usize = HEADER_SIZE + PAYLOAD_SIZE;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Discriminant for the payload carried by an [`Event`].
///
/// Discriminant 0 is reserved and never written; [`EventType::from_u16`]
/// rejects it along with anything above the last variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventType {
    VuSpawned = 1,
    VuReady = 2,
    VuComplete = 3,
    RequestIssued = 4,
    RequestTimeout = 5,
    RequestCancelled = 6,
    ResponseReceived = 7,
    ResponseError = 8,
    ConnEstablished = 9,
    ConnClosed = 10,
    ConnError = 11,
    SchedulerTick = 12,
    AssertionPassed = 13,
    AssertionFailed = 14,
    ErrorDns = 15,
    ErrorTcp = 16,
    ErrorTls = 17,
    ErrorHttp = 18,
    ErrorTimeout = 19,
    ErrorProtocolViolation = 20,
    ErrorResourceExhausted = 21,
}

impl EventType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => EventType::VuSpawned,
            2 => EventType::VuReady,
            3 => EventType::VuComplete,
            4 => EventType::RequestIssued,
            5 => EventType::RequestTimeout,
            6 => EventType::RequestCancelled,
            7 => EventType::ResponseReceived,
            8 => EventType::ResponseError,
            9 => EventType::ConnEstablished,
            10 => EventType::ConnClosed,
            11 => EventType::ConnError,
            12 => EventType::SchedulerTick,
            13 => EventType::AssertionPassed,
            14 => EventType::AssertionFailed,
            15 => EventType::ErrorDns,
            16 => EventType::ErrorTcp,
            17 => EventType::ErrorTls,
            18 => EventType::ErrorHttp,
            19 => EventType::ErrorTimeout,
            20 => EventType::ErrorProtocolViolation,
            21 => EventType::ErrorResourceExhausted,
            _ => return None,
        })
    }

    /// The `error_*` event type for a given error class.
    pub fn for_error_class(class: crate::error::ErrorClass) -> Self {
        use crate::error::ErrorClass;
        match class {
            ErrorClass::Dns => EventType::ErrorDns,
            ErrorClass::Tcp => EventType::ErrorTcp,
            ErrorClass::Tls => EventType::ErrorTls,
            ErrorClass::Http => EventType::ErrorHttp,
            ErrorClass::Timeout => EventType::ErrorTimeout,
            ErrorClass::Protocol => EventType::ErrorProtocolViolation,
            ErrorClass::Resource => EventType::ErrorResourceExhausted,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One immutable record in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub tick: u64,
    pub vu_id: u32,
    pub event_type: EventType,
    pub payload: [u8; PAYLOAD_SIZE],
    /// CRC-64/XZ over the serialised header and payload (264 bytes).
    pub checksum: u64,
}

impl Event {
    /// Construct an event, computing its checksum.
    pub fn new(tick: u64, vu_id: u32, event_type: EventType, payload: [u8; PAYLOAD_SIZE]) -> Self {
        let mut e = Self {
            tick,
            vu_id,
            event_type,
            payload,
            checksum: 0,
        };
        e.checksum = e.compute_checksum();
        e
    }

    /// An event whose payload is all zeroes.
    pub fn empty(tick: u64, vu_id: u32, event_type: EventType) -> Self {
        Self::new(tick, vu_id, event_type, [0u8; PAYLOAD_SIZE])
    }

    fn compute_checksum(&self) -> u64 {
        let bytes = self.to_bytes();
        CRC64.checksum(&bytes[..CHECKSUM_OFFSET])
    }

    /// True iff the stored checksum matches the header + payload bytes.
    pub fn validate_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Serialise to the on-disk 272-byte representation.
    pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut buf = [0u8; EVENT_SIZE];
        buf[0..8].copy_from_slice(&self.tick.to_le_bytes());
        buf[8..12].copy_from_slice(&self.vu_id.to_le_bytes());
        buf[12..14].copy_from_slice(&(self.event_type as u16).to_le_bytes());
        // bytes 14..16 pad, 16..24 reserved: zero
        buf[HEADER_SIZE..CHECKSUM_OFFSET].copy_from_slice(&self.payload);
        buf[CHECKSUM_OFFSET..].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialise from a 272-byte record, validating the checksum.
    pub fn from_bytes(buf: &[u8; EVENT_SIZE]) -> Option<Self> {
        let tick = u64::from_le_bytes(buf[0..8].try_into().ok()?);
        let vu_id = u32::from_le_bytes(buf[8..12].try_into().ok()?);
        let type_raw = u16::from_le_bytes(buf[12..14].try_into().ok()?);
        let event_type = EventType::from_u16(type_raw)?;
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&buf[HEADER_SIZE..CHECKSUM_OFFSET]);
        let checksum = u64::from_le_bytes(buf[CHECKSUM_OFFSET..].try_into().ok()?);
        let event = Self {
            tick,
            vu_id,
            event_type,
            payload,
            checksum,
        };
        if !event.validate_checksum() {
            return None;
        }
        Some(event)
    }
}

// ---------------------------------------------------------------------------
// Payload codecs
// ---------------------------------------------------------------------------
//
// Payloads are encoded field-by-field, little-endian, into the fixed
// 240-byte area; unused bytes stay zero. Strings are length-prefixed and
// truncated to their field width.

fn put_u16(buf: &mut [u8], offset: usize, v: u16) {
    buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

fn put_f64(buf: &mut [u8], offset: usize, v: f64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

fn get_f64(buf: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

/// Payload for [`EventType::RequestIssued`].
///
/// Layout: request_id u64 @0, connection_id u32 @8, stream_id u32 @12,
/// timeout_ticks u64 @16, method u8 @24, http_version u8 @25,
/// path_len u16 @26, path bytes @28 (max 200).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIssuedPayload {
    pub request_id: u64,
    pub connection_id: u32,
    /// HTTP/2 stream id; zero for HTTP/1.1.
    pub stream_id: u32,
    pub timeout_ticks: u64,
    /// Method code, see [`crate::scenario::model::HttpMethod::code`].
    pub method: u8,
    /// 1 for HTTP/1.1, 2 for HTTP/2.
    pub http_version: u8,
    pub path: String,
}

impl RequestIssuedPayload {
    pub const MAX_PATH: usize = 200;

    pub fn encode(&self) -> [u8; PAYLOAD_SIZE] {
        let mut buf = [0u8; PAYLOAD_SIZE];
        put_u64(&mut buf, 0, self.request_id);
        put_u32(&mut buf, 8, self.connection_id);
        put_u32(&mut buf, 12, self.stream_id);
        put_u64(&mut buf, 16, self.timeout_ticks);
        buf[24] = self.method;
        buf[25] = self.http_version;
        let path = self.path.as_bytes();
        let len = path.len().min(Self::MAX_PATH);
        put_u16(&mut buf, 26, len as u16);
        buf[28..28 + len].copy_from_slice(&path[..len]);
        buf
    }

    pub fn decode(buf: &[u8; PAYLOAD_SIZE]) -> Self {
        let len = (get_u16(buf, 26) as usize).min(Self::MAX_PATH);
        let path = String::from_utf8_lossy(&buf[28..28 + len]).into_owned();
        Self {
            request_id: get_u64(buf, 0),
            connection_id: get_u32(buf, 8),
            stream_id: get_u32(buf, 12),
            timeout_ticks: get_u64(buf, 16),
            method: buf[24],
            http_version: buf[25],
            path,
        }
    }
}

/// Payload for [`EventType::ResponseReceived`].
///
/// Layout: request_id u64 @0, connection_id u32 @8, status_code u16 @12,
/// method u8 @14, latency_ticks u64 @16, body_len u64 @24.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseReceivedPayload {
    pub request_id: u64,
    pub connection_id: u32,
    pub status_code: u16,
    pub method: u8,
    pub latency_ticks: u64,
    pub body_len: u64,
}

impl ResponseReceivedPayload {
    pub fn encode(&self) -> [u8; PAYLOAD_SIZE] {
        let mut buf = [0u8; PAYLOAD_SIZE];
        put_u64(&mut buf, 0, self.request_id);
        put_u32(&mut buf, 8, self.connection_id);
        put_u16(&mut buf, 12, self.status_code);
        buf[14] = self.method;
        put_u64(&mut buf, 16, self.latency_ticks);
        put_u64(&mut buf, 24, self.body_len);
        buf
    }

    pub fn decode(buf: &[u8; PAYLOAD_SIZE]) -> Self {
        Self {
            request_id: get_u64(buf, 0),
            connection_id: get_u32(buf, 8),
            status_code: get_u16(buf, 12),
            method: buf[14],
            latency_ticks: get_u64(buf, 16),
            body_len: get_u64(buf, 24),
        }
    }
}

/// Payload for [`EventType::ConnEstablished`].
///
/// Layout: connection_id u32 @0, port u16 @4, protocol u8 @6,
/// connect_ticks u64 @8, host_len u16 @16, host bytes @18 (max 128).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnEstablishedPayload {
    pub connection_id: u32,
    pub port: u16,
    /// 1 for HTTP/1.1, 2 for HTTP/2.
    pub protocol: u8,
    pub connect_ticks: u64,
    pub host: String,
}

impl ConnEstablishedPayload {
    pub const MAX_HOST: usize = 128;

    pub fn encode(&self) -> [u8; PAYLOAD_SIZE] {
        let mut buf = [0u8; PAYLOAD_SIZE];
        put_u32(&mut buf, 0, self.connection_id);
        put_u16(&mut buf, 4, self.port);
        buf[6] = self.protocol;
        put_u64(&mut buf, 8, self.connect_ticks);
        let host = self.host.as_bytes();
        let len = host.len().min(Self::MAX_HOST);
        put_u16(&mut buf, 16, len as u16);
        buf[18..18 + len].copy_from_slice(&host[..len]);
        buf
    }

    pub fn decode(buf: &[u8; PAYLOAD_SIZE]) -> Self {
        let len = (get_u16(buf, 16) as usize).min(Self::MAX_HOST);
        let host = String::from_utf8_lossy(&buf[18..18 + len]).into_owned();
        Self {
            connection_id: get_u32(buf, 0),
            port: get_u16(buf, 4),
            protocol: buf[6],
            connect_ticks: get_u64(buf, 8),
            host,
        }
    }
}

/// Payload shared by error, timeout, cancellation, and connection-failure
/// events.
///
/// Layout: request_id u64 @0, connection_id u32 @8, detail u32 @12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Related request, or zero when the error is connection-scoped.
    pub request_id: u64,
    pub connection_id: u32,
    /// Implementation-defined detail code (e.g. an HTTP/2 error code).
    pub detail: u32,
}

impl ErrorPayload {
    pub fn encode(&self) -> [u8; PAYLOAD_SIZE] {
        let mut buf = [0u8; PAYLOAD_SIZE];
        put_u64(&mut buf, 0, self.request_id);
        put_u32(&mut buf, 8, self.connection_id);
        put_u32(&mut buf, 12, self.detail);
        buf
    }

    pub fn decode(buf: &[u8; PAYLOAD_SIZE]) -> Self {
        Self {
            request_id: get_u64(buf, 0),
            connection_id: get_u32(buf, 8),
            detail: get_u32(buf, 12),
        }
    }
}

/// Payload for [`EventType::SchedulerTick`]: active_vus u32 @0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTickPayload {
    pub active_vus: u32,
}

impl SchedulerTickPayload {
    pub fn encode(&self) -> [u8; PAYLOAD_SIZE] {
        let mut buf = [0u8; PAYLOAD_SIZE];
        put_u32(&mut buf, 0, self.active_vus);
        buf
    }

    pub fn decode(buf: &[u8; PAYLOAD_SIZE]) -> Self {
        Self {
            active_vus: get_u32(buf, 0),
        }
    }
}

/// Payload for assertion events.
///
/// Layout: kind u8 @0, measured f64 @8, threshold f64 @16.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssertionPayload {
    /// 0 = p99 latency, 1 = error rate, 2 = success rate.
    pub kind: u8,
    pub measured: f64,
    pub threshold: f64,
}

impl AssertionPayload {
    pub fn encode(&self) -> [u8; PAYLOAD_SIZE] {
        let mut buf = [0u8; PAYLOAD_SIZE];
        buf[0] = self.kind;
        put_f64(&mut buf, 8, self.measured);
        put_f64(&mut buf, 16, self.threshold);
        buf
    }

    pub fn decode(buf: &[u8; PAYLOAD_SIZE]) -> Self {
        Self {
            kind: buf[0],
            measured: get_f64(buf, 8),
            threshold: get_f64(buf, 16),
        }
    }
}
