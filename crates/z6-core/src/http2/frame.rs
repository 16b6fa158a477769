//! HTTP/2 frame codec (RFC 7540 §4, §6).
//!
//! A frame is a 9-byte header — `length:24, type:8, flags:8,
//! R:1 stream_id:31` — followed by `length` payload bytes. All integers
//! are big-endian on the wire. Decoding is iterative and bounded; every
//! per-type rule violation maps to [`Http2Error::ProtocolError`] or
//! [`Http2Error::FlowControlError`].

use crate::error::Http2Error;

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;
/// Largest payload the protocol can express.
pub const MAX_FRAME_SIZE: usize = (1 << 24) - 1;
/// Default SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16_384;
/// Client connection preface.
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// Frame type codes.
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// Frame flag bits.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Error codes carried by RST_STREAM and GOAWAY.
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
}

/// SETTINGS parameter identifiers.
pub mod settings {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A decoded frame. Padding and priority fields are stripped during
/// decoding; only the semantic content remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
    },
    Headers {
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        params: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        fragment: Vec<u8>,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    Goaway {
        last_stream_id: u32,
        error_code: u32,
        debug_data: Vec<u8>,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
    /// A frame type this implementation does not know; receivers ignore it.
    Unknown {
        frame_type: u8,
        stream_id: u32,
    },
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame, and
/// `Ok(Some((frame, consumed)))` otherwise.
pub fn parse_frame(
    buf: &[u8],
    max_frame_size: usize,
) -> Result<Option<(Frame, usize)>, Http2Error> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let length = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
    if length > max_frame_size.min(MAX_FRAME_SIZE) {
        return Err(Http2Error::FrameTooLarge);
    }
    let ty = buf[3];
    let frame_flags = buf[4];
    let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & STREAM_ID_MASK;

    let total = FRAME_HEADER_LEN + length;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = &buf[FRAME_HEADER_LEN..total];

    let frame = match ty {
        frame_type::DATA => {
            if stream_id == 0 {
                return Err(Http2Error::ProtocolError);
            }
            let data = strip_padding(payload, frame_flags)?;
            Frame::Data {
                stream_id,
                data: data.to_vec(),
                end_stream: frame_flags & flags::END_STREAM != 0,
            }
        }
        frame_type::HEADERS => {
            if stream_id == 0 {
                return Err(Http2Error::ProtocolError);
            }
            let unpadded = strip_padding(payload, frame_flags)?;
            let fragment = if frame_flags & flags::PRIORITY != 0 {
                // Exclusive bit + stream dependency (4) + weight (1).
                if unpadded.len() < 5 {
                    return Err(Http2Error::ProtocolError);
                }
                &unpadded[5..]
            } else {
                unpadded
            };
            Frame::Headers {
                stream_id,
                fragment: fragment.to_vec(),
                end_stream: frame_flags & flags::END_STREAM != 0,
                end_headers: frame_flags & flags::END_HEADERS != 0,
            }
        }
        frame_type::PRIORITY => {
            if stream_id == 0 || payload.len() > 5 {
                return Err(Http2Error::ProtocolError);
            }
            if payload.len() < 5 {
                return Err(Http2Error::FrameTooShort);
            }
            Frame::Priority { stream_id }
        }
        frame_type::RST_STREAM => {
            if stream_id == 0 || payload.len() > 4 {
                return Err(Http2Error::ProtocolError);
            }
            if payload.len() < 4 {
                return Err(Http2Error::FrameTooShort);
            }
            Frame::RstStream {
                stream_id,
                error_code: u32::from_be_bytes(payload.try_into().unwrap()),
            }
        }
        frame_type::SETTINGS => {
            if stream_id != 0 {
                return Err(Http2Error::ProtocolError);
            }
            let ack = frame_flags & flags::ACK != 0;
            if ack {
                if !payload.is_empty() {
                    return Err(Http2Error::ProtocolError);
                }
                Frame::Settings {
                    ack: true,
                    params: Vec::new(),
                }
            } else {
                if payload.len() % 6 != 0 {
                    return Err(Http2Error::ProtocolError);
                }
                let params = payload
                    .chunks_exact(6)
                    .map(|c| {
                        (
                            u16::from_be_bytes([c[0], c[1]]),
                            u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
                        )
                    })
                    .collect();
                Frame::Settings { ack: false, params }
            }
        }
        frame_type::PUSH_PROMISE => {
            if stream_id == 0 {
                return Err(Http2Error::ProtocolError);
            }
            let unpadded = strip_padding(payload, frame_flags)?;
            if unpadded.len() < 4 {
                return Err(Http2Error::ProtocolError);
            }
            let promised_stream_id =
                u32::from_be_bytes(unpadded[..4].try_into().unwrap()) & STREAM_ID_MASK;
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment: unpadded[4..].to_vec(),
            }
        }
        frame_type::PING => {
            if stream_id != 0 || payload.len() > 8 {
                return Err(Http2Error::ProtocolError);
            }
            if payload.len() < 8 {
                return Err(Http2Error::FrameTooShort);
            }
            Frame::Ping {
                ack: frame_flags & flags::ACK != 0,
                data: payload.try_into().unwrap(),
            }
        }
        frame_type::GOAWAY => {
            if stream_id != 0 {
                return Err(Http2Error::ProtocolError);
            }
            if payload.len() < 8 {
                return Err(Http2Error::FrameTooShort);
            }
            Frame::Goaway {
                last_stream_id: u32::from_be_bytes(payload[..4].try_into().unwrap())
                    & STREAM_ID_MASK,
                error_code: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
                debug_data: payload[8..].to_vec(),
            }
        }
        frame_type::WINDOW_UPDATE => {
            if payload.len() > 4 {
                return Err(Http2Error::ProtocolError);
            }
            if payload.len() < 4 {
                return Err(Http2Error::FrameTooShort);
            }
            let increment = u32::from_be_bytes(payload.try_into().unwrap()) & STREAM_ID_MASK;
            if increment == 0 {
                return Err(Http2Error::FlowControlError);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            }
        }
        frame_type::CONTINUATION => {
            if stream_id == 0 {
                return Err(Http2Error::ProtocolError);
            }
            Frame::Continuation {
                stream_id,
                fragment: payload.to_vec(),
                end_headers: frame_flags & flags::END_HEADERS != 0,
            }
        }
        other => Frame::Unknown {
            frame_type: other,
            stream_id,
        },
    };

    Ok(Some((frame, total)))
}

/// Remove the pad-length prefix and trailing padding when PADDED is set.
fn strip_padding(payload: &[u8], frame_flags: u8) -> Result<&[u8], Http2Error> {
    if frame_flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Http2Error::ProtocolError);
    }
    let pad_len = payload[0] as usize;
    let rest = &payload[1..];
    if pad_len > rest.len() {
        return Err(Http2Error::ProtocolError);
    }
    Ok(&rest[..rest.len() - pad_len])
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

impl Frame {
    /// Serialise this frame, appending to `out`. Encoded frames never
    /// carry padding or priority fields.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Data {
                stream_id,
                data,
                end_stream,
            } => {
                let f = if *end_stream { flags::END_STREAM } else { 0 };
                write_header(out, data.len(), frame_type::DATA, f, *stream_id);
                out.extend_from_slice(data);
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
            } => {
                let mut f = 0;
                if *end_stream {
                    f |= flags::END_STREAM;
                }
                if *end_headers {
                    f |= flags::END_HEADERS;
                }
                write_header(out, fragment.len(), frame_type::HEADERS, f, *stream_id);
                out.extend_from_slice(fragment);
            }
            Frame::Priority { stream_id } => {
                write_header(out, 5, frame_type::PRIORITY, 0, *stream_id);
                out.extend_from_slice(&[0, 0, 0, 0, 16]);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                write_header(out, 4, frame_type::RST_STREAM, 0, *stream_id);
                out.extend_from_slice(&error_code.to_be_bytes());
            }
            Frame::Settings { ack, params } => {
                let f = if *ack { flags::ACK } else { 0 };
                write_header(out, params.len() * 6, frame_type::SETTINGS, f, 0);
                for (id, value) in params {
                    out.extend_from_slice(&id.to_be_bytes());
                    out.extend_from_slice(&value.to_be_bytes());
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
            } => {
                write_header(
                    out,
                    4 + fragment.len(),
                    frame_type::PUSH_PROMISE,
                    flags::END_HEADERS,
                    *stream_id,
                );
                out.extend_from_slice(&(promised_stream_id & STREAM_ID_MASK).to_be_bytes());
                out.extend_from_slice(fragment);
            }
            Frame::Ping { ack, data } => {
                let f = if *ack { flags::ACK } else { 0 };
                write_header(out, 8, frame_type::PING, f, 0);
                out.extend_from_slice(data);
            }
            Frame::Goaway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                write_header(out, 8 + debug_data.len(), frame_type::GOAWAY, 0, 0);
                out.extend_from_slice(&(last_stream_id & STREAM_ID_MASK).to_be_bytes());
                out.extend_from_slice(&error_code.to_be_bytes());
                out.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                write_header(out, 4, frame_type::WINDOW_UPDATE, 0, *stream_id);
                out.extend_from_slice(&(increment & STREAM_ID_MASK).to_be_bytes());
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                write_header(out, fragment.len(), frame_type::CONTINUATION, f, *stream_id);
                out.extend_from_slice(fragment);
            }
            Frame::Unknown { .. } => {}
        }
    }
}

fn write_header(out: &mut Vec<u8>, length: usize, ty: u8, frame_flags: u8, stream_id: u32) {
    debug_assert!(length <= MAX_FRAME_SIZE);
    out.push((length >> 16) as u8);
    out.push((length >> 8) as u8);
    out.push(length as u8);
    out.push(ty);
    out.push(frame_flags);
    out.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
}
