//! HTTP/2 protocol engine.
//!
//! Each connection performs the preface + SETTINGS handshake, then
//! multiplexes up to [`MAX_CONCURRENT_STREAMS`] request streams. Client
//! stream ids are odd, starting at 1. Flow-control windows are tracked
//! at both connection and stream level; received DATA is acknowledged
//! with stream WINDOW_UPDATEs. Server push is refused.

use crate::error::{ErrorClass, Http2Error, TransportError, Z6Error};
use crate::event::record::{
    ConnEstablishedPayload, ErrorPayload, Event, EventType, RequestIssuedPayload,
    ResponseReceivedPayload,
};
use crate::event::EventLog;
use crate::http::engine::{Completion, CompletionResult, ProtocolEngine};
use crate::http::request::{ConnectionId, Request, RequestId, StreamId, Target};
use crate::http::response::Response;
use crate::http2::frame::{
    self, error_code, parse_frame, Frame, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE,
};
use crate::http2::hpack;
use crate::pool::SlotPool;
use crate::scenario::model::HttpMethod;
use crate::transport::{Connector, ReadOutcome, Transport};

/// Streams allowed per connection.
pub const MAX_CONCURRENT_STREAMS: usize = 10;
/// Per-connection read buffer bound.
pub const READ_BUF_CAP: usize = 64 * 1024;
/// Per-stream response body bound.
pub const STREAM_BODY_CAP: usize = 16 * 1024;
/// Connection pool capacity (shared bound with HTTP/1.1).
pub const MAX_CONNECTIONS: usize = 10_000;

const INITIAL_WINDOW: i64 = 65_535;
const READ_CHUNK: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// RFC 7540 §5.1 stream states (the subset a push-refusing client sees).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

struct Stream {
    id: StreamId,
    state: StreamState,
    request_id: RequestId,
    vu_id: u32,
    method: HttpMethod,
    sent_at_tick: u64,
    timeout_ticks: u64,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    send_window: i64,
}

#[derive(Debug, Clone, Copy)]
struct PeerSettings {
    max_frame_size: usize,
    initial_window_size: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            initial_window_size: INITIAL_WINDOW as u32,
        }
    }
}

/// A header block split across HEADERS + CONTINUATION frames.
struct PendingHeaderBlock {
    stream_id: StreamId,
    fragment: Vec<u8>,
    end_stream: bool,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    PrefaceSent,
    SettingsSent,
    Active,
    Closing,
    Closed,
}

struct H2Connection {
    state: ConnState,
    target: Target,
    transport: Option<Box<dyn Transport>>,
    next_stream_id: StreamId,
    streams: Vec<Stream>,
    read_buf: Vec<u8>,
    send_window: i64,
    peer_settings: PeerSettings,
    pending_headers: Option<PendingHeaderBlock>,
}

impl H2Connection {
    fn stream_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.iter_mut().find(|s| s.id == id)
    }

    fn open_stream_count(&self) -> usize {
        self.streams
            .iter()
            .filter(|s| s.state != StreamState::Closed)
            .count()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::ConnectionReset)?;
        match transport.write(bytes) {
            Ok(n) if n == bytes.len() => Ok(()),
            Ok(_) => Err(TransportError::Tcp),
            Err(e) => Err(e),
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let mut bytes = Vec::new();
        frame.encode(&mut bytes);
        self.write(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Http2Engine {
    connections: SlotPool<H2Connection>,
    connector: Box<dyn Connector>,
    next_request_id: RequestId,
}

impl Http2Engine {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self::with_capacity(connector, MAX_CONNECTIONS)
    }

    pub fn with_capacity(connector: Box<dyn Connector>, capacity: usize) -> Self {
        Self {
            connections: SlotPool::new(capacity.min(MAX_CONNECTIONS)),
            connector,
            next_request_id: 1,
        }
    }

    /// Our half of the handshake: SETTINGS advertised after the preface.
    fn client_settings() -> Frame {
        Frame::Settings {
            ack: false,
            params: vec![
                (frame::settings::ENABLE_PUSH, 0),
                (
                    frame::settings::MAX_CONCURRENT_STREAMS,
                    MAX_CONCURRENT_STREAMS as u32,
                ),
                (frame::settings::INITIAL_WINDOW_SIZE, INITIAL_WINDOW as u32),
            ],
        }
    }

    fn fail_stream(
        conn_id: ConnectionId,
        stream: &mut Stream,
        class: ErrorClass,
        event_type: EventType,
        detail: u32,
        tick: u64,
        log: &mut EventLog,
        completions: &mut Vec<Completion>,
    ) {
        let payload = ErrorPayload {
            request_id: stream.request_id,
            connection_id: conn_id,
            detail,
        };
        let _ = log.append(Event::new(tick, stream.vu_id, event_type, payload.encode()));
        let _ = log.append(Event::new(
            tick,
            stream.vu_id,
            EventType::for_error_class(class),
            payload.encode(),
        ));
        completions.push(Completion {
            request_id: stream.request_id,
            vu_id: stream.vu_id,
            issued_tick: stream.sent_at_tick,
            completed_tick: tick,
            result: CompletionResult::Error(class),
        });
        stream.state = StreamState::Closed;
    }

    /// Finish a stream whose END_STREAM arrived: publish the response.
    fn complete_stream(
        conn_id: ConnectionId,
        stream: &mut Stream,
        tick: u64,
        log: &mut EventLog,
        completions: &mut Vec<Completion>,
    ) {
        let Some(status_code) = stream.status else {
            // END_STREAM without :status is a malformed response.
            Self::fail_stream(
                conn_id,
                stream,
                ErrorClass::Protocol,
                EventType::ResponseError,
                error_code::PROTOCOL_ERROR,
                tick,
                log,
                completions,
            );
            return;
        };
        let response = Response {
            status_code,
            headers: std::mem::take(&mut stream.headers),
            body: std::mem::take(&mut stream.body),
        };
        let payload = ResponseReceivedPayload {
            request_id: stream.request_id,
            connection_id: conn_id,
            status_code,
            method: stream.method.code(),
            latency_ticks: tick - stream.sent_at_tick,
            body_len: response.body.len() as u64,
        };
        let _ = log.append(Event::new(
            tick,
            stream.vu_id,
            EventType::ResponseReceived,
            payload.encode(),
        ));
        completions.push(Completion {
            request_id: stream.request_id,
            vu_id: stream.vu_id,
            issued_tick: stream.sent_at_tick,
            completed_tick: tick,
            result: CompletionResult::Response(response),
        });
        stream.state = StreamState::Closed;
    }

    /// Fail every live stream on the connection and mark it closing.
    fn fail_connection(
        &mut self,
        conn_id: ConnectionId,
        class: ErrorClass,
        detail: u32,
        tick: u64,
        log: &mut EventLog,
        completions: &mut Vec<Completion>,
    ) {
        let Some(conn) = self.connections.get_mut(conn_id as usize) else {
            return;
        };
        let _ = log.append(Event::new(
            tick,
            0,
            EventType::ConnError,
            ErrorPayload {
                request_id: 0,
                connection_id: conn_id,
                detail,
            }
            .encode(),
        ));
        for stream in conn.streams.iter_mut() {
            if stream.state != StreamState::Closed {
                Self::fail_stream(
                    conn_id,
                    stream,
                    class,
                    EventType::ResponseError,
                    detail,
                    tick,
                    log,
                    completions,
                );
            }
        }
        conn.state = ConnState::Closing;
    }

    /// Apply one frame to a connection. Returns a connection-level error
    /// when the peer violated the protocol.
    #[allow(clippy::too_many_lines)]
    fn dispatch_frame(
        &mut self,
        conn_id: ConnectionId,
        frame: Frame,
        tick: u64,
        log: &mut EventLog,
        completions: &mut Vec<Completion>,
    ) -> Result<(), Http2Error> {
        let conn = self
            .connections
            .get_mut(conn_id as usize)
            .ok_or(Http2Error::ProtocolError)?;

        match frame {
            Frame::Settings { ack: false, params } => {
                for (id, value) in params {
                    match id {
                        frame::settings::INITIAL_WINDOW_SIZE => {
                            if value > 0x7FFF_FFFF {
                                return Err(Http2Error::FlowControlError);
                            }
                            let delta =
                                value as i64 - conn.peer_settings.initial_window_size as i64;
                            conn.peer_settings.initial_window_size = value;
                            for stream in conn.streams.iter_mut() {
                                if stream.state != StreamState::Closed {
                                    stream.send_window += delta;
                                }
                            }
                        }
                        frame::settings::MAX_FRAME_SIZE => {
                            let size = value as usize;
                            if !(DEFAULT_MAX_FRAME_SIZE..=frame::MAX_FRAME_SIZE).contains(&size) {
                                return Err(Http2Error::ProtocolError);
                            }
                            conn.peer_settings.max_frame_size = size;
                        }
                        _ => {}
                    }
                }
                conn.write_frame(&Frame::Settings {
                    ack: true,
                    params: Vec::new(),
                })
                .map_err(|_| Http2Error::ProtocolError)?;
            }
            Frame::Settings { ack: true, .. } => {
                if conn.state == ConnState::SettingsSent {
                    conn.state = ConnState::Active;
                    tracing::debug!(conn_id, "HTTP/2 handshake complete");
                }
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
            } => {
                if !end_headers {
                    conn.pending_headers = Some(PendingHeaderBlock {
                        stream_id,
                        fragment,
                        end_stream,
                    });
                } else {
                    Self::apply_header_block(
                        conn_id,
                        conn,
                        stream_id,
                        &fragment,
                        end_stream,
                        tick,
                        log,
                        completions,
                    )?;
                }
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let mut block = conn
                    .pending_headers
                    .take()
                    .ok_or(Http2Error::ProtocolError)?;
                if block.stream_id != stream_id {
                    return Err(Http2Error::ProtocolError);
                }
                block.fragment.extend_from_slice(&fragment);
                if end_headers {
                    Self::apply_header_block(
                        conn_id,
                        conn,
                        stream_id,
                        &block.fragment,
                        block.end_stream,
                        tick,
                        log,
                        completions,
                    )?;
                } else {
                    conn.pending_headers = Some(block);
                }
            }
            Frame::Data {
                stream_id,
                data,
                end_stream,
            } => {
                let Some(stream) = conn.stream_mut(stream_id) else {
                    // DATA for a stream we already reset; ignore.
                    return Ok(());
                };
                if stream.state == StreamState::Closed {
                    return Ok(());
                }
                // Body capped; excess bytes are dropped, not buffered.
                let room = STREAM_BODY_CAP.saturating_sub(stream.body.len());
                let take = data.len().min(room);
                stream.body.extend_from_slice(&data[..take]);
                let consumed = data.len() as u32;
                let ended = end_stream;
                if consumed > 0 && !ended {
                    conn.write_frame(&Frame::WindowUpdate {
                        stream_id,
                        increment: consumed,
                    })
                    .map_err(|_| Http2Error::ProtocolError)?;
                }
                if ended {
                    if let Some(stream) = conn.stream_mut(stream_id) {
                        Self::complete_stream(conn_id, stream, tick, log, completions);
                    }
                }
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                if stream_id == 0 {
                    conn.send_window += increment as i64;
                } else if let Some(stream) = conn.stream_mut(stream_id) {
                    stream.send_window += increment as i64;
                }
            }
            Frame::Ping { ack: false, data } => {
                conn.write_frame(&Frame::Ping { ack: true, data })
                    .map_err(|_| Http2Error::ProtocolError)?;
            }
            Frame::Ping { ack: true, .. } => {}
            Frame::Goaway { error_code, .. } => {
                self.fail_connection(conn_id, ErrorClass::Tcp, error_code, tick, log, completions);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                if let Some(stream) = conn.stream_mut(stream_id) {
                    if stream.state != StreamState::Closed {
                        Self::fail_stream(
                            conn_id,
                            stream,
                            ErrorClass::Protocol,
                            EventType::ResponseError,
                            error_code,
                            tick,
                            log,
                            completions,
                        );
                    }
                }
            }
            Frame::PushPromise {
                promised_stream_id, ..
            } => {
                // Push is disabled in our SETTINGS; refuse anything the
                // peer promises anyway.
                conn.write_frame(&Frame::RstStream {
                    stream_id: promised_stream_id,
                    error_code: error_code::CANCEL,
                })
                .map_err(|_| Http2Error::ProtocolError)?;
            }
            Frame::Priority { .. } | Frame::Unknown { .. } => {}
        }
        Ok(())
    }

    /// Decode a complete header block onto its stream.
    #[allow(clippy::too_many_arguments)]
    fn apply_header_block(
        conn_id: ConnectionId,
        conn: &mut H2Connection,
        stream_id: StreamId,
        fragment: &[u8],
        end_stream: bool,
        tick: u64,
        log: &mut EventLog,
        completions: &mut Vec<Completion>,
    ) -> Result<(), Http2Error> {
        let Some(stream) = conn.stream_mut(stream_id) else {
            return Ok(());
        };
        if stream.state == StreamState::Closed {
            return Ok(());
        }
        let decoded = match hpack::decode_block(fragment) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(conn_id, stream_id, %err, "HPACK decode failed");
                Self::fail_stream(
                    conn_id,
                    stream,
                    ErrorClass::Protocol,
                    EventType::ResponseError,
                    error_code::PROTOCOL_ERROR,
                    tick,
                    log,
                    completions,
                );
                return Ok(());
            }
        };
        for (name, value) in decoded {
            if name == ":status" {
                stream.status = value.parse().ok();
            } else if !name.starts_with(':') {
                stream.headers.push((name, value));
            }
        }
        if stream.state == StreamState::Open {
            stream.state = StreamState::HalfClosedRemote;
        }
        if end_stream {
            Self::complete_stream(conn_id, stream, tick, log, completions);
        }
        Ok(())
    }

    fn close_connection(&mut self, conn_id: ConnectionId, tick: u64, log: &mut EventLog) {
        if let Some(mut conn) = self.connections.release(conn_id as usize) {
            // Best-effort goodbye before dropping the transport.
            let _ = conn.write_frame(&Frame::Goaway {
                last_stream_id: conn.next_stream_id.saturating_sub(2),
                error_code: error_code::NO_ERROR,
                debug_data: Vec::new(),
            });
            if let Some(transport) = conn.transport.as_mut() {
                transport.close();
            }
            conn.state = ConnState::Closed;
            let _ = log.append(Event::new(
                tick,
                0,
                EventType::ConnClosed,
                ErrorPayload {
                    request_id: 0,
                    connection_id: conn_id,
                    detail: 0,
                }
                .encode(),
            ));
        }
    }
}

impl ProtocolEngine for Http2Engine {
    fn connect(
        &mut self,
        target: &Target,
        tick: u64,
        log: &mut EventLog,
    ) -> Result<ConnectionId, Z6Error> {
        // Reuse a handshaken (or handshaking) connection with stream room.
        let reusable = self.connections.iter().find_map(|(idx, conn)| {
            (matches!(conn.state, ConnState::SettingsSent | ConnState::Active)
                && conn.target == *target
                && conn.open_stream_count() < MAX_CONCURRENT_STREAMS)
                .then_some(idx)
        });
        if let Some(idx) = reusable {
            return Ok(idx as ConnectionId);
        }

        if self.connections.is_full() {
            return Err(Z6Error::ConnectionPoolExhausted);
        }

        let transport = self.connector.connect(target)?;
        let mut conn = H2Connection {
            state: ConnState::Connecting,
            target: target.clone(),
            transport: Some(transport),
            next_stream_id: 1,
            streams: Vec::new(),
            read_buf: Vec::new(),
            send_window: INITIAL_WINDOW,
            peer_settings: PeerSettings::default(),
            pending_headers: None,
        };
        conn.write(CONNECTION_PREFACE)
            .map_err(Z6Error::Transport)?;
        conn.state = ConnState::PrefaceSent;
        conn.write_frame(&Self::client_settings())
            .map_err(Z6Error::Transport)?;
        conn.state = ConnState::SettingsSent;

        let idx = self
            .connections
            .acquire(conn)
            .ok_or(Z6Error::ConnectionPoolExhausted)?;
        let payload = ConnEstablishedPayload {
            connection_id: idx as ConnectionId,
            port: target.port,
            protocol: 2,
            connect_ticks: 0,
            host: target.host.clone(),
        };
        log.append(Event::new(
            tick,
            0,
            EventType::ConnEstablished,
            payload.encode(),
        ))
        .map_err(Z6Error::from)?;
        tracing::debug!(conn_id = idx, target = %target, "HTTP/2 connection opened");
        Ok(idx as ConnectionId)
    }

    fn send(
        &mut self,
        conn_id: ConnectionId,
        request: Request,
        tick: u64,
        log: &mut EventLog,
    ) -> Result<RequestId, Z6Error> {
        let conn = self
            .connections
            .get_mut(conn_id as usize)
            .ok_or(Z6Error::Transport(TransportError::ConnectionReset))?;
        if !matches!(conn.state, ConnState::SettingsSent | ConnState::Active) {
            return Err(Z6Error::Transport(TransportError::ConnectionReset));
        }
        if conn.open_stream_count() >= MAX_CONCURRENT_STREAMS {
            return Err(Z6Error::Http2(Http2Error::StreamLimitExceeded));
        }

        let stream_id = conn.next_stream_id;
        conn.next_stream_id += 2;

        // Pseudo-headers first, in fixed order, then user headers.
        let authority = conn.target.to_string();
        let mut header_list: Vec<(&str, &str)> = vec![
            (":method", request.method.as_str()),
            (":scheme", "http"),
            (":authority", authority.as_str()),
            (":path", request.path.as_str()),
        ];
        let lowered: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(n, v)| (n.to_ascii_lowercase(), v.clone()))
            .collect();
        for (name, value) in &lowered {
            if name == "host" || name == "content-length" || name == "connection" {
                continue;
            }
            header_list.push((name.as_str(), value.as_str()));
        }
        let block = hpack::encode_block(&header_list);

        let end_stream = request.body.is_none();
        let max_frame = conn.peer_settings.max_frame_size;
        let mut bytes = Vec::new();
        if block.len() <= max_frame {
            Frame::Headers {
                stream_id,
                fragment: block,
                end_stream,
                end_headers: true,
            }
            .encode(&mut bytes);
        } else {
            // Oversized block: HEADERS carries the first chunk, the rest
            // goes out in CONTINUATION frames.
            let mut chunks = block.chunks(max_frame);
            let first = chunks.next().unwrap_or_default().to_vec();
            Frame::Headers {
                stream_id,
                fragment: first,
                end_stream,
                end_headers: false,
            }
            .encode(&mut bytes);
            let rest: Vec<&[u8]> = chunks.collect();
            for (i, chunk) in rest.iter().enumerate() {
                Frame::Continuation {
                    stream_id,
                    fragment: chunk.to_vec(),
                    end_headers: i == rest.len() - 1,
                }
                .encode(&mut bytes);
            }
        }

        if let Some(body) = &request.body {
            let needed = body.len() as i64;
            let stream_window = conn.peer_settings.initial_window_size as i64;
            if needed > conn.send_window || needed > stream_window || body.len() > max_frame {
                return Err(Z6Error::Http2(Http2Error::FlowControlError));
            }
            conn.send_window -= needed;
            Frame::Data {
                stream_id,
                data: body.clone(),
                end_stream: true,
            }
            .encode(&mut bytes);
        }

        if let Err(e) = conn.write(&bytes) {
            conn.state = ConnState::Closing;
            return Err(Z6Error::Transport(e));
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let stream_window =
            conn.peer_settings.initial_window_size as i64 - request.body.as_ref().map_or(0, |b| b.len() as i64);
        conn.streams.push(Stream {
            id: stream_id,
            state: StreamState::HalfClosedLocal,
            request_id,
            vu_id: request.vu_id,
            method: request.method,
            sent_at_tick: tick,
            timeout_ticks: request.timeout_ticks,
            status: None,
            headers: Vec::new(),
            body: Vec::new(),
            send_window: stream_window,
        });

        let payload = RequestIssuedPayload {
            request_id,
            connection_id: conn_id,
            stream_id,
            timeout_ticks: request.timeout_ticks,
            method: request.method.code(),
            http_version: 2,
            path: request.path.clone(),
        };
        log.append(Event::new(
            tick,
            request.vu_id,
            EventType::RequestIssued,
            payload.encode(),
        ))
        .map_err(Z6Error::from)?;
        Ok(request_id)
    }

    fn poll(&mut self, tick: u64, log: &mut EventLog, completions: &mut Vec<Completion>) {
        let conn_ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|(idx, _)| idx as ConnectionId)
            .collect();

        for conn_id in conn_ids {
            // 1. Per-stream timeouts.
            {
                let Some(conn) = self.connections.get_mut(conn_id as usize) else {
                    continue;
                };
                let mut resets = Vec::new();
                for stream in conn.streams.iter_mut() {
                    if stream.state != StreamState::Closed
                        && tick.saturating_sub(stream.sent_at_tick) > stream.timeout_ticks
                    {
                        resets.push(stream.id);
                        Self::fail_stream(
                            conn_id,
                            stream,
                            ErrorClass::Timeout,
                            EventType::RequestTimeout,
                            0,
                            tick,
                            log,
                            completions,
                        );
                    }
                }
                for stream_id in resets {
                    let _ = conn.write_frame(&Frame::RstStream {
                        stream_id,
                        error_code: error_code::CANCEL,
                    });
                }
            }

            // 2. One non-blocking read. Connections with a stream opened
            // this tick wait until next tick, so completions always
            // postdate their issue tick.
            let read = {
                let Some(conn) = self.connections.get_mut(conn_id as usize) else {
                    continue;
                };
                if conn
                    .streams
                    .iter()
                    .any(|s| s.state != StreamState::Closed && s.sent_at_tick == tick)
                {
                    None
                } else if conn.read_buf.len() >= READ_BUF_CAP {
                    None
                } else if let Some(transport) = conn.transport.as_mut() {
                    let mut chunk = [0u8; READ_CHUNK];
                    Some(transport.read(&mut chunk).map(|outcome| match outcome {
                        ReadOutcome::Data(n) => Some(chunk[..n].to_vec()),
                        ReadOutcome::WouldBlock => None,
                        ReadOutcome::Closed => Some(Vec::new()),
                    }))
                } else {
                    None
                }
            };

            match read {
                None => {}
                Some(Err(err)) => {
                    self.fail_connection(conn_id, err.class(), 0, tick, log, completions);
                }
                Some(Ok(Some(bytes))) if bytes.is_empty() => {
                    // Peer closed: everything in flight is reset.
                    let had_streams = self
                        .connections
                        .get(conn_id as usize)
                        .map(|c| c.open_stream_count() > 0)
                        .unwrap_or(false);
                    if had_streams {
                        self.fail_connection(conn_id, ErrorClass::Tcp, 0, tick, log, completions);
                    } else if let Some(conn) = self.connections.get_mut(conn_id as usize) {
                        conn.state = ConnState::Closing;
                    }
                }
                Some(Ok(incoming)) => {
                    if let Some(bytes) = incoming {
                        if let Some(conn) = self.connections.get_mut(conn_id as usize) {
                            conn.read_buf.extend_from_slice(&bytes);
                        }
                    }
                    // 3. Drain complete frames.
                    loop {
                        let parsed = {
                            let Some(conn) = self.connections.get_mut(conn_id as usize) else {
                                break;
                            };
                            let max_frame = conn.peer_settings.max_frame_size;
                            match parse_frame(&conn.read_buf, max_frame) {
                                Ok(Some((frame, consumed))) => {
                                    conn.read_buf.drain(..consumed);
                                    Some(frame)
                                }
                                Ok(None) => None,
                                Err(err) => {
                                    tracing::warn!(conn_id, %err, "frame parse failed");
                                    let _ = self
                                        .connections
                                        .get_mut(conn_id as usize)
                                        .map(|c| c.write_frame(&Frame::Goaway {
                                            last_stream_id: 0,
                                            error_code: error_code::PROTOCOL_ERROR,
                                            debug_data: Vec::new(),
                                        }));
                                    self.fail_connection(
                                        conn_id,
                                        ErrorClass::Protocol,
                                        error_code::PROTOCOL_ERROR,
                                        tick,
                                        log,
                                        completions,
                                    );
                                    None
                                }
                            }
                        };
                        let Some(frame) = parsed else { break };
                        if let Err(err) =
                            self.dispatch_frame(conn_id, frame, tick, log, completions)
                        {
                            tracing::warn!(conn_id, %err, "protocol violation");
                            self.fail_connection(
                                conn_id,
                                ErrorClass::Protocol,
                                error_code::PROTOCOL_ERROR,
                                tick,
                                log,
                                completions,
                            );
                            break;
                        }
                    }
                }
            }

            // 4. Reap closed streams and closing connections.
            if let Some(conn) = self.connections.get_mut(conn_id as usize) {
                conn.streams.retain(|s| s.state != StreamState::Closed);
                if conn.state == ConnState::Closing {
                    self.close_connection(conn_id, tick, log);
                }
            }
        }
    }

    fn close(&mut self, conn: ConnectionId, tick: u64, log: &mut EventLog) {
        self.close_connection(conn, tick, log);
    }

    fn shutdown(&mut self, tick: u64, log: &mut EventLog, completions: &mut Vec<Completion>) {
        let conn_ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|(idx, _)| idx as ConnectionId)
            .collect();
        for conn_id in conn_ids {
            if let Some(conn) = self.connections.get_mut(conn_id as usize) {
                for stream in conn.streams.iter_mut() {
                    if stream.state != StreamState::Closed {
                        completions.push(Completion {
                            request_id: stream.request_id,
                            vu_id: stream.vu_id,
                            issued_tick: stream.sent_at_tick,
                            completed_tick: tick,
                            result: CompletionResult::Error(ErrorClass::Tcp),
                        });
                        stream.state = StreamState::Closed;
                    }
                }
            }
            self.close_connection(conn_id, tick, log);
        }
    }

    fn in_flight(&self) -> usize {
        self.connections
            .iter()
            .map(|(_, conn)| conn.open_stream_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryHandle};

    fn target() -> Target {
        Target {
            host: "localhost".to_string(),
            port: 9090,
        }
    }

    fn get_request(vu_id: u32) -> Request {
        Request {
            method: HttpMethod::Get,
            path: "/".to_string(),
            headers: Vec::new(),
            body: None,
            timeout_ticks: 100,
            vu_id,
        }
    }

    fn engine_with_one_conn() -> (Http2Engine, MemoryHandle) {
        let mut connector = MemoryConnector::new();
        let handle = connector.add_transport();
        (Http2Engine::with_capacity(Box::new(connector), 8), handle)
    }

    fn encode(frame: &Frame) -> Vec<u8> {
        let mut out = Vec::new();
        frame.encode(&mut out);
        out
    }

    fn server_settings() -> Vec<u8> {
        encode(&Frame::Settings {
            ack: false,
            params: Vec::new(),
        })
    }

    fn server_settings_ack() -> Vec<u8> {
        encode(&Frame::Settings {
            ack: true,
            params: Vec::new(),
        })
    }

    fn status_headers(stream_id: u32, status: &str, end_stream: bool) -> Vec<u8> {
        encode(&Frame::Headers {
            stream_id,
            fragment: hpack::encode_block(&[(":status", status)]),
            end_stream,
            end_headers: true,
        })
    }

    /// Parse every frame the client wrote after the preface.
    fn client_frames(handle: &MemoryHandle) -> Vec<Frame> {
        let written = handle.written();
        assert!(written.starts_with(CONNECTION_PREFACE));
        let mut rest = &written[CONNECTION_PREFACE.len()..];
        let mut frames = Vec::new();
        while let Some((frame, consumed)) =
            parse_frame(rest, frame::MAX_FRAME_SIZE).expect("client frames parse")
        {
            frames.push(frame);
            rest = &rest[consumed..];
        }
        frames
    }

    #[test]
    fn connect_writes_preface_and_settings() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        engine.connect(&target(), 1, &mut log).unwrap();
        let frames = client_frames(&handle);
        assert!(matches!(frames[0], Frame::Settings { ack: false, .. }));
        let event = log.get(0).unwrap();
        assert_eq!(event.event_type, EventType::ConnEstablished);
        assert_eq!(ConnEstablishedPayload::decode(&event.payload).protocol, 2);
    }

    #[test]
    fn settings_ack_activates_connection_and_acks_server_settings() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        engine.connect(&target(), 1, &mut log).unwrap();
        handle.push_incoming(server_settings());
        handle.push_incoming(server_settings_ack());
        engine.poll(2, &mut log, &mut completions);
        engine.poll(3, &mut log, &mut completions);
        // The client acknowledged the server's SETTINGS.
        let frames = client_frames(&handle);
        assert!(frames
            .iter()
            .any(|f| matches!(f, Frame::Settings { ack: true, .. })));
    }

    #[test]
    fn send_allocates_odd_stream_ids() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        let ids: Vec<u32> = client_frames(&handle)
            .iter()
            .filter_map(|f| match f {
                Frame::Headers { stream_id, .. } => Some(*stream_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn send_emits_headers_with_end_stream_for_bodyless_request() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        let frames = client_frames(&handle);
        let headers = frames
            .iter()
            .find_map(|f| match f {
                Frame::Headers {
                    fragment,
                    end_stream,
                    end_headers,
                    ..
                } => Some((fragment.clone(), *end_stream, *end_headers)),
                _ => None,
            })
            .expect("HEADERS frame");
        assert!(headers.1, "END_STREAM expected");
        assert!(headers.2, "END_HEADERS expected");
        let decoded = hpack::decode_block(&headers.0).unwrap();
        assert_eq!(decoded[0], (":method".to_string(), "GET".to_string()));
        assert_eq!(decoded[1], (":scheme".to_string(), "http".to_string()));
        assert_eq!(
            decoded[2],
            (":authority".to_string(), "localhost:9090".to_string())
        );
        assert_eq!(decoded[3], (":path".to_string(), "/".to_string()));
    }

    #[test]
    fn send_with_body_emits_data_frame() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        let mut req = get_request(1);
        req.method = HttpMethod::Post;
        req.body = Some(b"payload".to_vec());
        engine.send(conn, req, 1, &mut log).unwrap();
        let frames = client_frames(&handle);
        let headers_end_stream = frames.iter().find_map(|f| match f {
            Frame::Headers { end_stream, .. } => Some(*end_stream),
            _ => None,
        });
        assert_eq!(headers_end_stream, Some(false));
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::Data {
                end_stream: true,
                ..
            }
        )));
    }

    #[test]
    fn stream_limit_enforced() {
        let (mut engine, _handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(256);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        for _ in 0..MAX_CONCURRENT_STREAMS {
            engine.send(conn, get_request(1), 1, &mut log).unwrap();
        }
        let err = engine.send(conn, get_request(1), 1, &mut log).unwrap_err();
        assert!(matches!(
            err,
            Z6Error::Http2(Http2Error::StreamLimitExceeded)
        ));
    }

    #[test]
    fn response_headers_complete_stream() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        let id = engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(status_headers(1, "200", true));
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].request_id, id);
        match &completions[0].result {
            CompletionResult::Response(r) => {
                assert_eq!(r.status_code, 200);
                assert!(r.body.is_empty());
            }
            other => panic!("expected response, got {other:?}"),
        }
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn response_with_data_body_collected() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        let mut bytes = status_headers(1, "200", false);
        bytes.extend(encode(&Frame::Data {
            stream_id: 1,
            data: b"hello".to_vec(),
            end_stream: true,
        }));
        handle.push_incoming(bytes);
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        match &completions[0].result {
            CompletionResult::Response(r) => assert_eq!(r.body, b"hello"),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn data_acknowledged_with_stream_window_update() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        let mut bytes = status_headers(1, "200", false);
        bytes.extend(encode(&Frame::Data {
            stream_id: 1,
            data: vec![0u8; 64],
            end_stream: false,
        }));
        handle.push_incoming(bytes);
        engine.poll(2, &mut log, &mut completions);
        let frames = client_frames(&handle);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::WindowUpdate {
                stream_id: 1,
                increment: 64
            }
        )));
    }

    #[test]
    fn continuation_frames_assemble_header_block() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        let block = hpack::encode_block(&[(":status", "200"), ("server", "test")]);
        let (first, rest) = block.split_at(1);
        let mut bytes = encode(&Frame::Headers {
            stream_id: 1,
            fragment: first.to_vec(),
            end_stream: true,
            end_headers: false,
        });
        bytes.extend(encode(&Frame::Continuation {
            stream_id: 1,
            fragment: rest.to_vec(),
            end_headers: true,
        }));
        handle.push_incoming(bytes);
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        match &completions[0].result {
            CompletionResult::Response(r) => {
                assert_eq!(r.status_code, 200);
                assert_eq!(r.header("server"), Some("test"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn ping_answered_with_ack() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        engine.connect(&target(), 1, &mut log).unwrap();
        handle.push_incoming(encode(&Frame::Ping {
            ack: false,
            data: [9, 8, 7, 6, 5, 4, 3, 2],
        }));
        engine.poll(2, &mut log, &mut completions);
        let frames = client_frames(&handle);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::Ping {
                ack: true,
                data: [9, 8, 7, 6, 5, 4, 3, 2]
            }
        )));
    }

    #[test]
    fn goaway_fails_open_streams() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(encode(&Frame::Goaway {
            last_stream_id: 0,
            error_code: error_code::NO_ERROR,
            debug_data: Vec::new(),
        }));
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0].result,
            CompletionResult::Error(ErrorClass::Tcp)
        ));
        assert!(log.iter().any(|e| e.event_type == EventType::ConnError));
        assert!(log.iter().any(|e| e.event_type == EventType::ConnClosed));
    }

    #[test]
    fn rst_stream_fails_single_stream() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        engine.send(conn, get_request(2), 1, &mut log).unwrap();
        handle.push_incoming(encode(&Frame::RstStream {
            stream_id: 1,
            error_code: error_code::REFUSED_STREAM,
        }));
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0].result,
            CompletionResult::Error(ErrorClass::Protocol)
        ));
        // The other stream is still waiting.
        assert_eq!(engine.in_flight(), 1);
    }

    #[test]
    fn push_promise_refused_with_rst_cancel() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(encode(&Frame::PushPromise {
            stream_id: 1,
            promised_stream_id: 2,
            fragment: Vec::new(),
        }));
        engine.poll(2, &mut log, &mut completions);
        let frames = client_frames(&handle);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::RstStream {
                stream_id: 2,
                error_code: error_code::CANCEL
            }
        )));
    }

    #[test]
    fn stream_timeout_emits_rst_and_completion() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        let mut req = get_request(1);
        req.timeout_ticks = 2;
        engine.send(conn, req, 1, &mut log).unwrap();
        engine.poll(4, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0].result,
            CompletionResult::Error(ErrorClass::Timeout)
        ));
        assert!(log.iter().any(|e| e.event_type == EventType::RequestTimeout));
        let frames = client_frames(&handle);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::RstStream {
                stream_id: 1,
                error_code: error_code::CANCEL
            }
        )));
    }

    #[test]
    fn malformed_frame_fails_connection() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        // SETTINGS on a nonzero stream is a connection error.
        let mut bad = Vec::new();
        bad.extend_from_slice(&[0, 0, 0, 0x4, 0, 0, 0, 0, 1]);
        handle.push_incoming(bad);
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0].result,
            CompletionResult::Error(ErrorClass::Protocol)
        ));
        assert!(log
            .iter()
            .any(|e| e.event_type == EventType::ErrorProtocolViolation));
    }

    #[test]
    fn completion_waits_a_tick_after_send() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 5, &mut log).unwrap();
        handle.push_incoming(status_headers(1, "200", true));
        engine.poll(5, &mut log, &mut completions);
        assert!(completions.is_empty(), "same-tick completion forbidden");
        engine.poll(6, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].latency_ticks(), 1);
    }

    #[test]
    fn body_capped_at_stream_limit() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        let mut bytes = status_headers(1, "200", false);
        bytes.extend(encode(&Frame::Data {
            stream_id: 1,
            data: vec![0u8; STREAM_BODY_CAP],
            end_stream: false,
        }));
        bytes.extend(encode(&Frame::Data {
            stream_id: 1,
            data: vec![1u8; 100],
            end_stream: true,
        }));
        handle.push_incoming(bytes);
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        match &completions[0].result {
            CompletionResult::Response(r) => assert_eq!(r.body.len(), STREAM_BODY_CAP),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn shutdown_fails_streams_and_closes_connections() {
        let (mut engine, _handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        engine.shutdown(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert_eq!(engine.in_flight(), 0);
        assert!(log.iter().any(|e| e.event_type == EventType::ConnClosed));
    }
}
