//! HTTP/1.1 protocol engine.
//!
//! Owns a bounded pool of plaintext connections, serializes requests,
//! and parses responses out of per-connection read buffers. One request
//! is outstanding per connection at a time (no pipelining); keep-alive
//! connections return to the pool for reuse until the per-connection
//! request cap.

use crate::error::{ErrorClass, ParseError, TransportError, Z6Error};
use crate::event::record::{
    ConnEstablishedPayload, ErrorPayload, Event, EventType, RequestIssuedPayload,
    ResponseReceivedPayload,
};
use crate::event::EventLog;
use crate::http::engine::{Completion, CompletionResult, ProtocolEngine};
use crate::http::request::{ConnectionId, Request, RequestId, Target};
use crate::http::response::Response;
use crate::http1::parser::parse_response;
use crate::pool::SlotPool;
use crate::scenario::model::HttpMethod;
use crate::transport::{Connector, ReadOutcome, Transport};

/// Connection pool capacity.
pub const MAX_CONNECTIONS: usize = 10_000;
/// Requests served per connection before it is retired.
pub const MAX_REQUESTS_PER_CONNECTION: u32 = 100;

/// Bytes read from a connection per poll.
const READ_CHUNK: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
}

struct Connection {
    state: ConnState,
    target: Target,
    transport: Option<Box<dyn Transport>>,
    requests_sent: u32,
    keep_alive: bool,
    last_used_tick: u64,
    read_buf: Vec<u8>,
}

struct Pending {
    request_id: RequestId,
    connection_id: ConnectionId,
    vu_id: u32,
    method: HttpMethod,
    sent_at_tick: u64,
    timeout_ticks: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Http1Engine {
    connections: SlotPool<Connection>,
    pending: Vec<Pending>,
    connector: Box<dyn Connector>,
    next_request_id: RequestId,
}

impl Http1Engine {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self::with_capacity(connector, MAX_CONNECTIONS)
    }

    /// Engine with a smaller pool, for tests.
    pub fn with_capacity(connector: Box<dyn Connector>, capacity: usize) -> Self {
        Self {
            connections: SlotPool::new(capacity.min(MAX_CONNECTIONS)),
            pending: Vec::new(),
            connector,
            next_request_id: 1,
        }
    }

    /// Serialize a request into its on-the-wire form.
    fn serialize_request(request: &Request, target: &Target) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(request.method.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(request.path.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");
        out.extend_from_slice(format!("Host: {}:{}\r\n", target.host, target.port).as_bytes());
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if let Some(body) = &request.body {
            out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        if let Some(body) = &request.body {
            out.extend_from_slice(body);
        }
        out
    }

    fn close_connection(&mut self, conn_id: ConnectionId, tick: u64, log: &mut EventLog) {
        if let Some(mut conn) = self.connections.release(conn_id as usize) {
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

    /// Fail the pending request at `index` with `class`, emitting the
    /// paired error event.
    fn fail_pending(
        &mut self,
        index: usize,
        class: ErrorClass,
        event_type: EventType,
        tick: u64,
        log: &mut EventLog,
        completions: &mut Vec<Completion>,
    ) {
        let pending = self.pending.remove(index);
        let payload = ErrorPayload {
            request_id: pending.request_id,
            connection_id: pending.connection_id,
            detail: 0,
        };
        let _ = log.append(Event::new(tick, pending.vu_id, event_type, payload.encode()));
        let _ = log.append(Event::new(
            tick,
            pending.vu_id,
            EventType::for_error_class(class),
            payload.encode(),
        ));
        completions.push(Completion {
            request_id: pending.request_id,
            vu_id: pending.vu_id,
            issued_tick: pending.sent_at_tick,
            completed_tick: tick,
            result: CompletionResult::Error(class),
        });
        if let Some(conn) = self.connections.get_mut(pending.connection_id as usize) {
            conn.state = ConnState::Closing;
        }
    }

    /// The peer closed or reset the connection: record the connection
    /// failure and fail its pending request.
    fn fail_connection_read(
        &mut self,
        conn_id: ConnectionId,
        class: ErrorClass,
        tick: u64,
        log: &mut EventLog,
        completions: &mut Vec<Completion>,
    ) {
        let _ = log.append(Event::new(
            tick,
            0,
            EventType::ConnError,
            ErrorPayload {
                request_id: 0,
                connection_id: conn_id,
                detail: 0,
            }
            .encode(),
        ));
        if let Some(idx) = self
            .pending
            .iter()
            .position(|p| p.connection_id == conn_id)
        {
            self.fail_pending(idx, class, EventType::ResponseError, tick, log, completions);
        } else if let Some(conn) = self.connections.get_mut(conn_id as usize) {
            conn.state = ConnState::Closing;
        }
    }

    /// Try to parse one response out of the connection's buffer. Returns
    /// `true` when the pending request finished (success or error).
    fn try_parse(
        &mut self,
        conn_id: ConnectionId,
        tick: u64,
        log: &mut EventLog,
        completions: &mut Vec<Completion>,
    ) -> bool {
        let Some(pending_idx) = self
            .pending
            .iter()
            .position(|p| p.connection_id == conn_id)
        else {
            return false;
        };
        let conn = match self.connections.get_mut(conn_id as usize) {
            Some(c) => c,
            None => return false,
        };

        let parsed = match parse_response(&conn.read_buf) {
            Ok(parsed) => parsed,
            Err(ParseError::IncompleteResponse) => return false,
            Err(err) => {
                tracing::warn!(conn_id, %err, "response parse failed");
                self.fail_pending(
                    pending_idx,
                    ErrorClass::Http,
                    EventType::ResponseError,
                    tick,
                    log,
                    completions,
                );
                return true;
            }
        };

        let response = Response {
            status_code: parsed.status_code,
            headers: parsed
                .headers
                .iter()
                .map(|h| (h.name.to_ascii_lowercase(), h.value.to_string()))
                .collect(),
            body: parsed.body.into_owned(),
        };
        let keep_alive = parsed.keep_alive;
        let consumed = parsed.bytes_consumed;
        conn.read_buf.drain(..consumed);
        conn.keep_alive = keep_alive;
        conn.state = if keep_alive && conn.requests_sent < MAX_REQUESTS_PER_CONNECTION {
            ConnState::Idle
        } else {
            ConnState::Closing
        };
        conn.last_used_tick = tick;

        let pending = self.pending.remove(pending_idx);
        let payload = ResponseReceivedPayload {
            request_id: pending.request_id,
            connection_id: conn_id,
            status_code: response.status_code,
            method: pending.method.code(),
            latency_ticks: tick - pending.sent_at_tick,
            body_len: response.body.len() as u64,
        };
        let _ = log.append(Event::new(
            tick,
            pending.vu_id,
            EventType::ResponseReceived,
            payload.encode(),
        ));
        completions.push(Completion {
            request_id: pending.request_id,
            vu_id: pending.vu_id,
            issued_tick: pending.sent_at_tick,
            completed_tick: tick,
            result: CompletionResult::Response(response),
        });
        true
    }
}

impl ProtocolEngine for Http1Engine {
    fn connect(
        &mut self,
        target: &Target,
        tick: u64,
        log: &mut EventLog,
    ) -> Result<ConnectionId, Z6Error> {
        // Reuse the lowest-indexed idle connection to the same target.
        let reusable = self.connections.iter().find_map(|(idx, conn)| {
            (conn.state == ConnState::Idle
                && conn.target == *target
                && conn.requests_sent < MAX_REQUESTS_PER_CONNECTION)
                .then_some(idx)
        });
        if let Some(idx) = reusable {
            if let Some(conn) = self.connections.get_mut(idx) {
                conn.last_used_tick = tick;
            }
            return Ok(idx as ConnectionId);
        }

        if self.connections.is_full() {
            return Err(Z6Error::ConnectionPoolExhausted);
        }

        let transport = self.connector.connect(target)?;
        let conn = Connection {
            state: ConnState::Connecting,
            target: target.clone(),
            transport: Some(transport),
            requests_sent: 0,
            keep_alive: true,
            last_used_tick: tick,
            read_buf: Vec::new(),
        };
        let idx = self
            .connections
            .acquire(conn)
            .ok_or(Z6Error::ConnectionPoolExhausted)?;
        if let Some(conn) = self.connections.get_mut(idx) {
            conn.state = ConnState::Idle;
        }

        let payload = ConnEstablishedPayload {
            connection_id: idx as ConnectionId,
            port: target.port,
            protocol: 1,
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
        tracing::debug!(conn_id = idx, target = %target, "connection established");
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
        if conn.state != ConnState::Idle {
            return Err(Z6Error::Transport(TransportError::ConnectionReset));
        }

        let target = conn.target.clone();
        let bytes = Self::serialize_request(&request, &target);
        let transport = conn
            .transport
            .as_mut()
            .ok_or(Z6Error::Transport(TransportError::ConnectionReset))?;
        match transport.write(&bytes) {
            Ok(n) if n == bytes.len() => {}
            // A short write at this scale means the connection is not
            // usable; fail it rather than buffering.
            Ok(_) | Err(_) => {
                conn.state = ConnState::Closing;
                return Err(Z6Error::Transport(TransportError::Tcp));
            }
        }

        conn.requests_sent += 1;
        conn.state = ConnState::Active;
        conn.last_used_tick = tick;

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending.push(Pending {
            request_id,
            connection_id: conn_id,
            vu_id: request.vu_id,
            method: request.method,
            sent_at_tick: tick,
            timeout_ticks: request.timeout_ticks,
        });

        let payload = RequestIssuedPayload {
            request_id,
            connection_id: conn_id,
            stream_id: 0,
            timeout_ticks: request.timeout_ticks,
            method: request.method.code(),
            http_version: 1,
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
        // 1. Expire timed-out requests.
        let mut i = 0;
        while i < self.pending.len() {
            let p = &self.pending[i];
            if tick.saturating_sub(p.sent_at_tick) > p.timeout_ticks {
                self.fail_pending(
                    i,
                    ErrorClass::Timeout,
                    EventType::RequestTimeout,
                    tick,
                    log,
                    completions,
                );
            } else {
                i += 1;
            }
        }

        // 2. One non-blocking read per active connection, then parse.
        // Requests issued this tick are left alone: a completion's tick
        // always exceeds its issue tick.
        let active: Vec<ConnectionId> = self
            .pending
            .iter()
            .filter(|p| p.sent_at_tick < tick)
            .map(|p| p.connection_id)
            .collect();
        for conn_id in active {
            let Some(conn) = self.connections.get_mut(conn_id as usize) else {
                continue;
            };
            if conn.state != ConnState::Active {
                continue;
            }
            let Some(transport) = conn.transport.as_mut() else {
                continue;
            };
            let mut chunk = [0u8; READ_CHUNK];
            match transport.read(&mut chunk) {
                Ok(ReadOutcome::Data(n)) => {
                    conn.read_buf.extend_from_slice(&chunk[..n]);
                    self.try_parse(conn_id, tick, log, completions);
                }
                Ok(ReadOutcome::WouldBlock) => {}
                Ok(ReadOutcome::Closed) => {
                    self.fail_connection_read(conn_id, ErrorClass::Tcp, tick, log, completions);
                }
                Err(err) => {
                    self.fail_connection_read(conn_id, err.class(), tick, log, completions);
                }
            }
        }

        // 3. Sweep connections marked Closing.
        let closing: Vec<usize> = self
            .connections
            .iter()
            .filter_map(|(idx, conn)| (conn.state == ConnState::Closing).then_some(idx))
            .collect();
        for idx in closing {
            self.close_connection(idx as ConnectionId, tick, log);
        }
    }

    fn close(&mut self, conn: ConnectionId, tick: u64, log: &mut EventLog) {
        self.close_connection(conn, tick, log);
    }

    fn shutdown(&mut self, tick: u64, log: &mut EventLog, completions: &mut Vec<Completion>) {
        // Fail whatever is still in flight, then close every connection.
        while let Some(pending) = self.pending.pop() {
            completions.push(Completion {
                request_id: pending.request_id,
                vu_id: pending.vu_id,
                issued_tick: pending.sent_at_tick,
                completed_tick: tick,
                result: CompletionResult::Error(ErrorClass::Tcp),
            });
        }
        let ids: Vec<usize> = self.connections.iter().map(|(idx, _)| idx).collect();
        for idx in ids {
            self.close_connection(idx as ConnectionId, tick, log);
        }
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryHandle};

    fn target() -> Target {
        Target {
            host: "localhost".to_string(),
            port: 8080,
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

    /// Engine wired to one scripted connection.
    fn engine_with_one_conn() -> (Http1Engine, MemoryHandle) {
        let mut connector = MemoryConnector::new();
        let handle = connector.add_transport();
        (Http1Engine::with_capacity(Box::new(connector), 8), handle)
    }

    #[test]
    fn connect_emits_conn_established() {
        let (mut engine, _h) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        assert_eq!(log.len(), 1);
        let event = log.get(0).unwrap();
        assert_eq!(event.event_type, EventType::ConnEstablished);
        let payload = ConnEstablishedPayload::decode(&event.payload);
        assert_eq!(payload.connection_id, conn);
        assert_eq!(payload.port, 8080);
        assert_eq!(payload.protocol, 1);
        assert_eq!(payload.host, "localhost");
    }

    #[test]
    fn send_writes_serialized_request() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        let written = String::from_utf8(handle.written()).unwrap();
        assert!(written.starts_with("GET / HTTP/1.1\r\n"));
        assert!(written.contains("Host: localhost:8080\r\n"));
        assert!(written.ends_with("\r\n\r\n"));
    }

    #[test]
    fn send_synthesizes_content_length_for_body() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        let mut req = get_request(1);
        req.method = HttpMethod::Post;
        req.body = Some(b"hello".to_vec());
        req.headers
            .push(("content-type".to_string(), "text/plain".to_string()));
        engine.send(conn, req, 1, &mut log).unwrap();
        let written = String::from_utf8(handle.written()).unwrap();
        assert!(written.starts_with("POST / HTTP/1.1\r\n"));
        assert!(written.contains("content-type: text/plain\r\n"));
        assert!(written.contains("Content-Length: 5\r\n"));
        assert!(written.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn send_emits_request_issued() {
        let (mut engine, _h) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        let id = engine.send(conn, get_request(3), 1, &mut log).unwrap();
        let event = log.get(1).unwrap();
        assert_eq!(event.event_type, EventType::RequestIssued);
        assert_eq!(event.vu_id, 3);
        let payload = RequestIssuedPayload::decode(&event.payload);
        assert_eq!(payload.request_id, id);
        assert_eq!(payload.http_version, 1);
        assert_eq!(payload.path, "/");
        assert_eq!(engine.in_flight(), 1);
    }

    #[test]
    fn poll_completes_response_on_later_tick() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        let id = engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec());

        // Same tick: causality holds, nothing completes.
        engine.poll(1, &mut log, &mut completions);
        assert!(completions.is_empty());

        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        let c = &completions[0];
        assert_eq!(c.request_id, id);
        assert_eq!(c.latency_ticks(), 1);
        match &c.result {
            CompletionResult::Response(r) => {
                assert_eq!(r.status_code, 200);
                assert_eq!(r.body, b"hello");
            }
            other => panic!("expected response, got {other:?}"),
        }
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn poll_emits_response_received_with_latency() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec());
        engine.poll(4, &mut log, &mut completions);

        let event = log
            .iter()
            .find(|e| e.event_type == EventType::ResponseReceived)
            .expect("response_received");
        let payload = ResponseReceivedPayload::decode(&event.payload);
        assert_eq!(payload.status_code, 200);
        assert_eq!(payload.latency_ticks, 3);
        assert_eq!(payload.method, HttpMethod::Get.code());
    }

    #[test]
    fn keep_alive_connection_reused() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec());
        engine.poll(2, &mut log, &mut completions);

        // Reconnect hands back the same pooled connection.
        let conn2 = engine.connect(&target(), 3, &mut log).unwrap();
        assert_eq!(conn2, conn);
        // Only one conn_established in the log.
        let established = log
            .iter()
            .filter(|e| e.event_type == EventType::ConnEstablished)
            .count();
        assert_eq!(established, 1);
    }

    #[test]
    fn connection_close_header_retires_connection() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(
            b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n".to_vec(),
        );
        engine.poll(2, &mut log, &mut completions);
        assert!(log.iter().any(|e| e.event_type == EventType::ConnClosed));
        // No idle connection left; a new connect needs a fresh transport.
        assert!(engine.connect(&target(), 3, &mut log).is_err());
    }

    #[test]
    fn timeout_fails_request_and_emits_events() {
        let (mut engine, _handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        let mut req = get_request(1);
        req.timeout_ticks = 3;
        engine.send(conn, req, 1, &mut log).unwrap();

        engine.poll(4, &mut log, &mut completions);
        assert!(completions.is_empty(), "not yet past the deadline");
        engine.poll(5, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0].result,
            CompletionResult::Error(ErrorClass::Timeout)
        ));
        let types: Vec<EventType> = log.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&EventType::RequestTimeout));
        assert!(types.contains(&EventType::ErrorTimeout));
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn malformed_response_fails_request() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(b"SMTP/1.1 not http\r\n\r\n".to_vec());
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0].result,
            CompletionResult::Error(ErrorClass::Http)
        ));
        let types: Vec<EventType> = log.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&EventType::ResponseError));
        assert!(types.contains(&EventType::ErrorHttp));
    }

    #[test]
    fn peer_close_fails_pending_request() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.close_peer();
        engine.poll(2, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0].result,
            CompletionResult::Error(ErrorClass::Tcp)
        ));
        assert!(log.iter().any(|e| e.event_type == EventType::ConnError));
    }

    #[test]
    fn partial_response_completes_across_ticks() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(64);
        let mut completions = Vec::new();
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        handle.push_incoming(b"HTTP/1.1 200 OK\r\nCont".to_vec());
        handle.push_incoming(b"ent-Length: 5\r\n\r\nhel".to_vec());
        handle.push_incoming(b"lo".to_vec());

        engine.poll(2, &mut log, &mut completions);
        assert!(completions.is_empty());
        engine.poll(3, &mut log, &mut completions);
        assert!(completions.is_empty());
        engine.poll(4, &mut log, &mut completions);
        assert_eq!(completions.len(), 1);
        match &completions[0].result {
            CompletionResult::Response(r) => assert_eq!(r.body, b"hello"),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn pool_exhaustion_reported() {
        let mut connector = MemoryConnector::new();
        connector.add_transport();
        let mut engine = Http1Engine::with_capacity(Box::new(connector), 1);
        let mut log = EventLog::with_capacity(64);
        let conn = engine.connect(&target(), 1, &mut log).unwrap();
        engine.send(conn, get_request(1), 1, &mut log).unwrap();
        // Connection is busy (Active) and the pool is full.
        let err = engine
            .connect(
                &Target {
                    host: "other.test".to_string(),
                    port: 80,
                },
                1,
                &mut log,
            )
            .unwrap_err();
        assert!(matches!(err, Z6Error::ConnectionPoolExhausted));
    }

    #[test]
    fn request_cap_retires_connection() {
        let (mut engine, handle) = engine_with_one_conn();
        let mut log = EventLog::with_capacity(4096);
        let mut completions = Vec::new();
        let mut tick = 1;
        for _ in 0..MAX_REQUESTS_PER_CONNECTION {
            let conn = engine.connect(&target(), tick, &mut log).unwrap();
            engine.send(conn, get_request(1), tick, &mut log).unwrap();
            handle.push_incoming(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec());
            tick += 1;
            engine.poll(tick, &mut log, &mut completions);
        }
        assert_eq!(completions.len(), MAX_REQUESTS_PER_CONNECTION as usize);
        // The 100th response retired the connection even with keep-alive.
        assert!(log.iter().any(|e| e.event_type == EventType::ConnClosed));
        assert!(engine.connect(&target(), tick, &mut log).is_err());
    }

    #[test]
    fn shutdown_fails_in_flight_and_closes() {
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
