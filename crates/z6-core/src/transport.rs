//! Byte transports.
//!
//! The engines speak to the network through the [`Transport`] trait so a
//! run can be driven against a real TCP socket or a scripted in-memory
//! peer. Reads are always non-blocking: a tick must never stall on IO.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::error::TransportError;
use crate::http::Target;

/// Outcome of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// No bytes available right now.
    WouldBlock,
    /// The peer closed the connection.
    Closed,
}

/// A bidirectional byte stream with non-blocking reads.
pub trait Transport {
    /// Read available bytes into `buf` without blocking.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, TransportError>;

    /// Write `buf`, returning the number of bytes accepted. The engines
    /// expect the full buffer to be accepted in one call at this scale;
    /// a short write fails the connection.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Close the stream. Idempotent.
    fn close(&mut self);
}

/// Opens transports to targets. Engines hold one connector; tests inject
/// a scripted one.
pub trait Connector {
    fn connect(&mut self, target: &Target) -> Result<Box<dyn Transport>, TransportError>;
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

/// A plaintext TCP transport in non-blocking mode.
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect to `target` and switch the socket to non-blocking mode.
    pub fn connect(target: &Target) -> Result<Self, TransportError> {
        let addr = (target.host.as_str(), target.port);
        let stream = TcpStream::connect(addr).map_err(|e| match e.kind() {
            // Resolution failures surface as InvalidInput/NotFound from ToSocketAddrs.
            io::ErrorKind::InvalidInput | io::ErrorKind::NotFound => TransportError::Dns,
            _ => TransportError::Tcp,
        })?;
        stream
            .set_nonblocking(true)
            .map_err(|_| TransportError::Tcp)?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream: Some(stream),
        })
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(ReadOutcome::Closed);
        };
        match stream.read(buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                Err(TransportError::ConnectionReset)
            }
            Err(_) => Err(TransportError::Tcp),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::ConnectionReset);
        };
        match stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                Err(TransportError::ConnectionReset)
            }
            Err(_) => Err(TransportError::Tcp),
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

/// Connector that opens real TCP sockets.
#[derive(Debug, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&mut self, target: &Target) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(TcpTransport::connect(target)?))
    }
}

// ---------------------------------------------------------------------------
// In-memory transport for tests and replays
// ---------------------------------------------------------------------------

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Shared state behind a [`MemoryTransport`] and its controlling handle.
#[derive(Debug, Default)]
struct MemoryState {
    /// Bytes the engine has written, in write order.
    written: Vec<u8>,
    /// Byte chunks queued for the engine to read; one chunk per read call.
    incoming: VecDeque<Vec<u8>>,
    closed: bool,
    /// When set, the next read reports a connection reset.
    reset: bool,
}

/// A scripted in-memory transport.
///
/// Tests queue response bytes with [`MemoryHandle::push_incoming`] and
/// inspect what the engine wrote with [`MemoryHandle::written`]. Each
/// queued chunk is delivered by one read call, so arrival can be spread
/// across ticks.
pub struct MemoryTransport {
    state: Rc<RefCell<MemoryState>>,
}

/// Control handle paired with a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryHandle {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryHandle) {
        let state = Rc::new(RefCell::new(MemoryState::default()));
        (
            Self {
                state: state.clone(),
            },
            MemoryHandle { state },
        )
    }
}

impl MemoryHandle {
    /// Queue a chunk of bytes for the engine's next read.
    pub fn push_incoming(&self, bytes: impl Into<Vec<u8>>) {
        self.state.borrow_mut().incoming.push_back(bytes.into());
    }

    /// Everything the engine has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    /// Drop any buffered writes.
    pub fn clear_written(&self) {
        self.state.borrow_mut().written.clear();
    }

    /// Make subsequent reads report end-of-stream.
    pub fn close_peer(&self) {
        self.state.borrow_mut().closed = true;
    }

    /// Make the next read fail with a connection reset.
    pub fn reset_peer(&self) {
        self.state.borrow_mut().reset = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl Transport for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.reset {
            return Err(TransportError::ConnectionReset);
        }
        match state.incoming.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    state.incoming.push_front(rest);
                }
                Ok(ReadOutcome::Data(n))
            }
            None if state.closed => Ok(ReadOutcome::Closed),
            None => Ok(ReadOutcome::WouldBlock),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(TransportError::ConnectionReset);
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

/// Connector handing out pre-built transports in order. Connection
/// attempts beyond the scripted list fail with a TCP error.
pub struct MemoryConnector {
    transports: VecDeque<MemoryTransport>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            transports: VecDeque::new(),
        }
    }

    /// Script one connection; returns its control handle.
    pub fn add_transport(&mut self) -> MemoryHandle {
        let (transport, handle) = MemoryTransport::new();
        self.transports.push_back(transport);
        handle
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MemoryConnector {
    fn connect(&mut self, _target: &Target) -> Result<Box<dyn Transport>, TransportError> {
        match self.transports.pop_front() {
            Some(t) => Ok(Box::new(t)),
            None => Err(TransportError::Tcp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_read_returns_would_block_when_empty() {
        let (mut t, _h) = MemoryTransport::new();
        let mut buf = [0u8; 16];
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::WouldBlock);
    }

    #[test]
    fn memory_delivers_one_chunk_per_read() {
        let (mut t, h) = MemoryTransport::new();
        h.push_incoming(b"abc".to_vec());
        h.push_incoming(b"def".to_vec());
        let mut buf = [0u8; 16];
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::Data(3));
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::Data(3));
        assert_eq!(&buf[..3], b"def");
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::WouldBlock);
    }

    #[test]
    fn memory_splits_chunk_larger_than_buffer() {
        let (mut t, h) = MemoryTransport::new();
        h.push_incoming(b"hello world".to_vec());
        let mut buf = [0u8; 5];
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::Data(5));
        assert_eq!(&buf, b"hello");
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::Data(5));
        assert_eq!(&buf, b" worl");
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::Data(1));
        assert_eq!(buf[0], b'd');
    }

    #[test]
    fn memory_records_writes() {
        let (mut t, h) = MemoryTransport::new();
        t.write(b"GET / ").unwrap();
        t.write(b"HTTP/1.1").unwrap();
        assert_eq!(h.written(), b"GET / HTTP/1.1");
    }

    #[test]
    fn memory_close_reports_closed_after_drain() {
        let (mut t, h) = MemoryTransport::new();
        h.push_incoming(b"x".to_vec());
        h.close_peer();
        let mut buf = [0u8; 4];
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::Data(1));
        assert_eq!(t.read(&mut buf).unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn memory_reset_fails_read() {
        let (mut t, h) = MemoryTransport::new();
        h.reset_peer();
        let mut buf = [0u8; 4];
        assert_eq!(
            t.read(&mut buf).unwrap_err(),
            TransportError::ConnectionReset
        );
    }

    #[test]
    fn memory_write_after_close_fails() {
        let (mut t, _h) = MemoryTransport::new();
        t.close();
        assert!(t.write(b"x").is_err());
    }

    #[test]
    fn connector_hands_out_scripted_transports_in_order() {
        let mut connector = MemoryConnector::new();
        let h1 = connector.add_transport();
        let _h2 = connector.add_transport();
        let target = Target {
            host: "example.test".to_string(),
            port: 80,
        };
        let mut t1 = connector.connect(&target).unwrap();
        t1.write(b"first").unwrap();
        assert_eq!(h1.written(), b"first");
        assert!(connector.connect(&target).is_ok());
        assert!(connector.connect(&target).is_err());
    }
}
