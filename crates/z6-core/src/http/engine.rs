use crate::error::{ErrorClass, Z6Error};
use crate::event::EventLog;
use crate::http::request::{ConnectionId, Request, RequestId, Target};
use crate::http::response::Response;

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Outcome of a completed request.
#[derive(Debug, Clone)]
pub enum CompletionResult {
    Response(Response),
    Error(ErrorClass),
}

/// An engine's signal to the VU engine that a request finished.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request_id: RequestId,
    pub vu_id: u32,
    pub issued_tick: u64,
    pub completed_tick: u64,
    pub result: CompletionResult,
}

impl Completion {
    /// Latency in ticks. Completions never finish in their issue tick,
    /// so this is at least 1 for responses.
    pub fn latency_ticks(&self) -> u64 {
        self.completed_tick.saturating_sub(self.issued_tick)
    }
}

// ---------------------------------------------------------------------------
// ProtocolEngine
// ---------------------------------------------------------------------------

/// The capability set every protocol engine provides.
///
/// One engine instance owns one pool of connections to arbitrary targets
/// and is polled once per tick by the driver loop. All methods take the
/// current tick and the event log; engines are the single emission point
/// for connection and request/response events.
pub trait ProtocolEngine {
    /// Obtain a connection to `target`, reusing a pooled one when
    /// possible.
    fn connect(
        &mut self,
        target: &Target,
        tick: u64,
        log: &mut EventLog,
    ) -> Result<ConnectionId, Z6Error>;

    /// Serialize and transmit `request` on `conn`, returning the id that
    /// will appear in its completion.
    fn send(
        &mut self,
        conn: ConnectionId,
        request: Request,
        tick: u64,
        log: &mut EventLog,
    ) -> Result<RequestId, Z6Error>;

    /// Advance the engine one tick: expire timeouts, read sockets, parse
    /// responses, and push finished requests into `completions`.
    fn poll(&mut self, tick: u64, log: &mut EventLog, completions: &mut Vec<Completion>);

    /// Close one connection.
    fn close(&mut self, conn: ConnectionId, tick: u64, log: &mut EventLog);

    /// Tear down the engine: fail all in-flight requests and close every
    /// connection, best-effort.
    fn shutdown(&mut self, tick: u64, log: &mut EventLog, completions: &mut Vec<Completion>);

    /// Number of requests currently in flight.
    fn in_flight(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_is_completed_minus_issued() {
        let c = Completion {
            request_id: 1,
            vu_id: 1,
            issued_tick: 10,
            completed_tick: 14,
            result: CompletionResult::Error(ErrorClass::Timeout),
        };
        assert_eq!(c.latency_ticks(), 4);
    }

    #[test]
    fn latency_saturates_at_zero() {
        let c = Completion {
            request_id: 1,
            vu_id: 1,
            issued_tick: 5,
            completed_tick: 5,
            result: CompletionResult::Error(ErrorClass::Tcp),
        };
        assert_eq!(c.latency_ticks(), 0);
    }
}
