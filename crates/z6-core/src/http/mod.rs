//! Shared protocol-facing types: targets, requests, responses,
//! completions, and the engine capability trait.

pub mod engine;
pub mod request;
pub mod response;

pub use engine::{Completion, CompletionResult, ProtocolEngine};
pub use request::{ConnectionId, Request, RequestId, StreamId, Target};
pub use response::{Response, Status};
