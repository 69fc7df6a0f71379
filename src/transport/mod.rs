//! Transports submit an execution request and hand back its event stream
//!
//! Provides:
//! - HTTP transport streaming newline-delimited JSON events
//! - Replay transport for recorded event sequences (offline runs, tests)

pub mod http;
pub mod replay;
pub mod wire;

pub use http::HttpTransport;
pub use replay::{ReplayStep, ReplayTransport};
pub use wire::{decode_line, LineDecoder, WireEvent};

use crate::event::EventStream;
use crate::model::ExecutionRequest;

/// Submits one attempt.
///
/// The returned stream is the subscription: dropping it unsubscribes, and
/// events the transport produces afterwards are never observed.
pub trait Transport: Send + Sync {
    fn submit(&self, request: &ExecutionRequest) -> EventStream;
}
