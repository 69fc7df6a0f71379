//! Execution module for liverun
//!
//! Provides:
//! - The orchestrator state machine and its control handle
//! - Stream event folding into the result sink
//! - Mutation retry budget and wait timer
//! - Cancellation of the live attempt

pub mod cancel;
pub mod dispatcher;
pub mod orchestrator;
pub mod retry;

pub use cancel::CancellationManager;
pub use dispatcher::{AttemptContext, Dispatch, StreamEventDispatcher};
pub use orchestrator::{ExecutionOrchestrator, ExecutionPhase, Input, OrchestratorBuilder, OrchestratorHandle};
pub use retry::{RetryConfig, RetryScheduler, RetryState, TickOutcome};
