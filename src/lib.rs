//! liverun - live script executions against a remote cluster
//!
//! A library for running scripts on a cluster and keeping one consistent view
//! of their results:
//! - Submission with readiness checks and deferred execution
//! - Streamed partial results folded into a shared result sink
//! - Mutation scripts that wait for the cluster with a retry budget
//! - Cancellation and supersession without stale results
//! - Error classification with a user-triggered retry

pub mod collab;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod model;
pub mod notifications;
pub mod report;
pub mod results;
pub mod script;
pub mod sink;
pub mod transport;
pub mod vis;
pub mod watcher;

pub use collab::{ClusterResolver, Navigator, Resolution, ScriptCatalog, StaticCatalog, StaticCluster};
pub use error::{OrchestratorError, TransportError, VisError};
pub use event::{CancelHandle, EventStream, StreamEvent};
pub use execution::{ExecutionOrchestrator, ExecutionPhase, Input, OrchestratorHandle, RetryConfig, RetryState};
pub use model::{ArgValue, Args, ClusterConfig, ExecutionRequest, Script};
pub use results::{ErrorOrigin, ExecutionResults, QueryError};
pub use sink::{ResultSink, ResultStore, Results};
pub use transport::{HttpTransport, ReplayTransport, Transport};
