//! Error types for the execution core.
//!
//! Expected runtime failures (bad vis specs, rejected arguments, server errors)
//! never travel through these types: they are folded into the result sink as
//! [`QueryError`](crate::results::QueryError) values. What remains here are
//! contract violations and collaborator failures.

/// The result type used by the orchestrator's control surface.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that abort the caller of the control surface.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// `execute()` was reached with every dependency resolved but no transport attached.
    #[error("tried to execute a script before a transport was attached")]
    TransportUnavailable,
}

/// Errors raised while parsing a vis spec.
#[derive(Debug, thiserror::Error)]
pub enum VisError {
    /// The vis text is not valid JSON or does not match the vis schema.
    #[error("{0}")]
    Malformed(#[from] serde_json::Error),

    /// Two variables share the same name.
    #[error("duplicate variable: {name}")]
    DuplicateVariable {
        /// The repeated variable name.
        name: String,
    },
}

/// Errors raised by transports before a stream exists.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A replay file could not be decoded.
    #[error("invalid replay line {line}: {source}")]
    InvalidReplay {
        /// 1-based line number in the replay input.
        line: usize,
        /// The decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
