//! Result payloads carried by execution events and accumulated in the sink

use serde::{Deserialize, Serialize};
use std::fmt;

/// gRPC status code the cluster uses while a mutation's schema is not ready
pub const STATUS_UNAVAILABLE: i32 = 14;

/// An ordered batch of rows for one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    #[serde(default)]
    pub rows: Vec<serde_json::Value>,
}

impl RowBatch {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// A batch addressed to a table, as delivered by `data` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBatch {
    pub id: String,
    pub name: String,
    pub batch: RowBatch,
}

/// Accumulated rows of one output table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub batches: Vec<RowBatch>,
}

impl Table {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RowBatch::num_rows).sum()
    }
}

/// Execution statistics. Their presence marks a completed attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    #[serde(default)]
    pub bytes_processed: u64,
    #[serde(default)]
    pub records_processed: u64,
    #[serde(default)]
    pub execution_time_ns: u64,
    #[serde(default)]
    pub compilation_time_ns: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Progress of a mutation on the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationInfo {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub states: Vec<MutationState>,
}

impl MutationInfo {
    /// The mutation's schema is not ready yet; an expected interim state
    pub fn is_unavailable(&self) -> bool {
        self.status.code == STATUS_UNAVAILABLE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationState {
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub name: String,
}

/// Progressive execution facts carried by metadata/status/stats events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResults {
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub execution_stats: Option<ExecutionStats>,
    #[serde(default)]
    pub mutation_info: Option<MutationInfo>,
}

/// Where a query error originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorOrigin {
    /// Malformed vis spec or rejected arguments; detected before submission
    Client,
    /// Reported by the cluster or the transport after submission
    Server,
    Unknown,
}

impl ErrorOrigin {
    /// Server-caused or unclassified errors may succeed when run again
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorOrigin::Client)
    }
}

/// An error folded into the result sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryError {
    #[serde(default = "unknown_origin")]
    pub origin: ErrorOrigin,
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
}

fn unknown_origin() -> ErrorOrigin {
    ErrorOrigin::Unknown
}

impl QueryError {
    pub fn new(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorOrigin::Client, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorOrigin::Server, message)
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for detail in &self.details {
            write!(f, "\n  {}", detail)?;
        }
        Ok(())
    }
}
