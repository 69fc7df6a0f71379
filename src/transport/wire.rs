//! Newline-delimited JSON encoding of execution events

use serde::{Deserialize, Serialize};

use crate::event::{CancelHandle, StreamEvent};
use crate::results::{ExecutionResults, QueryError, TableBatch};

/// An event as it appears on the wire, one JSON object per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireEvent {
    Start,
    Data {
        #[serde(default)]
        tables: Vec<TableBatch>,
    },
    Metadata(ExecutionResults),
    MutationInfo(ExecutionResults),
    Status(ExecutionResults),
    Stats(ExecutionResults),
    Error {
        #[serde(default)]
        errors: Vec<QueryError>,
        #[serde(default, rename = "queryId")]
        query_id: Option<String>,
    },
    Cancel,
}

impl WireEvent {
    /// Attach the attempt's cancellation capability where the event needs one
    pub fn into_event(self, cancel: &CancelHandle) -> StreamEvent {
        match self {
            WireEvent::Start => StreamEvent::Start(cancel.clone()),
            WireEvent::Data { tables } => StreamEvent::Data(tables),
            WireEvent::Metadata(results) => StreamEvent::Metadata(results),
            WireEvent::MutationInfo(results) => StreamEvent::MutationInfo(results),
            WireEvent::Status(results) => StreamEvent::Status(results),
            WireEvent::Stats(results) => StreamEvent::Stats(results),
            WireEvent::Error { errors, query_id } => StreamEvent::Error { errors, query_id },
            WireEvent::Cancel => StreamEvent::Cancel,
        }
    }

    /// Whether the event ends an attempt
    pub fn is_terminal(&self) -> bool {
        match self {
            WireEvent::Metadata(results)
            | WireEvent::MutationInfo(results)
            | WireEvent::Status(results)
            | WireEvent::Stats(results) => results.execution_stats.is_some(),
            WireEvent::Error { .. } | WireEvent::Cancel => true,
            WireEvent::Start | WireEvent::Data { .. } => false,
        }
    }
}

/// Decode one line; blank lines carry no event
pub fn decode_line(line: &str) -> Result<Option<WireEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Splits a byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and take every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream ends
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
