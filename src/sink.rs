//! Result sink: the shared accumulator the UI observes
//!
//! The sink is owned outside the orchestrator. Exactly one attempt writes to it
//! at a time; the orchestrator guarantees this by dropping a superseded
//! attempt's stream before the next submission, not by locking.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::results::{ExecutionStats, MutationInfo, QueryError, Table, TableBatch};

/// Tables keyed by table id
pub type Tables = BTreeMap<String, Table>;

/// A wholesale replacement of the result fields (flags are set separately)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultsUpdate {
    pub error: Option<QueryError>,
    pub stats: Option<ExecutionStats>,
    pub mutation_info: Option<MutationInfo>,
    pub tables: Tables,
}

impl ResultsUpdate {
    /// A terminal error with tables cleared
    pub fn error(error: QueryError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Mutation progress only, tables cleared
    pub fn mutation_info(info: MutationInfo) -> Self {
        Self {
            mutation_info: Some(info),
            ..Self::default()
        }
    }
}

/// Snapshot of everything the sink holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Results {
    pub error: Option<QueryError>,
    pub stats: Option<ExecutionStats>,
    pub mutation_info: Option<MutationInfo>,
    pub tables: Tables,
    pub loading: bool,
    pub streaming: bool,
}

pub trait ResultSink: Send + Sync {
    /// Replace error, stats, mutation info and tables
    fn set_results(&self, update: ResultsUpdate);

    /// Drop all results of the previous attempt
    fn clear_results(&self);

    fn set_loading(&self, loading: bool);

    fn set_streaming(&self, streaming: bool);

    /// Append batches to their tables, creating unknown tables, then publish
    fn append_batches(&self, batches: Vec<TableBatch>);

    fn snapshot(&self) -> Results;
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct ResultStore {
    state: Mutex<Results>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Results> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResultSink for ResultStore {
    fn set_results(&self, update: ResultsUpdate) {
        let mut state = self.lock();
        state.error = update.error;
        state.stats = update.stats;
        state.mutation_info = update.mutation_info;
        state.tables = update.tables;
    }

    fn clear_results(&self) {
        let mut state = self.lock();
        state.error = None;
        state.stats = None;
        state.mutation_info = None;
        state.tables.clear();
    }

    fn set_loading(&self, loading: bool) {
        self.lock().loading = loading;
    }

    fn set_streaming(&self, streaming: bool) {
        self.lock().streaming = streaming;
    }

    fn append_batches(&self, batches: Vec<TableBatch>) {
        let mut state = self.lock();
        for TableBatch { id, name, batch } in batches {
            state
                .tables
                .entry(id.clone())
                .or_insert_with(|| Table {
                    id,
                    name,
                    batches: Vec::new(),
                })
                .batches
                .push(batch);
        }
    }

    fn snapshot(&self) -> Results {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::RowBatch;
    use serde_json::json;

    fn batch(id: &str, value: i64) -> TableBatch {
        TableBatch {
            id: id.to_string(),
            name: format!("{}_name", id),
            batch: RowBatch { rows: vec![json!({ "v": value })] },
        }
    }

    #[test]
    fn test_append_batches_keeps_arrival_order() {
        let store = ResultStore::new();
        store.append_batches(vec![batch("a", 1), batch("b", 10)]);
        store.append_batches(vec![batch("a", 2)]);

        let results = store.snapshot();
        let a = &results.tables["a"];
        assert_eq!(a.name, "a_name");
        assert_eq!(a.batches[0].rows[0]["v"], 1);
        assert_eq!(a.batches[1].rows[0]["v"], 2);
        assert_eq!(results.tables["b"].num_rows(), 1);
    }

    #[test]
    fn test_clear_results_keeps_flags() {
        let store = ResultStore::new();
        store.set_loading(true);
        store.append_batches(vec![batch("a", 1)]);
        store.set_results(ResultsUpdate::error(QueryError::client("bad")));

        store.clear_results();

        let results = store.snapshot();
        assert!(results.tables.is_empty());
        assert!(results.error.is_none());
        assert!(results.loading);
    }
}
