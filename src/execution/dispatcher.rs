//! Folds one attempt's event stream into the result sink

use std::time::Duration;

use crate::event::StreamEvent;
use crate::execution::cancel::CancellationManager;
use crate::execution::retry::RetryScheduler;
use crate::notifications::{Attributes, Notice, NoticeAction, Notifier, Telemetry, QUERY_EXECUTION_EVENT};
use crate::results::{ErrorOrigin, ExecutionResults, QueryError, TableBatch};
use crate::sink::{ResultSink, ResultsUpdate};

/// Facts about the attempt whose events are being folded
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub seq: u64,
    pub script_id: String,
    pub code: String,
    pub has_mutation: bool,
    pub streaming: bool,
}

/// What an event meant for the attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Started,
    Progress,
    /// The mutation's schema is not ready yet
    MutationPending,
    Completed,
    Failed { error: QueryError },
    Cancelled,
}

/// Collaborators for presenting failures
pub struct FailureNotice<'a> {
    pub notifier: &'a dyn Notifier,
    pub retry: &'a NoticeAction,
    pub auto_hide: Duration,
}

pub struct StreamEventDispatcher<'a> {
    pub sink: &'a dyn ResultSink,
    pub cancellation: &'a mut CancellationManager,
    pub retry: &'a mut RetryScheduler,
    pub telemetry: &'a dyn Telemetry,
    pub failure: FailureNotice<'a>,
    pub attempt: &'a AttemptContext,
}

impl StreamEventDispatcher<'_> {
    pub fn dispatch(&mut self, event: StreamEvent) -> Dispatch {
        match event {
            StreamEvent::Start(handle) => {
                self.cancellation.activate(handle);
                Dispatch::Started
            }
            StreamEvent::Data(batches) => self.on_data(batches),
            StreamEvent::Metadata(results)
            | StreamEvent::MutationInfo(results)
            | StreamEvent::Status(results)
            | StreamEvent::Stats(results) => self.on_results(results),
            StreamEvent::Error { errors, query_id } => self.on_error(errors, query_id),
            StreamEvent::Cancel => Dispatch::Cancelled,
        }
    }

    fn on_data(&mut self, batches: Vec<TableBatch>) -> Dispatch {
        self.sink.append_batches(batches);
        // First byte ends "loading" for streaming scripts, not completion
        if self.attempt.streaming {
            self.sink.set_loading(false);
        }
        Dispatch::Progress
    }

    fn on_results(&mut self, results: ExecutionResults) -> Dispatch {
        let ExecutionResults {
            query_id,
            tables,
            execution_stats,
            mutation_info,
        } = results;

        if self.attempt.has_mutation {
            if let Some(info) = mutation_info.filter(|info| info.is_unavailable()) {
                self.sink.set_results(ResultsUpdate::mutation_info(info));
                return Dispatch::MutationPending;
            }
        }

        let completed = execution_stats.is_some();
        if self.attempt.streaming || completed {
            // The update's tables replace whatever the data events accumulated
            let current = self.sink.snapshot();
            self.sink.set_results(ResultsUpdate {
                error: current.error,
                stats: execution_stats,
                mutation_info: current.mutation_info,
                tables: tables.into_iter().map(|table| (table.id.clone(), table)).collect(),
            });
        }

        if !completed {
            return Dispatch::Progress;
        }

        self.cancellation.release();
        self.sink.set_loading(false);
        self.sink.set_streaming(false);
        self.retry.reset();

        let mut attributes = self.attributes(query_id);
        attributes.insert("status".to_string(), "success".to_string());
        self.telemetry.track(QUERY_EXECUTION_EVENT, attributes);

        Dispatch::Completed
    }

    fn on_error(&mut self, errors: Vec<QueryError>, query_id: Option<String>) -> Dispatch {
        let error = errors
            .into_iter()
            .next()
            .unwrap_or_else(|| QueryError::new(ErrorOrigin::Unknown, "Script execution failed"));

        self.sink.set_results(ResultsUpdate::error(error.clone()));
        self.sink.set_loading(false);
        self.sink.set_streaming(false);
        self.retry.record_failure();

        let mut attributes = self.attributes(query_id);
        attributes.insert("status".to_string(), "failed".to_string());
        attributes.insert("error".to_string(), error.message.clone());
        self.telemetry.track(QUERY_EXECUTION_EVENT, attributes);

        if error.origin.is_retryable() {
            self.failure.notifier.notify(Notice {
                message: error.message.clone(),
                action: Some(self.failure.retry.clone()),
                auto_hide: self.failure.auto_hide,
            });
        }

        Dispatch::Failed { error }
    }

    fn attributes(&self, query_id: Option<String>) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("query".to_string(), self.attempt.code.clone());
        attributes.insert("title".to_string(), self.attempt.script_id.clone());
        if let Some(query_id) = query_id {
            attributes.insert("query_id".to_string(), query_id);
        }
        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CancelHandle;
    use crate::execution::retry::RetryConfig;
    use crate::results::{ExecutionStats, MutationInfo, RowBatch, Status, Table, STATUS_UNAVAILABLE};
    use crate::sink::ResultStore;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Attributes>>,
        notices: Mutex<Vec<Notice>>,
    }

    impl Telemetry for Recorder {
        fn track(&self, _event: &str, attributes: Attributes) {
            self.events.lock().unwrap().push(attributes);
        }
    }

    impl Notifier for Recorder {
        fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    struct Harness {
        sink: ResultStore,
        cancellation: CancellationManager,
        retry: RetryScheduler,
        recorder: Recorder,
        action: NoticeAction,
        attempt: AttemptContext,
    }

    impl Harness {
        fn new(has_mutation: bool, streaming: bool) -> Self {
            let mut retry = RetryScheduler::new(RetryConfig::default());
            retry.arm(if has_mutation { 5 } else { 1 }, has_mutation);
            Self {
                sink: ResultStore::new(),
                cancellation: CancellationManager::new(),
                retry,
                recorder: Recorder::default(),
                action: NoticeAction::new("Retry", || {}),
                attempt: AttemptContext {
                    seq: 1,
                    script_id: "script".to_string(),
                    code: "px.display()".to_string(),
                    has_mutation,
                    streaming,
                },
            }
        }

        fn dispatch(&mut self, event: StreamEvent) -> Dispatch {
            StreamEventDispatcher {
                sink: &self.sink,
                cancellation: &mut self.cancellation,
                retry: &mut self.retry,
                telemetry: &self.recorder,
                failure: FailureNotice {
                    notifier: &self.recorder,
                    retry: &self.action,
                    auto_hide: Duration::from_secs(5),
                },
                attempt: &self.attempt,
            }
            .dispatch(event)
        }
    }

    fn data(id: &str, v: i64) -> StreamEvent {
        StreamEvent::Data(vec![TableBatch {
            id: id.to_string(),
            name: id.to_string(),
            batch: RowBatch { rows: vec![json!({ "v": v })] },
        }])
    }

    fn stats(tables: Vec<Table>) -> ExecutionResults {
        ExecutionResults {
            query_id: Some("q-1".to_string()),
            tables,
            execution_stats: Some(ExecutionStats::default()),
            mutation_info: None,
        }
    }

    #[tokio::test]
    async fn test_start_activates_capability() {
        let mut h = Harness::new(false, false);
        assert_eq!(h.dispatch(StreamEvent::Start(CancelHandle::noop())), Dispatch::Started);
        assert!(h.cancellation.is_active());
    }

    #[tokio::test]
    async fn test_data_accumulates_and_streaming_clears_loading() {
        let mut h = Harness::new(false, true);
        h.sink.set_loading(true);

        h.dispatch(data("t", 1));
        h.dispatch(data("t", 2));

        let results = h.sink.snapshot();
        assert!(!results.loading);
        assert_eq!(results.tables["t"].batches.len(), 2);
        assert_eq!(results.tables["t"].batches[1].rows[0]["v"], 2);
    }

    #[tokio::test]
    async fn test_data_keeps_loading_for_batch_scripts() {
        let mut h = Harness::new(false, false);
        h.sink.set_loading(true);
        h.dispatch(data("t", 1));
        assert!(h.sink.snapshot().loading);
    }

    #[tokio::test]
    async fn test_stats_complete_the_attempt() {
        let mut h = Harness::new(false, false);
        h.sink.set_loading(true);
        h.sink.set_streaming(true);
        h.dispatch(StreamEvent::Start(CancelHandle::noop()));
        h.dispatch(data("partial", 1));

        let table = Table {
            id: "out".to_string(),
            name: "out".to_string(),
            batches: vec![RowBatch::default()],
        };
        assert_eq!(h.dispatch(StreamEvent::Status(stats(vec![table]))), Dispatch::Completed);

        let results = h.sink.snapshot();
        assert!(!results.loading);
        assert!(!results.streaming);
        assert!(results.stats.is_some());
        assert_eq!(results.tables.len(), 1);
        assert!(results.tables.contains_key("out"));
        assert!(!h.cancellation.is_active());
        assert_eq!(h.retry.remaining(), 0);

        let events = h.recorder.events.lock().unwrap();
        assert_eq!(events[0]["status"], "success");
        assert_eq!(events[0]["query_id"], "q-1");
        assert_eq!(events[0]["title"], "script");
    }

    #[tokio::test]
    async fn test_unavailable_mutation_publishes_info_only() {
        let mut h = Harness::new(true, false);
        h.dispatch(data("t", 1));

        let info = MutationInfo {
            status: Status {
                code: STATUS_UNAVAILABLE,
                message: "schema not ready".to_string(),
            },
            states: vec![],
        };
        let outcome = h.dispatch(StreamEvent::MutationInfo(ExecutionResults {
            mutation_info: Some(info.clone()),
            execution_stats: Some(ExecutionStats::default()),
            ..Default::default()
        }));

        assert_eq!(outcome, Dispatch::MutationPending);
        let results = h.sink.snapshot();
        assert!(results.tables.is_empty());
        assert_eq!(results.mutation_info, Some(info));
        assert!(results.stats.is_none());
        assert_eq!(h.retry.remaining(), 5);
    }

    #[tokio::test]
    async fn test_progress_without_stats_is_ignored_for_batch_scripts() {
        let mut h = Harness::new(false, false);
        h.dispatch(data("t", 1));
        assert_eq!(h.dispatch(StreamEvent::Metadata(ExecutionResults::default())), Dispatch::Progress);
        assert_eq!(h.sink.snapshot().tables.len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_offers_retry() {
        let mut h = Harness::new(false, false);
        h.sink.set_loading(true);
        h.dispatch(data("t", 1));

        let outcome = h.dispatch(StreamEvent::Error {
            errors: vec![QueryError::server("cluster down"), QueryError::server("ignored")],
            query_id: None,
        });

        assert!(matches!(outcome, Dispatch::Failed { ref error } if error.message == "cluster down"));
        let results = h.sink.snapshot();
        assert!(results.tables.is_empty());
        assert!(!results.loading);
        assert_eq!(results.error.unwrap().message, "cluster down");
        assert_eq!(h.retry.remaining(), 0);

        let notices = h.recorder.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].action.as_ref().unwrap().title, "Retry");
        assert_eq!(h.recorder.events.lock().unwrap()[0]["error"], "cluster down");
    }

    #[tokio::test]
    async fn test_client_error_has_no_retry_notice() {
        let mut h = Harness::new(false, false);
        h.dispatch(StreamEvent::Error {
            errors: vec![QueryError::client("bad vis")],
            query_id: None,
        });
        assert!(h.recorder.notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_error_list_is_unknown_and_retryable() {
        let mut h = Harness::new(false, false);
        let outcome = h.dispatch(StreamEvent::Error {
            errors: vec![],
            query_id: None,
        });
        assert!(matches!(outcome, Dispatch::Failed { ref error } if error.origin == ErrorOrigin::Unknown));
        assert_eq!(h.recorder.notices.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_event_leaves_sink_alone() {
        let mut h = Harness::new(false, false);
        h.sink.set_loading(true);
        h.dispatch(data("t", 1));
        assert_eq!(h.dispatch(StreamEvent::Cancel), Dispatch::Cancelled);
        let results = h.sink.snapshot();
        assert!(results.loading);
        assert_eq!(results.tables.len(), 1);
    }
}
