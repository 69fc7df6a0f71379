//! Execution events and the cancellation capability they carry

use futures::stream::BoxStream;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::results::{ExecutionResults, QueryError, TableBatch};

/// Ordered events of one attempt, as produced by a transport
pub type EventStream = BoxStream<'static, StreamEvent>;

type CancelFn = Box<dyn FnOnce() + Send>;

struct CancelInner {
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<CancelFn>>,
}

/// Stops one attempt's stream on the transport side.
///
/// Cloning shares the capability. Only the first `cancel()` runs the callback;
/// later calls, including calls after the attempt completed, do nothing.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    pub fn new(on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(Some(Box::new(on_cancel))),
            }),
        }
    }

    /// A capability with nothing to stop
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let callback = self
            .inner
            .on_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One event of an attempt's stream.
///
/// `Start` always comes first. A `Stats`-bearing update, an `Error` or a
/// `Cancel` ends the attempt.
#[derive(Debug)]
pub enum StreamEvent {
    /// The attempt is established on the cluster
    Start(CancelHandle),
    /// Row batches, in emission order
    Data(Vec<TableBatch>),
    Metadata(ExecutionResults),
    MutationInfo(ExecutionResults),
    Status(ExecutionResults),
    Stats(ExecutionResults),
    /// The attempt failed. Transports may report several errors; the first one wins.
    Error {
        errors: Vec<QueryError>,
        query_id: Option<String>,
    },
    /// The stream ended because the attempt was cancelled deliberately
    Cancel,
}

impl StreamEvent {
    /// Event name used in logs and on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Start(_) => "start",
            StreamEvent::Data(_) => "data",
            StreamEvent::Metadata(_) => "metadata",
            StreamEvent::MutationInfo(_) => "mutation-info",
            StreamEvent::Status(_) => "status",
            StreamEvent::Stats(_) => "stats",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Cancel => "cancel",
        }
    }
}
