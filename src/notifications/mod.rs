//! Notifications module
//!
//! Provides:
//! - Telemetry: named events with attributes (query execution outcomes)
//! - Notices: dismissible user-facing messages with an optional action
//! - Webhook delivery of telemetry events

mod webhook;

pub use webhook::*;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Name of the event recorded for every finished attempt
pub const QUERY_EXECUTION_EVENT: &str = "Query Execution";

/// Event attributes
pub type Attributes = BTreeMap<String, String>;

/// Records named events. Fire-and-forget.
pub trait Telemetry: Send + Sync {
    fn track(&self, event: &str, attributes: Attributes);
}

/// Shows notices to the user. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// An action attached to a notice (e.g. "Retry")
#[derive(Clone)]
pub struct NoticeAction {
    pub title: String,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl NoticeAction {
    pub fn new(title: impl Into<String>, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            title: title.into(),
            callback: Arc::new(callback),
        }
    }

    pub fn invoke(&self) {
        (self.callback)()
    }
}

impl fmt::Debug for NoticeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoticeAction").field("title", &self.title).finish()
    }
}

/// A dismissible notice
#[derive(Debug, Clone)]
pub struct Notice {
    pub message: String,
    pub action: Option<NoticeAction>,
    pub auto_hide: Duration,
}

/// Telemetry written to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn track(&self, event: &str, attributes: Attributes) {
        tracing::info!(event, ?attributes, "telemetry");
    }
}

/// Notices written to the log; actions are never invoked
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        tracing::warn!(
            message = %notice.message,
            action = notice.action.as_ref().map(|a| a.title.as_str()),
            "notice"
        );
    }
}

/// Fans one event out to several telemetry sinks
#[derive(Clone, Default)]
pub struct TelemetryFanout {
    sinks: Vec<Arc<dyn Telemetry>>,
}

impl TelemetryFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Telemetry>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Telemetry for TelemetryFanout {
    fn track(&self, event: &str, attributes: Attributes) {
        for sink in &self.sinks {
            sink.track(event, attributes.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl Telemetry for Recording {
        fn track(&self, event: &str, _attributes: Attributes) {
            self.0.lock().unwrap().push(event.to_string());
        }
    }

    #[test]
    fn test_notice_action_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let action = NoticeAction::new("Retry", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        action.clone().invoke();
        action.invoke();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let fanout = TelemetryFanout::new().with(a.clone()).with(b.clone());

        fanout.track(QUERY_EXECUTION_EVENT, Attributes::new());

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap()[0], QUERY_EXECUTION_EVENT);
    }
}
