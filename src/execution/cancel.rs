//! Holder of the single live cancellation capability

use crate::event::CancelHandle;
use crate::execution::retry::RetryScheduler;
use crate::sink::ResultSink;

/// Owns the capability of the current attempt.
///
/// Two release paths:
/// - [`cancel`](Self::cancel): the user stopped the execution; every execution
///   flag is reset.
/// - [`teardown`](Self::teardown): the attempt is being replaced or the owner
///   is going away; only the stream is stopped, streaming/mutation/retry state
///   is left for whatever comes next.
#[derive(Debug, Default)]
pub struct CancellationManager {
    active: Option<CancelHandle>,
}

impl CancellationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the capability of the attempt that just started
    pub fn activate(&mut self, handle: CancelHandle) {
        if let Some(previous) = self.active.replace(handle) {
            previous.cancel();
        }
    }

    /// Forget the capability without invoking it (the attempt completed)
    pub fn release(&mut self) {
        self.active = None;
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Stop the stream only. Returns whether a capability was held.
    pub fn teardown(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop the stream and reset mutation, retry, loading and streaming state.
    /// Returns whether a capability was held.
    pub fn cancel(&mut self, sink: &dyn ResultSink, retry: &mut RetryScheduler) -> bool {
        let held = self.teardown();
        retry.reset();
        sink.set_streaming(false);
        sink.set_loading(false);
        held
    }
}
