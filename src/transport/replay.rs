//! Replays recorded event sequences instead of talking to a cluster

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use super::wire::{decode_line, WireEvent};
use super::Transport;
use crate::error::TransportError;
use crate::event::{CancelHandle, EventStream, StreamEvent};
use crate::model::ExecutionRequest;

/// One step of a recorded attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplayStep {
    /// Pause before the next step
    Delay { delay_ms: u64 },
    /// Keep the stream open until the attempt is cancelled
    Hold { hold: bool },
    Event(WireEvent),
}

impl ReplayStep {
    pub fn delay(duration: Duration) -> Self {
        ReplayStep::Delay {
            delay_ms: duration.as_millis() as u64,
        }
    }

    pub fn hold() -> Self {
        ReplayStep::Hold { hold: true }
    }
}

impl From<WireEvent> for ReplayStep {
    fn from(event: WireEvent) -> Self {
        ReplayStep::Event(event)
    }
}

/// Serves one queued script per submission; once the queue is drained the
/// last script is served again.
#[derive(Debug, Default)]
pub struct ReplayTransport {
    scripts: Mutex<VecDeque<Vec<ReplayStep>>>,
    last: Mutex<Option<Vec<ReplayStep>>>,
    submissions: Mutex<Vec<ExecutionRequest>>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, steps: Vec<ReplayStep>) -> Self {
        self.push_script(steps);
        self
    }

    pub fn push_script(&self, steps: Vec<ReplayStep>) {
        lock(&self.scripts).push_back(steps);
    }

    /// A transport serving the steps recorded in `text`, one JSON object per line
    pub fn from_ndjson(text: &str) -> Result<Self, TransportError> {
        Ok(Self::new().with_script(parse_steps(text)?))
    }

    /// Every request submitted so far
    pub fn submissions(&self) -> Vec<ExecutionRequest> {
        lock(&self.submissions).clone()
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.submissions).len()
    }

    fn next_script(&self) -> Vec<ReplayStep> {
        let mut last = lock(&self.last);
        match lock(&self.scripts).pop_front() {
            Some(script) => {
                *last = Some(script.clone());
                script
            }
            None => last.clone().unwrap_or_default(),
        }
    }
}

impl Transport for ReplayTransport {
    fn submit(&self, request: &ExecutionRequest) -> EventStream {
        lock(&self.submissions).push(request.clone());

        let wake = Arc::new(Notify::new());
        let waker = wake.clone();
        let state = ReplayState {
            steps: self.next_script().into(),
            cancel: CancelHandle::new(move || waker.notify_one()),
            wake,
            done: false,
        };

        futures::stream::unfold(state, next_step).boxed()
    }
}

struct ReplayState {
    steps: VecDeque<ReplayStep>,
    cancel: CancelHandle,
    wake: Arc<Notify>,
    done: bool,
}

async fn next_step(mut state: ReplayState) -> Option<(StreamEvent, ReplayState)> {
    loop {
        if state.done {
            return None;
        }
        if state.cancel.is_cancelled() {
            state.done = true;
            return Some((StreamEvent::Cancel, state));
        }

        match state.steps.pop_front()? {
            ReplayStep::Delay { delay_ms } => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                    _ = state.wake.notified() => {}
                }
            }
            ReplayStep::Hold { .. } => state.wake.notified().await,
            ReplayStep::Event(event) => {
                state.done = event.is_terminal();
                let event = event.into_event(&state.cancel);
                return Some((event, state));
            }
        }
    }
}

/// Parse recorded steps, one JSON object per line
pub fn parse_steps(text: &str) -> Result<Vec<ReplayStep>, TransportError> {
    let mut steps = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let step = match serde_json::from_str::<ReplayStep>(line) {
            Ok(step) => step,
            // Re-decode as an event to report the precise failure
            Err(_) => match decode_line(line) {
                Ok(Some(event)) => ReplayStep::Event(event),
                Ok(None) => continue,
                Err(source) => return Err(TransportError::InvalidReplay { line: i + 1, source }),
            },
        };
        steps.push(step);
    }
    Ok(steps)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
