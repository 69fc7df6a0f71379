//! Top-level execution controller.
//!
//! [`ExecutionOrchestrator`] owns every piece of mutable execution state and is
//! driven one [`Input`] at a time, either directly through its methods or from
//! [`run`](ExecutionOrchestrator::run), which multiplexes control commands, the
//! current attempt's event stream, the retry timer and dependency changes.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::collab::{ClusterResolver, Navigator, NullNavigator, Resolution, ScriptCatalog, StaticCatalog};
use crate::error::{OrchestratorError, Result};
use crate::event::{EventStream, StreamEvent};
use crate::execution::cancel::CancellationManager;
use crate::execution::dispatcher::{AttemptContext, Dispatch, FailureNotice, StreamEventDispatcher};
use crate::execution::retry::{RetryConfig, RetryScheduler, RetryState, TickOutcome};
use crate::model::{Args, ClusterConfig, ExecutionRequest, ParsedScript, Script};
use crate::notifications::{
    Attributes, LogNotifier, LogTelemetry, NoticeAction, Notifier, Telemetry, QUERY_EXECUTION_EVENT,
};
use crate::results::{ErrorOrigin, QueryError};
use crate::script::{contains_mutation, is_streaming};
use crate::sink::{ResultSink, ResultsUpdate};
use crate::transport::Transport;
use crate::vis::{args_for_vis, JsonVis, VisContract};

/// How long a retry notice stays up by default
pub const DEFAULT_NOTICE_AUTO_HIDE: Duration = Duration::from_secs(5);

/// Where the current (or last) execution stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    Submitting,
    Streaming,
    MutationPending,
    Completed,
    Failed,
    Cancelled,
    /// The retry budget ran out while the mutation was still pending
    TimedOut,
}

impl ExecutionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionPhase::Completed | ExecutionPhase::Failed | ExecutionPhase::Cancelled | ExecutionPhase::TimedOut
        )
    }
}

/// Everything that can move the orchestrator
#[derive(Debug)]
pub enum Input {
    ExecuteRequested,
    CancelRequested,
    SelectionChanged { script: Script, args: Args, manual: bool },
    /// The catalog or cluster may have finished loading
    DependenciesChanged,
    StreamEvent { seq: u64, event: StreamEvent },
    StreamClosed { seq: u64 },
    RetryTick { seq: u64 },
    Shutdown,
}

/// Cheap, cloneable control surface for a running orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl OrchestratorHandle {
    /// Queue an input. Returns false once the orchestrator is gone.
    pub fn send(&self, input: Input) -> bool {
        self.tx.send(input).is_ok()
    }

    pub fn execute(&self) -> bool {
        self.send(Input::ExecuteRequested)
    }

    pub fn cancel(&self) -> bool {
        self.send(Input::CancelRequested)
    }

    pub fn set_script_and_args(&self, script: Script, args: Args) -> bool {
        self.send(Input::SelectionChanged {
            script,
            args,
            manual: false,
        })
    }

    pub fn set_script_and_args_manually(&self, script: Script, args: Args) -> bool {
        self.send(Input::SelectionChanged {
            script,
            args,
            manual: true,
        })
    }

    pub fn refresh(&self) -> bool {
        self.send(Input::DependenciesChanged)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Input::Shutdown)
    }
}

/// Builder for [`ExecutionOrchestrator`]
pub struct OrchestratorBuilder {
    cluster: Arc<dyn ClusterResolver>,
    sink: Arc<dyn ResultSink>,
    transport: Option<Arc<dyn Transport>>,
    catalog: Arc<dyn ScriptCatalog>,
    vis: Arc<dyn VisContract>,
    navigator: Arc<dyn Navigator>,
    telemetry: Arc<dyn Telemetry>,
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
    notice_auto_hide: Duration,
}

impl OrchestratorBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ScriptCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn vis(mut self, vis: Arc<dyn VisContract>) -> Self {
        self.vis = vis;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn notice_auto_hide(mut self, auto_hide: Duration) -> Self {
        self.notice_auto_hide = auto_hide;
        self
    }

    pub fn build(self) -> ExecutionOrchestrator {
        let (tx, commands) = mpsc::unbounded_channel();
        let handle = OrchestratorHandle { tx };

        let dependencies = [self.catalog.subscribe(), self.cluster.subscribe()]
            .into_iter()
            .flatten()
            .collect();

        let retry_handle = handle.clone();
        let retry_action = NoticeAction::new("Retry", move || {
            retry_handle.execute();
        });

        ExecutionOrchestrator {
            cluster: self.cluster,
            sink: self.sink,
            transport: self.transport,
            catalog: self.catalog,
            vis: self.vis,
            navigator: self.navigator,
            telemetry: self.telemetry,
            notifier: self.notifier,
            notice_auto_hide: self.notice_auto_hide,
            retry_action,
            handle,
            commands,
            dependencies,
            script: None,
            args: Args::new(),
            manual: false,
            pending_selection: None,
            pending_execution: false,
            phase: ExecutionPhase::Idle,
            seq: 0,
            attempt: None,
            request: None,
            stream: None,
            cancellation: CancellationManager::new(),
            retry: RetryScheduler::new(self.retry),
        }
    }
}

/// Single owner of execution state
pub struct ExecutionOrchestrator {
    cluster: Arc<dyn ClusterResolver>,
    sink: Arc<dyn ResultSink>,
    transport: Option<Arc<dyn Transport>>,
    catalog: Arc<dyn ScriptCatalog>,
    vis: Arc<dyn VisContract>,
    navigator: Arc<dyn Navigator>,
    telemetry: Arc<dyn Telemetry>,
    notifier: Arc<dyn Notifier>,
    notice_auto_hide: Duration,
    retry_action: NoticeAction,
    handle: OrchestratorHandle,
    commands: mpsc::UnboundedReceiver<Input>,
    dependencies: Vec<watch::Receiver<()>>,

    script: Option<ParsedScript>,
    args: Args,
    manual: bool,
    pending_selection: Option<(String, Args)>,
    pending_execution: bool,

    phase: ExecutionPhase,
    seq: u64,
    attempt: Option<AttemptContext>,
    request: Option<ExecutionRequest>,
    stream: Option<EventStream>,
    cancellation: CancellationManager,
    retry: RetryScheduler,
}

impl ExecutionOrchestrator {
    /// Start building an orchestrator; the cluster and the sink are the only
    /// collaborators without a default.
    pub fn builder(cluster: Arc<dyn ClusterResolver>, sink: Arc<dyn ResultSink>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            cluster,
            sink,
            transport: None,
            catalog: Arc::new(StaticCatalog::new()),
            vis: Arc::new(JsonVis),
            navigator: Arc::new(NullNavigator),
            telemetry: Arc::new(LogTelemetry),
            notifier: Arc::new(LogNotifier),
            retry: RetryConfig::default(),
            notice_auto_hide: DEFAULT_NOTICE_AUTO_HIDE,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    pub fn script(&self) -> Option<&ParsedScript> {
        self.script.as_ref()
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn manual(&self) -> bool {
        self.manual
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry.state()
    }

    /// Whether an `execute()` is waiting for dependencies
    pub fn has_pending_execution(&self) -> bool {
        self.pending_execution
    }

    /// Nothing is in flight and nothing is waiting to start
    pub fn is_settled(&self) -> bool {
        self.stream.is_none() && self.retry.deadline().is_none() && !self.pending_execution
    }

    pub fn set_script_and_args(&mut self, script: Script, args: Args) {
        self.select(script, args, false);
    }

    /// Same as [`set_script_and_args`](Self::set_script_and_args), but marks the
    /// selection as user-initiated so mutations get a retry budget.
    pub fn set_script_and_args_manually(&mut self, script: Script, args: Args) {
        self.select(script, args, true);
    }

    fn select(&mut self, script: Script, args: Args, manual: bool) {
        let script = ParsedScript::from(script);
        let args = args_for_vis(&script.vis, &args);

        self.navigator
            .push(&self.cluster.cluster_name(), &script.id, &args);
        tracing::debug!(script = %script.id, manual, "selection changed");

        self.pending_selection = None;
        self.script = Some(script);
        self.args = args;
        self.manual = manual;
    }

    /// Select a script by id from the catalog. If the catalog is still loading
    /// the selection is remembered and resolved on [`refresh`](Self::refresh).
    /// Returns whether the script was selected now.
    pub fn select_from_catalog(&mut self, script_id: impl Into<String>, args: Args) -> bool {
        self.pending_selection = Some((script_id.into(), args));
        self.resolve_selection()
    }

    fn resolve_selection(&mut self) -> bool {
        if !self.catalog.is_loaded() {
            return false;
        }
        let Some((id, args)) = self.pending_selection.take() else {
            return false;
        };
        match self.catalog.get(&id) {
            Some(script) => {
                self.set_script_and_args(script, args);
                true
            }
            None => {
                tracing::warn!(script = %id, "script not found in catalog");
                false
            }
        }
    }

    /// Re-check dependencies and run a deferred execution if they are ready.
    /// [`run`](Self::run) calls this on its own when the catalog or the cluster
    /// signal a change.
    pub fn refresh(&mut self) -> Result<()> {
        tracing::debug!(pending = self.pending_execution, "re-checking dependencies");
        self.resolve_selection();
        if self.pending_execution {
            self.execute()?;
        }
        Ok(())
    }

    fn readiness(&self) -> Option<ClusterConfig> {
        if !self.catalog.is_loaded() || self.script.is_none() {
            return None;
        }
        match self.cluster.resolve() {
            Resolution::Ready(cluster) => Some(cluster),
            Resolution::Loading | Resolution::Missing => None,
        }
    }

    /// Execute the selected script.
    ///
    /// Defers until the catalog, the cluster and the selection are resolved.
    /// Client-side failures land in the sink; the only error returned is a
    /// missing transport.
    pub fn execute(&mut self) -> Result<()> {
        let Some(cluster) = self.readiness() else {
            tracing::debug!("dependencies not ready, deferring execution");
            self.pending_execution = true;
            return Ok(());
        };
        self.pending_execution = false;

        let transport = self.transport.clone().ok_or(OrchestratorError::TransportUnavailable)?;
        let Some(script) = self.script.clone() else {
            return Ok(());
        };

        self.supersede();

        let vis = match self.vis.parse(&script.vis_text) {
            Ok(vis) => vis,
            Err(e) => {
                self.fail_before_submit(QueryError::client(format!("While parsing vis spec: {}", e)));
                return Ok(());
            }
        };
        if let Some(error) = self.vis.validate_args(&vis, &self.args) {
            self.fail_before_submit(error);
            return Ok(());
        }

        let has_mutation = contains_mutation(&script.code);
        let streaming = is_streaming(&script.code);
        let tries = self.retry.config().initial_tries(has_mutation, self.manual);
        let request = ExecutionRequest::new(cluster, script.code.clone(), self.vis.query_funcs(&vis, &self.args));

        self.sink.clear_results();
        self.sink.set_loading(true);
        self.sink.set_streaming(streaming);

        if !self.retry.arm(tries, has_mutation) {
            tracing::debug!(script = %script.id, "mutation not started by the user, skipping submission");
            self.sink.set_loading(false);
            self.sink.set_streaming(false);
            self.phase = ExecutionPhase::Idle;
            return Ok(());
        }

        tracing::info!(
            seq = self.seq,
            script = %script.id,
            request_id = %request.id,
            mutation = has_mutation,
            streaming,
            "submitting execution"
        );

        self.stream = Some(transport.submit(&request));
        self.attempt = Some(AttemptContext {
            seq: self.seq,
            script_id: script.id,
            code: script.code,
            has_mutation,
            streaming,
        });
        self.request = Some(request);
        self.phase = ExecutionPhase::Submitting;

        Ok(())
    }

    /// Stop the current execution, if any, and reset every execution flag
    pub fn cancel_execution(&mut self) {
        if self.attempt.is_none() && !self.cancellation.is_active() {
            return;
        }

        self.cancellation.cancel(self.sink.as_ref(), &mut self.retry);
        self.stream = None;
        self.attempt = None;
        self.request = None;
        self.pending_execution = false;
        self.phase = ExecutionPhase::Cancelled;
        tracing::info!(seq = self.seq, "execution cancelled");
    }

    /// Tear the current attempt down and open a new sequence number
    fn supersede(&mut self) {
        if self.cancellation.teardown() {
            tracing::debug!(seq = self.seq, "superseding running attempt");
        }
        self.stream = None;
        self.attempt = None;
        self.request = None;
        self.retry.disarm();
        self.seq += 1;
    }

    fn fail_before_submit(&mut self, error: QueryError) {
        tracing::debug!(error = %error, "execution rejected before submission");
        self.sink.set_results(ResultsUpdate::error(error));
        self.sink.set_loading(false);
        self.sink.set_streaming(false);
        self.retry.reset();
        self.phase = ExecutionPhase::Failed;
    }

    /// Re-issue the current request without resetting the sink
    fn resubmit(&mut self) {
        let (Some(transport), Some(request)) = (self.transport.clone(), self.request.clone()) else {
            return;
        };

        self.cancellation.teardown();
        self.seq += 1;
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.seq = self.seq;
        }

        tracing::debug!(seq = self.seq, remaining = self.retry.remaining(), "resubmitting pending mutation");
        self.stream = Some(transport.submit(&request));
        self.phase = ExecutionPhase::Submitting;
    }

    fn is_current(&self, seq: u64) -> bool {
        seq == self.seq && self.attempt.is_some()
    }

    /// Fold one event of attempt `seq`
    pub fn handle_stream_event(&mut self, seq: u64, event: StreamEvent) {
        if !self.is_current(seq) {
            tracing::trace!(seq, current = self.seq, kind = event.kind(), "dropping stale event");
            return;
        }
        let Some(attempt) = self.attempt.as_ref() else {
            return;
        };

        let _span = tracing::debug_span!("attempt", seq).entered();
        tracing::trace!(kind = event.kind(), "stream event");

        let outcome = StreamEventDispatcher {
            sink: self.sink.as_ref(),
            cancellation: &mut self.cancellation,
            retry: &mut self.retry,
            telemetry: self.telemetry.as_ref(),
            failure: FailureNotice {
                notifier: self.notifier.as_ref(),
                retry: &self.retry_action,
                auto_hide: self.notice_auto_hide,
            },
            attempt,
        }
        .dispatch(event);

        match outcome {
            Dispatch::Started => self.phase = ExecutionPhase::Streaming,
            Dispatch::Progress => {
                if self.phase == ExecutionPhase::Submitting {
                    self.phase = ExecutionPhase::Streaming;
                }
            }
            Dispatch::MutationPending => self.phase = ExecutionPhase::MutationPending,
            Dispatch::Completed => {
                tracing::info!("execution completed");
                self.finish(ExecutionPhase::Completed);
            }
            Dispatch::Failed { error } => {
                tracing::warn!(origin = ?error.origin, error = %error, "execution failed");
                self.cancellation.release();
                let has_mutation = self.attempt.as_ref().is_some_and(|a| a.has_mutation);
                if has_mutation && self.retry.config().resubmit && self.retry.remaining() > 0 {
                    self.resubmit();
                } else {
                    self.retry.settle();
                    self.finish(ExecutionPhase::Failed);
                }
            }
            Dispatch::Cancelled => {
                self.cancellation.release();
                self.retry.reset();
                self.finish(ExecutionPhase::Cancelled);
            }
        }
    }

    fn finish(&mut self, phase: ExecutionPhase) {
        self.stream = None;
        self.attempt = None;
        self.phase = phase;
    }

    /// The stream of attempt `seq` ended
    pub fn handle_stream_closed(&mut self, seq: u64) {
        if !self.is_current(seq) {
            return;
        }
        self.stream = None;

        if self.retry.deadline().is_some() {
            tracing::debug!(seq, "stream closed while the mutation is pending");
            return;
        }

        self.handle_stream_event(
            seq,
            StreamEvent::Error {
                errors: vec![QueryError::new(
                    ErrorOrigin::Unknown,
                    "Stream closed before the execution finished",
                )],
                query_id: None,
            },
        );
    }

    /// One retry interval elapsed for attempt `seq`
    pub fn on_retry_tick(&mut self, seq: u64) {
        if !self.is_current(seq) {
            return;
        }

        match self.retry.on_tick() {
            TickOutcome::Idle => {}
            TickOutcome::Waiting { remaining } => {
                tracing::debug!(seq, remaining, "mutation still pending");
                if self.retry.config().resubmit {
                    self.resubmit();
                }
            }
            TickOutcome::Exhausted => self.time_out(),
        }
    }

    fn time_out(&mut self) {
        tracing::warn!(seq = self.seq, "mutation did not complete before the retry budget ran out");
        self.cancellation.teardown();
        self.sink.set_loading(false);
        self.sink.set_streaming(false);

        if let Some(attempt) = self.attempt.as_ref() {
            let mut attributes = Attributes::new();
            attributes.insert("status".to_string(), "timeout".to_string());
            attributes.insert("query".to_string(), attempt.code.clone());
            attributes.insert("title".to_string(), attempt.script_id.clone());
            self.telemetry.track(QUERY_EXECUTION_EVENT, attributes);
        }

        self.finish(ExecutionPhase::TimedOut);
    }

    /// Apply one input. Returns false on shutdown.
    pub fn dispatch(&mut self, input: Input) -> Result<bool> {
        match input {
            Input::ExecuteRequested => self.execute()?,
            Input::CancelRequested => self.cancel_execution(),
            Input::SelectionChanged { script, args, manual } => self.select(script, args, manual),
            Input::DependenciesChanged => self.refresh()?,
            Input::StreamEvent { seq, event } => self.handle_stream_event(seq, event),
            Input::StreamClosed { seq } => self.handle_stream_closed(seq),
            Input::RetryTick { seq } => self.on_retry_tick(seq),
            Input::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    /// Wait for the next input from any source. Dependency changes only count
    /// while something is waiting on them.
    pub async fn next_input(&mut self) -> Input {
        let seq = self.seq;
        let deadline = self.retry.deadline();
        let waiting = self.pending_execution || self.pending_selection.is_some();
        let commands = &mut self.commands;
        let dependencies = &mut self.dependencies;
        let stream = &mut self.stream;

        tokio::select! {
            biased;
            Some(input) = commands.recv() => input,
            _ = sleep_until(deadline) => Input::RetryTick { seq },
            _ = any_changed(dependencies), if waiting => Input::DependenciesChanged,
            event = next_event(stream) => match event {
                Some(event) => Input::StreamEvent { seq, event },
                None => Input::StreamClosed { seq },
            },
            else => Input::Shutdown,
        }
    }

    /// Wait for and apply one input. Returns false on shutdown.
    pub async fn step(&mut self) -> Result<bool> {
        let input = self.next_input().await;
        self.dispatch(input)
    }

    /// Drive the orchestrator until it is shut down
    pub async fn run(mut self) -> Result<()> {
        while self.step().await? {}
        Ok(())
    }

    /// Drive the orchestrator until the current execution reaches a resting
    /// state, then report the phase it ended in
    pub async fn run_until_settled(&mut self) -> Result<ExecutionPhase> {
        while !self.is_settled() {
            if !self.step().await? {
                break;
            }
        }
        Ok(self.phase)
    }
}

impl Drop for ExecutionOrchestrator {
    fn drop(&mut self) {
        self.cancellation.teardown();
    }
}

async fn next_event(stream: &mut Option<EventStream>) -> Option<StreamEvent> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Resolves on the first change seen by any receiver. A closed sender never fires.
async fn any_changed(receivers: &mut [watch::Receiver<()>]) {
    if receivers.is_empty() {
        return std::future::pending().await;
    }

    let changes = receivers.iter_mut().map(|rx| {
        Box::pin(async move {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
    });
    futures::future::select_all(changes).await;
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
