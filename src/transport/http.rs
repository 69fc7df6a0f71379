//! HTTP transport: POSTs the script and reads newline-delimited JSON events
//! from the streamed response body

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::wire::{decode_line, LineDecoder, WireEvent};
use super::Transport;
use crate::error::TransportError;
use crate::event::{CancelHandle, EventStream, StreamEvent};
use crate::model::{ClusterConfig, ExecutionRequest, QueryFunc};
use crate::results::QueryError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteBody<'a> {
    request_id: String,
    cluster_id: &'a str,
    code: &'a str,
    query_funcs: &'a [QueryFunc],
}

/// Talks to the cluster API (or a passthrough proxy) over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("liverun/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: None,
        })
    }

    /// Bearer token sent when the cluster config asks for credentials
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn execute_url(&self, cluster: &ClusterConfig) -> String {
        match &cluster.passthrough_address {
            Some(address) => format!("{}/api/execute", address.trim_end_matches('/')),
            None => format!(
                "{}/clusters/{}/execute",
                self.endpoint.trim_end_matches('/'),
                cluster.id
            ),
        }
    }

    fn build_request(&self, request: &ExecutionRequest) -> reqwest::RequestBuilder {
        let body = ExecuteBody {
            request_id: request.id.to_string(),
            cluster_id: &request.cluster.id,
            code: &request.code,
            query_funcs: &request.query_funcs,
        };

        let mut builder = self
            .client
            .post(self.execute_url(&request.cluster))
            .header("X-Request-Id", request.id.to_string())
            .json(&body);

        if request.cluster.attach_credentials {
            if let Some(ref token) = self.token {
                builder = builder.bearer_auth(token);
            }
        }

        builder
    }
}

impl Transport for HttpTransport {
    fn submit(&self, request: &ExecutionRequest) -> EventStream {
        let (tx, rx) = mpsc::unbounded();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let cancel = CancelHandle::new(move || {
            let _ = stop_tx.send(());
        });
        let _ = tx.unbounded_send(StreamEvent::Start(cancel));

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let _ = tx.unbounded_send(error_event(QueryError::server(
                "no async runtime available to submit the request",
            )));
            return rx.boxed();
        };

        let builder = self.build_request(request);
        let cancelled_tx = tx.clone();
        tracing::debug!(request_id = %request.id, cluster = %request.cluster.id, "submitting script");

        let task = runtime.spawn(async move {
            tokio::select! {
                Ok(()) = stop_rx => {
                    let _ = cancelled_tx.unbounded_send(StreamEvent::Cancel);
                }
                _ = pump_events(builder, tx) => {}
            }
        });

        Box::pin(ResponseStream {
            events: rx,
            task: task.abort_handle(),
        })
    }
}

/// Event stream that stops its reader task when dropped
struct ResponseStream {
    events: UnboundedReceiver<StreamEvent>,
    task: AbortHandle,
}

impl Stream for ResponseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn pump_events(request: reqwest::RequestBuilder, tx: UnboundedSender<StreamEvent>) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.unbounded_send(error_event(QueryError::server(format!("Request failed: {}", e))));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let _ = tx.unbounded_send(error_event(QueryError::server(format!(
            "Cluster returned {}: {}",
            status,
            body.trim()
        ))));
        return;
    }

    let detached = CancelHandle::noop();
    let mut decoder = LineDecoder::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.unbounded_send(error_event(QueryError::server(format!("Stream interrupted: {}", e))));
                return;
            }
        };

        for line in decoder.push(&chunk) {
            if !forward_line(&line, &tx, &detached) {
                return;
            }
        }
    }

    if let Some(rest) = decoder.finish() {
        forward_line(&rest, &tx, &detached);
    }
}

/// Forward one decoded line; false once the stream should stop
fn forward_line(line: &str, tx: &UnboundedSender<StreamEvent>, detached: &CancelHandle) -> bool {
    match decode_line(line) {
        Ok(None) | Ok(Some(WireEvent::Start)) => true,
        Ok(Some(event)) => {
            let terminal = event.is_terminal();
            tx.unbounded_send(event.into_event(detached)).is_ok() && !terminal
        }
        Err(e) => {
            let _ = tx.unbounded_send(error_event(QueryError::server(format!("Malformed event from cluster: {}", e))));
            false
        }
    }
}

fn error_event(error: QueryError) -> StreamEvent {
    StreamEvent::Error {
        errors: vec![error],
        query_id: None,
    }
}
