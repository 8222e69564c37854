//! Client-side RPC metrics.
//!
//! Recorded through the `metrics` facade; with no recorder installed every
//! call is a no-op.
//!
//! - `waypoint_client_started_total{call_type,service,method}`
//! - `waypoint_client_handled_total{call_type,service,method,code}`
//! - `waypoint_client_handling_seconds{call_type,service,method,code}`
//! - `waypoint_block_until_desired_cursor_reached_seconds{originator_id}`

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use metrics::{counter, histogram};
use waypoint_core::{NodeId, SyncCursorResponse};

use crate::transport::{MetadataApiClient, SyncCursorStream, TransportError};

const STARTED_TOTAL: &str = "waypoint_client_started_total";
const HANDLED_TOTAL: &str = "waypoint_client_handled_total";
const HANDLING_SECONDS: &str = "waypoint_client_handling_seconds";
const CURSOR_REACHED_SECONDS: &str = "waypoint_block_until_desired_cursor_reached_seconds";

pub const SUBSCRIBE_SYNC_CURSOR: &str = "/waypoint.metadata.MetadataApi/SubscribeSyncCursor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    ClientStream,
    ServerStream,
    BidiStream,
}

impl CallKind {
    pub fn name(self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::ClientStream => "client_stream",
            CallKind::ServerStream => "server_stream",
            CallKind::BidiStream => "bidi_stream",
        }
    }
}

/// Request count and latency interceptor attached to every client the
/// client manager hands out. Clones share the in-process call tally.
#[derive(Debug, Clone, Default)]
pub struct ClientMetrics {
    tally: Arc<CallTally>,
}

#[derive(Debug, Default)]
struct CallTally {
    started: AtomicU64,
    handled: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls_started(&self) -> u64 {
        self.tally.started.load(Ordering::Relaxed)
    }

    pub fn calls_handled(&self) -> u64 {
        self.tally.handled.load(Ordering::Relaxed)
    }

    /// Record the start of a call to `procedure` (`/pkg.Service/Method`).
    pub fn start(&self, kind: CallKind, procedure: &str) -> CallRecorder {
        let (service, method) = split_procedure(procedure);
        let recorder = CallRecorder {
            call_type: kind.name(),
            service: service.to_string(),
            method: method.to_string(),
            started: Instant::now(),
            tally: Arc::clone(&self.tally),
        };
        self.tally.started.fetch_add(1, Ordering::Relaxed);
        counter!(
            STARTED_TOTAL,
            "call_type" => recorder.call_type,
            "service" => recorder.service.clone(),
            "method" => recorder.method.clone()
        )
        .increment(1);
        recorder
    }
}

/// One in-flight call. `finish` records its outcome.
#[derive(Debug)]
pub struct CallRecorder {
    call_type: &'static str,
    service: String,
    method: String,
    started: Instant,
    tally: Arc<CallTally>,
}

impl CallRecorder {
    /// `code` is the RPC status name, `"ok"` on success.
    pub fn finish(self, code: &str) -> Duration {
        let elapsed = self.started.elapsed();
        self.tally.handled.fetch_add(1, Ordering::Relaxed);
        counter!(
            HANDLED_TOTAL,
            "call_type" => self.call_type,
            "service" => self.service.clone(),
            "method" => self.method.clone(),
            "code" => code.to_string()
        )
        .increment(1);
        histogram!(
            HANDLING_SECONDS,
            "call_type" => self.call_type,
            "service" => self.service,
            "method" => self.method,
            "code" => code.to_string()
        )
        .record(elapsed.as_secs_f64());
        elapsed
    }
}

/// Split `/pkg.Service/Method` into `("pkg.Service", "Method")`.
/// Anything else yields `("unknown", "unknown")`.
pub fn split_procedure(procedure: &str) -> (&str, &str) {
    procedure
        .strip_prefix('/')
        .and_then(|rest| rest.split_once('/'))
        .filter(|(service, method)| !service.is_empty() && !method.is_empty())
        .unwrap_or(("unknown", "unknown"))
}

// ── Instrumented metadata client ──────────────────────────────────────────────

/// Wrap `client` so every sync cursor subscription is recorded as one
/// server-streaming call, finished when the stream fails, ends or is dropped.
pub fn instrument_metadata_client(
    client: Arc<dyn MetadataApiClient>,
    metrics: ClientMetrics,
) -> Arc<dyn MetadataApiClient> {
    Arc::new(InstrumentedMetadataClient { client, metrics })
}

struct InstrumentedMetadataClient {
    client: Arc<dyn MetadataApiClient>,
    metrics: ClientMetrics,
}

#[async_trait]
impl MetadataApiClient for InstrumentedMetadataClient {
    async fn subscribe_sync_cursor(&self) -> Result<SyncCursorStream, TransportError> {
        let call = self.metrics.start(CallKind::ServerStream, SUBSCRIBE_SYNC_CURSOR);
        match self.client.subscribe_sync_cursor().await {
            Ok(stream) => Ok(RecordedStream {
                stream,
                call: Some(call),
            }
            .boxed()),
            Err(e) => {
                call.finish(e.code());
                Err(e)
            }
        }
    }
}

struct RecordedStream {
    stream: SyncCursorStream,
    call: Option<CallRecorder>,
}

impl RecordedStream {
    fn finish(&mut self, code: &str) {
        if let Some(call) = self.call.take() {
            call.finish(code);
        }
    }
}

impl Stream for RecordedStream {
    type Item = Result<SyncCursorResponse, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = futures::ready!(self.stream.poll_next_unpin(cx));
        match &item {
            Some(Ok(_)) => {}
            Some(Err(e)) => self.finish(e.code()),
            None => self.finish("ok"),
        }
        Poll::Ready(item)
    }
}

impl Drop for RecordedStream {
    fn drop(&mut self) {
        self.finish("canceled");
    }
}

pub fn emit_block_until_desired_cursor_reached(originator_id: NodeId, elapsed: Duration) {
    histogram!(CURSOR_REACHED_SECONDS, "originator_id" => originator_id.to_string())
        .record(elapsed.as_secs_f64());
}
