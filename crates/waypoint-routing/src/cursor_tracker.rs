//! Block until a peer has replicated a given originator sequence.
//!
//! Outcomes are distinguished by who gave up:
//! - the caller cancelled or its own deadline passed: `Ok(())`, the caller
//!   stopped caring
//! - the tracker's own lifetime ended: `TrackerError::Aborted`
//! - the wait ceiling elapsed: `TrackerError::DeadlineExceeded`
//! - the stream failed: the transport error, unchanged

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use waypoint_core::config::TrackerConfig;
use waypoint_core::{NodeId, SyncCursorResponse};

use crate::client_manager::ClientError;
use crate::telemetry;
use crate::transport::{MetadataApiClient, SyncCursorStream, TransportError};

/// Builds metadata clients for a peer. `ClientManager` is the production
/// implementation.
pub trait MetadataClientConstructor: Send + Sync {
    fn new_metadata_client(&self, node_id: NodeId) -> Result<Arc<dyn MetadataApiClient>, ClientError>;
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("node terminated, cancelled wait for cursor")]
    Aborted,
    #[error("wait for cursor was unsuccessful after {0:?}")]
    DeadlineExceeded(Duration),
    #[error("error getting node cursor: {0}")]
    Internal(&'static str),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct NodeCursorTracker {
    shutdown: CancellationToken,
    clients: Arc<dyn MetadataClientConstructor>,
    max_wait: Duration,
}

impl NodeCursorTracker {
    /// `shutdown` is the service lifetime; cancelling it aborts every wait.
    pub fn new(
        shutdown: CancellationToken,
        clients: Arc<dyn MetadataClientConstructor>,
        config: &TrackerConfig,
    ) -> Self {
        Self::with_max_wait(shutdown, clients, config.max_wait())
    }

    pub fn with_max_wait(
        shutdown: CancellationToken,
        clients: Arc<dyn MetadataClientConstructor>,
        max_wait: Duration,
    ) -> Self {
        Self {
            shutdown,
            clients,
            max_wait,
        }
    }

    /// Wait until `node_id` reports `originator_id` at or past `sequence_id`.
    pub async fn block_until_desired_cursor_reached(
        &self,
        caller: &CancellationToken,
        node_id: NodeId,
        originator_id: NodeId,
        sequence_id: u64,
    ) -> Result<(), TrackerError> {
        self.wait_for_cursor(caller, None, node_id, originator_id, sequence_id)
            .await
    }

    /// Like `block_until_desired_cursor_reached`, but the caller also stops
    /// waiting at `caller_deadline`. Reaching it counts as the caller giving
    /// up and returns `Ok(())`; the tracker's own ceiling still applies.
    pub async fn block_until_desired_cursor_reached_by(
        &self,
        caller: &CancellationToken,
        caller_deadline: tokio::time::Instant,
        node_id: NodeId,
        originator_id: NodeId,
        sequence_id: u64,
    ) -> Result<(), TrackerError> {
        self.wait_for_cursor(caller, Some(caller_deadline), node_id, originator_id, sequence_id)
            .await
    }

    async fn wait_for_cursor(
        &self,
        caller: &CancellationToken,
        caller_deadline: Option<tokio::time::Instant>,
        node_id: NodeId,
        originator_id: NodeId,
        sequence_id: u64,
    ) -> Result<(), TrackerError> {
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.max_wait);
        tokio::pin!(deadline);
        let caller_gone = async {
            match caller_deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(caller_gone);

        tracing::debug!(node_id, originator_id, sequence_id, "waiting for cursor");

        let client = self.clients.new_metadata_client(node_id)?;
        let stream = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(TrackerError::Aborted),
            _ = caller.cancelled() => return Ok(()),
            _ = &mut caller_gone => return Ok(()),
            _ = &mut deadline => return Err(TrackerError::DeadlineExceeded(started.elapsed())),
            result = client.subscribe_sync_cursor() => result?,
        };

        let bridge = CancellationToken::new();
        let _bridge_guard = bridge.clone().drop_guard();
        let (mut responses, mut errors) = spawn_bridge(stream, bridge);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(TrackerError::Aborted),
                _ = caller.cancelled() => return Ok(()),
                _ = &mut caller_gone => return Ok(()),
                _ = &mut deadline => {
                    return Err(TrackerError::DeadlineExceeded(started.elapsed()));
                }
                response = responses.recv() => {
                    let Some(response) = response else {
                        // The bridge exits right after reporting an error.
                        return match errors.try_recv() {
                            Ok(e) => self.stream_failed(caller, e),
                            Err(_) => Err(TrackerError::Internal("response channel closed")),
                        };
                    };
                    let cursor = response
                        .latest_sync
                        .ok_or(TrackerError::Internal("response is nil"))?;
                    match cursor.sequence_id(originator_id) {
                        Some(seen) if seen >= sequence_id => {
                            let elapsed = started.elapsed();
                            telemetry::emit_block_until_desired_cursor_reached(originator_id, elapsed);
                            tracing::debug!(
                                node_id,
                                originator_id,
                                sequence_id,
                                elapsed_ms = elapsed.as_millis() as u64,
                                "desired cursor reached"
                            );
                            return Ok(());
                        }
                        Some(seen) => {
                            tracing::trace!(node_id, originator_id, seen, sequence_id, "cursor behind");
                        }
                        None => {}
                    }
                }
                error = errors.recv() => {
                    return match error {
                        Some(e) => self.stream_failed(caller, e),
                        None => Err(TrackerError::Internal("error channel closed")),
                    };
                }
            }
        }
    }

    /// A stream error that races a cancellation reports the cancellation.
    fn stream_failed(
        &self,
        caller: &CancellationToken,
        error: TransportError,
    ) -> Result<(), TrackerError> {
        if caller.is_cancelled() {
            return Ok(());
        }
        if self.shutdown.is_cancelled() {
            return Err(TrackerError::Aborted);
        }
        tracing::debug!(error = %error, "sync cursor stream failed");
        Err(TrackerError::Transport(error))
    }
}

/// Pump the stream into a response queue and an error queue until `stop`
/// fires, the stream fails, or the stream ends (reported as an error).
fn spawn_bridge(
    mut stream: SyncCursorStream,
    stop: CancellationToken,
) -> (
    mpsc::Receiver<SyncCursorResponse>,
    mpsc::Receiver<TransportError>,
) {
    let (response_tx, response_rx) = mpsc::channel(1);
    let (error_tx, error_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                _ = stop.cancelled() => return,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(response)) => {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        sent = response_tx.send(response) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = error_tx.try_send(e);
                    return;
                }
                None => {
                    let _ = error_tx.try_send(TransportError::status(
                        "unavailable",
                        "sync cursor stream closed by peer",
                    ));
                    return;
                }
            }
        }
    });

    (response_rx, error_rx)
}
