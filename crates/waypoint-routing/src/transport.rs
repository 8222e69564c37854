//! Seam to the RPC transport.
//!
//! The routing layer never speaks a wire protocol itself. A `Transport`
//! turns an advertised address into a reusable connection and hands out
//! typed clients over it; reconnect-on-drop is the transport's business.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use waypoint_core::SyncCursorResponse;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("rpc failed with {code}: {message}")]
    Status { code: String, message: String },
}

impl TransportError {
    pub fn status(code: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError::Status {
            code: code.into(),
            message: message.into(),
        }
    }

    /// RPC status name used to label call metrics.
    pub fn code(&self) -> &str {
        match self {
            TransportError::InvalidAddress(_) => "invalid_argument",
            TransportError::Connect { .. } => "unavailable",
            TransportError::Status { code, .. } => code,
        }
    }
}

/// Server-streamed sync cursor updates.
pub type SyncCursorStream = BoxStream<'static, Result<SyncCursorResponse, TransportError>>;

/// Client for a peer's metadata API.
#[async_trait]
pub trait MetadataApiClient: Send + Sync {
    /// Open the sync cursor subscription. Each item is the peer's latest
    /// cursor; the stream ends when the peer closes it.
    async fn subscribe_sync_cursor(&self) -> Result<SyncCursorStream, TransportError>;
}

pub trait Transport: Send + Sync + 'static {
    /// Pooled, cheaply cloneable connection handle.
    type Connection: Clone + Send + Sync + 'static;

    fn connect(&self, address: &str) -> Result<Self::Connection, TransportError>;

    fn metadata_client(&self, connection: &Self::Connection) -> Arc<dyn MetadataApiClient>;
}
