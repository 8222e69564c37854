//! One pooled outbound connection per peer.
//!
//! Connections are built lazily from registry data and then kept for the
//! life of the manager. There is no TTL and no health-based eviction.
//! Every metadata client handed out reports call counts and latency through
//! the manager's `ClientMetrics`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use waypoint_core::NodeId;

use crate::cursor_tracker::MetadataClientConstructor;
use crate::registry::{NodeRegistry, RegistryError};
use crate::telemetry::{self, ClientMetrics};
use crate::transport::{MetadataApiClient, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to create connection to node {node_id}: {source}")]
    Transport {
        node_id: NodeId,
        #[source]
        source: TransportError,
    },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Registry(e) if e.is_not_found())
    }
}

pub struct ClientManager<T: Transport> {
    registry: Arc<dyn NodeRegistry>,
    transport: T,
    metrics: ClientMetrics,
    connections: RwLock<HashMap<NodeId, T::Connection>>,
}

impl<T: Transport> ClientManager<T> {
    pub fn new(registry: Arc<dyn NodeRegistry>, transport: T) -> Self {
        Self {
            registry,
            transport,
            metrics: ClientMetrics::new(),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Cached connection for `node_id`, creating it on first use.
    ///
    /// Concurrent first calls for the same node build exactly one connection.
    pub fn get_client_connection(&self, node_id: NodeId) -> Result<T::Connection, ClientError> {
        if let Some(connection) = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node_id)
        {
            return Ok(connection.clone());
        }

        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = connections.get(&node_id) {
            return Ok(connection.clone());
        }

        let node = self.registry.get_node(node_id)?;
        let connection = self
            .transport
            .connect(&node.http_address)
            .map_err(|source| ClientError::Transport { node_id, source })?;

        tracing::info!(node_id, address = %node.http_address, "created client connection");
        connections.insert(node_id, connection.clone());
        Ok(connection)
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: Transport> MetadataClientConstructor for ClientManager<T> {
    fn new_metadata_client(&self, node_id: NodeId) -> Result<Arc<dyn MetadataApiClient>, ClientError> {
        let connection = self.get_client_connection(node_id)?;
        let client = self.transport.metadata_client(&connection);
        Ok(telemetry::instrument_metadata_client(client, self.metrics.clone()))
    }
}
