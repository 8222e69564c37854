//! Stable hashing.
//!
//! The 32-bit hash space is split into N equal bands, one per valid node in
//! ascending ID order. A topic lands on the first band boundary at or above
//! its hash (wrapping past the last boundary) and the scan walks the ring
//! until it finds a node that is not banned.
//!
//! Only the topic identifier is hashed, so every kind of message about the
//! same entity routes to the same node. Invalid nodes never enter the ring;
//! the banlist is applied during the scan and never moves band boundaries.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use waypoint_core::{NodeId, Topic};

use super::{eligible_nodes, NodeSelector, SelectorError};
use crate::registry::NodeRegistry;

/// First four bytes of SHA-256(key), big-endian.
pub fn hash_key(key: &[u8]) -> u32 {
    let digest = Sha256::digest(key);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub struct StableHashingSelector {
    registry: Arc<dyn NodeRegistry>,
}

impl StableHashingSelector {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NodeSelector for StableHashingSelector {
    async fn get_node(&self, topic: &Topic, banlist: &[NodeId]) -> Result<NodeId, SelectorError> {
        let mut ids: Vec<NodeId> = eligible_nodes(self.registry.as_ref())?
            .into_iter()
            .map(|node| node.node_id)
            .collect();
        ids.sort_unstable();

        let node_id = select_from_ring(&ids, hash_key(topic.identifier()), banlist)?;
        tracing::trace!(%topic, node_id, "stable hash selection");
        Ok(node_id)
    }
}

/// `ids` must be sorted ascending.
fn select_from_ring(ids: &[NodeId], hash: u32, banlist: &[NodeId]) -> Result<NodeId, SelectorError> {
    if ids.is_empty() {
        return Err(SelectorError::NoAvailableNodes);
    }

    let count = ids.len();
    let spacing = u32::MAX / count as u32;
    let boundaries: Vec<u32> = (0..count as u32).map(|i| i * spacing).collect();

    let start = match boundaries.partition_point(|&boundary| boundary < hash) {
        idx if idx == count => 0,
        idx => idx,
    };

    (0..count)
        .map(|offset| ids[(start + offset) % count])
        .find(|candidate| !banlist.contains(candidate))
        .ok_or(SelectorError::BanlistExhausted(count))
}
