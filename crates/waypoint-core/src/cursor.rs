//! Replication cursors reported by peers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Per-originator highest sequence ID a peer has replicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub node_id_to_sequence_id: HashMap<NodeId, u64>,
}

impl Cursor {
    pub fn new(entries: impl IntoIterator<Item = (NodeId, u64)>) -> Self {
        Self {
            node_id_to_sequence_id: entries.into_iter().collect(),
        }
    }

    /// Sequence ID for an originator, or `None` if the peer has not seen it yet.
    pub fn sequence_id(&self, originator_id: NodeId) -> Option<u64> {
        self.node_id_to_sequence_id.get(&originator_id).copied()
    }

    /// True once `originator_id` has reached at least `sequence_id`.
    pub fn has_reached(&self, originator_id: NodeId, sequence_id: u64) -> bool {
        self.sequence_id(originator_id)
            .is_some_and(|seen| seen >= sequence_id)
    }
}

/// One message on a peer's sync-cursor subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursorResponse {
    pub latest_sync: Option<Cursor>,
}

impl SyncCursorResponse {
    pub fn new(cursor: Cursor) -> Self {
        Self {
            latest_sync: Some(cursor),
        }
    }
}
