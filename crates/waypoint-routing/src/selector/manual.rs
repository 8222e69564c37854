use std::sync::Arc;

use async_trait::async_trait;
use waypoint_core::{NodeId, Topic};

use super::{eligible_nodes, NodeSelector, SelectorError};
use crate::registry::NodeRegistry;

/// Tries a fixed preference list in order. A candidate must be present in
/// the registry with a valid configuration and not banned; there is no
/// fallback.
pub struct ManualSelector {
    registry: Arc<dyn NodeRegistry>,
    preferred: Vec<NodeId>,
}

impl ManualSelector {
    pub fn new(registry: Arc<dyn NodeRegistry>, preferred: Vec<NodeId>) -> Self {
        Self { registry, preferred }
    }
}

#[async_trait]
impl NodeSelector for ManualSelector {
    async fn get_node(&self, _topic: &Topic, banlist: &[NodeId]) -> Result<NodeId, SelectorError> {
        if self.preferred.is_empty() {
            return Err(SelectorError::NoManualNodes);
        }
        first_preferred(self.registry.as_ref(), &self.preferred, banlist)?
            .ok_or(SelectorError::NoManualNodes)
    }
}

/// Like `ManualSelector`, but once the preferences are exhausted any
/// eligible, non-banned registry node (ascending ID) is acceptable.
pub struct OrderedSelector {
    registry: Arc<dyn NodeRegistry>,
    preferred: Vec<NodeId>,
}

impl OrderedSelector {
    pub fn new(registry: Arc<dyn NodeRegistry>, preferred: Vec<NodeId>) -> Self {
        Self { registry, preferred }
    }
}

#[async_trait]
impl NodeSelector for OrderedSelector {
    async fn get_node(&self, _topic: &Topic, banlist: &[NodeId]) -> Result<NodeId, SelectorError> {
        if let Some(node_id) = first_preferred(self.registry.as_ref(), &self.preferred, banlist)? {
            return Ok(node_id);
        }

        let nodes = eligible_nodes(self.registry.as_ref())?;
        if nodes.is_empty() {
            return Err(SelectorError::NoAvailableNodes);
        }
        let count = nodes.len();
        let fallback = nodes
            .into_iter()
            .map(|node| node.node_id)
            .find(|id| !banlist.contains(id))
            .ok_or(SelectorError::BanlistExhausted(count))?;

        tracing::debug!(node_id = fallback, "preferred nodes unavailable, using fallback");
        Ok(fallback)
    }
}

fn first_preferred(
    registry: &dyn NodeRegistry,
    preferred: &[NodeId],
    banlist: &[NodeId],
) -> Result<Option<NodeId>, SelectorError> {
    for &candidate in preferred {
        if banlist.contains(&candidate) {
            continue;
        }
        match registry.get_node(candidate) {
            Ok(node) if node.is_valid_config => return Ok(Some(candidate)),
            Ok(_) => continue,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}
