use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use waypoint_core::{NodeId, Topic};

use super::{eligible_nodes, NodeSelector, SelectorError};
use crate::registry::NodeRegistry;

/// Uniform choice among eligible, non-banned registry nodes. Each call draws from a
/// ChaCha-based generator freshly seeded by the OS RNG.
pub struct RandomSelector {
    registry: Arc<dyn NodeRegistry>,
}

impl RandomSelector {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NodeSelector for RandomSelector {
    async fn get_node(&self, _topic: &Topic, banlist: &[NodeId]) -> Result<NodeId, SelectorError> {
        let nodes = eligible_nodes(self.registry.as_ref())?;
        if nodes.is_empty() {
            return Err(SelectorError::NoAvailableNodes);
        }
        let count = nodes.len();

        let candidates: Vec<NodeId> = nodes
            .into_iter()
            .map(|node| node.node_id)
            .filter(|id| !banlist.contains(id))
            .collect();
        if candidates.is_empty() {
            return Err(SelectorError::BanlistExhausted(count));
        }

        let mut rng =
            StdRng::from_rng(OsRng).map_err(|e| SelectorError::Random(e.to_string()))?;
        let index = rng.gen_range(0..candidates.len());
        Ok(candidates[index])
    }
}
