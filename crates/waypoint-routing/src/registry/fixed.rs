use std::collections::BTreeMap;

use async_trait::async_trait;
use waypoint_core::config::StaticNodeConfig;
use waypoint_core::{Node, NodeId};

use super::{NodeRegistry, RegistryError};
use crate::notifier::{CancelSubscription, Notifier, Subscription};

/// Registry over a fixed node list. Has no background activity, so its
/// notifiers never fire and `stop` does nothing.
pub struct StaticRegistry {
    nodes: BTreeMap<NodeId, Node>,
    new_nodes: Notifier<Vec<Node>>,
    changed_node: Notifier<Node>,
}

impl StaticRegistry {
    /// Later entries replace earlier ones with the same ID.
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.node_id, n)).collect(),
            new_nodes: Notifier::new(),
            changed_node: Notifier::new(),
        }
    }

    /// Build from the `[registry].static_nodes` config section.
    pub fn from_config(entries: &[StaticNodeConfig]) -> Self {
        let nodes = entries
            .iter()
            .map(|entry| Node::from_record(entry.to_record()));
        let registry = Self::new(nodes);
        tracing::info!(count = registry.nodes.len(), "static registry loaded");
        registry
    }
}

#[async_trait]
impl NodeRegistry for StaticRegistry {
    fn get_nodes(&self) -> Result<Vec<Node>, RegistryError> {
        Ok(self.nodes.values().cloned().collect())
    }

    fn get_node(&self, node_id: NodeId) -> Result<Node, RegistryError> {
        self.nodes
            .get(&node_id)
            .cloned()
            .ok_or(RegistryError::NotFound(node_id))
    }

    fn on_new_nodes(&self) -> (Subscription<Vec<Node>>, CancelSubscription) {
        self.new_nodes.register()
    }

    fn on_changed_node(&self, _node_id: NodeId) -> (Subscription<Node>, CancelSubscription) {
        self.changed_node.register()
    }

    async fn stop(&self) {}
}
