//! Node selection: map a topic plus a banlist to one target node.
//!
//! Strategies:
//! - `stable`:  consistent hashing over the sorted node ring
//! - `manual`:  fixed preference list, no fallback
//! - `ordered`: preference list, falls back to any registry node
//! - `random`:  uniform choice from an OS-backed RNG
//! - `closest`: lowest measured TCP connect latency
//!
//! Every strategy considers only nodes with a valid configuration and fails
//! with an explicit error when nothing eligible is left; none of them mutate
//! the registry.

mod closest;
mod manual;
mod random;
mod stable;

pub use closest::ClosestSelector;
pub use manual::{ManualSelector, OrderedSelector};
pub use random::RandomSelector;
pub use stable::{hash_key, StableHashingSelector};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use waypoint_core::config::SelectorConfig;
use waypoint_core::{Node, NodeId, Topic};

use crate::registry::{NodeRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("unknown selector strategy {0:?}")]
    UnknownStrategy(String),
    #[error("{0} selector requires at least one preferred node")]
    MissingPreferredNodes(SelectorStrategy),
    #[error("none of the preferred nodes are available")]
    NoManualNodes,
    #[error("no available nodes")]
    NoAvailableNodes,
    #[error("all {0} nodes are banned")]
    BanlistExhausted(usize),
    #[error("no latency measurements available")]
    NoLatencyMeasurements,
    #[error("random source failed: {0}")]
    Random(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SelectorError {
    /// Recoverable "nothing eligible" outcomes, as opposed to misconfiguration.
    pub fn is_not_found(&self) -> bool {
        match self {
            SelectorError::NoManualNodes
            | SelectorError::NoAvailableNodes
            | SelectorError::BanlistExhausted(_)
            | SelectorError::NoLatencyMeasurements => true,
            SelectorError::Registry(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// The routing entry point used by publishers.
#[async_trait]
pub trait NodeSelector: Send + Sync {
    async fn get_node(&self, topic: &Topic, banlist: &[NodeId]) -> Result<NodeId, SelectorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorStrategy {
    Stable,
    Manual,
    Ordered,
    Random,
    Closest,
}

impl SelectorStrategy {
    pub fn name(self) -> &'static str {
        match self {
            SelectorStrategy::Stable => "stable",
            SelectorStrategy::Manual => "manual",
            SelectorStrategy::Ordered => "ordered",
            SelectorStrategy::Random => "random",
            SelectorStrategy::Closest => "closest",
        }
    }
}

impl FromStr for SelectorStrategy {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "stable" => Ok(SelectorStrategy::Stable),
            "manual" => Ok(SelectorStrategy::Manual),
            "ordered" => Ok(SelectorStrategy::Ordered),
            "random" => Ok(SelectorStrategy::Random),
            "closest" => Ok(SelectorStrategy::Closest),
            _ => Err(SelectorError::UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry nodes a selector may route to, ascending by ID.
fn eligible_nodes(registry: &dyn NodeRegistry) -> Result<Vec<Node>, SelectorError> {
    Ok(registry
        .get_nodes()?
        .into_iter()
        .filter(|node| node.is_valid_config)
        .collect())
}

/// Build the selector named by `config.strategy`.
///
/// `manual` and `ordered` refuse an empty preference list.
pub fn new_node_selector(
    registry: Arc<dyn NodeRegistry>,
    config: &SelectorConfig,
) -> Result<Arc<dyn NodeSelector>, SelectorError> {
    let strategy: SelectorStrategy = config.strategy.parse()?;
    let preferred = config.preferred_nodes.clone();

    let selector: Arc<dyn NodeSelector> = match strategy {
        SelectorStrategy::Stable => Arc::new(StableHashingSelector::new(registry)),
        SelectorStrategy::Manual => {
            if preferred.is_empty() {
                return Err(SelectorError::MissingPreferredNodes(strategy));
            }
            Arc::new(ManualSelector::new(registry, preferred))
        }
        SelectorStrategy::Ordered => {
            if preferred.is_empty() {
                return Err(SelectorError::MissingPreferredNodes(strategy));
            }
            Arc::new(OrderedSelector::new(registry, preferred))
        }
        SelectorStrategy::Random => Arc::new(RandomSelector::new(registry)),
        SelectorStrategy::Closest => Arc::new(ClosestSelector::new(
            registry,
            preferred,
            config.cache_expiry(),
            config.connect_timeout(),
        )),
    };

    tracing::info!(strategy = %strategy, preferred = ?config.preferred_nodes, "node selector configured");
    Ok(selector)
}
