//! Node registries hold the in-memory membership snapshot.
//!
//! Two implementations share the `NodeRegistry` contract:
//! - `StaticRegistry`: a fixed list (tests, bootstrapping). Never notifies.
//! - `LedgerRegistry`: polls a `LedgerSource`, diffs against memory and
//!   notifies subscribers of new and changed nodes.
//!
//! Everything downstream (selectors, client manager) depends only on the
//! trait, never on a concrete registry.

mod fixed;
mod ledger;

pub use fixed::StaticRegistry;
pub use ledger::{LedgerRegistry, LedgerSource};

use async_trait::async_trait;
use thiserror::Error;
use waypoint_core::{Node, NodeId};

use crate::notifier::{CancelSubscription, Subscription};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node {0} not found")]
    NotFound(NodeId),
    #[error("failed to fetch nodes from ledger: {0:#}")]
    Fetch(anyhow::Error),
    #[error("ledger fetch timed out after {0:?}")]
    FetchTimeout(std::time::Duration),
    #[error("registry already started")]
    AlreadyStarted,
    #[error("registry stopped")]
    Stopped,
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

/// Membership view shared by every routing component.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Full current snapshot, ascending by node ID.
    fn get_nodes(&self) -> Result<Vec<Node>, RegistryError>;

    /// One node, or `RegistryError::NotFound`.
    fn get_node(&self, node_id: NodeId) -> Result<Node, RegistryError>;

    /// Batches of nodes the registry had not seen before.
    fn on_new_nodes(&self) -> (Subscription<Vec<Node>>, CancelSubscription);

    /// Fires whenever the stored entry for `node_id` is replaced by a
    /// structurally different one.
    fn on_changed_node(&self, node_id: NodeId) -> (Subscription<Node>, CancelSubscription);

    /// Stop background activity. Returns once no refresh can run anymore.
    async fn stop(&self);
}
