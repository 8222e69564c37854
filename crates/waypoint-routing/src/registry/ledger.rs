//! Ledger-backed registry.
//!
//! Lifecycle: Created → Started → Stopped. `start` performs one refresh
//! synchronously and fails if it fails; after that a background task
//! refreshes on a fixed interval, logging (not propagating) failures.
//!
//! Refresh cycles never overlap, whether scheduled or requested through
//! `refresh`. Once `stop` returns no cycle is in flight and none will start.
//!
//! A refresh cycle:
//! 1. fetch every record from the ledger (bounded by `fetch_timeout`)
//! 2. drop records that do not convert to a valid node
//! 3. unknown IDs are collected into one batch; known IDs whose node differs
//!    are replaced immediately and their per-node notifier fires
//! 4. a non-empty batch is announced once, then merged under one write lock

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use waypoint_core::config::RegistryConfig;
use waypoint_core::{Node, NodeId, RawNodeRecord};

use super::{NodeRegistry, RegistryError};
use crate::notifier::{CancelSubscription, Notifier, Subscription};

/// The external source of truth for membership.
#[async_trait]
pub trait LedgerSource: Send + Sync + 'static {
    /// The full, unfiltered node list, placeholders included.
    async fn fetch_all_nodes(&self) -> anyhow::Result<Vec<RawNodeRecord>>;
}

enum Lifecycle {
    Created,
    Started(JoinHandle<()>),
    Stopped,
}

struct Inner {
    source: Arc<dyn LedgerSource>,
    refresh_interval: Duration,
    fetch_timeout: Duration,
    nodes: RwLock<BTreeMap<NodeId, Node>>,
    new_nodes: Notifier<Vec<Node>>,
    changed_node: DashMap<NodeId, Notifier<Node>>,
    shutdown: CancellationToken,
    // Held for a whole fetch-and-apply cycle.
    cycle: Mutex<()>,
}

pub struct LedgerRegistry {
    inner: Arc<Inner>,
    lifecycle: Mutex<Lifecycle>,
}

impl LedgerRegistry {
    /// Cancelling `parent` stops the refresh loop the same way `stop` does.
    pub fn new(
        source: Arc<dyn LedgerSource>,
        config: &RegistryConfig,
        parent: &CancellationToken,
    ) -> Self {
        Self::with_intervals(
            source,
            config.refresh_interval(),
            config.fetch_timeout(),
            parent,
        )
    }

    pub fn with_intervals(
        source: Arc<dyn LedgerSource>,
        refresh_interval: Duration,
        fetch_timeout: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                refresh_interval,
                fetch_timeout,
                nodes: RwLock::new(BTreeMap::new()),
                new_nodes: Notifier::new(),
                changed_node: DashMap::new(),
                shutdown: parent.child_token(),
                cycle: Mutex::new(()),
            }),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// Load the initial snapshot, then start the refresh loop.
    pub async fn start(&self) -> Result<(), RegistryError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started(_) => return Err(RegistryError::AlreadyStarted),
            Lifecycle::Stopped => return Err(RegistryError::Stopped),
        }
        if self.inner.shutdown.is_cancelled() {
            *lifecycle = Lifecycle::Stopped;
            return Err(RegistryError::Stopped);
        }

        self.inner.refresh().await?;

        let inner = Arc::clone(&self.inner);
        *lifecycle = Lifecycle::Started(tokio::spawn(refresh_loop(inner)));
        tracing::info!(
            nodes = self.inner.node_count(),
            interval_secs = self.inner.refresh_interval.as_secs_f64(),
            "ledger registry started"
        );
        Ok(())
    }

    /// Run one refresh cycle now, outside the regular schedule.
    ///
    /// Waits for a cycle already in flight, then fetches again. Fails with
    /// `RegistryError::Stopped` once the registry is shutting down, without
    /// touching the snapshot.
    pub async fn refresh(&self) -> Result<(), RegistryError> {
        self.inner.refresh().await
    }
}

#[async_trait]
impl NodeRegistry for LedgerRegistry {
    fn get_nodes(&self) -> Result<Vec<Node>, RegistryError> {
        Ok(self.inner.read_nodes().values().cloned().collect())
    }

    fn get_node(&self, node_id: NodeId) -> Result<Node, RegistryError> {
        self.inner
            .read_nodes()
            .get(&node_id)
            .cloned()
            .ok_or(RegistryError::NotFound(node_id))
    }

    fn on_new_nodes(&self) -> (Subscription<Vec<Node>>, CancelSubscription) {
        self.inner.new_nodes.register()
    }

    fn on_changed_node(&self, node_id: NodeId) -> (Subscription<Node>, CancelSubscription) {
        self.inner
            .changed_node
            .entry(node_id)
            .or_default()
            .register()
    }

    async fn stop(&self) {
        self.inner.shutdown.cancel();
        let previous = std::mem::replace(&mut *self.lifecycle.lock().await, Lifecycle::Stopped);
        if let Lifecycle::Started(handle) = previous {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "ledger refresh task ended abnormally");
            }
            tracing::info!("ledger registry stopped");
        }
        // Wait out a manual refresh that is still applying its result.
        drop(self.inner.cycle.lock().await);
    }
}

impl Inner {
    fn read_nodes(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<NodeId, Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn node_count(&self) -> usize {
        self.read_nodes().len()
    }

    async fn refresh(&self) -> Result<(), RegistryError> {
        let _cycle = self.cycle.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::Stopped);
        }

        let fetch = tokio::time::timeout(self.fetch_timeout, self.source.fetch_all_nodes());
        // A fetch in flight at shutdown is abandoned before it is applied.
        let records = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(RegistryError::Stopped),
            result = fetch => result
                .map_err(|_| RegistryError::FetchTimeout(self.fetch_timeout))?
                .map_err(RegistryError::Fetch)?,
        };
        self.apply(records);
        Ok(())
    }

    fn apply(&self, records: Vec<RawNodeRecord>) {
        let mut new_nodes: BTreeMap<NodeId, Node> = BTreeMap::new();

        for node in records
            .into_iter()
            .map(Node::from_record)
            .filter(|node| node.is_valid_config)
        {
            let existing = self.read_nodes().get(&node.node_id).cloned();
            match existing {
                None => {
                    new_nodes.insert(node.node_id, node);
                }
                Some(existing) if existing != node => self.replace_changed(node),
                Some(_) => {}
            }
        }

        if new_nodes.is_empty() {
            return;
        }

        let batch: Vec<Node> = new_nodes.into_values().collect();
        tracing::info!(
            count = batch.len(),
            node_ids = ?batch.iter().map(|n| n.node_id).collect::<Vec<_>>(),
            "discovered new nodes"
        );
        self.new_nodes.trigger(batch.clone());

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        for node in batch {
            nodes.insert(node.node_id, node);
        }
    }

    fn replace_changed(&self, node: Node) {
        let node_id = node.node_id;
        tracing::debug!(node_id, http_address = %node.http_address, "node changed");

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.insert(node_id, node.clone());
        if let Some(notifier) = self.changed_node.get(&node_id) {
            notifier.trigger(node);
        }
    }
}

async fn refresh_loop(inner: Arc<Inner>) {
    let first = tokio::time::Instant::now() + inner.refresh_interval;
    let mut ticker = tokio::time::interval_at(first, inner.refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match inner.refresh().await {
            Ok(()) => {}
            Err(RegistryError::Stopped) => break,
            Err(e) => tracing::error!(error = %e, "failed to refresh nodes from ledger"),
        }
    }

    tracing::debug!("ledger refresh loop exited");
}
