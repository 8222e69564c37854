//! Latency-probed selection.
//!
//! Candidates are probed with a plain TCP connect to their advertised
//! address; results are cached for `cache_expiry` and only refreshed on a
//! lookup that finds the cache stale. A refresh in which every probe fails
//! leaves the previous cache in place.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use url::Url;
use waypoint_core::{Node, NodeId, Topic};

use super::{eligible_nodes, NodeSelector, SelectorError};
use crate::registry::NodeRegistry;

#[derive(Default)]
struct LatencyCache {
    latencies: HashMap<NodeId, Duration>,
    last_update: Option<Instant>,
}

impl LatencyCache {
    fn is_stale(&self, expiry: Duration) -> bool {
        self.last_update
            .map_or(true, |updated| updated.elapsed() > expiry)
    }
}

pub struct ClosestSelector {
    registry: Arc<dyn NodeRegistry>,
    preferred: Vec<NodeId>,
    cache_expiry: Duration,
    connect_timeout: Duration,
    cache: RwLock<LatencyCache>,
    // Serializes refreshes so concurrent lookups on a stale cache probe once.
    refreshing: Mutex<()>,
}

impl ClosestSelector {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        preferred: Vec<NodeId>,
        cache_expiry: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            preferred,
            cache_expiry,
            connect_timeout,
            cache: RwLock::new(LatencyCache::default()),
            refreshing: Mutex::new(()),
        }
    }

    /// Eligible preferred nodes, or every eligible node when none of the
    /// preferred ones are.
    fn candidates(&self) -> Result<Vec<Node>, SelectorError> {
        let nodes = eligible_nodes(self.registry.as_ref())?;
        if nodes.is_empty() {
            return Err(SelectorError::NoAvailableNodes);
        }
        if self.preferred.is_empty() {
            return Ok(nodes);
        }

        let preferred: Vec<Node> = nodes
            .iter()
            .filter(|node| self.preferred.contains(&node.node_id))
            .cloned()
            .collect();
        if preferred.is_empty() {
            Ok(nodes)
        } else {
            Ok(preferred)
        }
    }

    fn is_stale(&self) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_stale(self.cache_expiry)
    }

    async fn refresh(&self, candidates: &[Node]) {
        let _guard = self.refreshing.lock().await;
        if !self.is_stale() {
            return;
        }

        let timeout = self.connect_timeout;
        let probes = candidates.iter().map(|node| async move {
            (node.node_id, measure_latency(&node.http_address, timeout).await)
        });

        let measured: HashMap<NodeId, Duration> = join_all(probes)
            .await
            .into_iter()
            .filter_map(|(node_id, latency)| latency.map(|l| (node_id, l)))
            .collect();

        if measured.is_empty() {
            tracing::warn!(
                candidates = candidates.len(),
                "all latency probes failed, keeping previous measurements"
            );
            return;
        }

        tracing::debug!(measured = measured.len(), "latency cache refreshed");
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.latencies = measured;
        cache.last_update = Some(Instant::now());
    }
}

#[async_trait]
impl NodeSelector for ClosestSelector {
    async fn get_node(&self, _topic: &Topic, banlist: &[NodeId]) -> Result<NodeId, SelectorError> {
        let candidates = self.candidates()?;
        if self.is_stale() {
            self.refresh(&candidates).await;
        }

        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        candidates
            .iter()
            .filter(|node| !banlist.contains(&node.node_id))
            .filter_map(|node| {
                cache
                    .latencies
                    .get(&node.node_id)
                    .map(|latency| (*latency, node.node_id))
            })
            .min()
            .map(|(_, node_id)| node_id)
            .ok_or(SelectorError::NoLatencyMeasurements)
    }
}

/// Time to complete a TCP connect to the address's host and port, or `None`
/// if the address is unusable or the connect fails within `timeout`.
async fn measure_latency(http_address: &str, timeout: Duration) -> Option<Duration> {
    let url = Url::parse(http_address).ok()?;
    let host = url.host_str()?.trim_start_matches('[').trim_end_matches(']').to_string();
    let port = url.port_or_known_default()?;

    let started = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_stream)) => Some(started.elapsed()),
        Ok(Err(e)) => {
            tracing::debug!(address = http_address, error = %e, "latency probe failed");
            None
        }
        Err(_) => {
            tracing::debug!(address = http_address, "latency probe timed out");
            None
        }
    }
}
