use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use waypoint_core::config::RegistryConfig;
use waypoint_routing::{LedgerRegistry, NodeRegistry, RegistryError};

use crate::*;

fn ledger_registry(ledger: &Arc<MockLedger>, refresh_interval: Duration) -> LedgerRegistry {
    LedgerRegistry::with_intervals(
        ledger.clone(),
        refresh_interval,
        Duration::from_secs(1),
        &CancellationToken::new(),
    )
}

fn ids(registry: &dyn NodeRegistry) -> Vec<NodeId> {
    registry
        .get_nodes()
        .unwrap()
        .into_iter()
        .map(|n| n.node_id)
        .collect()
}

/// One refresh introducing two valid nodes and a placeholder yields exactly
/// one batch with the two valid nodes.
#[tokio::test]
async fn test_new_nodes_delivered_as_one_batch() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![]);
    let registry = ledger_registry(&ledger, Duration::from_secs(3600));

    let (mut new_nodes, _cancel) = registry.on_new_nodes();
    registry.start().await.unwrap();

    ledger.set_nodes(vec![
        raw_node(100, "http://a.example.com"),
        placeholder(0),
        raw_node(200, "http://b.example.com"),
    ]);
    registry.refresh().await.unwrap();

    let batch = timeout(Duration::from_secs(1), new_nodes.recv())
        .await
        .expect("batch should arrive")
        .unwrap();
    let mut batch_ids: Vec<_> = batch.iter().map(|n| n.node_id).collect();
    batch_ids.sort_unstable();
    assert_eq!(batch_ids, vec![100, 200]);
    assert!(batch.iter().all(|n| n.is_valid_config));

    assert!(
        timeout(Duration::from_millis(100), new_nodes.recv()).await.is_err(),
        "only one batch expected"
    );
    assert_eq!(ids(&registry), vec![100, 200]);
    registry.stop().await;
}

#[tokio::test]
async fn test_changed_node_isolation() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![
        raw_node(100, "http://a.example.com"),
        raw_node(200, "http://b.example.com"),
    ]);
    let registry = ledger_registry(&ledger, Duration::from_secs(3600));
    registry.start().await.unwrap();

    let (mut changed_x, _cancel_x) = registry.on_changed_node(100);
    let (mut changed_y, _cancel_y) = registry.on_changed_node(200);
    let (mut new_nodes, _cancel_new) = registry.on_new_nodes();

    ledger.set_nodes(vec![
        raw_node(100, "https://a.example.com:8443"),
        raw_node(200, "http://b.example.com"),
    ]);
    registry.refresh().await.unwrap();

    let changed = timeout(Duration::from_secs(1), changed_x.recv())
        .await
        .expect("X should fire")
        .unwrap();
    assert_eq!(changed.node_id, 100);
    assert_eq!(changed.http_address, "https://a.example.com:8443");

    assert!(timeout(Duration::from_millis(100), changed_y.recv()).await.is_err());
    assert!(timeout(Duration::from_millis(10), new_nodes.recv()).await.is_err());
    assert_eq!(registry.get_node(100).unwrap(), changed);
    registry.stop().await;
}

#[tokio::test]
async fn test_unchanged_refresh_is_silent() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![raw_node(100, "http://a.example.com")]);
    let registry = ledger_registry(&ledger, Duration::from_secs(3600));
    registry.start().await.unwrap();

    let (mut changed, _c1) = registry.on_changed_node(100);
    let (mut new_nodes, _c2) = registry.on_new_nodes();
    registry.refresh().await.unwrap();

    assert!(timeout(Duration::from_millis(100), changed.recv()).await.is_err());
    assert!(timeout(Duration::from_millis(10), new_nodes.recv()).await.is_err());
    registry.stop().await;
}

/// A node that turns invalid is ignored by refresh; the last good entry stays.
#[tokio::test]
async fn test_invalidated_node_keeps_last_good_entry() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![raw_node(100, "http://a.example.com")]);
    let registry = ledger_registry(&ledger, Duration::from_secs(3600));
    registry.start().await.unwrap();

    let mut broken = raw_node(100, "http://a.example.com");
    broken.in_canonical_network = false;
    ledger.set_nodes(vec![broken]);
    registry.refresh().await.unwrap();

    assert!(registry.get_node(100).unwrap().in_canonical_network);
    registry.stop().await;
}

#[tokio::test]
async fn test_cancelled_subscription_receives_nothing() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![]);
    let registry = ledger_registry(&ledger, Duration::from_secs(3600));
    registry.start().await.unwrap();

    let (mut sub, cancel) = registry.on_new_nodes();
    cancel.cancel();
    cancel.cancel();

    ledger.set_nodes(vec![raw_node(100, "http://a.example.com")]);
    registry.refresh().await.unwrap();
    assert_eq!(sub.recv().await, None);
    registry.stop().await;
}

#[tokio::test]
async fn test_initial_load_failure_is_fatal() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![raw_node(100, "http://a.example.com")]);
    ledger.set_failing(true);
    let registry = ledger_registry(&ledger, Duration::from_secs(3600));

    let err = registry.start().await.unwrap_err();
    assert!(matches!(err, RegistryError::Fetch(_)));
    assert!(registry.get_nodes().unwrap().is_empty());
}

/// Periodic failures are logged and skipped; the snapshot survives and the
/// next successful cycle picks up changes.
#[tokio::test]
async fn test_periodic_failure_is_not_fatal() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![raw_node(100, "http://a.example.com")]);
    let registry = ledger_registry(&ledger, Duration::from_millis(20));
    registry.start().await.unwrap();

    ledger.set_failing(true);
    let failing_since = ledger.calls();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(ledger.calls() > failing_since);
    assert_eq!(ids(&registry), vec![100]);

    let (mut new_nodes, _cancel) = registry.on_new_nodes();
    ledger.set_nodes(vec![
        raw_node(100, "http://a.example.com"),
        raw_node(300, "http://c.example.com"),
    ]);
    ledger.set_failing(false);

    let batch = timeout(Duration::from_secs(1), new_nodes.recv())
        .await
        .expect("loop should recover")
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].node_id, 300);
    registry.stop().await;
}

#[tokio::test]
async fn test_no_refresh_after_stop() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![raw_node(100, "http://a.example.com")]);
    let registry = ledger_registry(&ledger, Duration::from_millis(10));
    registry.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    registry.stop().await;
    let calls = ledger.calls();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(ledger.calls(), calls);
}

#[tokio::test]
async fn test_registry_from_config_defaults() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![raw_node(100, "http://a.example.com")]);
    let registry =
        LedgerRegistry::new(ledger.clone(), &RegistryConfig::default(), &CancellationToken::new());
    registry.start().await.unwrap();
    assert_eq!(ledger.calls(), 1);
    assert_eq!(ids(&registry), vec![100]);
    registry.stop().await;
}
