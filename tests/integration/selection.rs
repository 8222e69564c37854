use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use waypoint_core::config::SelectorConfig;
use waypoint_core::{Topic, TopicKind};
use waypoint_routing::selector::StableHashingSelector;
use waypoint_routing::{
    new_node_selector, LedgerRegistry, NodeRegistry, NodeSelector, SelectorError, StaticRegistry,
};

use crate::*;

const FLEET: [NodeId; 5] = [100, 200, 300, 700, 1200];

fn registry(ids: &[NodeId]) -> Arc<dyn NodeRegistry> {
    Arc::new(StaticRegistry::new(healthy_nodes(ids)))
}

fn selector(strategy: &str, preferred: Vec<NodeId>, ids: &[NodeId]) -> Arc<dyn NodeSelector> {
    let config = SelectorConfig {
        strategy: strategy.to_string(),
        preferred_nodes: preferred,
        ..SelectorConfig::default()
    };
    new_node_selector(registry(ids), &config).unwrap()
}

fn keyed(identifier: &[u8]) -> Topic {
    Topic::new(TopicKind::GroupMessagesV1, identifier.to_vec())
}

/// Five-node fleet, one identity topic: fixed assignment, deterministic
/// fallbacks, and not-found once every node is banned.
#[tokio::test]
async fn test_stable_end_to_end_scenario() {
    init_tracing();
    let selector = selector("stable", vec![], &FLEET);
    let topic: Topic = "identity_updates_v1/deadbeef".parse().unwrap();

    let first = selector.get_node(&topic, &[]).await.unwrap();
    assert_eq!(first, 300);
    assert_eq!(selector.get_node(&topic, &[]).await.unwrap(), first);

    let fallback = selector.get_node(&topic, &[first]).await.unwrap();
    assert_eq!(fallback, 700);
    assert_eq!(selector.get_node(&topic, &[first]).await.unwrap(), fallback);

    let err = selector.get_node(&topic, &FLEET).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_stable_is_deterministic_across_instances() {
    init_tracing();
    let a = StableHashingSelector::new(registry(&FLEET));
    let b = StableHashingSelector::new(registry(&[1200, 700, 300, 200, 100]));

    for i in 0u32..64 {
        let topic = Topic::new(TopicKind::KeyPackagesV1, i.to_be_bytes().to_vec());
        let expected = a.get_node(&topic, &[]).await.unwrap();
        assert_eq!(a.get_node(&topic, &[]).await.unwrap(), expected);
        assert_eq!(b.get_node(&topic, &[]).await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_stable_assignment_survives_added_node() {
    init_tracing();
    let topic = keyed(b"stable_key");
    let before = selector("stable", vec![], &FLEET);
    let after = selector("stable", vec![], &[100, 200, 300, 700, 800, 1200]);

    assert_eq!(before.get_node(&topic, &[]).await.unwrap(), 700);
    assert_eq!(after.get_node(&topic, &[]).await.unwrap(), 700);
}

#[tokio::test]
async fn test_stable_distinct_topics_can_diverge() {
    init_tracing();
    let selector = selector("stable", vec![], &[100, 200, 300]);
    assert_eq!(selector.get_node(&keyed(b"stable_key"), &[]).await.unwrap(), 300);
    assert_eq!(selector.get_node(&keyed(b"stable_key_topic2"), &[]).await.unwrap(), 100);
}

/// Banning the returned node call after call walks the whole fleet exactly
/// once before reporting not-found.
#[tokio::test]
async fn test_banlist_exhaustion() {
    init_tracing();
    for strategy in ["stable", "random"] {
        let selector = selector(strategy, vec![], &FLEET);
        let topic = keyed(b"ban_walk");
        let mut banned: Vec<NodeId> = Vec::new();

        for _ in 0..FLEET.len() {
            let node_id = selector.get_node(&topic, &banned).await.unwrap();
            assert!(!banned.contains(&node_id), "{strategy} returned banned {node_id}");
            banned.push(node_id);
        }
        banned.sort_unstable();
        assert_eq!(banned, FLEET.to_vec());

        let err = selector.get_node(&topic, &banned).await.unwrap_err();
        assert!(err.is_not_found(), "{strategy}: {err}");
    }
}

#[tokio::test]
async fn test_manual_and_ordered_fallback() {
    init_tracing();
    let topic = keyed(b"any");

    let manual = selector("manual", vec![999, 300], &FLEET);
    let ordered = selector("ordered", vec![999, 300], &FLEET);
    assert_eq!(manual.get_node(&topic, &[]).await.unwrap(), 300);
    assert_eq!(ordered.get_node(&topic, &[]).await.unwrap(), 300);

    // Preferences unreachable: ordered still answers, manual does not.
    assert_eq!(ordered.get_node(&topic, &[300]).await.unwrap(), 100);
    assert!(matches!(
        manual.get_node(&topic, &[300]).await,
        Err(SelectorError::NoManualNodes)
    ));
}

#[tokio::test]
async fn test_factory_rejects_bad_configuration() {
    init_tracing();
    for (strategy, preferred) in [("manual", vec![]), ("ordered", vec![]), ("nearest", vec![100])] {
        let config = SelectorConfig {
            strategy: strategy.to_string(),
            preferred_nodes: preferred,
            ..SelectorConfig::default()
        };
        let err = new_node_selector(registry(&FLEET), &config).err().unwrap();
        assert!(!err.is_not_found(), "{strategy}: {err}");
    }
}

#[tokio::test]
async fn test_closest_routes_to_listening_peer() {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live = format!("http://{}", listener.local_addr().unwrap());
    let dead = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}", l.local_addr().unwrap())
    };

    let registry: Arc<dyn NodeRegistry> = Arc::new(StaticRegistry::new([
        Node::from_record(raw_node(100, &dead)),
        Node::from_record(raw_node(200, &live)),
    ]));
    let config = SelectorConfig {
        strategy: "closest".to_string(),
        connect_timeout_ms: 500,
        ..SelectorConfig::default()
    };
    let selector = new_node_selector(registry, &config).unwrap();
    assert_eq!(selector.get_node(&keyed(b"x"), &[]).await.unwrap(), 200);
    assert!(matches!(
        selector.get_node(&keyed(b"x"), &[200]).await,
        Err(SelectorError::NoLatencyMeasurements)
    ));
}

/// Selectors read the live registry: nodes learned on refresh are routable
/// immediately.
#[tokio::test]
async fn test_selector_follows_ledger_membership() {
    init_tracing();
    let ledger = MockLedger::with_nodes(vec![raw_node(100, "http://a.example.com")]);
    let registry = Arc::new(LedgerRegistry::with_intervals(
        ledger.clone(),
        Duration::from_secs(3600),
        Duration::from_secs(1),
        &CancellationToken::new(),
    ));
    registry.start().await.unwrap();

    let selector = selector_over(registry.clone(), "ordered", vec![200]);
    assert_eq!(selector.get_node(&keyed(b"k"), &[]).await.unwrap(), 100);

    ledger.set_nodes(vec![
        raw_node(100, "http://a.example.com"),
        raw_node(200, "http://b.example.com"),
    ]);
    registry.refresh().await.unwrap();
    assert_eq!(selector.get_node(&keyed(b"k"), &[]).await.unwrap(), 200);
    registry.stop().await;
}

fn selector_over(
    registry: Arc<LedgerRegistry>,
    strategy: &str,
    preferred: Vec<NodeId>,
) -> Arc<dyn NodeSelector> {
    let config = SelectorConfig {
        strategy: strategy.to_string(),
        preferred_nodes: preferred,
        ..SelectorConfig::default()
    };
    new_node_selector(registry, &config).unwrap()
}
