mod common;

use std::time::Duration;
use tokio::time::sleep;

use cdrs_routing::cluster::topology::NodeState;
use cdrs_routing::cluster::{ConnectionPoolConfig, HeartbeatConfig};
use cdrs_routing::load_balancing::LoadBalancingConfigBuilder;
use cdrs_routing::retry::NeverReconnectionPolicy;
use cdrs_routing::statement::StatementParamsBuilder;
use common::*;

fn single_node_session(cluster: &FakeCluster, heartbeat: HeartbeatConfig) -> FakeSession {
    let pool_config = ConnectionPoolConfig::new(1, 1, None).with_heartbeat(heartbeat);
    let session = session_builder(cluster, LoadBalancingConfigBuilder::new().build().unwrap())
        .with_connection_pool_config(pool_config)
        .with_reconnection_policy(Box::new(NeverReconnectionPolicy))
        .build()
        .unwrap();

    session
        .registry()
        .refresh(vec![node_info(1, "dc1")], Default::default());

    session
}

fn node_state(session: &FakeSession, last_octet: u8) -> Option<NodeState> {
    session
        .registry()
        .metadata()
        .find_node(addr(last_octet))
        .map(|node| node.state())
}

#[tokio::test(start_paused = true)]
async fn should_never_time_out_with_disabled_heartbeat() {
    let cluster = FakeCluster::default();
    let session = single_node_session(&cluster, HeartbeatConfig::disabled());
    let statement = StatementParamsBuilder::new("SELECT").build();

    session.execute(&statement).await.unwrap();
    sleep(Duration::from_secs(3600)).await;
    session.execute(&statement).await.unwrap();

    assert_eq!(cluster.heartbeats(addr(1)), 0);
    assert_eq!(cluster.open_connections(addr(1)), 1);
    assert_eq!(cluster.requests(addr(1)), 2);
}

#[tokio::test(start_paused = true)]
async fn should_keep_connections_without_heartbeats_open() {
    let cluster = FakeCluster::default();
    let session = single_node_session(&cluster, HeartbeatConfig::new(Duration::ZERO));

    session
        .execute(&StatementParamsBuilder::new("SELECT").build())
        .await
        .unwrap();

    sleep(Duration::from_secs(600)).await;

    assert_eq!(cluster.heartbeats(addr(1)), 0);
    assert_eq!(cluster.open_connections(addr(1)), 1);
    assert_eq!(node_state(&session, 1), Some(NodeState::Up));
}

#[tokio::test(start_paused = true)]
async fn should_keep_answered_connections_alive() {
    let cluster = FakeCluster::default();
    let session = single_node_session(&cluster, HeartbeatConfig::from_secs(30, 60));

    session
        .execute(&StatementParamsBuilder::new("SELECT").build())
        .await
        .unwrap();

    sleep(Duration::from_secs(95)).await;

    assert_eq!(cluster.heartbeats(addr(1)), 3);
    assert_eq!(cluster.open_connections(addr(1)), 1);
    assert_eq!(node_state(&session, 1), Some(NodeState::Up));
}

#[tokio::test(start_paused = true)]
async fn should_tear_down_idle_connections() {
    let cluster = FakeCluster::default();
    cluster.set_behavior(
        addr(1),
        NodeBehavior {
            ignore_heartbeats: true,
            ..Default::default()
        },
    );

    let session = single_node_session(&cluster, HeartbeatConfig::from_secs(30, 60));

    session
        .execute(&StatementParamsBuilder::new("SELECT").build())
        .await
        .unwrap();

    sleep(Duration::from_secs(120)).await;

    assert_eq!(cluster.heartbeats(addr(1)), 1);
    assert_eq!(cluster.open_connections(addr(1)), 0);
    assert_eq!(node_state(&session, 1), Some(NodeState::Down));
}

#[tokio::test(start_paused = true)]
async fn should_mark_unreachable_nodes_down() {
    let cluster = FakeCluster::default();
    cluster.set_behavior(
        addr(1),
        NodeBehavior {
            refuse_connections: true,
            ..Default::default()
        },
    );

    let session = session_builder(&cluster, LoadBalancingConfigBuilder::new().build().unwrap())
        .with_reconnection_policy(Box::new(NeverReconnectionPolicy))
        .build()
        .unwrap();

    session.registry().refresh(
        vec![node_info(1, "dc1"), node_info(2, "dc1")],
        Default::default(),
    );

    let statement = StatementParamsBuilder::new("SELECT").build();

    // every plan contains both nodes, so the unreachable one gets skipped
    for _ in 0..4 {
        session.execute(&statement).await.unwrap();
    }

    sleep(Duration::from_secs(1)).await;

    assert_eq!(node_state(&session, 1), Some(NodeState::Down));
    assert_eq!(cluster.requests(addr(2)), 4);
    assert!(session
        .query_plan(&statement)
        .all(|node| node.broadcast_rpc_address() == addr(2)));
}

#[tokio::test(start_paused = true)]
async fn should_close_connections_of_removed_nodes() {
    let cluster = FakeCluster::default();
    let session = single_node_session(&cluster, HeartbeatConfig::default());

    session
        .execute(&StatementParamsBuilder::new("SELECT").build())
        .await
        .unwrap();

    assert_eq!(cluster.open_connections(addr(1)), 1);

    session
        .registry()
        .refresh(vec![node_info(2, "dc1")], Default::default());

    sleep(Duration::from_secs(1)).await;

    assert_eq!(cluster.open_connections(addr(1)), 0);
    assert_eq!(node_state(&session, 1), None);
}
