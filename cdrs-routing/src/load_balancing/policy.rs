use derivative::Derivative;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::*;

use crate::cluster::ClusterMetadata;
use crate::load_balancing::dc_aware::{plan_tiers, RemoteDcCapStage};
use crate::load_balancing::host_filter::HostFilterStage;
use crate::load_balancing::latency_aware::{LatencyAwareStage, LatencyTracker};
use crate::load_balancing::node_distance_evaluator::{
    AllLocalNodeDistanceEvaluator, NodeDistanceEvaluator, TopologyAwareNodeDistanceEvaluator,
};
use crate::load_balancing::token_aware::TokenAwareStage;
use crate::load_balancing::{
    LoadBalancingConfig, PlanContext, PlanStage, PolicyKind, QueryPlan, Request,
};

/// Load balancing policy composed from configuration. Builds one lazily evaluated
/// [`QueryPlan`] per request by running each tier through a fixed pipeline of stages:
/// token awareness, remote datacenter cap, host filters and latency awareness.
///
/// Each plan advances a shared rotation offset, so successive plans without a routing key
/// start at successive nodes.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct LoadBalancingPolicy {
    config: LoadBalancingConfig,
    #[derivative(Debug = "ignore")]
    stages: Arc<Vec<Box<dyn PlanStage>>>,
    latency_tracker: Option<Arc<LatencyTracker>>,
    prev_idx: AtomicUsize,
}

impl LoadBalancingPolicy {
    pub fn new(config: LoadBalancingConfig) -> Self {
        let mut stages: Vec<Box<dyn PlanStage>> = Vec::with_capacity(4);

        if config.token_aware {
            stages.push(Box::new(TokenAwareStage::new(config.shuffle_replicas)));
        }

        // the remote cap counts permitted nodes only
        if !config.filter_chain.is_empty() {
            stages.push(Box::new(HostFilterStage::new(config.filter_chain.clone())));
        }

        if let PolicyKind::DcAware {
            used_hosts_per_remote_dc,
            ..
        } = &config.policy
        {
            stages.push(Box::new(RemoteDcCapStage::new(*used_hosts_per_remote_dc)));
        }

        let latency_tracker = config
            .latency_awareness
            .clone()
            .map(|latency_awareness| Arc::new(LatencyTracker::new(latency_awareness)));

        if let Some(latency_tracker) = &latency_tracker {
            stages.push(Box::new(LatencyAwareStage::new(latency_tracker.clone())));
        }

        LoadBalancingPolicy {
            config,
            stages: Arc::new(stages),
            latency_tracker,
            prev_idx: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn config(&self) -> &LoadBalancingConfig {
        &self.config
    }

    /// Returns the latency tracker, if latency-aware routing is enabled.
    #[inline]
    pub fn latency_tracker(&self) -> Option<&Arc<LatencyTracker>> {
        self.latency_tracker.as_ref()
    }

    /// Creates a distance evaluator matching the policy: every node is local for round-robin,
    /// nodes outside the local datacenter are remote for the datacenter-aware policy.
    pub fn node_distance_evaluator(&self) -> Box<dyn NodeDistanceEvaluator + Send + Sync> {
        match &self.config.policy {
            PolicyKind::RoundRobin => Box::new(AllLocalNodeDistanceEvaluator),
            PolicyKind::DcAware { local_dc, .. } => {
                Box::new(TopologyAwareNodeDistanceEvaluator::new(local_dc.clone()))
            }
        }
    }

    /// Returns a lazy query plan for given request.
    pub fn query_plan(&self, request: &Request, cluster: Arc<ClusterMetadata>) -> QueryPlan {
        let token = request.routing_token();

        let replicas = match token {
            Some(token) if self.config.token_aware => {
                let replicas = cluster
                    .token_map()
                    .replicas_for_token(token, request.keyspace);

                if replicas.is_empty() {
                    debug!(%token, "Token ring miss - falling back to round-robin.");
                }

                replicas.to_vec()
            }
            _ => vec![],
        };

        let tiers = plan_tiers(&self.config.policy, request.consistency, &cluster);
        let context = PlanContext {
            keyspace: request.keyspace.map(Into::into),
            token,
            consistency: request.consistency,
            replicas,
            offset: self.prev_idx.fetch_add(1, Ordering::Relaxed),
        };

        QueryPlan::new(cluster, context, tiers, self.stages.clone())
    }
}

//noinspection DuplicatedCode
#[cfg(test)]
mod tests {
    use fxhash::FxHashMap;
    use itertools::Itertools;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use crate::cluster::topology::{
        KeyspaceMetadata, Node, NodeDistance, NodeMap, NodeState, ReplicationStrategy,
    };
    use crate::cluster::ClusterMetadata;
    use crate::consistency::Consistency;
    use crate::load_balancing::{
        LatencyAwarenessConfig, LoadBalancingConfigBuilder, LoadBalancingPolicy, PolicyKind,
        Request,
    };
    use crate::token::Murmur3Token;

    fn addr(last_octet: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet)), 9042)
    }

    fn node(last_octet: u8, dc: &str, token: i64) -> Node {
        Node::new(
            addr(last_octet),
            None,
            Some(if dc == "dc1" {
                NodeDistance::Local
            } else {
                NodeDistance::Remote
            }),
            NodeState::Up,
            vec![Murmur3Token::new(token)],
            "r1".into(),
            dc.into(),
        )
    }

    fn cluster() -> Arc<ClusterMetadata> {
        let nodes: NodeMap = vec![
            node(1, "dc1", 0),
            node(2, "dc1", 10),
            node(3, "dc1", 20),
            node(4, "dc2", 5),
            node(5, "dc2", 15),
            node(6, "dc2", 25),
            node(7, "dc3", 30),
        ]
        .into_iter()
        .map(|node| (node.broadcast_rpc_address(), Arc::new(node)))
        .collect();

        let mut keyspaces = FxHashMap::default();
        keyspaces.insert(
            "ks".to_string(),
            KeyspaceMetadata::new(ReplicationStrategy::SimpleStrategy {
                replication_factor: 2,
            }),
        );

        Arc::new(ClusterMetadata::new(nodes, keyspaces))
    }

    fn plan_addresses(
        policy: &LoadBalancingPolicy,
        request: &Request,
        cluster: &Arc<ClusterMetadata>,
    ) -> Vec<SocketAddr> {
        policy
            .query_plan(request, cluster.clone())
            .map(|node| node.broadcast_rpc_address())
            .collect()
    }

    fn dc_aware(used_hosts_per_remote_dc: usize, allow: bool) -> LoadBalancingPolicy {
        LoadBalancingPolicy::new(
            LoadBalancingConfigBuilder::new()
                .with_policy(PolicyKind::dc_aware("dc1", used_hosts_per_remote_dc, allow))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn should_rotate_local_nodes_evenly() {
        let cluster = cluster();
        let policy = dc_aware(0, false);

        let first_nodes = (0..30)
            .map(|_| plan_addresses(&policy, &Request::default(), &cluster)[0])
            .counts();

        assert_eq!(first_nodes.len(), 3);
        assert!(first_nodes.values().all(|count| *count == 10));
    }

    #[test]
    fn should_exclude_remote_nodes_for_local_consistency() {
        let cluster = cluster();
        let policy = dc_aware(2, false);

        let request = Request {
            consistency: Some(Consistency::LocalOne),
            ..Default::default()
        };

        let addresses = plan_addresses(&policy, &request, &cluster);
        assert_eq!(addresses.len(), 3);
        assert!(addresses
            .iter()
            .all(|address| [addr(1), addr(2), addr(3)].contains(address)));
    }

    #[test]
    fn should_append_capped_remote_nodes() {
        let cluster = cluster();
        let policy = dc_aware(2, false);

        let request = Request {
            consistency: Some(Consistency::Quorum),
            ..Default::default()
        };

        let addresses = plan_addresses(&policy, &request, &cluster);

        // 3 local, 2 from dc2, 1 from dc3
        assert_eq!(addresses.len(), 6);
        assert!(addresses[3..5]
            .iter()
            .all(|address| [addr(4), addr(5), addr(6)].contains(address)));
        assert_eq!(addresses[5], addr(7));
    }

    #[test]
    fn should_put_replicas_first() {
        let cluster = cluster();
        let policy = dc_aware(1, false);

        let request = Request {
            keyspace: Some("ks"),
            token: Some(Murmur3Token::new(11)),
            consistency: Some(Consistency::Quorum),
            ..Default::default()
        };

        // replicas for 11: 5 (dc2, token 15), 3 (dc1, token 20)
        for _ in 0..5 {
            let addresses = plan_addresses(&policy, &request, &cluster);
            assert_eq!(addresses[0], addr(3));
            // remote replica leads its own tier
            assert_eq!(addresses[3], addr(5));
        }
    }

    #[test]
    fn should_fall_back_to_round_robin_on_ring_miss() {
        let nodes: NodeMap = vec![1, 2]
            .into_iter()
            .map(|last_octet| {
                let node = Node::new(
                    addr(last_octet),
                    None,
                    Some(NodeDistance::Local),
                    NodeState::Up,
                    vec![],
                    "r1".into(),
                    "dc1".into(),
                );
                (node.broadcast_rpc_address(), Arc::new(node))
            })
            .collect();
        let cluster = Arc::new(ClusterMetadata::new(nodes, Default::default()));

        let policy = dc_aware(0, false);
        let request = Request {
            routing_key: Some(&b"key"[..]),
            ..Default::default()
        };

        assert_eq!(plan_addresses(&policy, &request, &cluster).len(), 2);
    }

    #[test]
    fn should_filter_nodes() {
        let cluster = cluster();
        let policy = LoadBalancingPolicy::new(
            LoadBalancingConfigBuilder::new()
                .with_policy(PolicyKind::dc_aware("dc1", 3, false))
                .with_host_blacklist(vec!["127.0.0.2"])
                .with_datacenter_blacklist(vec!["dc2"])
                .build()
                .unwrap(),
        );

        let addresses = plan_addresses(&policy, &Request::default(), &cluster);

        assert_eq!(addresses.len(), 3);
        assert!(!addresses.contains(&addr(2)));
        assert!(addresses.contains(&addr(7)));
    }

    #[test]
    fn should_cap_remote_nodes_after_filtering() {
        let cluster = cluster();
        let policy = LoadBalancingPolicy::new(
            LoadBalancingConfigBuilder::new()
                .with_policy(PolicyKind::dc_aware("dc1", 2, false))
                .with_host_blacklist(vec!["127.0.0.4"])
                .build()
                .unwrap(),
        );

        let request = Request {
            consistency: Some(Consistency::Quorum),
            ..Default::default()
        };

        for _ in 0..3 {
            let addresses = plan_addresses(&policy, &request, &cluster);

            assert_eq!(addresses.len(), 6);
            assert!(!addresses.contains(&addr(4)));
            assert!(addresses.contains(&addr(5)));
            assert!(addresses.contains(&addr(6)));
        }
    }

    #[test]
    fn should_return_empty_plan_when_everything_is_filtered() {
        let cluster = cluster();
        let policy = LoadBalancingPolicy::new(
            LoadBalancingConfigBuilder::new()
                .with_datacenter_whitelist(vec!["unknown"])
                .build()
                .unwrap(),
        );

        assert!(plan_addresses(&policy, &Request::default(), &cluster).is_empty());
    }

    #[test]
    fn should_skip_nodes_not_up() {
        let cluster = Arc::new(
            cluster()
                .clone_with_node_state(addr(1), NodeState::Down)
                .unwrap()
                .clone_with_node_state(addr(2), NodeState::Ignored)
                .unwrap(),
        );

        let policy = dc_aware(0, false);
        assert_eq!(
            plan_addresses(&policy, &Request::default(), &cluster),
            vec![addr(3)]
        );
    }

    #[test]
    fn should_move_penalized_nodes_to_back_of_tier() {
        let cluster = cluster();
        let policy = LoadBalancingPolicy::new(
            LoadBalancingConfigBuilder::new()
                .with_policy(PolicyKind::dc_aware("dc1", 1, false))
                .with_latency_awareness(LatencyAwarenessConfig::default().with_min_measured(1))
                .build()
                .unwrap(),
        );

        let tracker = policy.latency_tracker().unwrap();
        for _ in 0..10 {
            tracker.record(addr(1), std::time::Duration::from_millis(100));
            tracker.record(addr(2), std::time::Duration::from_millis(1));
            tracker.record(addr(3), std::time::Duration::from_millis(1));
        }
        tracker.refresh_min_average();

        for _ in 0..3 {
            let addresses = plan_addresses(&policy, &Request::default(), &cluster);
            // last of the local tier, before remote ones
            assert_eq!(addresses[2], addr(1));
            assert_eq!(addresses.len(), 5);
        }
    }
}
