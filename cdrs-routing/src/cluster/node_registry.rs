use arc_swap::ArcSwap;
use fxhash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::*;

use crate::cluster::metadata_builder::{add_or_update_node, refresh_metadata};
use crate::cluster::topology::{KeyspaceMetadata, Node, NodeState};
use crate::cluster::{ClusterMetadata, NodeInfo};
use crate::load_balancing::node_distance_evaluator::NodeDistanceEvaluator;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Node lifecycle events published by the registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NodeEvent {
    Added(SocketAddr),
    Removed(SocketAddr),
    Up(SocketAddr),
    Down(SocketAddr),
    Ignored(SocketAddr),
}

impl NodeEvent {
    /// Address of the node the event is about.
    #[inline]
    pub fn address(&self) -> SocketAddr {
        match self {
            NodeEvent::Added(address)
            | NodeEvent::Removed(address)
            | NodeEvent::Up(address)
            | NodeEvent::Down(address)
            | NodeEvent::Ignored(address) => *address,
        }
    }
}

/// Single source of truth for node state. Every mutation atomically publishes a new
/// [`ClusterMetadata`] snapshot, so readers always see a consistent point-in-time view and never
/// block on writers. Operations targeting unknown nodes are ignored, since topology is only
/// eventually consistent with cluster membership events.
pub struct NodeRegistry {
    metadata: ArcSwap<ClusterMetadata>,
    node_distance_evaluator: Box<dyn NodeDistanceEvaluator + Send + Sync>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeRegistry {
    pub fn new(node_distance_evaluator: Box<dyn NodeDistanceEvaluator + Send + Sync>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        NodeRegistry {
            metadata: ArcSwap::from_pointee(ClusterMetadata::default()),
            node_distance_evaluator,
            events,
        }
    }

    /// Returns current cluster snapshot.
    #[inline]
    pub fn metadata(&self) -> Arc<ClusterMetadata> {
        self.metadata.load_full()
    }

    /// Subscribes to node lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Returns up nodes from given datacenter, ordered by address.
    pub fn snapshot(&self, datacenter: &str) -> Vec<Arc<Node>> {
        self.metadata
            .load()
            .up_nodes_in_dc(datacenter)
            .cloned()
            .collect()
    }

    /// Adds a new node, which starts as up, or updates topology information of an existing one,
    /// keeping its state.
    pub fn upsert(&self, node_info: NodeInfo) {
        let address = node_info.broadcast_rpc_address;
        let mut added = false;

        self.metadata.rcu(|metadata| {
            added = metadata.find_node(address).is_none();
            add_or_update_node(
                node_info.clone(),
                metadata,
                &*self.node_distance_evaluator,
            )
            .map(Arc::new)
            .unwrap_or_else(|| metadata.clone())
        });

        if added {
            self.publish(NodeEvent::Added(address));
        }
    }

    /// Removes a node. Returns `true` if the node was known.
    pub fn remove(&self, broadcast_rpc_address: SocketAddr) -> bool {
        let mut removed = false;

        self.metadata.rcu(|metadata| {
            removed = metadata.find_node(broadcast_rpc_address).is_some();
            if removed {
                Arc::new(metadata.clone_without_node(broadcast_rpc_address))
            } else {
                metadata.clone()
            }
        });

        if removed {
            debug!(address = %broadcast_rpc_address, "Removed node.");
            self.publish(NodeEvent::Removed(broadcast_rpc_address));
        } else {
            debug!(address = %broadcast_rpc_address, "Ignoring removal of unknown node.");
        }

        removed
    }

    /// Marks an up node as down. Ignored nodes are left alone. Returns `true` if the state
    /// changed.
    pub fn mark_down(&self, broadcast_rpc_address: SocketAddr) -> bool {
        let changed = self.change_state(broadcast_rpc_address, NodeState::Down, |state| {
            state == NodeState::Up
        });

        if changed {
            warn!(address = %broadcast_rpc_address, "Node marked down.");
            self.publish(NodeEvent::Down(broadcast_rpc_address));
        }

        changed
    }

    /// Marks a down node as up. Ignored nodes are left alone. Returns `true` if the state
    /// changed.
    pub fn mark_up(&self, broadcast_rpc_address: SocketAddr) -> bool {
        let changed = self.change_state(broadcast_rpc_address, NodeState::Up, |state| {
            state == NodeState::Down
        });

        if changed {
            info!(address = %broadcast_rpc_address, "Node marked up.");
            self.publish(NodeEvent::Up(broadcast_rpc_address));
        }

        changed
    }

    /// Excludes a node from routing until [`unignore`](Self::unignore) is called.
    pub fn ignore(&self, broadcast_rpc_address: SocketAddr) -> bool {
        let changed = self.change_state(broadcast_rpc_address, NodeState::Ignored, |state| {
            state != NodeState::Ignored
        });

        if changed {
            debug!(address = %broadcast_rpc_address, "Node ignored.");
            self.publish(NodeEvent::Ignored(broadcast_rpc_address));
        }

        changed
    }

    /// Restores an ignored node as up.
    pub fn unignore(&self, broadcast_rpc_address: SocketAddr) -> bool {
        let changed = self.change_state(broadcast_rpc_address, NodeState::Up, |state| {
            state == NodeState::Ignored
        });

        if changed {
            debug!(address = %broadcast_rpc_address, "Node no longer ignored.");
            self.publish(NodeEvent::Up(broadcast_rpc_address));
        }

        changed
    }

    /// Replaces the whole topology with given description. Surviving nodes keep their state.
    pub fn refresh(
        &self,
        node_infos: Vec<NodeInfo>,
        keyspaces: FxHashMap<String, KeyspaceMetadata>,
    ) {
        let mut metadata = Arc::new(ClusterMetadata::default());
        let previous = self.metadata.rcu(|current| {
            metadata = Arc::new(refresh_metadata(
                node_infos.clone(),
                keyspaces.clone(),
                current,
                &*self.node_distance_evaluator,
            ));
            metadata.clone()
        });

        debug!(
            node_count = metadata.nodes().len(),
            keyspace_count = metadata.keyspaces().len(),
            "Refreshed cluster topology."
        );

        for address in previous.nodes().keys() {
            if metadata.find_node(*address).is_none() {
                self.publish(NodeEvent::Removed(*address));
            }
        }

        for address in metadata.nodes().keys() {
            if previous.find_node(*address).is_none() {
                self.publish(NodeEvent::Added(*address));
            }
        }
    }

    /// Adds or replaces keyspace replication information.
    pub fn update_keyspace(&self, name: String, keyspace: KeyspaceMetadata) {
        debug!(keyspace = %name, "Updating keyspace.");
        self.metadata.rcu(|metadata| {
            Arc::new(metadata.clone_with_keyspace(name.clone(), keyspace.clone()))
        });
    }

    pub fn remove_keyspace(&self, name: &str) {
        debug!(keyspace = %name, "Removing keyspace.");
        self.metadata
            .rcu(|metadata| Arc::new(metadata.clone_without_keyspace(name)));
    }

    fn change_state(
        &self,
        broadcast_rpc_address: SocketAddr,
        state: NodeState,
        applies: impl Fn(NodeState) -> bool,
    ) -> bool {
        let mut changed = false;

        self.metadata.rcu(|metadata| {
            let new_metadata = metadata
                .find_node(broadcast_rpc_address)
                .filter(|node| applies(node.state()))
                .and_then(|_| metadata.clone_with_node_state(broadcast_rpc_address, state));

            changed = new_metadata.is_some();
            new_metadata
                .map(Arc::new)
                .unwrap_or_else(|| metadata.clone())
        });

        if !changed && self.metadata.load().find_node(broadcast_rpc_address).is_none() {
            debug!(
                address = %broadcast_rpc_address,
                ?state,
                "Ignoring state change of unknown node."
            );
        }

        changed
    }

    #[inline]
    fn publish(&self, event: NodeEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::cluster::topology::{KeyspaceMetadata, NodeState, ReplicationStrategy};
    use crate::cluster::{NodeEvent, NodeInfo, NodeRegistry};
    use crate::load_balancing::node_distance_evaluator::TopologyAwareNodeDistanceEvaluator;
    use crate::token::Murmur3Token;

    fn addr(last_octet: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet)), 9042)
    }

    fn node_info(last_octet: u8, dc: &str) -> NodeInfo {
        NodeInfo::new(
            None,
            addr(last_octet),
            dc.into(),
            vec![Murmur3Token::new(last_octet as i64)],
            "r1".into(),
        )
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::new(Box::new(TopologyAwareNodeDistanceEvaluator::new(
            "dc1".into(),
        )))
    }

    #[test]
    fn should_add_nodes_as_up() {
        let registry = registry();
        registry.upsert(node_info(2, "dc1"));
        registry.upsert(node_info(1, "dc1"));
        registry.upsert(node_info(3, "dc2"));

        let snapshot = registry
            .snapshot("dc1")
            .iter()
            .map(|node| node.broadcast_rpc_address())
            .collect::<Vec<_>>();

        assert_eq!(snapshot, vec![addr(1), addr(2)]);
        assert_eq!(registry.snapshot("dc2").len(), 1);
    }

    #[test]
    fn should_mark_nodes_idempotently() {
        let registry = registry();
        registry.upsert(node_info(1, "dc1"));
        let mut events = registry.subscribe();

        assert!(registry.mark_down(addr(1)));
        assert!(!registry.mark_down(addr(1)));
        assert!(registry.snapshot("dc1").is_empty());

        assert!(registry.mark_up(addr(1)));
        assert!(!registry.mark_up(addr(1)));
        assert_eq!(registry.snapshot("dc1").len(), 1);

        assert_eq!(events.try_recv().unwrap(), NodeEvent::Down(addr(1)));
        assert_eq!(events.try_recv().unwrap(), NodeEvent::Up(addr(1)));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn should_ignore_unknown_nodes() {
        let registry = registry();

        assert!(!registry.mark_down(addr(1)));
        assert!(!registry.mark_up(addr(1)));
        assert!(!registry.ignore(addr(1)));
        assert!(!registry.remove(addr(1)));
        assert!(registry.metadata().nodes().is_empty());
    }

    #[test]
    fn should_not_change_ignored_nodes_on_liveness_changes() {
        let registry = registry();
        registry.upsert(node_info(1, "dc1"));

        assert!(registry.ignore(addr(1)));
        assert!(!registry.mark_up(addr(1)));
        assert!(!registry.mark_down(addr(1)));
        assert_eq!(
            registry.metadata().find_node(addr(1)).unwrap().state(),
            NodeState::Ignored
        );

        assert!(registry.unignore(addr(1)));
        assert_eq!(
            registry.metadata().find_node(addr(1)).unwrap().state(),
            NodeState::Up
        );
    }

    #[test]
    fn should_keep_state_on_upsert_of_existing_node() {
        let registry = registry();
        registry.upsert(node_info(1, "dc1"));
        registry.mark_down(addr(1));

        let mut info = node_info(1, "dc1");
        info.tokens = vec![Murmur3Token::new(500)];
        registry.upsert(info);

        let metadata = registry.metadata();
        let node = metadata.find_node(addr(1)).unwrap();
        assert_eq!(node.state(), NodeState::Down);
        assert_eq!(node.tokens(), [Murmur3Token::new(500)]);
    }

    #[test]
    fn should_publish_refresh_differences() {
        let registry = registry();
        registry.upsert(node_info(1, "dc1"));
        registry.upsert(node_info(2, "dc1"));
        registry.mark_down(addr(2));

        let mut events = registry.subscribe();
        registry.refresh(
            vec![node_info(2, "dc1"), node_info(3, "dc1")],
            Default::default(),
        );

        assert_eq!(events.try_recv().unwrap(), NodeEvent::Removed(addr(1)));
        assert_eq!(events.try_recv().unwrap(), NodeEvent::Added(addr(3)));

        let metadata = registry.metadata();
        assert_eq!(
            metadata.find_node(addr(2)).unwrap().state(),
            NodeState::Down
        );
        assert!(metadata.find_node(addr(1)).is_none());
    }

    #[test]
    fn should_route_with_keyspace_updates() {
        let registry = registry();
        registry.refresh(
            vec![node_info(1, "dc1"), node_info(2, "dc1")],
            Default::default(),
        );

        registry.update_keyspace(
            "ks".into(),
            KeyspaceMetadata::new(ReplicationStrategy::SimpleStrategy {
                replication_factor: 2,
            }),
        );

        let metadata = registry.metadata();
        assert_eq!(
            metadata
                .token_map()
                .replicas_for_token(Murmur3Token::new(0), Some("ks")),
            [addr(1), addr(2)]
        );

        registry.remove_keyspace("ks");
        assert!(registry.metadata().keyspace("ks").is_none());
    }
}
