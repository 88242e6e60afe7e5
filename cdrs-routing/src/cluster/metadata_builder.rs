use fxhash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::*;

use crate::cluster::topology::{KeyspaceMetadata, Node, NodeMap, NodeState};
use crate::cluster::{ClusterMetadata, NodeInfo};
use crate::load_balancing::node_distance_evaluator::NodeDistanceEvaluator;

/// Builds new metadata from a complete topology description. Surviving nodes keep their current
/// state, new ones start as `Up`.
pub fn refresh_metadata(
    node_infos: Vec<NodeInfo>,
    keyspaces: FxHashMap<String, KeyspaceMetadata>,
    old_metadata: &ClusterMetadata,
    node_distance_evaluator: &dyn NodeDistanceEvaluator,
) -> ClusterMetadata {
    let old_nodes = old_metadata.nodes();

    let mut seen_hosts = FxHashSet::default();
    let mut nodes = NodeMap::with_capacity_and_hasher(node_infos.len(), Default::default());

    for node_info in node_infos {
        if !seen_hosts.insert(node_info.broadcast_rpc_address) {
            warn!(
                address = %node_info.broadcast_rpc_address,
                "Found duplicate peer entries - keeping only the first one."
            );
            continue;
        }

        let distance = node_distance_evaluator.compute_distance(&node_info);
        let address = node_info.broadcast_rpc_address;

        let node = if let Some(old_node) = old_nodes.get(&address) {
            debug!(?node_info, "Updating old node.");
            old_node.clone_with_node_info(node_info, distance)
        } else {
            debug!(?node_info, "Adding new node.");
            Node::from_node_info(node_info, distance, NodeState::Up)
        };

        nodes.insert(address, Arc::new(node));
    }

    ClusterMetadata::new(nodes, keyspaces)
}

/// Adds a node or updates an existing one, keeping its state. Returns `None` if nothing changed.
pub fn add_or_update_node(
    node_info: NodeInfo,
    old_metadata: &ClusterMetadata,
    node_distance_evaluator: &dyn NodeDistanceEvaluator,
) -> Option<ClusterMetadata> {
    let distance = node_distance_evaluator.compute_distance(&node_info);

    if let Some(old_node) = old_metadata.find_node(node_info.broadcast_rpc_address) {
        if !old_node.placement_differs(&node_info)
            && old_node.host_id() == node_info.host_id
            && old_node.distance() == distance
        {
            debug!(?old_node, "Ignoring adding an existing node.");
            return None;
        }

        debug!(?old_node, "Updating old node with new info.");
        return Some(old_metadata.clone_with_node(old_node.clone_with_node_info(node_info, distance)));
    }

    debug!(?node_info, "Adding new node.");
    Some(old_metadata.clone_with_node(Node::from_node_info(
        node_info,
        distance,
        NodeState::Up,
    )))
}
