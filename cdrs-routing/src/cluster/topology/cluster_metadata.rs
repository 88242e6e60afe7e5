use fxhash::FxHashMap;
use itertools::Itertools;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::cluster::topology::{DatacenterMetadata, KeyspaceMetadata, Node, NodeMap, NodeState};
use crate::cluster::TokenMap;

fn build_datacenter_info(nodes: &NodeMap) -> FxHashMap<String, DatacenterMetadata> {
    let grouped_by_dc = nodes
        .values()
        .sorted_unstable_by_key(|node| node.datacenter())
        .chunk_by(|node| node.datacenter());

    (&grouped_by_dc)
        .into_iter()
        .map(|(dc, nodes)| {
            let nodes = nodes.collect_vec();
            (
                dc.into(),
                DatacenterMetadata::new(
                    nodes.iter().unique_by(|node| node.rack()).count(),
                    nodes.len(),
                ),
            )
        })
        .collect()
}

fn sort_nodes(nodes: &NodeMap) -> Vec<Arc<Node>> {
    nodes
        .values()
        .sorted_unstable_by_key(|node| node.broadcast_rpc_address())
        .cloned()
        .collect()
}

fn remote_datacenters(nodes: &NodeMap) -> Vec<String> {
    nodes
        .values()
        .filter(|node| node.is_remote())
        .map(|node| node.datacenter().to_string())
        .sorted_unstable()
        .dedup()
        .collect()
}

/// Immutable metadata of the Cassandra cluster: a consistent, point-in-time view of nodes, their
/// state, token ownership and keyspace replication. A new instance is created for every change.
#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    nodes: NodeMap,
    // stable order for round-robin rotation
    sorted_nodes: Vec<Arc<Node>>,
    remote_datacenters: Vec<String>,
    token_map: Arc<TokenMap>,
    keyspaces: FxHashMap<String, KeyspaceMetadata>,
    datacenters: FxHashMap<String, DatacenterMetadata>,
}

impl ClusterMetadata {
    pub fn new(nodes: NodeMap, keyspaces: FxHashMap<String, KeyspaceMetadata>) -> Self {
        let token_map = Arc::new(TokenMap::new(&nodes, &keyspaces));
        let datacenters = build_datacenter_info(&nodes);

        ClusterMetadata {
            sorted_nodes: sort_nodes(&nodes),
            remote_datacenters: remote_datacenters(&nodes),
            nodes,
            token_map,
            keyspaces,
            datacenters,
        }
    }

    /// Returns current token map.
    #[inline]
    pub fn token_map(&self) -> &TokenMap {
        &self.token_map
    }

    /// Creates a new metadata with a keyspace replaced/added.
    #[must_use]
    pub fn clone_with_keyspace(&self, keyspace_name: String, keyspace: KeyspaceMetadata) -> Self {
        let token_map = Arc::new(self.token_map.clone_with_keyspace(&keyspace_name, &keyspace));

        let mut keyspaces = self.keyspaces.clone();
        keyspaces.insert(keyspace_name, keyspace);

        ClusterMetadata {
            token_map,
            keyspaces,
            ..self.clone()
        }
    }

    /// Creates a new metadata with a keyspace removed.
    #[must_use]
    pub fn clone_without_keyspace(&self, keyspace: &str) -> Self {
        let mut keyspaces = self.keyspaces.clone();
        keyspaces.remove(keyspace);

        ClusterMetadata {
            token_map: Arc::new(self.token_map.clone_without_keyspace(keyspace)),
            keyspaces,
            ..self.clone()
        }
    }

    /// Creates a new metadata with a node replaced/added.
    #[must_use]
    pub fn clone_with_node(&self, node: Node) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.insert(node.broadcast_rpc_address(), Arc::new(node));

        Self::new(nodes, self.keyspaces.clone())
    }

    /// Creates a new metadata with a node removed.
    #[must_use]
    pub fn clone_without_node(&self, broadcast_rpc_address: SocketAddr) -> Self {
        let nodes = self
            .nodes
            .iter()
            .filter(|(address, _)| **address != broadcast_rpc_address)
            .map(|(address, node)| (*address, node.clone()))
            .collect();

        Self::new(nodes, self.keyspaces.clone())
    }

    /// Creates a new metadata with given node state changed. Token ownership doesn't depend on
    /// node state, so the token map is shared with the current metadata. Returns `None` if the
    /// node is unknown or already in given state.
    #[must_use]
    pub fn clone_with_node_state(
        &self,
        broadcast_rpc_address: SocketAddr,
        state: NodeState,
    ) -> Option<Self> {
        let node = self.nodes.get(&broadcast_rpc_address)?;
        if node.state() == state {
            return None;
        }

        let mut nodes = self.nodes.clone();
        nodes.insert(
            broadcast_rpc_address,
            Arc::new(node.clone_with_node_state(state)),
        );

        Some(ClusterMetadata {
            sorted_nodes: sort_nodes(&nodes),
            nodes,
            ..self.clone()
        })
    }

    /// Returns all known nodes.
    #[inline]
    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    /// Returns a node with given address, if present.
    #[inline]
    pub fn find_node(&self, broadcast_rpc_address: SocketAddr) -> Option<&Arc<Node>> {
        self.nodes.get(&broadcast_rpc_address)
    }

    /// Returns known keyspaces.
    #[inline]
    pub fn keyspaces(&self) -> &FxHashMap<String, KeyspaceMetadata> {
        &self.keyspaces
    }

    /// Returns known keyspace, if present.
    #[inline]
    pub fn keyspace(&self, keyspace: &str) -> Option<&KeyspaceMetadata> {
        self.keyspaces.get(keyspace)
    }

    /// Returns known datacenters.
    #[inline]
    pub fn datacenters(&self) -> &FxHashMap<String, DatacenterMetadata> {
        &self.datacenters
    }

    /// Returns known datacenter, if present.
    #[inline]
    pub fn datacenter(&self, name: &str) -> Option<&DatacenterMetadata> {
        self.datacenters.get(name)
    }

    /// Names of datacenters containing remote nodes, in ascending order.
    #[inline]
    pub fn remote_datacenters(&self) -> &[String] {
        &self.remote_datacenters
    }

    /// Returns up nodes eligible for query plans, ordered by address.
    pub fn up_nodes(&self) -> impl Iterator<Item = &Arc<Node>> + '_ {
        self.sorted_nodes.iter().filter(|node| node.is_up())
    }

    /// Returns up local nodes, ordered by address.
    pub fn up_local_nodes(&self) -> impl Iterator<Item = &Arc<Node>> + '_ {
        self.up_nodes().filter(|node| node.is_local())
    }

    /// Returns up nodes from given datacenter, ordered by address.
    pub fn up_nodes_in_dc<'a>(&'a self, dc: &'a str) -> impl Iterator<Item = &'a Arc<Node>> + 'a {
        self.up_nodes().filter(move |node| node.datacenter() == dc)
    }
}
