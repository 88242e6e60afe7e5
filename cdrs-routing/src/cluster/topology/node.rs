use std::net::SocketAddr;
use uuid::Uuid;

use crate::cluster::topology::{NodeDistance, NodeState};
use crate::cluster::NodeInfo;
use crate::token::Murmur3Token;

/// Metadata about a Cassandra node in the cluster. Nodes are identified by their broadcast RPC
/// address and are immutable - state changes produce new instances, which are published by the
/// [`NodeRegistry`](crate::cluster::NodeRegistry) as a part of a new cluster snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    broadcast_rpc_address: SocketAddr,
    host_id: Option<Uuid>,
    distance: Option<NodeDistance>,
    state: NodeState,
    tokens: Vec<Murmur3Token>,
    rack: String,
    datacenter: String,
}

impl Node {
    pub fn new(
        broadcast_rpc_address: SocketAddr,
        host_id: Option<Uuid>,
        distance: Option<NodeDistance>,
        state: NodeState,
        tokens: Vec<Murmur3Token>,
        rack: String,
        datacenter: String,
    ) -> Self {
        Node {
            broadcast_rpc_address,
            host_id,
            distance,
            state,
            tokens,
            rack,
            datacenter,
        }
    }

    pub(crate) fn from_node_info(
        node_info: NodeInfo,
        distance: Option<NodeDistance>,
        state: NodeState,
    ) -> Self {
        Node {
            broadcast_rpc_address: node_info.broadcast_rpc_address,
            host_id: node_info.host_id,
            distance,
            state,
            tokens: node_info.tokens,
            rack: node_info.rack,
            datacenter: node_info.datacenter,
        }
    }

    #[inline]
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The host ID that is assigned to this node by Cassandra, if known.
    #[inline]
    pub fn host_id(&self) -> Option<Uuid> {
        self.host_id
    }

    /// The node's broadcast RPC address. That is, the address that the node expects clients to
    /// connect to. Serves as node identity.
    #[inline]
    pub fn broadcast_rpc_address(&self) -> SocketAddr {
        self.broadcast_rpc_address
    }

    /// Returns tokens associated with the node.
    #[inline]
    pub fn tokens(&self) -> &[Murmur3Token] {
        &self.tokens
    }

    /// Returns the dc the node is in.
    #[inline]
    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    /// Returns the rack the node is in.
    #[inline]
    pub fn rack(&self) -> &str {
        &self.rack
    }

    /// Returns node distance in relation to the driver, if available.
    #[inline]
    pub fn distance(&self) -> Option<NodeDistance> {
        self.distance
    }

    /// Checks if the node is local in relation to the driver.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.distance == Some(NodeDistance::Local)
    }

    /// Checks if the node is remote in relation to the driver.
    #[inline]
    pub fn is_remote(&self) -> bool {
        self.distance == Some(NodeDistance::Remote)
    }

    #[inline]
    pub fn is_ignored(&self) -> bool {
        self.state == NodeState::Ignored
    }

    /// Checks if the node can take part in query plans: it needs to be up and have a known
    /// distance.
    #[inline]
    pub fn is_up(&self) -> bool {
        self.state == NodeState::Up && self.distance.is_some()
    }

    /// Checks if fields relevant to replica placement differ from given info.
    pub(crate) fn placement_differs(&self, node_info: &NodeInfo) -> bool {
        self.tokens != node_info.tokens
            || self.datacenter != node_info.datacenter
            || self.rack != node_info.rack
    }

    #[must_use]
    pub(crate) fn clone_with_node_info(
        &self,
        node_info: NodeInfo,
        distance: Option<NodeDistance>,
    ) -> Self {
        Self::from_node_info(node_info, distance, self.state)
    }

    #[must_use]
    pub(crate) fn clone_with_node_state(&self, state: NodeState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}
