use derive_more::Constructor;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::token::Murmur3Token;

/// Information about a node, as supplied by topology discovery.
#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct NodeInfo {
    pub host_id: Option<Uuid>,
    pub broadcast_rpc_address: SocketAddr,
    pub datacenter: String,
    pub tokens: Vec<Murmur3Token>,
    pub rack: String,
}
