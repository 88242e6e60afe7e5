use fxhash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;

pub use self::cluster_metadata::ClusterMetadata;
pub use self::datacenter_metadata::DatacenterMetadata;
pub use self::keyspace_metadata::KeyspaceMetadata;
pub use self::node::Node;
pub use self::node_distance::NodeDistance;
pub use self::node_state::NodeState;
pub use self::replication_strategy::ReplicationStrategy;

mod cluster_metadata;
mod datacenter_metadata;
mod keyspace_metadata;
mod node;
mod node_distance;
mod node_state;
mod replication_strategy;

/// Map from node broadcast RPC address to node.
pub type NodeMap = FxHashMap<SocketAddr, Arc<Node>>;
