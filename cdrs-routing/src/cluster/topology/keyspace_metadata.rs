use derive_more::Constructor;

use crate::cluster::topology::ReplicationStrategy;

/// Keyspace metadata relevant to routing.
#[derive(Clone, Debug, PartialEq, Constructor)]
pub struct KeyspaceMetadata {
    pub replication_strategy: ReplicationStrategy,
}
