use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::cluster::topology::{KeyspaceMetadata, Node, NodeMap, ReplicationStrategy};
use crate::token::Murmur3Token;

/// Replica lists for consecutive token ranges. Entry `i` holds the replicas for the range ending
/// at (and including) the `i`-th ring token, starting after the previous one.
type Placement = Arc<Vec<(Murmur3Token, Arc<[SocketAddr]>)>>;

#[derive(Default, Debug)]
struct DatacenterTopology {
    racks: FxHashSet<String>,
    nodes: FxHashSet<SocketAddr>,
}

/// Map of tokens to nodes, along with precomputed replica placement for every known keyspace.
/// Instances are immutable and rebuilt in full on topology change, so readers never observe a
/// partially built ring.
#[derive(Default, Debug, Clone)]
pub struct TokenMap {
    token_ring: Arc<Vec<(Murmur3Token, Arc<Node>)>>,
    datacenters: Arc<FxHashMap<String, DatacenterTopology>>,
    primary_placement: Placement,
    keyspace_placements: FxHashMap<String, Placement>,
}

impl TokenMap {
    pub fn new(nodes: &NodeMap, keyspaces: &FxHashMap<String, KeyspaceMetadata>) -> Self {
        let token_ring: Vec<_> = nodes
            .values()
            .flat_map(|node| node.tokens().iter().map(move |token| (*token, node.clone())))
            .sorted_unstable_by_key(|(token, _)| *token)
            .dedup_by(|(a, _), (b, _)| a == b)
            .collect();

        let mut datacenters: FxHashMap<String, DatacenterTopology> = Default::default();
        for (_, node) in token_ring.iter() {
            let dc = datacenters.entry(node.datacenter().into()).or_default();
            dc.racks.insert(node.rack().into());
            dc.nodes.insert(node.broadcast_rpc_address());
        }

        let mut map = TokenMap {
            token_ring: Arc::new(token_ring),
            datacenters: Arc::new(datacenters),
            primary_placement: Default::default(),
            keyspace_placements: Default::default(),
        };

        map.primary_placement = map.simple_placement(1);
        map.keyspace_placements = keyspaces
            .iter()
            .filter_map(|(name, keyspace)| {
                map.placement(&keyspace.replication_strategy)
                    .map(|placement| (name.clone(), placement))
            })
            .collect();

        map
    }

    /// Creates a new map with placement for given keyspace replaced/added.
    #[must_use]
    pub fn clone_with_keyspace(&self, name: &str, keyspace: &KeyspaceMetadata) -> Self {
        let mut map = self.clone();
        match self.placement(&keyspace.replication_strategy) {
            Some(placement) => {
                map.keyspace_placements.insert(name.into(), placement);
            }
            None => {
                map.keyspace_placements.remove(name);
            }
        }

        map
    }

    /// Creates a new map with placement for given keyspace removed.
    #[must_use]
    pub fn clone_without_keyspace(&self, name: &str) -> Self {
        let mut map = self.clone();
        map.keyspace_placements.remove(name);
        map
    }

    /// Checks if any token is known.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.token_ring.is_empty()
    }

    /// Returns replicas for given routing key, primary first. With no keyspace, or a keyspace
    /// without known replication, only the primary owner is returned. An empty slice means the
    /// ring has not been built yet.
    pub fn replicas_for(&self, routing_key: &[u8], keyspace: Option<&str>) -> &[SocketAddr] {
        self.replicas_for_token(Murmur3Token::generate(routing_key), keyspace)
    }

    /// Returns replicas for given token, primary first.
    pub fn replicas_for_token(&self, token: Murmur3Token, keyspace: Option<&str>) -> &[SocketAddr] {
        let placement = keyspace
            .and_then(|keyspace| self.keyspace_placements.get(keyspace))
            .unwrap_or(&self.primary_placement);

        if placement.is_empty() {
            return &[];
        }

        let index = placement.partition_point(|(range_end, _)| *range_end < token);
        let (_, replicas) = &placement[if index == placement.len() { 0 } else { index }];
        &replicas[..]
    }

    // Other strategies (e.g. LocalStrategy) are treated as having a single replica
    fn placement(&self, strategy: &ReplicationStrategy) -> Option<Placement> {
        match strategy {
            ReplicationStrategy::SimpleStrategy { replication_factor } => {
                Some(self.simple_placement(*replication_factor))
            }
            ReplicationStrategy::NetworkTopologyStrategy {
                datacenter_replication_factor,
            } => Some(self.network_topology_placement(datacenter_replication_factor)),
            ReplicationStrategy::Other => None,
        }
    }

    fn simple_placement(&self, replication_factor: usize) -> Placement {
        let distinct_nodes = self
            .token_ring
            .iter()
            .map(|(_, node)| node.broadcast_rpc_address())
            .unique()
            .count();
        let replica_count = replication_factor.min(distinct_nodes);

        let placement = (0..self.token_ring.len())
            .map(|index| {
                let mut replicas = Vec::with_capacity(replica_count);
                for (_, node) in self.walk_ring(index) {
                    if replicas.len() == replica_count {
                        break;
                    }

                    let address = node.broadcast_rpc_address();
                    if !replicas.contains(&address) {
                        replicas.push(address);
                    }
                }

                (self.token_ring[index].0, Arc::from(replicas))
            })
            .collect();

        Arc::new(placement)
    }

    fn network_topology_placement(
        &self,
        datacenter_replication_factor: &FxHashMap<String, usize>,
    ) -> Placement {
        // a datacenter can't hold more replicas than it has nodes
        let wanted: FxHashMap<&str, usize> = datacenter_replication_factor
            .iter()
            .filter_map(|(dc, replication_factor)| {
                self.datacenters.get(dc).map(|topology| {
                    (dc.as_str(), (*replication_factor).min(topology.nodes.len()))
                })
            })
            .filter(|(_, replica_count)| *replica_count > 0)
            .collect();

        let placement = (0..self.token_ring.len())
            .map(|index| {
                let replicas = self.network_topology_replicas(index, &wanted);
                (self.token_ring[index].0, Arc::from(replicas))
            })
            .collect();

        Arc::new(placement)
    }

    // Rack-aware walk: prefer nodes on racks not yet holding a replica; nodes on already used
    // racks are kept aside and used only once every rack of the datacenter holds a replica.
    fn network_topology_replicas(
        &self,
        index: usize,
        wanted: &FxHashMap<&str, usize>,
    ) -> Vec<SocketAddr> {
        let total_wanted: usize = wanted.values().sum();
        let mut replicas = Vec::with_capacity(total_wanted);
        let mut replica_counts: FxHashMap<&str, usize> = Default::default();
        let mut seen_racks: FxHashMap<&str, FxHashSet<&str>> = Default::default();
        let mut skipped: FxHashMap<&str, VecDeque<SocketAddr>> = Default::default();

        for (_, node) in self.walk_ring(index) {
            if replicas.len() == total_wanted {
                break;
            }

            let dc = node.datacenter();
            let Some(wanted_in_dc) = wanted.get(dc) else {
                continue;
            };

            let address = node.broadcast_rpc_address();
            let in_dc = replica_counts.entry(dc).or_default();
            if *in_dc >= *wanted_in_dc || replicas.contains(&address) {
                continue;
            }

            let rack_count = self
                .datacenters
                .get(dc)
                .map(|topology| topology.racks.len())
                .unwrap_or(0);

            let racks = seen_racks.entry(dc).or_default();
            if racks.len() == rack_count {
                replicas.push(address);
                *in_dc += 1;
            } else if racks.contains(node.rack()) {
                let skipped = skipped.entry(dc).or_default();
                if !skipped.contains(&address) {
                    skipped.push_back(address);
                }
            } else {
                replicas.push(address);
                *in_dc += 1;
                racks.insert(node.rack());

                if racks.len() == rack_count {
                    if let Some(skipped) = skipped.get_mut(dc) {
                        while *in_dc < *wanted_in_dc {
                            let Some(address) = skipped.pop_front() else {
                                break;
                            };

                            if !replicas.contains(&address) {
                                replicas.push(address);
                                *in_dc += 1;
                            }
                        }
                    }
                }
            }
        }

        replicas
    }

    fn walk_ring(&self, start: usize) -> impl Iterator<Item = &(Murmur3Token, Arc<Node>)> + '_ {
        self.token_ring[start..]
            .iter()
            .chain(self.token_ring[..start].iter())
    }
}
