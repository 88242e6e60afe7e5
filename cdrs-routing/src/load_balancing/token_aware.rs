use rand::rng;
use rand::seq::SliceRandom;

use crate::load_balancing::{PlanContext, PlanStage, Tier};

/// Moves replicas of the routing token to the front of their tier. Replicas keep ring order
/// (primary first) unless shuffling is enabled.
pub struct TokenAwareStage {
    shuffle_replicas: bool,
}

impl TokenAwareStage {
    pub fn new(shuffle_replicas: bool) -> Self {
        TokenAwareStage { shuffle_replicas }
    }
}

impl PlanStage for TokenAwareStage {
    fn narrow(&self, tier: &mut Tier, context: &PlanContext) {
        if context.replicas.is_empty() {
            return;
        }

        let mut replicas = Vec::with_capacity(context.replicas.len());
        for replica in &context.replicas {
            if let Some(index) = tier
                .nodes
                .iter()
                .position(|node| node.broadcast_rpc_address() == *replica)
            {
                replicas.push(tier.nodes.remove(index));
            }
        }

        if replicas.is_empty() {
            return;
        }

        if self.shuffle_replicas {
            replicas.shuffle(&mut rng());
        }

        replicas.append(&mut tier.nodes);
        tier.nodes = replicas;
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use crate::cluster::topology::{Node, NodeDistance, NodeState};
    use crate::load_balancing::{PlanContext, PlanStage, Tier, TierKind, TokenAwareStage};

    fn addr(last_octet: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet)), 9042)
    }

    fn tier(last_octets: &[u8]) -> Tier {
        Tier {
            kind: TierKind::Local,
            nodes: last_octets
                .iter()
                .map(|last_octet| {
                    Arc::new(Node::new(
                        addr(*last_octet),
                        None,
                        Some(NodeDistance::Local),
                        NodeState::Up,
                        vec![],
                        "r1".into(),
                        "dc1".into(),
                    ))
                })
                .collect(),
        }
    }

    fn addresses(tier: &Tier) -> Vec<SocketAddr> {
        tier.nodes
            .iter()
            .map(|node| node.broadcast_rpc_address())
            .collect()
    }

    #[test]
    fn should_move_replicas_to_front_in_ring_order() {
        let mut tier = tier(&[1, 2, 3, 4]);
        let context = PlanContext {
            // 5 is not in this tier
            replicas: vec![addr(3), addr(5), addr(1)],
            ..Default::default()
        };

        TokenAwareStage::new(false).narrow(&mut tier, &context);

        assert_eq!(addresses(&tier), vec![addr(3), addr(1), addr(2), addr(4)]);
    }

    #[test]
    fn should_keep_order_without_replicas() {
        let mut tier = tier(&[2, 1]);
        TokenAwareStage::new(false).narrow(&mut tier, &Default::default());

        assert_eq!(addresses(&tier), vec![addr(2), addr(1)]);
    }

    #[test]
    fn should_shuffle_only_replicas() {
        let mut tier = tier(&[1, 2, 3, 4]);
        let context = PlanContext {
            replicas: vec![addr(3), addr(4)],
            ..Default::default()
        };

        TokenAwareStage::new(true).narrow(&mut tier, &context);

        let addresses = addresses(&tier);
        assert!(addresses[..2].contains(&addr(3)));
        assert!(addresses[..2].contains(&addr(4)));
        assert_eq!(addresses[2..], [addr(1), addr(2)]);
    }
}
