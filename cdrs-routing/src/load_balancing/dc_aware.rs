use std::collections::VecDeque;

use crate::cluster::ClusterMetadata;
use crate::consistency::Consistency;
use crate::load_balancing::{PlanContext, PlanStage, PolicyKind, Tier, TierKind};

/// Computes the tiers visited by a plan. Round-robin uses a single tier with every node (all
/// nodes are local then). The datacenter-aware policy starts with the local datacenter and, when
/// allowed, continues with remote datacenters in ascending name order.
pub fn plan_tiers(
    policy: &PolicyKind,
    consistency: Option<Consistency>,
    cluster: &ClusterMetadata,
) -> VecDeque<TierKind> {
    let mut tiers = VecDeque::with_capacity(1 + cluster.remote_datacenters().len());
    tiers.push_back(TierKind::Local);

    if let PolicyKind::DcAware {
        used_hosts_per_remote_dc,
        allow_remote_dcs_for_local_cl,
        ..
    } = policy
    {
        let remote_allowed = *allow_remote_dcs_for_local_cl
            || !consistency
                .map(|consistency| consistency.is_dc_local())
                .unwrap_or(false);

        if *used_hosts_per_remote_dc > 0 && remote_allowed {
            tiers.extend(
                cluster
                    .remote_datacenters()
                    .iter()
                    .map(|dc| TierKind::Remote(dc.clone())),
            );
        }
    }

    tiers
}

/// Limits the number of candidates from each remote datacenter.
pub struct RemoteDcCapStage {
    used_hosts_per_remote_dc: usize,
}

impl RemoteDcCapStage {
    pub fn new(used_hosts_per_remote_dc: usize) -> Self {
        RemoteDcCapStage {
            used_hosts_per_remote_dc,
        }
    }
}

impl PlanStage for RemoteDcCapStage {
    fn narrow(&self, tier: &mut Tier, _context: &PlanContext) {
        if let TierKind::Remote(_) = tier.kind {
            tier.nodes.truncate(self.used_hosts_per_remote_dc);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use crate::cluster::topology::{Node, NodeDistance, NodeMap, NodeState};
    use crate::cluster::ClusterMetadata;
    use crate::consistency::Consistency;
    use crate::load_balancing::dc_aware::plan_tiers;
    use crate::load_balancing::{PolicyKind, TierKind};

    fn cluster() -> ClusterMetadata {
        let nodes: NodeMap = vec![(1, "dc1"), (2, "dc3"), (3, "dc2")]
            .into_iter()
            .map(|(last_octet, dc)| {
                let address =
                    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet)), 9042);
                let distance = if dc == "dc1" {
                    NodeDistance::Local
                } else {
                    NodeDistance::Remote
                };

                (
                    address,
                    Arc::new(Node::new(
                        address,
                        None,
                        Some(distance),
                        NodeState::Up,
                        vec![],
                        "r1".into(),
                        dc.into(),
                    )),
                )
            })
            .collect();

        ClusterMetadata::new(nodes, Default::default())
    }

    #[test]
    fn should_visit_remote_datacenters_in_name_order() {
        let tiers = plan_tiers(
            &PolicyKind::dc_aware("dc1", 1, false),
            Some(Consistency::Quorum),
            &cluster(),
        );

        assert_eq!(
            tiers.into_iter().collect::<Vec<_>>(),
            vec![
                TierKind::Local,
                TierKind::Remote("dc2".into()),
                TierKind::Remote("dc3".into())
            ]
        );
    }

    #[test]
    fn should_skip_remote_datacenters_for_local_consistency() {
        let cluster = cluster();

        let tiers = plan_tiers(
            &PolicyKind::dc_aware("dc1", 2, false),
            Some(Consistency::LocalQuorum),
            &cluster,
        );
        assert_eq!(tiers.len(), 1);

        let tiers = plan_tiers(
            &PolicyKind::dc_aware("dc1", 2, true),
            Some(Consistency::LocalQuorum),
            &cluster,
        );
        assert_eq!(tiers.len(), 3);
    }

    #[test]
    fn should_skip_remote_datacenters_without_used_hosts() {
        let tiers = plan_tiers(&PolicyKind::dc_aware("dc1", 0, true), None, &cluster());
        assert_eq!(tiers.len(), 1);
    }

    #[test]
    fn should_use_single_tier_for_round_robin() {
        let tiers = plan_tiers(&PolicyKind::RoundRobin, None, &cluster());
        assert_eq!(tiers.len(), 1);
    }
}
