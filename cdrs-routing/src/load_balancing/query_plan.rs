use derivative::Derivative;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::vec::IntoIter;

use crate::cluster::topology::Node;
use crate::cluster::ClusterMetadata;
use crate::consistency::Consistency;
use crate::token::Murmur3Token;

/// Eligibility tier of a query plan. Tiers are visited in order and never share nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Up local nodes.
    Local,
    /// Up nodes of given remote datacenter.
    Remote(String),
}

/// Candidates of a single tier, in the order they will be tried.
#[derive(Debug, Clone)]
pub struct Tier {
    pub kind: TierKind,
    pub nodes: Vec<Arc<Node>>,
}

/// Per-plan information available to plan stages.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    pub keyspace: Option<String>,
    pub token: Option<Murmur3Token>,
    pub consistency: Option<Consistency>,
    /// Replicas for the routing token, primary first. Empty when token-aware routing is disabled,
    /// no token is known or the ring is not built.
    pub replicas: Vec<SocketAddr>,
    /// Rotation offset shared by all tiers of the plan.
    pub offset: usize,
}

/// One step of the load balancing pipeline. Stages narrow or reorder candidates of a tier and are
/// applied in a fixed order to every tier of every plan.
pub trait PlanStage: Send + Sync {
    fn narrow(&self, tier: &mut Tier, context: &PlanContext);
}

/// Lazily computed, non-restartable sequence of candidate nodes for a single request. Tiers are
/// materialized only when the previous one is exhausted, so a consumer which stops early never
/// pays for the rest.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct QueryPlan {
    #[derivative(Debug = "ignore")]
    cluster: Option<Arc<ClusterMetadata>>,
    context: PlanContext,
    pending_tiers: VecDeque<TierKind>,
    current: IntoIter<Arc<Node>>,
    #[derivative(Debug = "ignore")]
    stages: Arc<Vec<Box<dyn PlanStage>>>,
}

impl QueryPlan {
    pub(crate) fn new(
        cluster: Arc<ClusterMetadata>,
        context: PlanContext,
        tiers: VecDeque<TierKind>,
        stages: Arc<Vec<Box<dyn PlanStage>>>,
    ) -> Self {
        QueryPlan {
            cluster: Some(cluster),
            context,
            pending_tiers: tiers,
            current: Vec::new().into_iter(),
            stages,
        }
    }

    /// A plan without any candidates.
    pub fn empty() -> Self {
        Self::from_nodes(Vec::new())
    }

    /// A plan visiting given nodes in order.
    pub fn from_nodes(nodes: Vec<Arc<Node>>) -> Self {
        QueryPlan {
            cluster: None,
            context: Default::default(),
            pending_tiers: Default::default(),
            current: nodes.into_iter(),
            stages: Default::default(),
        }
    }

    /// Returns the context the plan was built with.
    #[inline]
    pub fn context(&self) -> &PlanContext {
        &self.context
    }

    fn build_tier(&self, cluster: &ClusterMetadata, kind: TierKind) -> Vec<Arc<Node>> {
        let mut nodes: Vec<_> = match &kind {
            TierKind::Local => cluster.up_local_nodes().cloned().collect(),
            TierKind::Remote(dc) => cluster
                .up_nodes_in_dc(dc)
                .filter(|node| node.is_remote())
                .cloned()
                .collect(),
        };

        if !nodes.is_empty() {
            let offset = self.context.offset % nodes.len();
            nodes.rotate_left(offset);
        }

        let mut tier = Tier { kind, nodes };
        for stage in self.stages.iter() {
            stage.narrow(&mut tier, &self.context);
        }

        tier.nodes
    }
}

impl Iterator for QueryPlan {
    type Item = Arc<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.current.next() {
                return Some(node);
            }

            let kind = self.pending_tiers.pop_front()?;
            let cluster = self.cluster.clone()?;
            self.current = self.build_tier(&cluster, kind).into_iter();
        }
    }
}
