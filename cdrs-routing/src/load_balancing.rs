mod config;
pub(crate) mod dc_aware;
mod host_filter;
mod latency_aware;
pub mod node_distance_evaluator;
mod policy;
mod query_plan;
mod request;
mod token_aware;

pub use self::config::{
    LatencyAwarenessConfig, LoadBalancingConfig, LoadBalancingConfigBuilder, PolicyKind,
};
pub use self::dc_aware::RemoteDcCapStage;
pub use self::host_filter::{FilterChain, HostFilterStage};
pub use self::latency_aware::{LatencyAwareStage, LatencyScore, LatencyTracker};
pub use self::node_distance_evaluator::NodeDistanceEvaluator;
pub use self::policy::LoadBalancingPolicy;
pub use self::query_plan::{PlanContext, PlanStage, QueryPlan, Tier, TierKind};
pub use self::request::Request;
pub use self::token_aware::TokenAwareStage;
