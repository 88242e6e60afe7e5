mod reconnection_policy;
mod retry_policy;

pub use self::reconnection_policy::{
    ConstantReconnectionPolicy, ExponentialReconnectionPolicy, NeverReconnectionPolicy,
    ReconnectionPolicy, ReconnectionSchedule,
};
#[cfg(test)]
pub use self::reconnection_policy::MockReconnectionPolicy;
pub use self::retry_policy::{
    DefaultRetryPolicy, DefaultRetrySession, FallthroughRetryPolicy, FallthroughRetrySession,
    QueryInfo, RetryDecision, RetryPolicy, RetrySession,
};
