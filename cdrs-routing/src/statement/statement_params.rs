use bytes::Bytes;
use derivative::Derivative;
use std::sync::Arc;
use std::time::Duration;

use crate::consistency::Consistency;
use crate::load_balancing::Request;
use crate::retry::RetryPolicy;
use crate::speculative_execution::SpeculativeExecutionPolicy;
use crate::token::Murmur3Token;

/// Parameters of a single statement execution.
#[derive(Default, Clone, Derivative)]
#[derivative(Debug)]
pub struct StatementParams {
    /// Encoded request, passed as-is to the transport.
    #[derivative(Debug = "ignore")]
    pub body: Bytes,
    /// Statement consistency. Local consistencies keep the statement in the local datacenter,
    /// unless the load balancing policy allows otherwise.
    pub consistency: Option<Consistency>,
    /// Is the statement idempotent. Only idempotent statements are executed speculatively or
    /// moved to other nodes after being written.
    pub is_idempotent: bool,
    /// Statement keyspace. Setting it explicitly allows the load balancer to use the keyspace
    /// replication when selecting replicas.
    pub keyspace: Option<String>,
    /// The token to use for token-aware routing. Takes precedence over `routing_key`.
    pub token: Option<Murmur3Token>,
    /// Serialized partition key to use for token-aware routing. Alternative to `token`.
    pub routing_key: Option<Vec<u8>>,
    /// Time after which the whole execution, including speculative executions and retries,
    /// is abandoned. Overrides the session default.
    pub timeout: Option<Duration>,
    /// Custom statement speculative execution policy.
    #[derivative(Debug = "ignore")]
    pub speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy + Send + Sync>>,
    /// Custom statement retry policy.
    #[derivative(Debug = "ignore")]
    pub retry_policy: Option<Arc<dyn RetryPolicy + Send + Sync>>,
}

impl StatementParams {
    /// Returns the load balancing view of this statement.
    pub fn request(&self) -> Request<'_> {
        Request::new(
            self.keyspace.as_deref(),
            self.token,
            self.routing_key.as_deref(),
            self.consistency,
        )
    }
}
