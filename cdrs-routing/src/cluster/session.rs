use bytes::Bytes;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::cluster::connection_pool::{ConnectionPoolFactory, ConnectionPools};
use crate::cluster::send_request::send_request;
use crate::cluster::{ConnectionManager, ConnectionPoolConfig, NodeEvent, NodeRegistry};
use crate::error::{Error, Result};
use crate::load_balancing::{LatencyTracker, LoadBalancingConfig, LoadBalancingPolicy, QueryPlan};
use crate::retry::{
    DefaultRetryPolicy, ExponentialReconnectionPolicy, ReconnectionPolicy, RetryPolicy,
};
use crate::speculative_execution::{self, SpeculativeExecutionPolicy};
use crate::statement::StatementParams;
use crate::transport::CdrsTransport;

/// CDRS session that routes statements to cluster nodes, holding one pool of connections per
/// node.
///
/// The session owns a [`NodeRegistry`], which needs to be fed with topology information by the
/// caller. Pools are created lazily, when a node is first used, and dropped when the node is
/// removed from the registry.
pub struct Session<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static> {
    registry: Arc<NodeRegistry>,
    load_balancing: Arc<LoadBalancingPolicy>,
    pools: Arc<ConnectionPools<T, CM>>,
    retry_policy: Arc<dyn RetryPolicy + Send + Sync>,
    speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy + Send + Sync>>,
    default_timeout: Option<Duration>,
    background_tasks: Vec<JoinHandle<()>>,
}

impl<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static> Drop for Session<T, CM> {
    fn drop(&mut self) {
        for task in &self.background_tasks {
            task.abort();
        }
    }
}

impl<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static> Session<T, CM> {
    /// Returns the node registry used for routing.
    #[inline]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    #[inline]
    pub fn load_balancing(&self) -> &LoadBalancingPolicy {
        &self.load_balancing
    }

    /// Returns the query plan the given statement would be executed with.
    pub fn query_plan(&self, statement: &StatementParams) -> QueryPlan {
        self.load_balancing
            .query_plan(&statement.request(), self.registry.metadata())
    }

    /// Executes given statement and returns the encoded response.
    pub async fn execute(&self, statement: &StatementParams) -> Result<Bytes> {
        self.execute_with_cancellation(statement, &CancellationToken::new())
            .await
    }

    /// Executes given statement, abandoning it when `cancellation` is triggered.
    pub async fn execute_with_cancellation(
        &self,
        statement: &StatementParams,
        cancellation: &CancellationToken,
    ) -> Result<Bytes> {
        let plan = self.query_plan(statement);
        let pools: &ConnectionPools<T, CM> = &self.pools;

        let retry_policy = statement
            .retry_policy
            .as_ref()
            .unwrap_or(&self.retry_policy);

        let speculative_execution_policy = statement
            .speculative_execution_policy
            .as_ref()
            .or(self.speculative_execution_policy.as_ref())
            .map(|policy| policy.as_ref());

        let latency_tracker = self
            .load_balancing
            .latency_tracker()
            .map(|latency_tracker| latency_tracker.as_ref());

        let execution = speculative_execution::execute(
            plan,
            statement.is_idempotent,
            speculative_execution_policy,
            cancellation,
            |node, plan, token| {
                send_request(
                    node,
                    plan,
                    pools,
                    &statement.body,
                    statement.is_idempotent,
                    retry_policy.new_session(),
                    latency_tracker,
                    token,
                )
            },
        );

        match statement.timeout.or(self.default_timeout) {
            Some(timeout) => tokio::time::timeout(timeout, execution)
                .await
                .map_err(|_| Error::Timeout(format!("Statement timed out after {timeout:?}")))?,
            None => execution.await,
        }
    }
}

/// Builder for [`Session`]. Needs to be built inside a Tokio runtime, since the session runs
/// background tasks.
pub struct SessionBuilder<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static> {
    connection_manager: CM,
    load_balancing: LoadBalancingConfig,
    connection_pool_config: ConnectionPoolConfig,
    retry_policy: Arc<dyn RetryPolicy + Send + Sync>,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy + Send + Sync>>,
    default_timeout: Option<Duration>,
    _transport: PhantomData<T>,
}

impl<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static> SessionBuilder<T, CM> {
    pub fn new(connection_manager: CM, load_balancing: LoadBalancingConfig) -> Self {
        SessionBuilder {
            connection_manager,
            load_balancing,
            connection_pool_config: Default::default(),
            retry_policy: Arc::new(DefaultRetryPolicy),
            reconnection_policy: Arc::new(ExponentialReconnectionPolicy::default()),
            speculative_execution_policy: None,
            default_timeout: None,
            _transport: Default::default(),
        }
    }

    /// Sets node connection pool configuration.
    #[must_use]
    pub fn with_connection_pool_config(
        mut self,
        connection_pool_config: ConnectionPoolConfig,
    ) -> Self {
        self.connection_pool_config = connection_pool_config;
        self
    }

    /// Sets new retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: Box<dyn RetryPolicy + Send + Sync>) -> Self {
        self.retry_policy = retry_policy.into();
        self
    }

    /// Sets new reconnection policy.
    #[must_use]
    pub fn with_reconnection_policy(
        mut self,
        reconnection_policy: Box<dyn ReconnectionPolicy + Send + Sync>,
    ) -> Self {
        self.reconnection_policy = reconnection_policy.into();
        self
    }

    /// Sets new speculative execution policy.
    #[must_use]
    pub fn with_speculative_execution_policy(
        mut self,
        speculative_execution_policy: Box<dyn SpeculativeExecutionPolicy + Send + Sync>,
    ) -> Self {
        self.speculative_execution_policy = Some(speculative_execution_policy.into());
        self
    }

    /// Sets default statement timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Builds the resulting session.
    pub fn build(self) -> Result<Session<T, CM>> {
        self.connection_pool_config.validate()?;

        let load_balancing = Arc::new(LoadBalancingPolicy::new(self.load_balancing));
        let registry = Arc::new(NodeRegistry::new(load_balancing.node_distance_evaluator()));

        let pools = Arc::new(ConnectionPools::new(ConnectionPoolFactory::new(
            self.connection_pool_config,
            self.connection_manager,
            registry.clone(),
            self.reconnection_policy,
        )));

        let latency_tracker = load_balancing.latency_tracker().cloned();

        let mut background_tasks = vec![listen_to_node_events(
            &registry,
            Arc::downgrade(&pools),
            latency_tracker.clone(),
        )];

        if let Some(latency_tracker) = latency_tracker {
            background_tasks.push(refresh_min_latency(latency_tracker));
        }

        Ok(Session {
            registry,
            load_balancing,
            pools,
            retry_policy: self.retry_policy,
            speculative_execution_policy: self.speculative_execution_policy,
            default_timeout: self.default_timeout,
            background_tasks,
        })
    }
}

fn listen_to_node_events<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static>(
    registry: &NodeRegistry,
    pools: Weak<ConnectionPools<T, CM>>,
    latency_tracker: Option<Arc<LatencyTracker>>,
) -> JoinHandle<()> {
    let mut events = registry.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NodeEvent::Removed(broadcast_rpc_address)) => {
                    match pools.upgrade() {
                        Some(pools) => pools.remove(broadcast_rpc_address),
                        None => break,
                    }

                    if let Some(latency_tracker) = &latency_tracker {
                        latency_tracker.forget(broadcast_rpc_address);
                    }
                }
                Ok(event) => {
                    trace!(?event, "Node event.");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed node events!");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn refresh_min_latency(latency_tracker: Arc<LatencyTracker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(latency_tracker.config().update_rate());
        loop {
            interval.tick().await;
            latency_tracker.refresh_min_average();
        }
    })
}
