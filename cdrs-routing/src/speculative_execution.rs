//! Pre-emptively query another node if the current one takes too long to respond.
//!
//! Sometimes a Cassandra node might be experiencing difficulties (ex: long GC pause) and take
//! longer than usual to reply. Queries sent to that node will experience bad latency.
//!
//! One thing we can do to improve that is pre-emptively start a second execution of the query
//! against another node, before the first node has replied or errored out. If that second node
//! replies faster, we can send the response back to the client. We also cancel the first execution.
//!
//! Turning on speculative executions doesn't change the driver's retry behavior. Each parallel
//! execution will trigger retries independently, taking further nodes from the same query plan.

use derive_more::Constructor;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[cfg(test)]
use mockall::automock;

use crate::cluster::topology::Node;
use crate::error::{Error, Result};
use crate::load_balancing::QueryPlan;

/// Current speculative execution context.
#[derive(Constructor, Debug)]
pub struct Context {
    /// Number of speculative executions started so far, not counting the initial one.
    pub running_executions: usize,
}

/// The policy that decides if the driver will send speculative queries to the next nodes when the
/// current node takes too long to respond. If a query is not idempotent, the driver will never
/// schedule speculative executions for it, because there is no way to guarantee that only one node
/// will apply the mutation.
#[cfg_attr(test, automock)]
pub trait SpeculativeExecutionPolicy {
    /// Returns the time until a speculative request is sent to the next node. `None` means there
    /// should not be another execution.
    fn execution_interval(&self, context: &Context) -> Option<Duration>;
}

/// A policy that schedules a configurable number of speculative executions, separated by a fixed
/// delay.
#[derive(Debug, Clone, Copy, Constructor)]
pub struct ConstantSpeculativeExecutionPolicy {
    max_executions: usize,
    delay: Duration,
}

impl SpeculativeExecutionPolicy for ConstantSpeculativeExecutionPolicy {
    fn execution_interval(&self, context: &Context) -> Option<Duration> {
        if context.running_executions < self.max_executions {
            Some(self.delay)
        } else {
            None
        }
    }
}

/// Query plan shared by all executions of a single query. Every node is handed out once.
#[derive(Clone, Debug)]
pub struct SharedQueryPlan {
    plan: Arc<Mutex<QueryPlan>>,
}

impl SharedQueryPlan {
    pub fn new(plan: QueryPlan) -> Self {
        SharedQueryPlan {
            plan: Arc::new(Mutex::new(plan)),
        }
    }

    /// Takes the next candidate from the plan.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Option<Arc<Node>> {
        self.plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next()
    }
}

/// Runs a query against successive candidates of given plan and returns the first successful
/// result.
///
/// The initial execution starts immediately against the first candidate. For idempotent queries
/// with a speculative execution policy, further executions are started against the next
/// candidates whenever the policy's interval elapses without a result, until the policy or the
/// plan runs out. The first successful execution wins and all others are cancelled. If every
/// execution fails, the last observed failure is returned. An empty plan results in
/// [`Error::NoHostAvailable`].
///
/// `execution` receives the candidate to start with, the shared plan (to take further nodes
/// when retrying) and a cancellation token triggered when the execution is no longer needed.
/// Cancelling `cancellation` abandons the whole query with [`Error::Cancelled`].
pub async fn execute<R, F, Fut>(
    plan: QueryPlan,
    is_idempotent: bool,
    policy: Option<&(dyn SpeculativeExecutionPolicy + Send + Sync)>,
    cancellation: &CancellationToken,
    execution: F,
) -> Result<R>
where
    F: Fn(Arc<Node>, SharedQueryPlan, CancellationToken) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let plan = SharedQueryPlan::new(plan);
    let first = plan
        .next()
        .ok_or_else(|| Error::NoHostAvailable("Query plan is empty".into()))?;

    let executions_token = cancellation.child_token();
    // losers are cancelled however this function exits
    let _executions_guard = executions_token.clone().drop_guard();

    let policy = if is_idempotent { policy } else { None };

    let mut executions = FuturesUnordered::new();
    executions.push(execution(
        first,
        plan.clone(),
        executions_token.child_token(),
    ));

    let mut running_executions = 0;
    let mut next_execution = policy
        .and_then(|policy| policy.execution_interval(&Context::new(running_executions)))
        .map(|interval| Instant::now() + interval);

    let mut last_error = None;

    loop {
        let deadline = next_execution;

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(Error::Cancelled),
            result = executions.next(), if !executions.is_empty() => match result {
                Some(Ok(result)) => {
                    trace!(running_executions, "Execution succeeded.");
                    return Ok(result);
                }
                Some(Err(error)) => {
                    trace!(%error, "Execution failed.");
                    last_error = Some(error);
                }
                None => {}
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                match plan.next() {
                    Some(node) => {
                        running_executions += 1;
                        trace!(
                            broadcast_rpc_address = %node.broadcast_rpc_address(),
                            running_executions,
                            "Starting speculative execution."
                        );

                        executions.push(execution(
                            node,
                            plan.clone(),
                            executions_token.child_token(),
                        ));

                        next_execution = policy
                            .and_then(|policy| {
                                policy.execution_interval(&Context::new(running_executions))
                            })
                            .map(|interval| Instant::now() + interval);
                    }
                    None => {
                        trace!("Query plan exhausted, no more speculative executions.");
                        next_execution = None;
                    }
                }
            }
        }

        if executions.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| Error::NoHostAvailable("All executions finished".into())));
        }
    }
}
