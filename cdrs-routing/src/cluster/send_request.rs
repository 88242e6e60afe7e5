use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::cluster::connection_pool::ConnectionPools;
use crate::cluster::topology::Node;
use crate::cluster::ConnectionManager;
use crate::error::{Error, Result};
use crate::load_balancing::LatencyTracker;
use crate::retry::{QueryInfo, RetryDecision, RetrySession};
use crate::speculative_execution::SharedQueryPlan;
use crate::transport::CdrsTransport;

/// A single execution of a request: sends it to the given node and, as the retry session
/// decides, to further nodes taken from the shared plan. Nodes without a usable connection are
/// skipped, since nothing has been written to them. Every answer from a node, successful or not,
/// is reported to the latency tracker.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn send_request<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static>(
    first: Arc<Node>,
    plan: SharedQueryPlan,
    pools: &ConnectionPools<T, CM>,
    request: &Bytes,
    is_idempotent: bool,
    mut retry_session: Box<dyn RetrySession + Send + Sync>,
    latency_tracker: Option<&LatencyTracker>,
    cancellation: CancellationToken,
) -> Result<Bytes> {
    let mut node = first;

    loop {
        let broadcast_rpc_address = node.broadcast_rpc_address();
        let pool = pools.pool(&node).await;

        let error = loop {
            if cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let connection = match pool.connection().await {
                Ok(connection) => connection,
                // keep trying, since another node might be up
                Err(error) => break Error::attempt_failed(broadcast_rpc_address, error),
            };

            trace!(%broadcast_rpc_address, "Sending request.");

            let start = Instant::now();
            let result = connection.transport.write_request(request).await;
            let now = Instant::now();

            let error = match result {
                Ok(response) => {
                    connection.health.record_activity(now);
                    if let Some(latency_tracker) = latency_tracker {
                        latency_tracker.record_at(broadcast_rpc_address, now - start, now);
                    }

                    return Ok(response);
                }
                Err(error) => error,
            };

            if error.is_node_response() {
                connection.health.record_activity(now);
                if let Some(latency_tracker) = latency_tracker {
                    latency_tracker.record_at(broadcast_rpc_address, now - start, now);
                }
            }

            let error = Error::attempt_failed(broadcast_rpc_address, error);
            let query_info = QueryInfo {
                error: &error,
                is_idempotent,
            };

            let decision = retry_session.decide(query_info);
            debug!(%broadcast_rpc_address, %error, %decision, "Request failed.");

            match decision {
                RetryDecision::RetrySameNode => {}
                RetryDecision::RetryNextNode => break error,
                RetryDecision::DontRetry => return Err(error),
            }
        };

        // the error from the last node tried is reported once the plan runs out
        node = match plan.next() {
            Some(node) => node,
            None => return Err(error),
        };
    }
}
