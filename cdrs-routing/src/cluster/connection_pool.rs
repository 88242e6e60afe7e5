use atomic::Atomic;
use bytemuck::NoUninit;
use derive_more::Display;
use futures::future::join_all;
use fxhash::FxHashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell, RwLock};
use tokio::time::{sleep, Instant};
use tracing::*;

use crate::cluster::connection_health::{monitor_connection, ConnectionHealth, HeartbeatConfig};
use crate::cluster::topology::{Node, NodeDistance, NodeState};
use crate::cluster::{ConnectionManager, NodeRegistry};
use crate::error::{Error, Result};
use crate::retry::{ReconnectionPolicy, ReconnectionSchedule};
use crate::transport::CdrsTransport;

#[derive(Copy, Clone, PartialEq, Eq, Display, NoUninit)]
#[repr(u8)]
enum ReconnectionState {
    NotRunning,
    InProgress,
    Disabled,
}

/// Configuration for node connection pools. By default, every node gets a single connection,
/// there is no connect timeout and heartbeats use [`HeartbeatConfig::default`]. If the distance
/// to a given node is unknown, it is treated as remote.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionPoolConfig {
    local_size: usize,
    remote_size: usize,
    connect_timeout: Option<Duration>,
    heartbeat: HeartbeatConfig,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        ConnectionPoolConfig {
            local_size: 1,
            remote_size: 1,
            connect_timeout: None,
            heartbeat: Default::default(),
        }
    }
}

impl ConnectionPoolConfig {
    /// Creates a new configuration for pools of given sizes, with optional connect timeout.
    pub fn new(local_size: usize, remote_size: usize, connect_timeout: Option<Duration>) -> Self {
        ConnectionPoolConfig {
            local_size,
            remote_size,
            connect_timeout,
            heartbeat: Default::default(),
        }
    }

    /// Sets heartbeat settings of pooled connections.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[inline]
    pub fn local_size(&self) -> usize {
        self.local_size
    }

    #[inline]
    pub fn remote_size(&self) -> usize {
        self.remote_size
    }

    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    #[inline]
    pub fn heartbeat(&self) -> &HeartbeatConfig {
        &self.heartbeat
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.local_size == 0 || self.remote_size == 0 {
            return Err(Error::Configuration(format!(
                "Connection pool sizes must be greater than zero, got local: {}, remote: {}",
                self.local_size, self.remote_size
            )));
        }

        Ok(())
    }

    fn size(&self, node_distance: Option<NodeDistance>) -> usize {
        if node_distance == Some(NodeDistance::Local) {
            self.local_size
        } else {
            self.remote_size
        }
    }
}

/// A pooled connection along with its health record.
pub(crate) struct PooledConnection<T> {
    pub(crate) transport: Arc<T>,
    pub(crate) health: Arc<ConnectionHealth>,
}

impl<T> Clone for PooledConnection<T> {
    fn clone(&self) -> Self {
        PooledConnection {
            transport: self.transport.clone(),
            health: self.health.clone(),
        }
    }
}

impl<T: CdrsTransport> PooledConnection<T> {
    #[inline]
    fn is_usable(&self) -> bool {
        !self.transport.is_broken() && !self.health.is_timed_out()
    }
}

async fn new_connection<T: CdrsTransport + 'static, CM: ConnectionManager<T>>(
    connection_manager: &CM,
    broadcast_rpc_address: SocketAddr,
    config: &ConnectionPoolConfig,
    error_handler: mpsc::Sender<Error>,
) -> Result<PooledConnection<T>> {
    let connection =
        connection_manager.connection(Some(error_handler.clone()), broadcast_rpc_address);
    let transport = if let Some(timeout) = config.connect_timeout {
        tokio::time::timeout(timeout, connection)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "Timeout waiting for connection to: {broadcast_rpc_address}"
                ))
            })
            .and_then(|result| result)?
    } else {
        connection.await?
    };

    let transport = Arc::new(transport);
    let health = Arc::new(ConnectionHealth::new(config.heartbeat, Instant::now()));

    monitor_connection(
        Arc::downgrade(&transport),
        health.clone(),
        broadcast_rpc_address,
        error_handler,
    );

    Ok(PooledConnection { transport, health })
}

pub(crate) struct ConnectionPoolFactory<
    T: CdrsTransport + 'static,
    CM: ConnectionManager<T> + 'static,
> {
    config: ConnectionPoolConfig,
    connection_manager: Arc<CM>,
    registry: Arc<NodeRegistry>,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    _transport: PhantomData<T>,
}

impl<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static> ConnectionPoolFactory<T, CM> {
    pub(crate) fn new(
        config: ConnectionPoolConfig,
        connection_manager: CM,
        registry: Arc<NodeRegistry>,
        reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    ) -> Self {
        ConnectionPoolFactory {
            config,
            connection_manager: Arc::new(connection_manager),
            registry,
            reconnection_policy,
            _transport: Default::default(),
        }
    }

    /// Creates a pool for given node. Connections which cannot be established right away are
    /// brought up in the background.
    pub(crate) async fn create(&self, node: &Node) -> Arc<ConnectionPool<T, CM>> {
        let broadcast_rpc_address = node.broadcast_rpc_address();
        let desired_size = self.config.size(node.distance());

        let (error_sender, error_receiver) = mpsc::channel(desired_size);

        let pool = Arc::new(
            ConnectionPool::new(
                &self.connection_manager,
                broadcast_rpc_address,
                desired_size,
                self.config,
                error_sender,
            )
            .await,
        );

        Self::monitor_connections(
            error_receiver,
            Arc::downgrade(&pool),
            broadcast_rpc_address,
            Arc::downgrade(&self.registry),
            self.reconnection_policy.clone(),
        );

        pool
    }

    fn monitor_connections(
        mut receiver: mpsc::Receiver<Error>,
        pool: Weak<ConnectionPool<T, CM>>,
        broadcast_rpc_address: SocketAddr,
        registry: Weak<NodeRegistry>,
        reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    ) {
        tokio::spawn(async move {
            let reconnection_state = Arc::new(Atomic::new(ReconnectionState::NotRunning));
            while let Some(error) = receiver.recv().await {
                // when one connection goes down, all of them will most likely go down, so we need
                // to protect against many reconnection attempts
                let state = reconnection_state.load(Ordering::Relaxed);
                if state != ReconnectionState::NotRunning {
                    if state == ReconnectionState::Disabled {
                        break;
                    }

                    continue;
                }

                let (pool, registry) = match (pool.upgrade(), registry.upgrade()) {
                    (Some(pool), Some(registry)) => (pool, registry),
                    _ => break,
                };

                let node_state = registry
                    .metadata()
                    .find_node(broadcast_rpc_address)
                    .map(|node| node.state());

                match node_state {
                    None => {
                        debug!(%broadcast_rpc_address, "Not reconnecting to a removed node.");
                        break;
                    }
                    Some(NodeState::Ignored) => {
                        debug!(%broadcast_rpc_address, "Not reconnecting to an ignored node.");
                        continue;
                    }
                    _ => {}
                }

                reconnection_state.store(ReconnectionState::InProgress, Ordering::Relaxed);

                if pool.has_usable_connection().await {
                    debug!(%broadcast_rpc_address, %error, "Connection lost. Replacing.");
                } else {
                    warn!(
                        %broadcast_rpc_address,
                        %error,
                        "All connections down. Starting reconnection."
                    );

                    registry.mark_down(broadcast_rpc_address);
                }

                let reconnection_schedule = reconnection_policy.new_node_schedule();
                let reconnecting = reconnection_state.clone();
                let pool = Arc::downgrade(&pool);
                let registry = Arc::downgrade(&registry);

                tokio::spawn(async move {
                    let new_state = Self::run_reconnection_loop(reconnection_schedule, pool).await;

                    reconnecting.store(new_state, Ordering::Relaxed);
                    debug!(%broadcast_rpc_address, %new_state, "Reconnection loop stopped.");

                    if let Some(registry) = registry.upgrade() {
                        if new_state == ReconnectionState::NotRunning {
                            debug!(%broadcast_rpc_address, "All connections reestablished.");
                            registry.mark_up(broadcast_rpc_address);
                        } else {
                            warn!(
                                %broadcast_rpc_address,
                                "Giving up reconnecting. Node stays down until marked up."
                            );
                        }
                    }
                });
            }

            debug!(%broadcast_rpc_address, "Pool monitoring stopped.");
        });
    }

    async fn run_reconnection_loop(
        mut reconnection_schedule: Box<dyn ReconnectionSchedule + Send + Sync>,
        pool: Weak<ConnectionPool<T, CM>>,
    ) -> ReconnectionState {
        while let Some(delay) = reconnection_schedule.next_delay() {
            sleep(delay).await;

            let pool = match pool.upgrade() {
                None => return ReconnectionState::Disabled, // the pool might be gone
                Some(pool) => pool,
            };

            match pool.reconnect_broken().await {
                Ok(true) => return ReconnectionState::NotRunning,
                Ok(false) => {}
                Err(error) => {
                    debug!(
                        broadcast_rpc_address = %pool.broadcast_rpc_address,
                        %error,
                        "Reconnection attempt failed."
                    );
                }
            }
        }

        // the policy doesn't want to reconnect to this node
        ReconnectionState::Disabled
    }
}

/// Connections to a single node.
pub(crate) struct ConnectionPool<T: CdrsTransport, CM: ConnectionManager<T>> {
    connection_manager: Weak<CM>,
    broadcast_rpc_address: SocketAddr,
    config: ConnectionPoolConfig,
    pool: RwLock<Vec<PooledConnection<T>>>,
    desired_size: usize,
    current_index: AtomicUsize,
    error_sender: mpsc::Sender<Error>,
}

impl<T: CdrsTransport + 'static, CM: ConnectionManager<T>> ConnectionPool<T, CM> {
    async fn new(
        connection_manager: &Arc<CM>,
        broadcast_rpc_address: SocketAddr,
        desired_size: usize,
        config: ConnectionPoolConfig,
        error_sender: mpsc::Sender<Error>,
    ) -> Self {
        let connections = join_all((0..desired_size).map(|_| {
            new_connection(
                connection_manager.as_ref(),
                broadcast_rpc_address,
                &config,
                error_sender.clone(),
            )
        }))
        .await;

        let mut last_error = None;
        let pool: Vec<_> = connections
            .into_iter()
            .filter_map(|connection| match connection {
                Ok(connection) => Some(connection),
                // skip invalid connections which can be established later
                Err(error) => {
                    last_error = Some(error);
                    None
                }
            })
            .collect();

        if let Some(error) = last_error {
            // some connections have failed, but can be brought back up, so trigger reconnection
            warn!(
                %broadcast_rpc_address,
                %error,
                established = pool.len(),
                desired_size,
                "Not all pool connections could be established!"
            );

            let _ = error_sender.try_send(error);
        }

        ConnectionPool {
            connection_manager: Arc::downgrade(connection_manager),
            broadcast_rpc_address,
            config,
            pool: RwLock::new(pool),
            desired_size,
            current_index: AtomicUsize::new(0),
            error_sender,
        }
    }

    /// Checks out a usable connection, going round-robin over the pool.
    pub(crate) async fn connection(&self) -> Result<PooledConnection<T>> {
        let pool = self.pool.read().await;
        let pool_len = pool.len();
        if pool_len == 0 {
            return Err(Error::General(format!(
                "No active connections to: {}",
                self.broadcast_rpc_address
            )));
        }

        let first_index = self.current_index.fetch_add(1, Ordering::Relaxed) % pool_len;
        let mut index = first_index;

        loop {
            let connection = &pool[index];
            if connection.is_usable() {
                return Ok(connection.clone());
            }

            index = (index + 1) % pool_len;

            if index == first_index {
                // we've checked the whole pool and everything's down
                warn!(broadcast_rpc_address = %self.broadcast_rpc_address, "All connections down to node.");
                return Err(Error::General(format!(
                    "No active connections to: {}",
                    self.broadcast_rpc_address
                )));
            }
        }
    }

    pub(crate) async fn has_usable_connection(&self) -> bool {
        self.pool
            .read()
            .await
            .iter()
            .any(|connection| connection.is_usable())
    }

    /// Replaces broken and timed out connections and fills the pool up to its size. Returns
    /// `true` if all connections are usable afterwards.
    async fn reconnect_broken(&self) -> Result<bool> {
        let connection_manager = match self.connection_manager.upgrade() {
            Some(connection_manager) => connection_manager,
            None => return Ok(false),
        };

        let mut pool = self.pool.write().await;

        // 1. try to reconnect broken
        for connection in pool.iter_mut() {
            if !connection.is_usable() {
                connection.transport.close();
                *connection = new_connection(
                    connection_manager.as_ref(),
                    self.broadcast_rpc_address,
                    &self.config,
                    self.error_sender.clone(),
                )
                .await?;
            }
        }

        // 2. try to fill missing
        for _ in pool.len()..self.desired_size {
            pool.push(
                new_connection(
                    connection_manager.as_ref(),
                    self.broadcast_rpc_address,
                    &self.config,
                    self.error_sender.clone(),
                )
                .await?,
            );
        }

        // at this point either all connections are up or some might have died in the meantime,
        // which will trigger a new reconnection
        Ok(pool.iter().all(|connection| connection.is_usable()))
    }
}

impl<T: CdrsTransport, CM: ConnectionManager<T>> Drop for ConnectionPool<T, CM> {
    fn drop(&mut self) {
        for connection in self.pool.get_mut().iter() {
            connection.transport.close();
        }
    }
}

/// Lazily created connection pools of all nodes used by a session.
pub(crate) struct ConnectionPools<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static> {
    factory: ConnectionPoolFactory<T, CM>,
    pools: Mutex<FxHashMap<SocketAddr, Arc<OnceCell<Arc<ConnectionPool<T, CM>>>>>>,
}

impl<T: CdrsTransport + 'static, CM: ConnectionManager<T> + 'static> ConnectionPools<T, CM> {
    pub(crate) fn new(factory: ConnectionPoolFactory<T, CM>) -> Self {
        ConnectionPools {
            factory,
            pools: Default::default(),
        }
    }

    /// Returns the pool of given node, creating it on first use.
    pub(crate) async fn pool(&self, node: &Node) -> Arc<ConnectionPool<T, CM>> {
        let cell = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(node.broadcast_rpc_address())
            .or_default()
            .clone();

        let pool = cell.get_or_init(|| self.factory.create(node)).await;
        pool.clone()
    }

    /// Drops the pool of given node, closing its connections.
    pub(crate) fn remove(&self, broadcast_rpc_address: SocketAddr) {
        let removed = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&broadcast_rpc_address);

        if removed.is_some() {
            debug!(%broadcast_rpc_address, "Dropped connection pool.");
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, broadcast_rpc_address: SocketAddr) -> bool {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&broadcast_rpc_address)
    }
}
