use bytes::Bytes;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::time::sleep;

use cdrs_routing::cluster::session::{Session, SessionBuilder};
use cdrs_routing::cluster::{ConnectionManager, NodeInfo};
use cdrs_routing::error::{Error, Result};
use cdrs_routing::future::BoxFuture;
use cdrs_routing::load_balancing::LoadBalancingConfig;
use cdrs_routing::token::Murmur3Token;
use cdrs_routing::transport::CdrsTransport;

pub type FakeSession = Session<FakeTransport, FakeConnectionManager>;

/// How a fake node behaves.
#[derive(Clone, Default)]
pub struct NodeBehavior {
    pub latency: Duration,
    pub error: Option<Error>,
    pub refuse_connections: bool,
    pub ignore_heartbeats: bool,
}

#[derive(Default)]
struct NodeStats {
    behavior: NodeBehavior,
    requests: usize,
    heartbeats: usize,
    connections: Vec<Arc<AtomicBool>>,
}

/// Shared state of all fake nodes, scripted by tests.
#[derive(Clone, Default)]
pub struct FakeCluster {
    nodes: Arc<Mutex<HashMap<SocketAddr, NodeStats>>>,
}

#[allow(dead_code)]
impl FakeCluster {
    pub fn set_behavior(&self, addr: SocketAddr, behavior: NodeBehavior) {
        self.nodes.lock().unwrap().entry(addr).or_default().behavior = behavior;
    }

    pub fn requests(&self, addr: SocketAddr) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .get(&addr)
            .map(|stats| stats.requests)
            .unwrap_or_default()
    }

    pub fn total_requests(&self) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .map(|stats| stats.requests)
            .sum()
    }

    pub fn heartbeats(&self, addr: SocketAddr) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .get(&addr)
            .map(|stats| stats.heartbeats)
            .unwrap_or_default()
    }

    pub fn open_connections(&self, addr: SocketAddr) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .get(&addr)
            .map(|stats| {
                stats
                    .connections
                    .iter()
                    .filter(|closed| !closed.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or_default()
    }

    fn behavior(&self, addr: SocketAddr) -> NodeBehavior {
        self.nodes
            .lock()
            .unwrap()
            .get(&addr)
            .map(|stats| stats.behavior.clone())
            .unwrap_or_default()
    }
}

pub struct FakeTransport {
    address: SocketAddr,
    cluster: FakeCluster,
    closed: Arc<AtomicBool>,
}

impl CdrsTransport for FakeTransport {
    fn write_request<'a>(&'a self, request: &'a Bytes) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            let behavior = self.cluster.behavior(self.address);
            self.cluster
                .nodes
                .lock()
                .unwrap()
                .entry(self.address)
                .or_default()
                .requests += 1;

            sleep(behavior.latency).await;

            match behavior.error {
                Some(error) => Err(error),
                None => Ok(request.clone()),
            }
        })
    }

    fn send_heartbeat(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let behavior = self.cluster.behavior(self.address);
            self.cluster
                .nodes
                .lock()
                .unwrap()
                .entry(self.address)
                .or_default()
                .heartbeats += 1;

            if behavior.ignore_heartbeats {
                futures::future::pending::<()>().await;
            }

            Ok(())
        })
    }

    fn is_broken(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn address(&self) -> SocketAddr {
        self.address
    }
}

pub struct FakeConnectionManager {
    cluster: FakeCluster,
}

impl FakeConnectionManager {
    pub fn new(cluster: FakeCluster) -> Self {
        FakeConnectionManager { cluster }
    }
}

impl ConnectionManager<FakeTransport> for FakeConnectionManager {
    fn connection(
        &self,
        _error_handler: Option<Sender<Error>>,
        addr: SocketAddr,
    ) -> BoxFuture<'_, Result<FakeTransport>> {
        Box::pin(async move {
            if self.cluster.behavior(addr).refuse_connections {
                return Err(Error::General(format!("Connection refused: {addr}")));
            }

            let closed = Arc::new(AtomicBool::new(false));
            self.cluster
                .nodes
                .lock()
                .unwrap()
                .entry(addr)
                .or_default()
                .connections
                .push(closed.clone());

            Ok(FakeTransport {
                address: addr,
                cluster: self.cluster.clone(),
                closed,
            })
        })
    }
}

pub fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet)), 9042)
}

pub fn node_info(last_octet: u8, dc: &str) -> NodeInfo {
    NodeInfo::new(
        None,
        addr(last_octet),
        dc.into(),
        vec![Murmur3Token::new(i64::from(last_octet) * 1000)],
        "rack1".into(),
    )
}

#[allow(dead_code)]
pub fn session_builder(
    cluster: &FakeCluster,
    load_balancing: LoadBalancingConfig,
) -> SessionBuilder<FakeTransport, FakeConnectionManager> {
    SessionBuilder::new(FakeConnectionManager::new(cluster.clone()), load_balancing)
}
