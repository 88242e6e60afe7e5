//! **cdrs-routing** is the routing and execution-scheduling core of an async Cassandra DB
//! driver.
//!
//! For every outgoing statement it decides which nodes receive it and in what order
//! ([load balancing](crate::load_balancing)), whether redundant concurrent attempts are
//! launched ([speculative execution](crate::speculative_execution)), and when a pooled
//! connection is considered dead ([connection health](crate::cluster::connection_health)).
//! Wire encoding, socket handling and topology discovery are provided by the caller through
//! the [`CdrsTransport`](crate::transport::CdrsTransport) and
//! [`ConnectionManager`](crate::cluster::ConnectionManager) traits and through topology
//! snapshots fed into the [`NodeRegistry`](crate::cluster::NodeRegistry).
//!
//! ## Getting started
//!
//! ```no_run
//! use cdrs_routing::cluster::session::SessionBuilder;
//! use cdrs_routing::cluster::{ConnectionManager, NodeInfo};
//! use cdrs_routing::load_balancing::{LoadBalancingConfigBuilder, PolicyKind};
//! use cdrs_routing::statement::StatementParamsBuilder;
//! use cdrs_routing::transport::CdrsTransport;
//!
//! async fn run<T, CM>(connection_manager: CM, topology: Vec<NodeInfo>) -> cdrs_routing::Result<()>
//! where
//!     T: CdrsTransport + 'static,
//!     CM: ConnectionManager<T> + 'static,
//! {
//!     let load_balancing = LoadBalancingConfigBuilder::new()
//!         .with_policy(PolicyKind::dc_aware("dc1", 2, false))
//!         .build()?;
//!
//!     let session = SessionBuilder::new(connection_manager, load_balancing).build()?;
//!     session.registry().refresh(topology, Default::default());
//!
//!     let statement = StatementParamsBuilder::new("SELECT * FROM ks.t WHERE id = 1")
//!         .with_keyspace("ks".into())
//!         .with_routing_key(vec![0, 0, 0, 1])
//!         .idempotent(true)
//!         .build();
//!
//!     let _response = session.execute(&statement).await?;
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod load_balancing;

pub mod future;
pub mod retry;
pub mod speculative_execution;
pub mod statement;
pub mod transport;

pub use cdrs_routing_protocol::consistency;
pub use cdrs_routing_protocol::error;
pub use cdrs_routing_protocol::token;

pub type Error = error::Error;
pub type Result<T> = error::Result<T>;
