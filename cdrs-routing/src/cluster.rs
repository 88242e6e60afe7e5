pub use self::connection_health::{ConnectionHealth, HealthAction, HealthState, HeartbeatConfig};
pub use self::connection_manager::ConnectionManager;
pub use self::connection_pool::ConnectionPoolConfig;
pub use self::node_info::NodeInfo;
pub use self::node_registry::{NodeEvent, NodeRegistry};
pub use self::token_map::TokenMap;
pub use self::topology::ClusterMetadata;

pub mod connection_health;
mod connection_manager;
mod connection_pool;
mod metadata_builder;
mod node_info;
mod node_registry;
mod send_request;
pub mod session;
mod token_map;
pub mod topology;
