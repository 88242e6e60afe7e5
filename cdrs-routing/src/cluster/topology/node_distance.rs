use derive_more::Display;

/// Location of a node in relation to the driver.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Display)]
pub enum NodeDistance {
    /// The node is in the local datacenter. Local nodes are always eligible for query plans
    /// and are tried before any remote ones.
    Local,
    /// The node is in a remote datacenter. Remote nodes are only used as a fallback, when the
    /// load balancing configuration and the statement's consistency allow it.
    Remote,
}
