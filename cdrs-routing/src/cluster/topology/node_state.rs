use derive_more::Display;

/// The state of a node, as viewed from the driver. Only `Up` nodes take part in query plans.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum NodeState {
    /// The node is considered reachable: either the driver holds at least one working
    /// connection to it, or the topology reported it and nothing has proven otherwise.
    Up,
    /// The driver has lost all connections to the node (and is possibly trying to reconnect),
    /// or a liveness event reported it as down.
    Down,
    /// The node is known, but deliberately excluded from routing until explicitly restored.
    /// Liveness events do not change this state.
    Ignored,
}
