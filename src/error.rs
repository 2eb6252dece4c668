//! Error types for graph construction and propagation

use thiserror::Error;

use crate::node::NodeId;

/// Errors raised while building, wiring or running a patch.
///
/// Every structural error is raised by the call that caused it (connect or
/// build time), so a malformed patch never reaches [`Engine::tick`](crate::Engine::tick).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// Rate mismatch, destroyed endpoint, or an endpoint outside the patch
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// Neither the catalog nor the abstraction registry knows this name
    #[error("unknown object type '{0}'")]
    UnknownObjectType(String),

    /// Signal nodes depend on each other without a delay in between
    #[error("unresolvable signal cycle through {}", .nodes.join(", "))]
    UnresolvableSignalCycle { nodes: Vec<String> },

    /// The node exists but has no port with this index
    #[error("port {index} out of range for {node} ({len} ports)")]
    PortIndexOutOfRange {
        node: NodeId,
        index: usize,
        len: usize,
    },

    /// The node was never created or has been removed
    #[error("{0} not found")]
    NodeNotFound(NodeId),

    /// An abstraction that (directly or not) contains itself
    #[error("abstraction '{0}' instantiates itself")]
    RecursiveAbstraction(String),

    /// A patch operation was given a plain object
    #[error("{0} is not a patch")]
    NotAPatch(NodeId),

    /// A node's own handler failed
    #[error("{node} failed: {source}")]
    Node {
        node: NodeId,
        #[source]
        source: NodeError,
    },
}

/// Failure reported by a node implementation.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct NodeError(pub String);

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for graph operations
pub type Result<T> = core::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::UnresolvableSignalCycle {
            nodes: vec!["+~#1".into(), "*~#2".into()],
        };
        assert_eq!(err.to_string(), "unresolvable signal cycle through +~#1, *~#2");

        let err = GraphError::UnknownObjectType("osc~".into());
        assert!(err.to_string().contains("osc~"));

        let err = GraphError::Node {
            node: NodeId(7),
            source: NodeError::new("boom"),
        };
        assert_eq!(err.to_string(), "node#7 failed: boom");
    }
}
