//! Error types for cluster administration

use crate::types::NodeId;
use thiserror::Error;

/// Errors surfaced by administrative operations. None of them are fatal;
/// the simulation keeps running after any of them. A sync timeout is not
/// an error at all (it is reported as a `SyncOutcome`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterError {
    /// The identity is not currently registered
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// The requester's known coordinator is not in the registry, either
    /// because it departed gracefully or because no election has run yet.
    /// Reported as-is; this path never starts an election.
    #[error("node {0} has no reachable coordinator")]
    CoordinatorUnreachable(NodeId),

    /// The target node is crashed. A dead node never sends messages, so
    /// election and sync triggers aimed at it are rejected.
    #[error("node {0} is dead")]
    NodeDead(NodeId),
}
