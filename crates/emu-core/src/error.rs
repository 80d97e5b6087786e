//! Domain-specific error types following panic-free policy.

use crate::{NodeId, SessionId, SessionState};
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Node id is not present in the session
    #[error("Node {node_id} not found in session {session_id}")]
    NodeNotFound {
        session_id: SessionId,
        node_id: NodeId,
    },

    /// Node name already used within the session
    #[error("Node name already in use: {name}")]
    DuplicateNodeName { name: String },

    /// Session has reached its node capacity
    #[error("Session {session_id} is full (max: {max} nodes)")]
    NodeLimit { session_id: SessionId, max: usize },

    /// Link endpoints are invalid
    #[error("Invalid link {node_one} <-> {node_two}: {reason}")]
    InvalidLink {
        node_one: NodeId,
        node_two: NodeId,
        reason: String,
    },

    /// Requested state change is not allowed
    #[error("Cannot change session state from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Session no longer accepts topology changes
    #[error("Session {session_id} is in {state} state and cannot be modified")]
    NotEditable {
        session_id: SessionId,
        state: SessionState,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
