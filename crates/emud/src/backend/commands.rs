//! Backend actor commands and errors.
//!
//! - `BackendCommand`: Commands sent to the actor
//! - `BackendError`: Errors that can occur during backend operations

use emu_core::{DomainError, LinkSpec, Node, NodeId, NodeSpec, SessionId, SessionState, SessionView};
use thiserror::Error;
use tokio::sync::oneshot;

use super::BackendStatus;

// ============================================================================
// Backend Commands
// ============================================================================

/// Commands sent to the backend actor.
///
/// Each command carries a oneshot channel for the response, so callers can
/// await the result without sharing any state with the actor.
#[derive(Debug)]
pub enum BackendCommand {
    Status {
        respond_to: oneshot::Sender<BackendStatus>,
    },

    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SessionView, BackendError>>,
    },

    /// # Errors
    /// - `BackendError::SessionAlreadyExists` if the requested id is taken
    /// - `BackendError::Capacity` if at maximum capacity
    CreateSession {
        session_id: Option<SessionId>,
        respond_to: oneshot::Sender<Result<SessionView, BackendError>>,
    },

    DeleteSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), BackendError>>,
    },

    SetSessionState {
        session_id: SessionId,
        state: SessionState,
        respond_to: oneshot::Sender<Result<SessionView, BackendError>>,
    },

    AddNode {
        session_id: SessionId,
        spec: NodeSpec,
        respond_to: oneshot::Sender<Result<Node, BackendError>>,
    },

    DeleteNode {
        session_id: SessionId,
        node_id: NodeId,
        respond_to: oneshot::Sender<Result<Node, BackendError>>,
    },

    AddLink {
        session_id: SessionId,
        link: LinkSpec,
        respond_to: oneshot::Sender<Result<(), BackendError>>,
    },
}

// ============================================================================
// Backend Errors
// ============================================================================

/// Errors that can occur during backend operations.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend has reached its maximum session capacity.
    #[error("backend is full (max: {max} sessions)")]
    Capacity { max: usize },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    /// The request is structurally invalid (e.g. blank session id).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A domain rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("backend channel closed")]
    ChannelClosed,
}

impl BackendError {
    /// Short machine-readable code used in protocol error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Capacity { .. } => "capacity",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionAlreadyExists(_) => "session_exists",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Domain(DomainError::NodeNotFound { .. }) => "node_not_found",
            Self::Domain(_) => "rejected_by_session",
            Self::ChannelClosed => "backend_unavailable",
        }
    }
}
