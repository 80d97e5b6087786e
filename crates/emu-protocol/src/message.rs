//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use emu_core::{LinkSpec, Node, NodeId, NodeSpec, SessionId, SessionState, SessionView};
use serde::{Deserialize, Serialize};

/// Requests a client can send to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Liveness check
    Ping {
        /// Sequence number echoed in the pong
        seq: u64,
    },

    /// Daemon status (backend kind, session count)
    Status,

    /// Request the session list
    ListSessions,

    /// Request a single session
    GetSession { session_id: SessionId },

    /// Create a session, optionally with a client-chosen id
    CreateSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },

    /// Delete a session and its topology
    DeleteSession { session_id: SessionId },

    /// Move a session to another lifecycle state
    SetSessionState {
        session_id: SessionId,
        state: SessionState,
    },

    /// Add a node to a session
    AddNode {
        session_id: SessionId,
        #[serde(default)]
        node: NodeSpec,
    },

    /// Remove a node from a session
    DeleteNode {
        session_id: SessionId,
        node_id: NodeId,
    },

    /// Link two nodes of a session
    AddLink {
        session_id: SessionId,
        link: LinkSpec,
    },
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn status() -> Self {
        Self::new(MessageType::Status)
    }

    pub fn list_sessions() -> Self {
        Self::new(MessageType::ListSessions)
    }

    pub fn get_session(session_id: SessionId) -> Self {
        Self::new(MessageType::GetSession { session_id })
    }

    pub fn create_session(session_id: Option<SessionId>) -> Self {
        Self::new(MessageType::CreateSession { session_id })
    }

    pub fn delete_session(session_id: SessionId) -> Self {
        Self::new(MessageType::DeleteSession { session_id })
    }

    pub fn set_session_state(session_id: SessionId, state: SessionState) -> Self {
        Self::new(MessageType::SetSessionState { session_id, state })
    }

    pub fn add_node(session_id: SessionId, node: NodeSpec) -> Self {
        Self::new(MessageType::AddNode { session_id, node })
    }

    pub fn delete_node(session_id: SessionId, node_id: NodeId) -> Self {
        Self::new(MessageType::DeleteNode {
            session_id,
            node_id,
        })
    }

    pub fn add_link(session_id: SessionId, link: LinkSpec) -> Self {
        Self::new(MessageType::AddLink { session_id, link })
    }
}

/// Summary of the daemon reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version (crate version)
    pub version: String,
    /// Bridge backend in use ("ovs" or "linux-bridge")
    pub network_backend: String,
    pub sessions: usize,
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Pong response to ping
    Pong { seq: u64 },

    /// Daemon status
    Status { status: DaemonStatus },

    /// Full session list response
    SessionList { sessions: Vec<SessionView> },

    /// A single session (after get, create or state change)
    Session { session: Box<SessionView> },

    /// Session was deleted
    SessionDeleted { session_id: SessionId },

    /// Node was added
    NodeAdded { session_id: SessionId, node: Node },

    /// Node was removed
    NodeDeleted {
        session_id: SessionId,
        node_id: NodeId,
    },

    /// Link was added
    LinkAdded {
        session_id: SessionId,
        link: LinkSpec,
    },

    /// Request rejected (version mismatch)
    Rejected {
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Error response
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn status(status: DaemonStatus) -> Self {
        Self::Status { status }
    }

    pub fn session_list(sessions: Vec<SessionView>) -> Self {
        Self::SessionList { sessions }
    }

    pub fn session(session: SessionView) -> Self {
        Self::Session {
            session: Box::new(session),
        }
    }

    pub fn session_deleted(session_id: SessionId) -> Self {
        Self::SessionDeleted { session_id }
    }

    pub fn node_added(session_id: SessionId, node: Node) -> Self {
        Self::NodeAdded { session_id, node }
    }

    pub fn node_deleted(session_id: SessionId, node_id: NodeId) -> Self {
        Self::NodeDeleted {
            session_id,
            node_id,
        }
    }

    pub fn link_added(session_id: SessionId, link: LinkSpec) -> Self {
        Self::LinkAdded { session_id, link }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// Returns true for `error` and `rejected` responses.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Rejected { .. })
    }
}
