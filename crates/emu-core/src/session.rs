//! Session domain entities and value objects.

use crate::{DomainError, DomainResult, LinkSpec, Node, NodeId, NodeSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for an emulation session.
///
/// Either supplied by the client when the session is created or
/// allocated by the backend (e.g. "1", "2", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty or only whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of an emulation session.
///
/// Mirrors the emulator's event states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Definition,
    Configuration,
    Instantiation,
    Runtime,
    #[serde(rename = "datacollect")]
    DataCollect,
    Shutdown,
}

impl SessionState {
    /// All states in lifecycle order.
    pub const ALL: [SessionState; 6] = [
        Self::Definition,
        Self::Configuration,
        Self::Instantiation,
        Self::Runtime,
        Self::DataCollect,
        Self::Shutdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Configuration => "configuration",
            Self::Instantiation => "instantiation",
            Self::Runtime => "runtime",
            Self::DataCollect => "datacollect",
            Self::Shutdown => "shutdown",
        }
    }

    /// Returns true if a session in this state may change to `next`.
    ///
    /// Any state may move to any other, except that a shut down session
    /// can only be reset to definition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        match self {
            Self::Shutdown => matches!(next, Self::Shutdown | Self::Definition),
            _ => true,
        }
    }

    /// Returns true if nodes and links may be added or removed.
    pub fn is_editable(&self) -> bool {
        !matches!(self, Self::DataCollect | Self::Shutdown)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Session Domain Model
// ============================================================================

/// An emulation session: a topology of nodes and links plus its state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    nodes: BTreeMap<NodeId, Node>,
    links: Vec<LinkSpec>,
    next_node_id: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates an empty session in the definition state.
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: SessionState::Definition,
            nodes: BTreeMap::new(),
            links: Vec::new(),
            next_node_id: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the session to a new state, returning the previous one.
    pub fn set_state(&mut self, next: SessionState) -> DomainResult<SessionState> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        self.touch();
        Ok(previous)
    }

    /// Adds a node, allocating the next node id.
    pub fn add_node(&mut self, spec: NodeSpec, max_nodes: usize) -> DomainResult<Node> {
        self.ensure_editable()?;

        if self.nodes.len() >= max_nodes {
            return Err(DomainError::NodeLimit {
                session_id: self.id.clone(),
                max: max_nodes,
            });
        }

        let id = NodeId::new(self.next_node_id);
        let name = match spec.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => format!("{}{}", spec.kind.name_prefix(), id),
        };

        if self.nodes.values().any(|n| n.name == name) {
            return Err(DomainError::DuplicateNodeName { name });
        }

        let node = Node {
            id,
            name,
            kind: spec.kind,
        };
        self.nodes.insert(id, node.clone());
        self.next_node_id = self.next_node_id.saturating_add(1);
        self.touch();
        Ok(node)
    }

    /// Removes a node and every link attached to it.
    pub fn remove_node(&mut self, node_id: NodeId) -> DomainResult<Node> {
        self.ensure_editable()?;

        let node = self
            .nodes
            .remove(&node_id)
            .ok_or_else(|| DomainError::NodeNotFound {
                session_id: self.id.clone(),
                node_id,
            })?;
        self.links
            .retain(|l| l.node_one != node_id && l.node_two != node_id);
        self.touch();
        Ok(node)
    }

    /// Links two existing, distinct nodes.
    pub fn add_link(&mut self, link: LinkSpec) -> DomainResult<()> {
        self.ensure_editable()?;

        if link.node_one == link.node_two {
            return Err(DomainError::InvalidLink {
                node_one: link.node_one,
                node_two: link.node_two,
                reason: "a node cannot be linked to itself".to_string(),
            });
        }
        for node_id in [link.node_one, link.node_two] {
            if !self.nodes.contains_key(&node_id) {
                return Err(DomainError::NodeNotFound {
                    session_id: self.id.clone(),
                    node_id,
                });
            }
        }
        if self.links.iter().any(|l| l.same_endpoints(&link)) {
            return Err(DomainError::InvalidLink {
                node_one: link.node_one,
                node_two: link.node_two,
                reason: "link already exists".to_string(),
            });
        }

        self.links.push(link);
        self.touch();
        Ok(())
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    fn ensure_editable(&self) -> DomainResult<()> {
        if self.state.is_editable() {
            Ok(())
        } else {
            Err(DomainError::NotEditable {
                session_id: self.id.clone(),
                state: self.state,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Session View (wire snapshot)
// ============================================================================

/// Read-only snapshot of a session, sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub state: SessionState,
    pub nodes: Vec<Node>,
    pub links: Vec<LinkSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionView {
    /// Builds a snapshot from the domain model.
    pub fn from_domain(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            state: session.state,
            nodes: session.nodes.values().cloned().collect(),
            links: session.links.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
