//! Emulated nodes and the links between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node within a session.
///
/// Allocated by the session, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Kind of emulated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Router/host container
    #[default]
    Default,

    /// Layer 2 switch
    Switch,

    /// Layer 2 hub
    Hub,

    /// Wireless LAN network
    WirelessLan,

    /// Docker container node
    Docker,
}

impl NodeKind {
    /// Prefix used when generating a node name.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            Self::Default => "n",
            Self::Switch => "switch",
            Self::Hub => "hub",
            Self::WirelessLan => "wlan",
            Self::Docker => "docker",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Switch => "switch",
            Self::Hub => "hub",
            Self::WirelessLan => "wireless_lan",
            Self::Docker => "docker",
        };
        write!(f, "{s}")
    }
}

/// Request to create a node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node name; generated from the kind and id when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub kind: NodeKind,
}

impl NodeSpec {
    pub fn new(kind: NodeKind) -> Self {
        Self { name: None, kind }
    }

    pub fn named(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: Some(name.into()),
            kind,
        }
    }
}

/// A node that exists in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
}

/// Link between two nodes of the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSpec {
    pub node_one: NodeId,
    pub node_two: NodeId,
}

impl LinkSpec {
    pub fn new(node_one: NodeId, node_two: NodeId) -> Self {
        Self { node_one, node_two }
    }

    /// Returns true if both links join the same pair, in either direction.
    pub fn same_endpoints(&self, other: &LinkSpec) -> bool {
        (self.node_one == other.node_one && self.node_two == other.node_two)
            || (self.node_one == other.node_two && self.node_two == other.node_one)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_serialization() {
        let json = serde_json::to_string(&NodeKind::WirelessLan).unwrap();
        assert_eq!(json, "\"wireless_lan\"");

        let kind: NodeKind = serde_json::from_str("\"switch\"").unwrap();
        assert_eq!(kind, NodeKind::Switch);
    }

    #[test]
    fn test_node_spec_defaults() {
        let spec: NodeSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.kind, NodeKind::Default);
        assert!(spec.name.is_none());
    }

    #[test]
    fn test_link_same_endpoints_is_undirected() {
        let a = LinkSpec::new(NodeId::new(1), NodeId::new(2));
        let b = LinkSpec::new(NodeId::new(2), NodeId::new(1));
        let c = LinkSpec::new(NodeId::new(1), NodeId::new(3));
        assert!(a.same_endpoints(&b));
        assert!(!a.same_endpoints(&c));
    }
}
