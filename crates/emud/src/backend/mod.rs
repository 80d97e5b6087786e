//! Emulation backend shared by every listener.
//!
//! Listeners only see the [`EmulationBackend`] trait through a
//! [`SharedBackend`] handle. The implementation shipped with the daemon is an
//! actor that owns all session state and receives commands over an mpsc
//! channel; [`BackendHandle`] is its cheap-to-clone client side.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ stream conn  │──┐
//! └──────────────┘  │
//! ┌──────────────┐  │  SharedBackend     ┌──────────────┐    ┌──────────────────────┐
//! │  datagram    │──┼──(Arc<dyn ..>)────▶│ BackendHandle│───▶│    BackendActor      │
//! └──────────────┘  │                    └──────────────┘    │ HashMap<SessionId,   │
//! ┌──────────────┐  │                     BackendCommand     │         Session>     │
//! │ control API  │──┘                     (mpsc channel)     └──────────────────────┘
//! └──────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use emu_core::{LinkSpec, Node, NodeId, NodeSpec, SessionId, SessionState, SessionView};

mod actor;
mod commands;
mod handle;

pub use actor::{BackendActor, MAX_NODES_PER_SESSION, MAX_SESSIONS};
pub use commands::{BackendCommand, BackendError};
pub use handle::BackendHandle;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Shared-ownership handle to the one backend instance of the process.
pub type SharedBackend = Arc<dyn EmulationBackend>;

/// Operations the listeners dispatch into.
///
/// Implementations own their own concurrency control; callers may invoke
/// any method concurrently from any listener.
#[async_trait]
pub trait EmulationBackend: Send + Sync {
    async fn status(&self) -> Result<BackendStatus, BackendError>;

    async fn list_sessions(&self) -> Result<Vec<SessionView>, BackendError>;

    async fn get_session(&self, session_id: &SessionId) -> Result<SessionView, BackendError>;

    /// Creates a session. Without an id, the next free numeric id is used.
    async fn create_session(
        &self,
        session_id: Option<SessionId>,
    ) -> Result<SessionView, BackendError>;

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), BackendError>;

    async fn set_session_state(
        &self,
        session_id: &SessionId,
        state: SessionState,
    ) -> Result<SessionView, BackendError>;

    async fn add_node(&self, session_id: &SessionId, spec: NodeSpec) -> Result<Node, BackendError>;

    async fn delete_node(
        &self,
        session_id: &SessionId,
        node_id: NodeId,
    ) -> Result<Node, BackendError>;

    async fn add_link(&self, session_id: &SessionId, link: LinkSpec) -> Result<(), BackendError>;
}

/// Bridge implementation used for emulated networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkBackend {
    #[default]
    LinuxBridge,
    Ovs,
}

impl NetworkBackend {
    pub fn from_ovs_flag(ovs: bool) -> Self {
        if ovs {
            Self::Ovs
        } else {
            Self::LinuxBridge
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinuxBridge => "linux-bridge",
            Self::Ovs => "ovs",
        }
    }
}

impl fmt::Display for NetworkBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options fixed when the backend is spawned.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendOptions {
    pub network: NetworkBackend,
}

/// Snapshot returned by [`EmulationBackend::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub network: NetworkBackend,
    pub sessions: usize,
}

/// Spawn the backend actor and return a handle for interaction.
///
/// The actor runs until every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use emud::backend::{spawn_backend, BackendOptions, SharedBackend};
///
/// #[tokio::main]
/// async fn main() {
///     let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
///     let sessions = backend.list_sessions().await;
/// }
/// ```
pub fn spawn_backend(options: BackendOptions) -> BackendHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = BackendActor::new(cmd_rx, options);
    tokio::spawn(actor.run());

    BackendHandle::new(cmd_tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_backend_from_flag() {
        assert_eq!(NetworkBackend::from_ovs_flag(true), NetworkBackend::Ovs);
        assert_eq!(
            NetworkBackend::from_ovs_flag(false),
            NetworkBackend::LinuxBridge
        );
        assert_eq!(NetworkBackend::Ovs.to_string(), "ovs");
    }

    #[tokio::test]
    async fn test_shared_backend_clones_point_to_one_actor() {
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        let other = Arc::clone(&backend);

        backend
            .create_session(Some(SessionId::new("shared")))
            .await
            .unwrap();

        let seen = other.get_session(&SessionId::new("shared")).await.unwrap();
        assert_eq!(seen.id.as_str(), "shared");
        assert!(Arc::ptr_eq(&backend, &other));
    }
}
