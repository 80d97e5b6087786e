//! Client interface for interacting with the BackendActor.
//!
//! Channel errors are mapped to `BackendError::ChannelClosed`.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use emu_core::{LinkSpec, Node, NodeId, NodeSpec, SessionId, SessionState, SessionView};

use super::commands::{BackendCommand, BackendError};
use super::{BackendStatus, EmulationBackend};

/// Handle for interacting with the backend actor.
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct BackendHandle {
    sender: mpsc::Sender<BackendCommand>,
}

impl BackendHandle {
    pub fn new(sender: mpsc::Sender<BackendCommand>) -> Self {
        Self { sender }
    }

    /// Sends a command built around a fresh oneshot and awaits the reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BackendCommand,
    ) -> Result<T, BackendError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| BackendError::ChannelClosed)?;

        rx.await.map_err(|_| BackendError::ChannelClosed)
    }
}

#[async_trait]
impl EmulationBackend for BackendHandle {
    async fn status(&self) -> Result<BackendStatus, BackendError> {
        self.request(|respond_to| BackendCommand::Status { respond_to })
            .await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionView>, BackendError> {
        self.request(|respond_to| BackendCommand::ListSessions { respond_to })
            .await
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<SessionView, BackendError> {
        let session_id = session_id.clone();
        self.request(|respond_to| BackendCommand::GetSession {
            session_id,
            respond_to,
        })
        .await?
    }

    async fn create_session(
        &self,
        session_id: Option<SessionId>,
    ) -> Result<SessionView, BackendError> {
        self.request(|respond_to| BackendCommand::CreateSession {
            session_id,
            respond_to,
        })
        .await?
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), BackendError> {
        let session_id = session_id.clone();
        self.request(|respond_to| BackendCommand::DeleteSession {
            session_id,
            respond_to,
        })
        .await?
    }

    async fn set_session_state(
        &self,
        session_id: &SessionId,
        state: SessionState,
    ) -> Result<SessionView, BackendError> {
        let session_id = session_id.clone();
        self.request(|respond_to| BackendCommand::SetSessionState {
            session_id,
            state,
            respond_to,
        })
        .await?
    }

    async fn add_node(&self, session_id: &SessionId, spec: NodeSpec) -> Result<Node, BackendError> {
        let session_id = session_id.clone();
        self.request(|respond_to| BackendCommand::AddNode {
            session_id,
            spec,
            respond_to,
        })
        .await?
    }

    async fn delete_node(
        &self,
        session_id: &SessionId,
        node_id: NodeId,
    ) -> Result<Node, BackendError> {
        let session_id = session_id.clone();
        self.request(|respond_to| BackendCommand::DeleteNode {
            session_id,
            node_id,
            respond_to,
        })
        .await?
    }

    async fn add_link(&self, session_id: &SessionId, link: LinkSpec) -> Result<(), BackendError> {
        let session_id = session_id.clone();
        self.request(|respond_to| BackendCommand::AddLink {
            session_id,
            link,
            respond_to,
        })
        .await?
    }
}
