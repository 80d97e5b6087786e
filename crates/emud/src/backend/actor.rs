//! Backend actor - owns all session state and processes commands.
//!
//! The actor runs in a single task and processes commands sequentially, so
//! every listener observes one consistent view of the emulation state.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use emu_core::{LinkSpec, Node, NodeId, NodeSpec, Session, SessionId, SessionState, SessionView};

use super::commands::{BackendCommand, BackendError};
use super::{BackendOptions, BackendStatus};

// ============================================================================
// Resource Limits
// ============================================================================

/// Maximum number of sessions the backend can hold.
pub const MAX_SESSIONS: usize = 64;

/// Maximum number of nodes in a single session.
pub const MAX_NODES_PER_SESSION: usize = 1024;

// ============================================================================
// Backend Actor
// ============================================================================

/// The backend actor - owns all session state.
pub struct BackendActor {
    receiver: mpsc::Receiver<BackendCommand>,
    sessions: HashMap<SessionId, Session>,
    options: BackendOptions,
}

impl BackendActor {
    pub fn new(receiver: mpsc::Receiver<BackendCommand>, options: BackendOptions) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            options,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!(network = %self.options.network, "Emulation backend starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Emulation backend stopped");
    }

    /// Dispatches a command to the appropriate handler.
    ///
    /// Send errors are ignored: the caller may have dropped its receiver.
    fn handle_command(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::Status { respond_to } => {
                let _ = respond_to.send(BackendStatus {
                    network: self.options.network,
                    sessions: self.sessions.len(),
                });
            }
            BackendCommand::ListSessions { respond_to } => {
                let _ = respond_to.send(self.handle_list_sessions());
            }
            BackendCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self
                    .session(&session_id)
                    .map(SessionView::from_domain);
                let _ = respond_to.send(result);
            }
            BackendCommand::CreateSession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_create_session(session_id));
            }
            BackendCommand::DeleteSession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_delete_session(session_id));
            }
            BackendCommand::SetSessionState {
                session_id,
                state,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_set_state(&session_id, state));
            }
            BackendCommand::AddNode {
                session_id,
                spec,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_add_node(&session_id, spec));
            }
            BackendCommand::DeleteNode {
                session_id,
                node_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_delete_node(&session_id, node_id));
            }
            BackendCommand::AddLink {
                session_id,
                link,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_add_link(&session_id, link));
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_list_sessions(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> =
            self.sessions.values().map(SessionView::from_domain).collect();
        views.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        views
    }

    fn handle_create_session(
        &mut self,
        session_id: Option<SessionId>,
    ) -> Result<SessionView, BackendError> {
        if self.sessions.len() >= MAX_SESSIONS {
            warn!(
                current = self.sessions.len(),
                max = MAX_SESSIONS,
                "Backend is full, rejecting session"
            );
            return Err(BackendError::Capacity { max: MAX_SESSIONS });
        }

        let session_id = match session_id {
            Some(id) if id.is_blank() => {
                return Err(BackendError::InvalidRequest(
                    "session id must not be blank".to_string(),
                ));
            }
            Some(id) => {
                if self.sessions.contains_key(&id) {
                    return Err(BackendError::SessionAlreadyExists(id));
                }
                id
            }
            None => self.next_session_id(),
        };

        let session = Session::new(session_id.clone());
        let view = SessionView::from_domain(&session);
        self.sessions.insert(session_id.clone(), session);

        info!(
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session created"
        );
        Ok(view)
    }

    fn handle_delete_session(&mut self, session_id: SessionId) -> Result<(), BackendError> {
        match self.sessions.remove(&session_id) {
            Some(session) => {
                info!(
                    session_id = %session_id,
                    nodes = session.node_count(),
                    "Session deleted"
                );
                Ok(())
            }
            None => Err(BackendError::SessionNotFound(session_id)),
        }
    }

    fn handle_set_state(
        &mut self,
        session_id: &SessionId,
        state: SessionState,
    ) -> Result<SessionView, BackendError> {
        let session = self.session_mut(session_id)?;
        let previous = session.set_state(state)?;

        info!(
            session_id = %session_id,
            from = %previous,
            to = %state,
            "Session state changed"
        );
        Ok(SessionView::from_domain(session))
    }

    fn handle_add_node(
        &mut self,
        session_id: &SessionId,
        spec: NodeSpec,
    ) -> Result<Node, BackendError> {
        let session = self.session_mut(session_id)?;
        let node = session.add_node(spec, MAX_NODES_PER_SESSION)?;

        debug!(
            session_id = %session_id,
            node_id = %node.id,
            name = %node.name,
            kind = %node.kind,
            "Node added"
        );
        Ok(node)
    }

    fn handle_delete_node(
        &mut self,
        session_id: &SessionId,
        node_id: NodeId,
    ) -> Result<Node, BackendError> {
        let session = self.session_mut(session_id)?;
        let node = session.remove_node(node_id)?;

        debug!(session_id = %session_id, node_id = %node_id, "Node deleted");
        Ok(node)
    }

    fn handle_add_link(&mut self, session_id: &SessionId, link: LinkSpec) -> Result<(), BackendError> {
        let session = self.session_mut(session_id)?;
        session.add_link(link)?;

        debug!(
            session_id = %session_id,
            node_one = %link.node_one,
            node_two = %link.node_two,
            "Link added"
        );
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn session(&self, session_id: &SessionId) -> Result<&Session, BackendError> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| BackendError::SessionNotFound(session_id.clone()))
    }

    fn session_mut(&mut self, session_id: &SessionId) -> Result<&mut Session, BackendError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| BackendError::SessionNotFound(session_id.clone()))
    }

    /// Lowest positive integer not already used as a session id.
    fn next_session_id(&self) -> SessionId {
        let mut candidate: u64 = 1;
        loop {
            let id = SessionId::new(candidate.to_string());
            if !self.sessions.contains_key(&id) {
                return id;
            }
            candidate = candidate.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::{DomainError, NodeKind};

    fn create_actor() -> BackendActor {
        let (_tx, rx) = mpsc::channel(1);
        BackendActor::new(rx, BackendOptions::default())
    }

    #[test]
    fn test_create_session_allocates_lowest_free_id() {
        let mut actor = create_actor();
        let first = actor.handle_create_session(None).unwrap();
        let second = actor.handle_create_session(None).unwrap();
        assert_eq!(first.id.as_str(), "1");
        assert_eq!(second.id.as_str(), "2");

        actor.handle_delete_session(SessionId::new("1")).unwrap();
        let third = actor.handle_create_session(None).unwrap();
        assert_eq!(third.id.as_str(), "1");
    }

    #[test]
    fn test_create_session_rejects_duplicates_and_blank_ids() {
        let mut actor = create_actor();
        actor
            .handle_create_session(Some(SessionId::new("lab")))
            .unwrap();

        let err = actor
            .handle_create_session(Some(SessionId::new("lab")))
            .unwrap_err();
        assert!(matches!(err, BackendError::SessionAlreadyExists(_)));

        let err = actor
            .handle_create_session(Some(SessionId::new("  ")))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidRequest(_)));
    }

    #[test]
    fn test_capacity_limit() {
        let mut actor = create_actor();
        for _ in 0..MAX_SESSIONS {
            actor.handle_create_session(None).unwrap();
        }
        let err = actor.handle_create_session(None).unwrap_err();
        assert!(matches!(err, BackendError::Capacity { max: MAX_SESSIONS }));
    }

    #[test]
    fn test_topology_operations() {
        let mut actor = create_actor();
        let session = actor.handle_create_session(None).unwrap();
        let id = session.id;

        let wlan = actor
            .handle_add_node(&id, NodeSpec::new(NodeKind::WirelessLan))
            .unwrap();
        let node = actor.handle_add_node(&id, NodeSpec::default()).unwrap();
        actor
            .handle_add_link(&id, LinkSpec::new(node.id, wlan.id))
            .unwrap();

        let view = actor.session(&id).map(SessionView::from_domain).unwrap();
        assert_eq!(view.node_count(), 2);
        assert_eq!(view.links.len(), 1);

        actor.handle_delete_node(&id, wlan.id).unwrap();
        let view = actor.session(&id).map(SessionView::from_domain).unwrap();
        assert!(view.links.is_empty());
    }

    #[test]
    fn test_operations_on_missing_session() {
        let mut actor = create_actor();
        let missing = SessionId::new("nope");

        assert!(matches!(
            actor.handle_add_node(&missing, NodeSpec::default()),
            Err(BackendError::SessionNotFound(_))
        ));
        assert!(matches!(
            actor.handle_delete_session(missing.clone()),
            Err(BackendError::SessionNotFound(_))
        ));
        assert!(matches!(
            actor.handle_set_state(&missing, SessionState::Runtime),
            Err(BackendError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_domain_errors_are_propagated() {
        let mut actor = create_actor();
        let id = actor.handle_create_session(None).unwrap().id;
        actor.handle_set_state(&id, SessionState::Shutdown).unwrap();

        let err = actor.handle_set_state(&id, SessionState::Runtime).unwrap_err();
        assert!(matches!(
            err,
            BackendError::Domain(DomainError::InvalidTransition { .. })
        ));
    }
}
