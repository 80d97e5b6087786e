//! Request handling shared by the stream and datagram listeners.
//!
//! Both transports decode a [`ClientMessage`], hand it to [`dispatch`] and
//! send back the single [`DaemonMessage`] it returns, so a request gets the
//! same answer whichever transport carried it.

use tracing::debug;

use emu_protocol::{ClientMessage, DaemonMessage, DaemonStatus, FrameError, MessageType, ProtocolVersion};

use crate::backend::{BackendError, EmulationBackend};

/// Error code sent for undecodable requests.
pub const PARSE_ERROR: &str = "parse_error";

/// Error code sent for frames over the size limit.
pub const MESSAGE_TOO_LARGE: &str = "message_too_large";

/// Handles one request against the backend.
///
/// Never fails: backend errors become `error` responses carrying the
/// backend's error code, and an incompatible protocol version gets `rejected`.
pub async fn dispatch(backend: &dyn EmulationBackend, request: ClientMessage) -> DaemonMessage {
    let client_version = request.protocol_version;
    if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
        debug!(
            client_version = %client_version,
            server_version = %ProtocolVersion::CURRENT,
            "Protocol version mismatch"
        );
        return DaemonMessage::rejected(&format!(
            "Protocol version {} not compatible with server version {}",
            client_version,
            ProtocolVersion::CURRENT
        ));
    }

    match handle(backend, request.message).await {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, code = e.code(), "Request failed");
            DaemonMessage::error_with_code(&e.to_string(), e.code())
        }
    }
}

async fn handle(
    backend: &dyn EmulationBackend,
    message: MessageType,
) -> Result<DaemonMessage, BackendError> {
    let response = match message {
        MessageType::Ping { seq } => DaemonMessage::pong(seq),

        MessageType::Status => {
            let status = backend.status().await?;
            DaemonMessage::status(DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                network_backend: status.network.as_str().to_string(),
                sessions: status.sessions,
            })
        }

        MessageType::ListSessions => DaemonMessage::session_list(backend.list_sessions().await?),

        MessageType::GetSession { session_id } => {
            DaemonMessage::session(backend.get_session(&session_id).await?)
        }

        MessageType::CreateSession { session_id } => {
            DaemonMessage::session(backend.create_session(session_id).await?)
        }

        MessageType::DeleteSession { session_id } => {
            backend.delete_session(&session_id).await?;
            DaemonMessage::session_deleted(session_id)
        }

        MessageType::SetSessionState { session_id, state } => {
            DaemonMessage::session(backend.set_session_state(&session_id, state).await?)
        }

        MessageType::AddNode { session_id, node } => {
            let node = backend.add_node(&session_id, node).await?;
            DaemonMessage::node_added(session_id, node)
        }

        MessageType::DeleteNode {
            session_id,
            node_id,
        } => {
            backend.delete_node(&session_id, node_id).await?;
            DaemonMessage::node_deleted(session_id, node_id)
        }

        MessageType::AddLink { session_id, link } => {
            backend.add_link(&session_id, link).await?;
            DaemonMessage::link_added(session_id, link)
        }
    };

    Ok(response)
}

/// Response for a frame that could not be decoded.
pub fn frame_error_response(err: &FrameError) -> DaemonMessage {
    let code = match err {
        FrameError::TooLarge { .. } => MESSAGE_TOO_LARGE,
        FrameError::Empty | FrameError::Json(_) => PARSE_ERROR,
    };
    DaemonMessage::error_with_code(&err.to_string(), code)
}
