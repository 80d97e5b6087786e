//! Control API listener.
//!
//! JSON over HTTP on `(grpcaddress, grpcport)`, served by axum against the
//! same backend as the stream and datagram listeners.
//!
//! | Method | Path                                      | Success |
//! |--------|-------------------------------------------|---------|
//! | GET    | `/api/v1/status`                          | 200     |
//! | GET    | `/api/v1/sessions`                        | 200     |
//! | POST   | `/api/v1/sessions`                        | 201     |
//! | GET    | `/api/v1/sessions/{id}`                   | 200     |
//! | DELETE | `/api/v1/sessions/{id}`                   | 204     |
//! | PUT    | `/api/v1/sessions/{id}/state`             | 200     |
//! | POST   | `/api/v1/sessions/{id}/nodes`             | 201     |
//! | DELETE | `/api/v1/sessions/{id}/nodes/{node_id}`   | 200     |
//! | POST   | `/api/v1/sessions/{id}/links`             | 201     |

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use emu_core::{DomainError, LinkSpec, Node, NodeId, NodeSpec, SessionId, SessionState, SessionView};
use emu_protocol::DaemonStatus;

use super::{
    ListenAddress, ListenerError, ListenerHandle, ListenerKind, ListenerState, StartupError,
    StateReporter,
};
use crate::backend::{BackendError, SharedBackend};

// ============================================================================
// Router
// ============================================================================

/// Builds the control API router.
pub fn router(backend: SharedBackend) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/v1/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/v1/sessions/{id}/state", put(set_session_state))
        .route("/api/v1/sessions/{id}/nodes", post(add_node))
        .route("/api/v1/sessions/{id}/nodes/{node_id}", delete(delete_node))
        .route("/api/v1/sessions/{id}/links", post(add_link))
        .with_state(backend)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateSessionRequest {
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Deserialize)]
pub struct SetStateRequest {
    pub state: SessionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Backend error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(BackendError);

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BackendError::SessionNotFound(_)
            | BackendError::Domain(DomainError::NodeNotFound { .. }) => StatusCode::NOT_FOUND,
            BackendError::SessionAlreadyExists(_)
            | BackendError::Domain(DomainError::DuplicateNodeName { .. }) => StatusCode::CONFLICT,
            BackendError::Capacity { .. } | BackendError::Domain(DomainError::NodeLimit { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BackendError::InvalidRequest(_) | BackendError::Domain(_) => StatusCode::BAD_REQUEST,
            BackendError::ChannelClosed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

async fn get_status(State(backend): State<SharedBackend>) -> ApiResult<Json<DaemonStatus>> {
    let status = backend.status().await?;
    Ok(Json(DaemonStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        network_backend: status.network.as_str().to_string(),
        sessions: status.sessions,
    }))
}

async fn list_sessions(State(backend): State<SharedBackend>) -> ApiResult<Json<Vec<SessionView>>> {
    Ok(Json(backend.list_sessions().await?))
}

/// The body is optional; an empty body creates a session with the next free id.
async fn create_session(
    State(backend): State<SharedBackend>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice::<CreateSessionRequest>(&body)
            .map_err(|e| BackendError::InvalidRequest(e.to_string()))?
    };

    let session = backend.create_session(request.session_id).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(backend): State<SharedBackend>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(backend.get_session(&SessionId::new(id)).await?))
}

async fn delete_session(
    State(backend): State<SharedBackend>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    backend.delete_session(&SessionId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_session_state(
    State(backend): State<SharedBackend>,
    Path(id): Path<String>,
    Json(request): Json<SetStateRequest>,
) -> ApiResult<Json<SessionView>> {
    let session = backend
        .set_session_state(&SessionId::new(id), request.state)
        .await?;
    Ok(Json(session))
}

async fn add_node(
    State(backend): State<SharedBackend>,
    Path(id): Path<String>,
    Json(spec): Json<NodeSpec>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let node = backend.add_node(&SessionId::new(id), spec).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn delete_node(
    State(backend): State<SharedBackend>,
    Path((id, node_id)): Path<(String, u32)>,
) -> ApiResult<Json<Node>> {
    let node = backend
        .delete_node(&SessionId::new(id), NodeId::new(node_id))
        .await?;
    Ok(Json(node))
}

async fn add_link(
    State(backend): State<SharedBackend>,
    Path(id): Path<String>,
    Json(link): Json<LinkSpec>,
) -> ApiResult<(StatusCode, Json<LinkSpec>)> {
    backend.add_link(&SessionId::new(id), link).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

// ============================================================================
// Listener
// ============================================================================

/// HTTP listener for the control API.
pub struct ControlApiListener {
    address: ListenAddress,
    backend: SharedBackend,
}

impl ControlApiListener {
    pub fn new(address: ListenAddress, backend: SharedBackend) -> Self {
        Self { address, backend }
    }

    /// Spawns the listener on a background task.
    ///
    /// Failures stop this listener only; they are logged and reported
    /// through the handle.
    pub fn spawn(self, cancel: CancellationToken) -> ListenerHandle {
        ListenerHandle::spawn(ListenerKind::ControlApi, move |reporter| async move {
            match self.run(cancel, &reporter).await {
                Ok(()) => reporter.set(ListenerState::Terminated),
                Err(e) => {
                    let failure = StartupError::from(e);
                    error!(
                        listener = %reporter.kind(),
                        error = %failure,
                        "Control API listener failed, continuing without it"
                    );
                    reporter.set(ListenerState::Failed(failure.listener_error().to_string()));
                }
            }
        })
    }

    async fn run(
        self,
        cancel: CancellationToken,
        reporter: &StateReporter,
    ) -> Result<(), ListenerError> {
        let kind = ListenerKind::ControlApi;
        let listener = self
            .address
            .bind_with(kind, |addr| TcpListener::bind(addr))
            .await?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            kind,
            address: self.address.to_string(),
            source,
        })?;

        reporter.set(ListenerState::Bound(local_addr));
        info!(
            listener = %kind,
            address = %self.address,
            local_addr = %local_addr,
            "Control API listener bound"
        );

        reporter.set(ListenerState::Serving(local_addr));
        axum::serve(listener, router(self.backend))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|source| ListenerError::Serve {
                kind,
                address: local_addr.to_string(),
                source,
            })?;

        info!(local_addr = %local_addr, "Control API listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{spawn_backend, BackendOptions, NetworkBackend};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use emu_core::NodeKind;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        router(Arc::new(spawn_backend(BackendOptions {
            network: NetworkBackend::Ovs,
        })))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = app();
        let (status, json) = send(&app, Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["network_backend"], "ovs");
        assert_eq!(json["sessions"], 0);
    }

    #[tokio::test]
    async fn test_session_lifecycle_over_http() {
        let app = app();

        let (status, json) = send(&app, Method::POST, "/api/v1/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["id"], "1");

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/v1/sessions/1/nodes",
            Some(serde_json::json!({ "kind": "switch" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["id"], 1);

        send(&app, Method::POST, "/api/v1/sessions/1/nodes", Some(serde_json::json!({}))).await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/sessions/1/links",
            Some(serde_json::json!({ "node_one": 1, "node_two": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, json) = send(
            &app,
            Method::PUT,
            "/api/v1/sessions/1/state",
            Some(serde_json::json!({ "state": "runtime" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "runtime");
        assert_eq!(json["links"].as_array().unwrap().len(), 1);

        let (status, json) = send(&app, Method::DELETE, "/api/v1/sessions/1/nodes/2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["kind"], serde_json::to_value(NodeKind::Default).unwrap());

        let (status, _) = send(&app, Method::DELETE, "/api/v1/sessions/1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, json) = send(&app, Method::GET, "/api/v1/sessions", None).await;
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let app = app();

        let (status, json) = send(&app, Method::GET, "/api/v1/sessions/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "session_not_found");

        let body = Some(serde_json::json!({ "session_id": "lab" }));
        send(&app, Method::POST, "/api/v1/sessions", body.clone()).await;
        let (status, _) = send(&app, Method::POST, "/api/v1/sessions", body).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/v1/sessions/lab/links",
            Some(serde_json::json!({ "node_one": 1, "node_two": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "rejected_by_session");

        let (status, _) = send(&app, Method::DELETE, "/api/v1/sessions/lab/nodes/9", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_capacity_and_unavailable_statuses() {
        assert_eq!(
            ApiError::from(BackendError::Capacity { max: 64 }).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(BackendError::ChannelClosed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(BackendError::InvalidRequest("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_listener_serves_and_stops() {
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        let cancel = CancellationToken::new();
        let mut handle = ControlApiListener::new(ListenAddress::new("127.0.0.1", 0), backend)
            .spawn(cancel.clone());

        let addr = handle.wait_serving().await.unwrap();
        assert_ne!(addr.port(), 0);

        cancel.cancel();
        assert!(handle.shutdown(std::time::Duration::from_secs(5)).await);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
