//! HTTP request routing: correlates each `/mcp` call with its session.
//!
//! - `POST /mcp` carries one protocol message. Without a session header only
//!   an `initialize` request is accepted; it creates the session.
//! - `GET /mcp` opens a server-push (SSE) stream for an existing session.
//! - `DELETE /mcp` terminates a session.
//! - `GET /health` reports liveness and the active-session count.

use super::dispatch::RequestHandler;
use super::store::SessionStore;
use super::transport::SessionTransport;
use crate::error::{Error, Result};
use crate::protocol::{ProtocolMessage, Reply};
use crate::types::{ErrorData, INTERNAL_ERROR, INVALID_REQUEST};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Header correlating requests with a session, on requests and responses.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Maximum request body size (10MB).
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// SSE keep-alive interval.
const SSE_KEEP_ALIVE_SECS: u64 = 30;

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub dispatch: Arc<dyn RequestHandler>,
    pub server_name: String,
    pub server_version: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<SessionStore>,
        dispatch: Arc<dyn RequestHandler>,
        server_name: &str,
        server_version: &str,
    ) -> Self {
        Self {
            store,
            dispatch,
            server_name: server_name.to_string(),
            server_version: server_version.to_string(),
            started_at: Instant::now(),
        }
    }
}

/// An HTTP-level failure on `/mcp`, rendered as `{"error": {code, message, data?}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    pub status: StatusCode,
    pub error: ErrorData,
}

impl HttpError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ErrorData::new(INVALID_REQUEST, message),
        }
    }

    /// The client only ever sees a generic message; details belong in the log.
    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ErrorData::new(INTERNAL_ERROR, "Internal server error"),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: ErrorData::new(INTERNAL_ERROR, message),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error }))).into_response()
    }
}

/// Builds the application router over `state`.
pub fn router(state: AppState, request_logging: bool) -> Router {
    let app = Router::new()
        .route(
            "/mcp",
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state);

    if request_logging {
        app.layer(middleware::from_fn(log_request))
    } else {
        app
    }
}

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

/// Maps the outcome of one transport call onto an HTTP response.
fn reply_response(session_id: &str, result: Result<Option<Reply>>) -> Response {
    match result {
        Ok(Some(reply)) => (StatusCode::OK, Json(reply)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(Error::SessionClosed) => {
            HttpError::invalid_request("Session not found or expired").into_response()
        }
        Err(e) => {
            error!(session_id, error = %e, "Error handling MCP request");
            HttpError::internal().into_response()
        }
    }
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let message = match ProtocolMessage::decode(&body) {
        Ok(message) => message,
        Err(e) => return HttpError::invalid_request(e.message).into_response(),
    };

    match session_id_from(&headers) {
        Some(session_id) => {
            let Some(transport) = state.store.get_transport(&session_id) else {
                return HttpError::invalid_request("Session not found or expired").into_response();
            };
            let result = transport.handle_message(message).await;
            reply_response(&session_id, result)
        }
        None if message.is_initialize_request() => create_session(&state, message).await,
        None => HttpError::invalid_request(
            "Invalid request: No valid session ID or initialization request",
        )
        .into_response(),
    }
}

async fn create_session(state: &AppState, message: ProtocolMessage) -> Response {
    if state.store.is_draining() {
        return HttpError::unavailable("Server is shutting down").into_response();
    }

    let session_id = Uuid::new_v4().to_string();
    let transport = Arc::new(SessionTransport::new(&session_id, Arc::clone(&state.dispatch)));

    match transport.handle_message(message).await {
        Ok(Some(reply)) if !reply.is_error() => {
            // Shutdown may have started while the handshake ran.
            if state.store.add(session_id.clone(), transport).is_rejected() {
                return HttpError::unavailable("Server is shutting down").into_response();
            }
            with_session_header((StatusCode::OK, Json(reply)).into_response(), &session_id)
        }
        Ok(Some(reply)) => {
            warn!("Initialize request rejected, no session created");
            (StatusCode::BAD_REQUEST, Json(reply)).into_response()
        }
        Ok(None) => HttpError::invalid_request("Initialize request produced no response").into_response(),
        Err(e) => {
            error!(error = %e, "Error initializing session");
            HttpError::internal().into_response()
        }
    }
}

async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some((session_id, transport)) = session_id_from(&headers)
        .and_then(|id| state.store.get_transport(&id).map(|t| (id, t)))
    else {
        return HttpError::invalid_request("Invalid or missing session ID").into_response();
    };
    let stream = match transport.subscribe() {
        Ok(stream) => stream,
        Err(_) => return HttpError::invalid_request("Invalid or missing session ID").into_response(),
    };
    info!(session_id = %session_id, "Push stream attached");

    let events = stream.map(|message| Ok::<_, Infallible>(Event::default().event("message").data(message)));
    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    );
    with_session_header(sse.into_response(), &session_id)
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id_from(&headers) else {
        return HttpError::invalid_request("Session ID required for termination").into_response();
    };
    let Some(transport) = state.store.get_transport(&session_id) else {
        return HttpError::invalid_request("Session not found or expired").into_response();
    };

    transport.terminate().await;
    state.store.remove_if_same(&session_id, &transport);
    info!(session_id = %session_id, "Session terminated by client");
    (StatusCode::OK, Json(json!({ "message": "Session terminated" }))).into_response()
}

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "server": state.server_name,
        "version": state.server_version,
        "activeSessions": state.store.count(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

async fn handle_not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "message": format!("Path {} not found", uri.path()),
            "availableEndpoints": ["/health", "/mcp"],
        })),
    )
        .into_response()
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let session_id = session_id_from(request.headers());
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %path,
        session_id = session_id.as_deref().unwrap_or("-"),
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "HTTP request"
    );
    response
}
