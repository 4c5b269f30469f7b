//! Transport B: a single `/mcp` endpoint carrying JSON-RPC over POST,
//! a notification stream over GET, and session close over DELETE.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use dashmap::DashMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::auth::CallerIdentity;
use crate::catalog::settings::KEY_MCP_ENABLED;
use crate::session::SessionManager;

use super::{dispatch, DispatcherState, JsonRpcRequest, JsonRpcResponse};

pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolState {
    Initializing,
    Ready,
    Closed,
}

#[derive(Clone)]
pub struct McpState {
    dispatcher: DispatcherState,
    sessions: Arc<SessionManager>,
    protocol_state: Arc<DashMap<String, ProtocolState>>,
}

pub fn router(dispatcher: DispatcherState, sessions: Arc<SessionManager>) -> Router {
    let state = McpState { dispatcher, sessions, protocol_state: Arc::new(DashMap::new()) };
    Router::new()
        .route("/mcp", post(handle_post).get(handle_get).delete(handle_delete))
        .with_state(state)
}

async fn mcp_enabled(state: &McpState) -> bool {
    match state.dispatcher.catalog.get_setting(KEY_MCP_ENABLED).await {
        Ok(Some(v)) => v != "false",
        _ => true,
    }
}

async fn handle_post(State(state): State<McpState>, headers: HeaderMap, body: String) -> Response {
    if !mcp_enabled(&state).await {
        return Json(JsonRpcResponse::err(None, -32000, "MCP service is currently disabled")).into_response();
    }

    let req: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => return Json(JsonRpcResponse::err(None, -32700, format!("parse error: {e}"))).into_response(),
    };

    let header_session_id = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);

    if header_session_id.is_none() && req.method != "initialize" {
        return Json(JsonRpcResponse::err(req.id, -32000, "initialize must be the first request in a new session")).into_response();
    }

    let session = match state.sessions.get_or_create(header_session_id.as_deref()).await {
        Ok(s) => s,
        Err(e) => return Json(JsonRpcResponse::from_error(req.id, e)).into_response(),
    };

    if header_session_id.is_none() {
        state.protocol_state.insert(session.id.clone(), ProtocolState::Initializing);
    } else if state.protocol_state.get(&session.id).map(|s| *s) == Some(ProtocolState::Closed) {
        return Json(JsonRpcResponse::err(req.id, -32000, "session closed or unknown")).into_response();
    }

    let identity = CallerIdentity::ApiKey { id: "http-mcp".into() };
    let session_ctx: Arc<dyn crate::session::SessionContext> = session.clone();

    // Serialize calls within a session: two requests carrying the same
    // mcp-session-id must not run dispatch() concurrently.
    let _call_guard = session.lock_for_call().await;
    let resp = dispatch(&state.dispatcher, &session_ctx, &identity, req).await;

    if resp.error.is_none() {
        state.protocol_state.insert(session.id.clone(), ProtocolState::Ready);
    }

    let mut response = Json(&resp).into_response();
    if let Ok(value) = HeaderValue::from_str(&session.id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn handle_get(State(state): State<McpState>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.sessions.get(session_id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let (_tx, rx) = tokio::sync::broadcast::channel::<String>(16);
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(data) => Some(Ok::<Event, Infallible>(Event::default().data(data))),
        Err(_) => None,
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
        .into_response()
}

async fn handle_delete(State(state): State<McpState>, headers: HeaderMap) -> StatusCode {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };
    state.sessions.close(session_id);
    state.protocol_state.insert(session_id.to_string(), ProtocolState::Closed);
    StatusCode::NO_CONTENT
}
