//! REST configuration API: consumed by the external UI, one
//! `{success, data?, error?}` envelope shared by every handler.

pub mod handlers;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::audit::AuditLogger;
use crate::auth::{require_auth, Authenticator};
use crate::catalog::CatalogStore;
use crate::pool::PoolManager;
use crate::session::{ProcessContext, SessionManager};

/// State shared across every REST route, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogStore>,
    pub pools: Arc<PoolManager>,
    pub sessions: Arc<SessionManager>,
    pub process_context: Arc<ProcessContext>,
    pub audit: Arc<AuditLogger>,
    pub authenticator: Authenticator,
}

pub fn build(state: AppState) -> Router {
    let authenticator = state.authenticator.clone();

    let protected = Router::new()
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/auth/change-password", post(handlers::change_password))
        .route("/api/auth/me", get(handlers::me))
        .route("/api/connections", get(handlers::list_connections).post(handlers::create_connection))
        .route(
            "/api/connections/{id}",
            put(handlers::update_connection).delete(handlers::delete_connection),
        )
        .route("/api/connections/{id}/test", post(handlers::test_connection))
        .route("/api/connections/{id}/discover", post(handlers::discover_databases))
        .route("/api/connections/{id}/databases", get(handlers::list_connection_databases))
        .route("/api/connections/{id}/databases/{name}/permissions", put(handlers::set_database_permissions))
        .route("/api/connections/{id}/databases/{name}/alias", put(handlers::rename_database_alias))
        .route("/api/connections/{id}/databases/{name}/enable", put(handlers::enable_database))
        .route("/api/connections/{id}/databases/{name}/disable", put(handlers::disable_database))
        .route("/api/query", post(handlers::run_query))
        .route("/api/keys", get(handlers::list_keys).post(handlers::create_key))
        .route("/api/keys/{id}", delete(handlers::delete_key))
        .route("/api/logs", get(handlers::list_logs).delete(handlers::purge_logs))
        .route("/api/logs/stats", get(handlers::logs_stats))
        .route("/api/settings", get(handlers::list_settings).put(handlers::update_setting))
        .layer(middleware::from_fn_with_state(authenticator.clone(), require_auth));

    Router::new()
        .route("/api/auth/login", post(handlers::login))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
