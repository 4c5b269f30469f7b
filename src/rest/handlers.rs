use std::time::Instant;

use axum::extract::{Extension, Path, Query, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::auth::{clear_auth_cookie, CallerIdentity, AUTH_COOKIE_NAME};
use crate::catalog::model::Permissions;
use crate::catalog::settings::{KEY_MAX_ACTIVE_CONNECTIONS, KEY_MAX_ACTIVE_DATABASES, KEY_MCP_ENABLED};
use crate::crypto::mint_jwt;
use crate::error::{GatewayError, Result};

use super::AppState;

const JWT_TTL: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 3600);

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

async fn audit(
    state: &AppState,
    identity: &CallerIdentity,
    endpoint: &str,
    method: &str,
    request: &serde_json::Value,
    response: &serde_json::Value,
    status: i64,
    started: Instant,
) {
    state.audit.log(identity, endpoint, method, request, response, status, started.elapsed().as_millis() as i64).await;
}

// -- Auth -----------------------------------------------------------------

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    let started = Instant::now();

    let identity_result: Result<(String, String)> = if let (Some(username), Some(password)) = (&req.username, &req.password) {
        state.catalog.verify_user_password(username, password).await.map(|u| (u.id, u.username))
    } else if let Some(token) = &req.token {
        match state.catalog.verify_api_key(token).await {
            Ok(Some(key)) => Ok((key.id, key.name)),
            Ok(None) => Err(GatewayError::BadCredentials),
            Err(e) => Err(e),
        }
    } else {
        Err(GatewayError::BadRequest("username/password or token is required".into()))
    };

    let request_json = serde_json::json!({"username": req.username, "password": req.password});

    match identity_result {
        Ok((id, username)) if req.token.is_none() => {
            let token = match mint_jwt(&id, &username, &state.authenticator.jwt_secret, JWT_TTL) {
                Ok(t) => t,
                Err(e) => return e.into_response(),
            };
            let body = serde_json::json!({"user": {"id": id, "username": username}});
            audit(&state, &CallerIdentity::User { id: id.clone(), username: username.clone() }, "auth/login", "POST", &request_json, &body, 200, started).await;

            let mut response = Json(ApiResponse::ok(body)).into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("{AUTH_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Strict")) {
                response.headers_mut().insert(axum::http::header::SET_COOKIE, value);
            }
            response
        }
        Ok((id, username)) => {
            let body = serde_json::json!({"user": {"id": id, "username": username}});
            audit(&state, &CallerIdentity::ApiKey { id: id.clone() }, "auth/login", "POST", &request_json, &body, 200, started).await;
            Json(ApiResponse::ok(body)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn logout() -> Response {
    let mut response = Json(ApiResponse::ok(serde_json::json!({}))).into_response();
    clear_auth_cookie(&mut response);
    response
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<serde_json::Value> {
    let CallerIdentity::User { id, .. } = &identity else {
        return Err(GatewayError::BadRequest("only user accounts have passwords".into()));
    };
    state.catalog.change_user_password(id, req.old_password.as_deref(), &req.new_password).await?;
    ok(serde_json::json!({}))
}

pub async fn me(Extension(identity): Extension<CallerIdentity>) -> ApiResult<serde_json::Value> {
    let value = match identity {
        CallerIdentity::User { id, username } => serde_json::json!({"type": "user", "id": id, "username": username}),
        CallerIdentity::ApiKey { id } => serde_json::json!({"type": "apiKey", "id": id}),
    };
    ok(value)
}

// -- Connections ------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateConnectionRequest {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

pub async fn list_connections(State(state): State<AppState>) -> ApiResult<Vec<crate::catalog::model::Connection>> {
    ok(state.catalog.list_connections().await?)
}

pub async fn create_connection(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<CreateConnectionRequest>,
) -> ApiResult<serde_json::Value> {
    let started = Instant::now();
    let id = state.catalog.create_connection(&req.name, &req.host, req.port, &req.user, &req.password).await?;
    let response = serde_json::json!({"id": id});
    let request_json = serde_json::json!({"name": req.name, "host": req.host, "port": req.port, "user": req.user, "password": req.password});
    audit(&state, &identity, "connections/create", "POST", &request_json, &response, 200, started).await;
    ok(response)
}

#[derive(Deserialize)]
pub struct UpdateConnectionRequest {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateConnectionRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .catalog
        .update_connection(&id, req.name.as_deref(), req.host.as_deref(), req.port, req.user.as_deref(), req.password.as_deref())
        .await?;
    ok(serde_json::json!({}))
}

pub async fn delete_connection(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    state.pools.close_pool(&id).await;
    state.catalog.delete_connection(&id).await?;
    ok(serde_json::json!({}))
}

pub async fn test_connection(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    let pool = state.pools.recreate_pool(&id).await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    ok(serde_json::json!({"reachable": true}))
}

/// Enumerates the MySQL server's schemas, skipping the four system schemas,
/// and records any newly-seen names with default permissions.
pub async fn discover_databases(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

    let pool = state.pools.get_pool(&id).await?;
    let rows = sqlx::query("SELECT schema_name FROM information_schema.schemata").fetch_all(&pool).await?;

    let real_names: Vec<String> = rows
        .iter()
        .filter_map(|row| sqlx::Row::try_get::<String, _>(row, 0).ok())
        .filter(|name| !SYSTEM_SCHEMAS.contains(&name.as_str()))
        .collect();

    let aliases = state.catalog.add_discovered_databases(&id, &real_names).await?;
    ok(serde_json::json!({"aliases": aliases}))
}

// -- Databases ----------------------------------------------------------

pub async fn list_connection_databases(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Vec<crate::catalog::model::Database>> {
    let databases = state.catalog.list_databases().await?.into_iter().filter(|d| d.connection_id == id).collect();
    ok(databases)
}

pub async fn set_database_permissions(
    State(state): State<AppState>,
    Path((_id, name)): Path<(String, String)>,
    Json(permissions): Json<Permissions>,
) -> ApiResult<serde_json::Value> {
    state.catalog.update_permissions(&name, permissions).await?;
    ok(serde_json::json!({}))
}

#[derive(Deserialize)]
pub struct RenameAliasRequest {
    pub alias: String,
}

pub async fn rename_database_alias(
    State(state): State<AppState>,
    Path((_id, name)): Path<(String, String)>,
    Json(req): Json<RenameAliasRequest>,
) -> ApiResult<serde_json::Value> {
    state.catalog.rename_alias(&name, &req.alias).await?;
    ok(serde_json::json!({}))
}

pub async fn enable_database(State(state): State<AppState>, Path((_id, name)): Path<(String, String)>) -> ApiResult<serde_json::Value> {
    state.catalog.set_database_enabled(&name, true).await?;
    ok(serde_json::json!({}))
}

pub async fn disable_database(State(state): State<AppState>, Path((_id, name)): Path<(String, String)>) -> ApiResult<serde_json::Value> {
    state.catalog.set_database_enabled(&name, false).await?;
    ok(serde_json::json!({}))
}

// -- Query ----------------------------------------------------------------

#[derive(Deserialize)]
pub struct RunQueryRequest {
    pub sql: String,
}

pub async fn run_query(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<RunQueryRequest>,
) -> Response {
    let started = Instant::now();
    let result = crate::query::execute(state.process_context.as_ref(), state.pools.as_ref(), &req.sql).await;

    let request_json = serde_json::json!({"sql": req.sql});
    match result {
        Ok(value) => {
            audit(&state, &identity, "mysql_query", "POST", &request_json, &value, 200, started).await;
            Json(ApiResponse::ok(value)).into_response()
        }
        Err(e) => {
            let response = serde_json::json!({"error": e.to_string()});
            audit(&state, &identity, "mysql_query", "POST", &request_json, &response, e.status_code().as_u16() as i64, started).await;
            e.into_response()
        }
    }
}

// -- API keys ---------------------------------------------------------------

pub async fn list_keys(State(state): State<AppState>) -> ApiResult<Vec<crate::catalog::model::ApiKey>> {
    ok(state.catalog.list_api_keys().await?)
}

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
}

pub async fn create_key(State(state): State<AppState>, Json(req): Json<CreateKeyRequest>) -> ApiResult<crate::catalog::model::NewApiKey> {
    ok(state.catalog.create_api_key(&req.name).await?)
}

pub async fn delete_key(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    state.catalog.delete_api_key(&id).await?;
    ok(serde_json::json!({}))
}

// -- Logs -------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct LogsQuery {
    #[serde(rename = "apiKeyId")]
    pub api_key_id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub endpoint: Option<String>,
    pub status: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub days: Option<i64>,
}

pub async fn list_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> ApiResult<serde_json::Value> {
    let filter = crate::catalog::logs::LogFilter {
        api_key_id: query.api_key_id,
        user_id: query.user_id,
        endpoint: query.endpoint,
        status: query.status,
    };
    let (rows, total) = state.catalog.query_logs(&filter, query.limit.unwrap_or(50), query.offset.unwrap_or(0)).await?;
    ok(serde_json::json!({"logs": rows, "total": total}))
}

pub async fn purge_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> ApiResult<serde_json::Value> {
    let purged = state.catalog.purge_logs_older_than(query.days.unwrap_or(90)).await?;
    ok(serde_json::json!({"purged": purged}))
}

pub async fn logs_stats(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    ok(serde_json::json!({"droppedEntries": state.audit.dropped_count()}))
}

// -- Settings -----------------------------------------------------------

const KNOWN_SETTINGS: &[&str] = &[KEY_MCP_ENABLED, KEY_MAX_ACTIVE_DATABASES, KEY_MAX_ACTIVE_CONNECTIONS];

pub async fn list_settings(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for key in KNOWN_SETTINGS {
        if let Some(value) = state.catalog.get_setting(key).await? {
            map.insert(key.to_string(), serde_json::Value::String(value));
        }
    }
    ok(serde_json::Value::Object(map))
}

#[derive(Deserialize)]
pub struct UpdateSettingRequest {
    pub key: String,
    pub value: String,
}

pub async fn update_setting(State(state): State<AppState>, Json(req): Json<UpdateSettingRequest>) -> ApiResult<serde_json::Value> {
    if !KNOWN_SETTINGS.contains(&req.key.as_str()) {
        return Err(GatewayError::BadRequest(format!("unknown setting: {}", req.key)));
    }
    state.catalog.set_setting(&req.key, &req.value).await?;
    ok(serde_json::json!({}))
}
