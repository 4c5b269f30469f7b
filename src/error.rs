use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// The thirteen error kinds the gateway's pipeline can surface, plus the
/// ambient wrapped-source variants used by `?` at storage/crypto/transport
/// boundaries.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("catalog error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("mysql error: {0}")]
    Mysql(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no current database")]
    NoCurrentDatabase,

    #[error("alias invalid: {0}")]
    AliasInvalid(String),

    #[error("alias conflict: {0}")]
    AliasConflict(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("crypto tamper detected")]
    CryptoTamper,

    #[error("bad credentials")]
    BadCredentials,

    #[error("token invalid: {0}")]
    TokenInvalid(String),

    #[error("would remove the only active key")]
    LastActiveKey,

    #[error("session closed or unknown")]
    SessionClosed,

    #[error("rate limited")]
    RateLimited,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// HTTP status for the REST surface, per the error table.
    pub fn status_code(&self) -> StatusCode {
        use GatewayError::*;
        match self {
            Unauthenticated | TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            PermissionDenied(_)
            | NoCurrentDatabase
            | AliasInvalid(_)
            | AliasConflict(_)
            | Query(_)
            | LastActiveKey
            | BadRequest(_)
            | BadCredentials => StatusCode::BAD_REQUEST,
            ConnectionRefused(_) => StatusCode::BAD_GATEWAY,
            RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Config(_)
            | Database(_)
            | Mysql(_)
            | Json(_)
            | Io(_)
            | Jwt(_)
            | CryptoTamper
            | SessionClosed
            | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error code for the tool dispatcher surface.
    pub fn json_rpc_code(&self) -> i64 {
        use GatewayError::*;
        match self {
            Unauthenticated | TokenInvalid(_) | SessionClosed => -32000,
            BadRequest(_) | Json(_) => -32602,
            _ => -32603,
        }
    }
}

/// Lets REST handlers return `Result<T>` directly; renders the
/// `{success, data?, error?}` envelope on failure.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self, GatewayError::Database(_) | GatewayError::Mysql(_) | GatewayError::Internal(_)) {
            tracing::error!(err = %self, "request failed");
        }
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (self.status_code(), axum::Json(body)).into_response()
    }
}
