//! Transport A: newline-delimited JSON-RPC over stdin/stdout, with a
//! single process-local context shared across every call.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::auth::CallerIdentity;
use crate::session::SessionContext;

use super::{dispatch, DispatcherState, JsonRpcRequest, JsonRpcResponse};

/// `true` if `auth_token` matches a known, active API key. When it doesn't,
/// the loop still runs — every call is answered with a setup-instructions
/// error rather than the process refusing to start.
async fn token_is_valid(state: &DispatcherState, auth_token: Option<&str>) -> bool {
    match auth_token {
        Some(token) => matches!(state.catalog.verify_api_key(token).await, Ok(Some(_))),
        None => false,
    }
}

pub async fn run(state: DispatcherState, auth_token: Option<String>) -> crate::error::Result<()> {
    let valid = token_is_valid(&state, auth_token.as_deref()).await;
    if !valid {
        tracing::warn!("stdio transport starting without a valid AUTH_TOKEN; tool calls will be rejected");
    }

    let identity = CallerIdentity::ApiKey { id: "stdio".into() };
    let session: Arc<dyn SessionContext> = Arc::new(crate::session::ProcessContext::new(state.catalog.clone()).await?);

    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = if !valid {
            let req: Option<JsonRpcRequest> = serde_json::from_str(&line).ok();
            JsonRpcResponse::err(
                req.and_then(|r| r.id),
                -32000,
                "AUTH_TOKEN is missing or invalid; set AUTH_TOKEN to an active API key secret and restart",
            )
        } else {
            match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(req) => dispatch(&state, &session, &identity, req).await,
                Err(e) => JsonRpcResponse::err(None, -32700, format!("parse error: {e}")),
            }
        };

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
