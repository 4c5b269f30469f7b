//! Tool dispatcher: a JSON-RPC tool server reachable over stdio or
//! HTTP, sharing one `ToolRegistry` and one JSON-RPC method table.

pub mod http;
pub mod stdio;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::AuditLogger;
use crate::auth::CallerIdentity;
use crate::catalog::CatalogStore;
use crate::error::GatewayError;
use crate::pool::PoolManager;
use crate::session::SessionContext;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(JsonRpcErrorBody { code, message: message.into() }) }
    }

    fn from_error(id: Option<Value>, e: GatewayError) -> Self {
        Self::err(id, e.json_rpc_code(), e.to_string())
    }
}

/// Everything the dispatcher needs to serve tool calls, independent of
/// which transport is carrying them.
#[derive(Clone)]
pub struct DispatcherState {
    pub registry: Arc<ToolRegistry>,
    pub catalog: Arc<CatalogStore>,
    pub pools: Arc<PoolManager>,
    pub audit: Arc<AuditLogger>,
}

/// Dispatches one JSON-RPC request against `session`, tagging audit log
/// entries with `identity`.
pub async fn dispatch(
    state: &DispatcherState,
    session: &Arc<dyn SessionContext>,
    identity: &CallerIdentity,
    req: JsonRpcRequest,
) -> JsonRpcResponse {
    let started = std::time::Instant::now();
    let result = match req.method.as_str() {
        "initialize" => Ok(serde_json::json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": { "name": "mysql-gateway", "version": env!("CARGO_PKG_VERSION") },
        })),
        "tools/list" => Ok(serde_json::json!({
            "tools": state.registry.list().into_iter().map(|(name, description)| {
                let schema = state.registry.get(name).map(|t| t.parameters_schema()).unwrap_or(Value::Null);
                serde_json::json!({ "name": name, "description": description, "inputSchema": schema })
            }).collect::<Vec<_>>()
        })),
        "tools/call" => handle_tools_call(state, session, identity, &req.params, started).await,
        other => Err(GatewayError::BadRequest(format!("unknown method: {other}"))),
    };

    match result {
        Ok(value) => JsonRpcResponse::ok(req.id, value),
        Err(e) => JsonRpcResponse::from_error(req.id, e),
    }
}

async fn handle_tools_call(
    state: &DispatcherState,
    session: &Arc<dyn SessionContext>,
    identity: &CallerIdentity,
    params: &Value,
    started: std::time::Instant,
) -> crate::error::Result<Value> {
    let name = params.get("name").and_then(|v| v.as_str()).ok_or_else(|| GatewayError::BadRequest("params.name is required".into()))?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    let ctx = ToolContext {
        catalog: state.catalog.clone(),
        pools: state.pools.clone(),
        session: session.clone(),
        audit: state.audit.clone(),
        identity: identity.clone(),
    };

    let outcome = state.registry.execute(name, arguments.clone(), &ctx).await;
    let (status, response) = match &outcome {
        Ok(out) => (200, serde_json::to_value(out).unwrap_or(Value::Null)),
        Err(e) => (e.json_rpc_code() as i64, serde_json::json!({"error": e.to_string()})),
    };
    state
        .audit
        .log(identity, name, "tools/call", &arguments, &response, status, started.elapsed().as_millis() as i64)
        .await;

    outcome.map(|out| serde_json::to_value(out).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::test_store;
    use crate::session::ProcessContext;

    async fn make_state() -> (DispatcherState, Arc<dyn SessionContext>) {
        let catalog = Arc::new(test_store());
        let pools = Arc::new(PoolManager::new(catalog.clone()));
        let audit = Arc::new(AuditLogger::new(catalog.clone()));
        let registry = Arc::new(ToolRegistry::with_gateway_tools());
        let session: Arc<dyn SessionContext> = Arc::new(ProcessContext::new(catalog.clone()).await.unwrap());
        (DispatcherState { registry, catalog, pools, audit }, session)
    }

    #[tokio::test]
    async fn initialize_returns_server_info() {
        let (state, session) = make_state().await;
        let identity = CallerIdentity::ApiKey { id: "k1".into() };
        let req = JsonRpcRequest { id: Some(serde_json::json!(1)), method: "initialize".into(), params: Value::Null };
        let resp = dispatch(&state, &session, &identity, req).await;
        assert!(resp.error.is_none());
        assert_eq!(resp.result.unwrap()["serverInfo"]["name"], "mysql-gateway");
    }

    #[tokio::test]
    async fn tools_list_returns_three_tools() {
        let (state, session) = make_state().await;
        let identity = CallerIdentity::ApiKey { id: "k1".into() };
        let req = JsonRpcRequest { id: None, method: "tools/list".into(), params: Value::Null };
        let resp = dispatch(&state, &session, &identity, req).await;
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 3);
    }

    #[tokio::test]
    async fn tools_call_unknown_tool_is_jsonrpc_error() {
        let (state, session) = make_state().await;
        let identity = CallerIdentity::ApiKey { id: "k1".into() };
        let req = JsonRpcRequest {
            id: Some(serde_json::json!(2)),
            method: "tools/call".into(),
            params: serde_json::json!({"name": "nope", "arguments": {}}),
        };
        let resp = dispatch(&state, &session, &identity, req).await;
        assert!(resp.result.is_none());
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn unknown_method_is_bad_request_code() {
        let (state, session) = make_state().await;
        let identity = CallerIdentity::ApiKey { id: "k1".into() };
        let req = JsonRpcRequest { id: None, method: "bogus".into(), params: Value::Null };
        let resp = dispatch(&state, &session, &identity, req).await;
        assert_eq!(resp.error.unwrap().code, -32602);
    }
}
