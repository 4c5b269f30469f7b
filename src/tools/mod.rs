pub mod list_databases;
pub mod mysql_query;
pub mod switch_database;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::audit::AuditLogger;
use crate::auth::CallerIdentity;
use crate::catalog::CatalogStore;
use crate::error::{GatewayError, Result};
use crate::pool::PoolManager;
use crate::session::SessionContext;

/// Output from a tool call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            metadata: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::String(message.into()),
            metadata: None,
        }
    }

    pub fn ok_with_meta(output: serde_json::Value, meta: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            metadata: Some(meta),
        }
    }
}

/// Shared context passed to tools during execution, narrowed to what the
/// tool dispatcher needs rather than the general-purpose agent context this
/// is adapted from.
pub struct ToolContext {
    pub catalog: Arc<CatalogStore>,
    pub pools: Arc<PoolManager>,
    pub session: Arc<dyn SessionContext>,
    pub audit: Arc<AuditLogger>,
    pub identity: CallerIdentity,
}

/// The trait all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of the tool (e.g. "mysql_query").
    fn name(&self) -> &str;

    /// Human-readable description surfaced in `tools/list`.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// Registry of all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn with_gateway_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(list_databases::ListDatabasesTool));
        registry.register(Box::new(switch_database::SwitchDatabaseTool));
        registry.register(Box::new(mysql_query::MysqlQueryTool));
        registry
    }

    /// Register a tool. Panics on duplicate names.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        assert!(
            !self.tools.contains_key(&name),
            "duplicate tool name: {name}"
        );
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tools as (name, description) pairs.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut items: Vec<_> = self
            .tools
            .values()
            .map(|t| (t.name(), t.description()))
            .collect();
        items.sort_by_key(|(name, _)| *name);
        items
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| GatewayError::BadRequest(format!("unknown tool: {name}")))?;
        tool.execute(params, ctx).await
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::test_store;
    use crate::session::ProcessContext;

    struct MockTool {
        name: &'static str,
        description: &'static str,
    }

    #[async_trait::async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "input": { "type": "string" } }
            })
        }

        async fn execute(
            &self,
            params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput> {
            let input = params.get("input").and_then(|v| v.as_str()).unwrap_or("default");
            Ok(ToolOutput::ok(serde_json::json!({ "echo": input })))
        }
    }

    async fn make_test_context() -> ToolContext {
        let catalog = Arc::new(test_store());
        let pools = Arc::new(PoolManager::new(catalog.clone()));
        let session = Arc::new(ProcessContext::new(catalog.clone()).await.unwrap());
        let audit = Arc::new(AuditLogger::new(catalog.clone()));
        ToolContext {
            catalog,
            pools,
            session,
            audit,
            identity: CallerIdentity::User { id: "u1".into(), username: "alice".into() },
        }
    }

    #[test]
    fn test_tool_output_ok() {
        let out = ToolOutput::ok(serde_json::json!("success"));
        assert!(out.success);
        assert!(out.metadata.is_none());
    }

    #[test]
    fn test_tool_output_error() {
        let out = ToolOutput::error("failed");
        assert!(!out.success);
        assert_eq!(out.output, "failed");
    }

    #[test]
    fn test_tool_output_ok_with_meta() {
        let meta = serde_json::json!({"count": 42});
        let out = ToolOutput::ok_with_meta(serde_json::json!("done"), meta.clone());
        assert!(out.success);
        assert_eq!(out.metadata, Some(meta));
    }

    #[test]
    fn test_tool_registry_new() {
        let reg = ToolRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn test_tool_registry_register_get_list_len() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(MockTool { name: "mock_a", description: "First mock" }));
        reg.register(Box::new(MockTool { name: "mock_b", description: "Second mock" }));

        assert!(!reg.is_empty());
        assert_eq!(reg.len(), 2);

        let tool = reg.get("mock_a").unwrap();
        assert_eq!(tool.name(), "mock_a");
        assert_eq!(tool.description(), "First mock");
        assert!(reg.get("nonexistent").is_none());

        let list = reg.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].0, "mock_a");
        assert_eq!(list[1].0, "mock_b");
    }

    #[tokio::test]
    async fn test_tool_registry_execute_unknown_tool() {
        let reg = ToolRegistry::new();
        let ctx = make_test_context().await;

        let err = reg.execute("unknown_tool", serde_json::json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_tool_registry_execute_mock_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(MockTool { name: "mock", description: "Mock tool" }));
        let ctx = make_test_context().await;

        let result = reg.execute("mock", serde_json::json!({"input": "hello"}), &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["echo"], "hello");
    }

    #[test]
    #[should_panic(expected = "duplicate tool name")]
    fn test_tool_registry_duplicate_panics() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(MockTool { name: "dup", description: "a" }));
        reg.register(Box::new(MockTool { name: "dup", description: "b" }));
    }

    #[test]
    fn with_gateway_tools_registers_the_three_tools() {
        let reg = ToolRegistry::with_gateway_tools();
        let names: Vec<&str> = reg.list().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["list_databases", "mysql_query", "switch_database"]);
    }
}
