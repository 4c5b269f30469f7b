use async_trait::async_trait;

use crate::error::{GatewayError, Result};

use super::{Tool, ToolContext, ToolOutput};

/// Activates a database alias in the caller's context and makes it current.
pub struct SwitchDatabaseTool;

#[async_trait]
impl Tool for SwitchDatabaseTool {
    fn name(&self) -> &str {
        "switch_database"
    }

    fn description(&self) -> &str {
        "Activate a database by alias and set it as the current database for subsequent queries."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["alias"],
            "properties": {
                "alias": { "type": "string", "description": "Database alias to switch to" }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let alias = params
            .get("alias")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::BadRequest("alias is required".into()))?;

        let max_active_databases = ctx.catalog.max_active_databases().await?;
        let max_active_connections = ctx.catalog.max_active_connections().await?;

        let db = ctx
            .session
            .activate_database(alias, &ctx.catalog, &ctx.pools, max_active_databases, max_active_connections)
            .await?;
        ctx.session.set_current_database(alias).await?;

        let connection_name = ctx
            .catalog
            .get_connection(&db.connection_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_default();

        Ok(ToolOutput::ok(serde_json::json!({
            "alias": db.alias,
            "realName": db.real_name,
            "connectionName": connection_name,
            "permissions": db.permissions,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogger;
    use crate::auth::CallerIdentity;
    use crate::catalog::test_support::test_store;
    use crate::pool::PoolManager;
    use crate::session::ProcessContext;
    use std::sync::Arc;

    async fn make_ctx() -> ToolContext {
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

    #[tokio::test]
    async fn switches_to_known_alias_and_sets_current() {
        let ctx = make_ctx().await;
        let conn_id = ctx.catalog.create_connection("prod", "localhost", 3306, "root", "pw").await.unwrap();
        ctx.catalog.add_discovered_databases(&conn_id, &["app".into()]).await.unwrap();

        let out = SwitchDatabaseTool.execute(serde_json::json!({"alias": "app"}), &ctx).await.unwrap();
        assert!(out.success);
        assert_eq!(out.output["alias"], "app");
        assert_eq!(out.output["connectionName"], "prod");

        let current = ctx.session.current_database().await.unwrap();
        assert_eq!(current.alias, "app");
    }

    #[tokio::test]
    async fn rejects_unknown_alias() {
        let ctx = make_ctx().await;
        let err = SwitchDatabaseTool.execute(serde_json::json!({"alias": "nope"}), &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn missing_alias_param_is_bad_request() {
        let ctx = make_ctx().await;
        let err = SwitchDatabaseTool.execute(serde_json::json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }
}
