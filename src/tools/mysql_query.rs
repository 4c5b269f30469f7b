use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::query;

use super::{Tool, ToolContext, ToolOutput};

/// Runs a SQL statement against a named database, activating it first if
/// it isn't already the caller's current database.
pub struct MysqlQueryTool;

#[async_trait]
impl Tool for MysqlQueryTool {
    fn name(&self) -> &str {
        "mysql_query"
    }

    fn description(&self) -> &str {
        "Run a SQL statement against a database alias, subject to that database's permission grants."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["database", "sql"],
            "properties": {
                "database": { "type": "string", "description": "Database alias to run the statement against" },
                "sql": { "type": "string", "description": "SQL statement to execute" }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let alias = params
            .get("database")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::BadRequest("database is required".into()))?;
        let sql = params
            .get("sql")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::BadRequest("sql is required".into()))?;

        let already_current = ctx
            .session
            .current_database()
            .await
            .map(|d| d.alias == alias)
            .unwrap_or(false);

        if !already_current {
            let max_active_databases = ctx.catalog.max_active_databases().await?;
            let max_active_connections = ctx.catalog.max_active_connections().await?;
            ctx.session
                .activate_database(alias, &ctx.catalog, &ctx.pools, max_active_databases, max_active_connections)
                .await?;
            ctx.session.set_current_database(alias).await?;
        }

        let result = query::execute(ctx.session.as_ref(), ctx.pools.as_ref(), sql).await?;
        Ok(ToolOutput::ok(result))
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
    async fn missing_params_are_bad_request() {
        let ctx = make_ctx().await;
        let err = MysqlQueryTool.execute(serde_json::json!({"sql": "SELECT 1"}), &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));

        let err = MysqlQueryTool.execute(serde_json::json!({"database": "app"}), &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn unknown_database_alias_fails_activation() {
        let ctx = make_ctx().await;
        let err = MysqlQueryTool
            .execute(serde_json::json!({"database": "nope", "sql": "SELECT 1"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }
}
