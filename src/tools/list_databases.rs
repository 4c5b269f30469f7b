use async_trait::async_trait;

use crate::catalog::settings::{KEY_MAX_ACTIVE_CONNECTIONS, KEY_MAX_ACTIVE_DATABASES};
use crate::error::Result;
use crate::pool::PoolManager;

use super::{Tool, ToolContext, ToolOutput};

/// Lists every *enabled* database across all connections, grouped by
/// connection. Disabled databases are hidden from this tool surface but
/// still appear through the REST API.
pub struct ListDatabasesTool;

#[async_trait]
impl Tool for ListDatabasesTool {
    fn name(&self) -> &str {
        "list_databases"
    }

    fn description(&self) -> &str {
        "List databases discovered across all configured MySQL connections, with permissions and activation state."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "includeMetadata": {
                    "type": "boolean",
                    "description": "Include table count and size in bytes for each database (one information_schema query per database)"
                }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let include_metadata = params.get("includeMetadata").and_then(|v| v.as_bool()).unwrap_or(false);

        let databases = ctx.catalog.list_databases().await?;
        let connections = ctx.catalog.list_connections().await?;
        let active = ctx.session.active_databases().await;
        let current = ctx.session.current_database().await;

        let mut by_connection: std::collections::BTreeMap<String, Vec<serde_json::Value>> = std::collections::BTreeMap::new();

        for db in databases.into_iter().filter(|d| d.enabled) {
            let connection_name = connections
                .iter()
                .find(|c| c.id == db.connection_id)
                .map(|c| c.name.clone())
                .unwrap_or_default();

            let is_current = current.as_ref().map(|c| c.alias == db.alias).unwrap_or(false);
            let is_active = active.iter().any(|c| c.alias == db.alias);

            let mut entry = serde_json::json!({
                "alias": db.alias,
                "realName": db.real_name,
                "connectionName": connection_name,
                "isCurrent": is_current,
                "isActive": is_active,
                "permissions": db.permissions,
            });

            if include_metadata {
                if let Ok((table_count, size_bytes)) = database_metadata(ctx.pools.as_ref(), &db.connection_id, &db.real_name).await {
                    entry["tableCount"] = serde_json::json!(table_count);
                    entry["sizeBytes"] = serde_json::json!(size_bytes);
                }
            }

            by_connection.entry(connection_name).or_default().push(entry);
        }

        let max_active_databases = ctx
            .catalog
            .get_setting(KEY_MAX_ACTIVE_DATABASES)
            .await?
            .and_then(|v| v.parse::<i64>().ok());
        let max_active_connections = ctx
            .catalog
            .get_setting(KEY_MAX_ACTIVE_CONNECTIONS)
            .await?
            .and_then(|v| v.parse::<i64>().ok());

        Ok(ToolOutput::ok(serde_json::json!({
            "connections": by_connection,
            "maxActiveDatabases": max_active_databases,
            "maxActiveConnections": max_active_connections,
        })))
    }
}

async fn database_metadata(pools: &PoolManager, connection_id: &str, real_name: &str) -> Result<(i64, i64)> {
    let pool = pools.get_pool(connection_id).await?;
    let row: (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), SUM(data_length + index_length) FROM information_schema.tables WHERE table_schema = ?",
    )
    .bind(real_name)
    .fetch_one(&pool)
    .await?;
    Ok((row.0, row.1.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogger;
    use crate::auth::CallerIdentity;
    use crate::catalog::model::Permissions;
    use crate::catalog::test_support::test_store;
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
    async fn lists_enabled_databases_grouped_by_connection() {
        let ctx = make_ctx().await;
        let conn_id = ctx.catalog.create_connection("prod", "localhost", 3306, "root", "pw").await.unwrap();
        ctx.catalog.add_discovered_databases(&conn_id, &["app".into(), "billing".into()]).await.unwrap();

        let out = ListDatabasesTool.execute(serde_json::json!({}), &ctx).await.unwrap();
        assert!(out.success);
        let dbs = out.output["connections"]["prod"].as_array().unwrap();
        assert_eq!(dbs.len(), 2);
    }

    #[tokio::test]
    async fn disabled_databases_are_hidden() {
        let ctx = make_ctx().await;
        let conn_id = ctx.catalog.create_connection("prod", "localhost", 3306, "root", "pw").await.unwrap();
        ctx.catalog.add_discovered_databases(&conn_id, &["app".into()]).await.unwrap();
        ctx.catalog.set_database_enabled("app", false).await.unwrap();

        let out = ListDatabasesTool.execute(serde_json::json!({}), &ctx).await.unwrap();
        assert!(out.output["connections"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn current_and_active_flags_reflect_session_state() {
        let ctx = make_ctx().await;
        let conn_id = ctx.catalog.create_connection("prod", "localhost", 3306, "root", "pw").await.unwrap();
        ctx.catalog.add_discovered_databases(&conn_id, &["app".into()]).await.unwrap();
        ctx.catalog.update_permissions("app", Permissions::SELECT_ONLY).await.unwrap();
        ctx.session.activate_database("app", &ctx.catalog, &ctx.pools, 10, 10).await.unwrap();
        ctx.session.set_current_database("app").await.unwrap();

        let out = ListDatabasesTool.execute(serde_json::json!({}), &ctx).await.unwrap();
        let entry = &out.output["connections"]["prod"][0];
        assert_eq!(entry["isCurrent"], true);
        assert_eq!(entry["isActive"], true);
    }
}
