use rusqlite::params;

use crate::db::with_retry;
use crate::error::Result;

use super::CatalogStore;

/// Well-known setting keys.
pub const KEY_CURRENT_DATABASE_ALIAS: &str = "currentDatabaseAlias";
pub const KEY_MCP_ENABLED: &str = "mcpEnabled";
pub const KEY_MAX_ACTIVE_DATABASES: &str = "maxActiveDatabases";
pub const KEY_MAX_ACTIVE_CONNECTIONS: &str = "maxActiveConnections";

pub const DEFAULT_MAX_ACTIVE_DATABASES: i64 = 10;
pub const DEFAULT_MAX_ACTIVE_CONNECTIONS: i64 = 5;

impl CatalogStore {
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let row = db.query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| r.get(0)).ok();
        Ok(row)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        with_retry(|| {
            db.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
        })?;
        Ok(())
    }

    /// `maxActiveDatabases`, falling back to its documented default.
    pub async fn max_active_databases(&self) -> Result<i64> {
        match self.get_setting(KEY_MAX_ACTIVE_DATABASES).await? {
            Some(v) => Ok(v.parse().unwrap_or(DEFAULT_MAX_ACTIVE_DATABASES)),
            None => Ok(DEFAULT_MAX_ACTIVE_DATABASES),
        }
    }

    /// `maxActiveConnections`, falling back to its documented default.
    pub async fn max_active_connections(&self) -> Result<i64> {
        match self.get_setting(KEY_MAX_ACTIVE_CONNECTIONS).await? {
            Some(v) => Ok(v.parse().unwrap_or(DEFAULT_MAX_ACTIVE_CONNECTIONS)),
            None => Ok(DEFAULT_MAX_ACTIVE_CONNECTIONS),
        }
    }
}
