use rusqlite::params;
use uuid::Uuid;

use crate::db::with_retry;
use crate::error::{GatewayError, Result};

use super::model::{Database, Permissions};
use super::settings::KEY_CURRENT_DATABASE_ALIAS;
use super::CatalogStore;

/// `alias` grammar: 1-64 chars, `[A-Za-z0-9_-]`, cannot start with a digit.
pub fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty() || alias.len() > 64 {
        return Err(GatewayError::AliasInvalid(format!(
            "alias must be 1-64 characters, got {}",
            alias.len()
        )));
    }
    if !alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(GatewayError::AliasInvalid(
            "alias may only contain letters, digits, '_', and '-'".into(),
        ));
    }
    if alias.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(GatewayError::AliasInvalid("alias cannot start with a digit".into()));
    }
    Ok(())
}

/// Replace disallowed characters with `_`; a leading digit gets a `_` prefix.
fn sanitize_alias(real_name: &str) -> String {
    let mut sanitized: String = real_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        sanitized = "db".to_string();
    }
    if sanitized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized.truncate(64);
    sanitized
}

impl CatalogStore {
    /// Inserts newly-seen real database names under `connection_id` with
    /// default `select`-only permissions, resolving alias collisions by
    /// appending `_2`, `_3`, … Returns the aliases actually inserted.
    pub async fn add_discovered_databases(
        &self,
        connection_id: &str,
        real_names: &[String],
    ) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut inserted = Vec::new();

        for real_name in real_names {
            let already: bool = db
                .prepare("SELECT 1 FROM databases WHERE connection_id = ?1 AND real_name = ?2")?
                .exists(params![connection_id, real_name])?;
            if already {
                continue;
            }

            let base = sanitize_alias(real_name);
            let mut candidate = base.clone();
            let mut suffix = 2;
            loop {
                let taken: bool = db
                    .prepare("SELECT 1 FROM databases WHERE alias = ?1")?
                    .exists([&candidate])?;
                if !taken {
                    break;
                }
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }

            let id = Uuid::new_v4().to_string();
            with_retry(|| {
                db.execute(
                    "INSERT INTO databases (id, connection_id, real_name, alias, permissions) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, connection_id, real_name, candidate, Permissions::SELECT_ONLY.to_bits()],
                )
            })?;
            inserted.push(candidate);
        }

        // A fresh connection has no database to be "current" until its
        // first alias is discovered; that's the earliest point the catalog
        // can honor "sets itself current iff none existed" for it.
        if let Some(first) = inserted.first() {
            let has_current: bool = db
                .prepare("SELECT 1 FROM settings WHERE key = ?1")?
                .exists([KEY_CURRENT_DATABASE_ALIAS])?;
            if !has_current {
                with_retry(|| {
                    db.execute(
                        "INSERT INTO settings (key, value) VALUES (?1, ?2) \
                         ON CONFLICT(key) DO NOTHING",
                        params![KEY_CURRENT_DATABASE_ALIAS, first],
                    )
                })?;
            }
        }

        Ok(inserted)
    }

    pub async fn list_databases(&self) -> Result<Vec<Database>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, connection_id, real_name, alias, enabled, last_accessed, permissions FROM databases ORDER BY alias",
        )?;
        let rows = stmt
            .query_map([], row_to_database)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn get_database_by_alias(&self, alias: &str) -> Result<Option<Database>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT id, connection_id, real_name, alias, enabled, last_accessed, permissions FROM databases WHERE alias = ?1",
                [alias],
                row_to_database,
            )
            .ok();
        Ok(row)
    }

    pub async fn set_database_enabled(&self, alias: &str, enabled: bool) -> Result<()> {
        let db = self.db.lock().await;
        with_retry(|| {
            db.execute(
                "UPDATE databases SET enabled = ?1 WHERE alias = ?2",
                params![enabled, alias],
            )
        })?;
        Ok(())
    }

    pub async fn update_permissions(&self, alias: &str, permissions: Permissions) -> Result<()> {
        let db = self.db.lock().await;
        with_retry(|| {
            db.execute(
                "UPDATE databases SET permissions = ?1 WHERE alias = ?2",
                params![permissions.to_bits(), alias],
            )
        })?;
        Ok(())
    }

    pub async fn rename_alias(&self, alias: &str, new_alias: &str) -> Result<()> {
        validate_alias(new_alias)?;
        let db = self.db.lock().await;
        let taken: bool = db
            .prepare("SELECT 1 FROM databases WHERE alias = ?1")?
            .exists([new_alias])?;
        if taken {
            return Err(GatewayError::AliasConflict(new_alias.to_string()));
        }
        with_retry(|| {
            db.execute(
                "UPDATE databases SET alias = ?1 WHERE alias = ?2",
                params![new_alias, alias],
            )
        })?;
        Ok(())
    }

    /// Advances `last_accessed`. Called by the session manager on activation.
    pub async fn touch_database(&self, alias: &str) -> Result<()> {
        let db = self.db.lock().await;
        with_retry(|| {
            db.execute(
                "UPDATE databases SET last_accessed = datetime('now') WHERE alias = ?1",
                [alias],
            )
        })?;
        Ok(())
    }
}

fn row_to_database(row: &rusqlite::Row) -> rusqlite::Result<Database> {
    Ok(Database {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        real_name: row.get(2)?,
        alias: row.get(3)?,
        enabled: row.get(4)?,
        last_accessed: row.get(5)?,
        permissions: Permissions::from_bits(row.get(6)?),
    })
}
