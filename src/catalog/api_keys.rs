use rusqlite::params;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::crypto::generate_token;
use crate::db::with_retry;
use crate::error::{GatewayError, Result};

use super::model::{ApiKey, NewApiKey};
use super::CatalogStore;

pub(crate) fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    data_encoding::BASE64URL_NOPAD.encode(&hasher.finalize())
}

impl CatalogStore {
    /// Mints a new key, returning the plaintext secret exactly once. Only
    /// its hash is ever persisted.
    pub async fn create_api_key(&self, name: &str) -> Result<NewApiKey> {
        let id = Uuid::new_v4().to_string();
        let secret = generate_token();
        let token_hash = hash_secret(&secret);

        let db = self.db.lock().await;
        with_retry(|| {
            db.execute(
                "INSERT INTO api_keys (id, name, token_hash) VALUES (?1, ?2, ?3)",
                params![id, name, token_hash],
            )
        })?;

        Ok(NewApiKey { id, secret })
    }

    pub async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, created_at, last_used_at, active FROM api_keys ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], row_to_api_key)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Looks up an active key by its plaintext secret and bumps
    /// `last_used_at`. Returns `None` if the secret is unknown or revoked.
    pub async fn verify_api_key(&self, secret: &str) -> Result<Option<ApiKey>> {
        let token_hash = hash_secret(secret);
        let db = self.db.lock().await;

        let found = db
            .query_row(
                "SELECT id, name, created_at, last_used_at, active FROM api_keys WHERE token_hash = ?1 AND active = 1",
                [&token_hash],
                row_to_api_key,
            )
            .ok();

        if let Some(ref key) = found {
            with_retry(|| {
                db.execute(
                    "UPDATE api_keys SET last_used_at = datetime('now') WHERE id = ?1",
                    [&key.id],
                )
            })?;
        }

        Ok(found)
    }

    /// Marks a key inactive. Refuses to revoke the last active key.
    pub async fn revoke_api_key(&self, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        let active_count: i64 =
            db.query_row("SELECT COUNT(*) FROM api_keys WHERE active = 1", [], |r| r.get(0))?;
        let is_active: bool = db
            .query_row("SELECT active FROM api_keys WHERE id = ?1", [id], |r| r.get(0))
            .map_err(|_| GatewayError::BadRequest(format!("no such api key: {id}")))?;

        if is_active && active_count <= 1 {
            return Err(GatewayError::LastActiveKey);
        }

        with_retry(|| db.execute("UPDATE api_keys SET active = 0 WHERE id = ?1", [id]))?;
        Ok(())
    }

    /// Deletes a key outright. Refuses to remove the last active key, same
    /// as `revoke_api_key` — deletion is just a harder form of revocation.
    pub async fn delete_api_key(&self, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        let active_count: i64 =
            db.query_row("SELECT COUNT(*) FROM api_keys WHERE active = 1", [], |r| r.get(0))?;
        let is_active: bool = db
            .query_row("SELECT active FROM api_keys WHERE id = ?1", [id], |r| r.get(0))
            .map_err(|_| GatewayError::BadRequest(format!("no such api key: {id}")))?;

        if is_active && active_count <= 1 {
            return Err(GatewayError::LastActiveKey);
        }

        with_retry(|| db.execute("DELETE FROM api_keys WHERE id = ?1", [id]))?;
        Ok(())
    }
}

fn row_to_api_key(row: &rusqlite::Row) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        last_used_at: row.get(3)?,
        active: row.get(4)?,
    })
}
