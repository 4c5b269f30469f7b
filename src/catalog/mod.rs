//! Catalog store: embedded transactional store of connections,
//! databases, users, API keys, logs, and settings.

pub mod api_keys;
pub mod connections;
pub mod databases;
pub mod logs;
pub mod migrations;
pub mod model;
pub mod settings;
pub mod users;

use std::sync::Arc;

use rusqlite::{params, Connection, TransactionBehavior};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::crypto::{generate_token, hash_password, FieldEncryptor};
use crate::error::Result;

use self::api_keys::hash_secret;

/// One `impl` block per concern lives in its own submodule; this struct is
/// the shared handle all of them operate on.
pub struct CatalogStore {
    pub(crate) db: Arc<Mutex<Connection>>,
    pub(crate) enc: Arc<FieldEncryptor>,
}

/// What `CatalogStore::bootstrap` actually did, so the caller knows what to
/// log without re-querying the tables it just touched.
pub struct BootstrapOutcome {
    pub admin_created: bool,
    pub seeded_key_secret: Option<String>,
}

impl CatalogStore {
    pub fn new(db: Arc<Mutex<Connection>>, enc: Arc<FieldEncryptor>) -> Self {
        Self { db, enc }
    }

    /// Seeds a brand-new catalog with a default admin user and a starter
    /// API key, both checked and inserted inside one `BEGIN IMMEDIATE`
    /// transaction so two processes racing to initialize the same empty
    /// store can't both seed it.
    pub async fn bootstrap(&self) -> Result<BootstrapOutcome> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let user_count: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        let admin_created = user_count == 0;
        if admin_created {
            let id = Uuid::new_v4().to_string();
            let hash = hash_password("admin")?;
            tx.execute(
                "INSERT INTO users (id, username, password_hash, must_change_password) VALUES (?1, ?2, ?3, 1)",
                params![id, "admin", hash],
            )?;
        }

        let key_count: i64 = tx.query_row("SELECT COUNT(*) FROM api_keys", [], |r| r.get(0))?;
        let seeded_key_secret = if key_count == 0 {
            let id = Uuid::new_v4().to_string();
            let secret = generate_token();
            let token_hash = hash_secret(&secret);
            tx.execute(
                "INSERT INTO api_keys (id, name, token_hash) VALUES (?1, ?2, ?3)",
                params![id, "default", token_hash],
            )?;
            Some(secret)
        } else {
            None
        };

        tx.commit()?;
        Ok(BootstrapOutcome { admin_created, seeded_key_secret })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_store;

    #[tokio::test]
    async fn bootstrap_seeds_admin_and_key_once() {
        let store = test_store();
        let first = store.bootstrap().await.unwrap();
        assert!(first.admin_created);
        assert!(first.seeded_key_secret.is_some());
        assert_eq!(store.list_users().await.unwrap().len(), 1);
        assert_eq!(store.list_api_keys().await.unwrap().len(), 1);

        let second = store.bootstrap().await.unwrap();
        assert!(!second.admin_created);
        assert!(second.seeded_key_secret.is_none());
        assert_eq!(store.list_users().await.unwrap().len(), 1);
        assert_eq!(store.list_api_keys().await.unwrap().len(), 1);
    }
}
