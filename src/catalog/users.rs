use rusqlite::params;
use uuid::Uuid;

use crate::crypto::{hash_password, verify_password};
use crate::db::with_retry;
use crate::error::{GatewayError, Result};

use super::model::User;
use super::CatalogStore;

impl CatalogStore {
    pub async fn create_user(&self, username: &str, plaintext_password: &str, must_change_password: bool) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let hash = hash_password(plaintext_password)?;
        let db = self.db.lock().await;
        with_retry(|| {
            db.execute(
                "INSERT INTO users (id, username, password_hash, must_change_password) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, hash, must_change_password],
            )
        })?;
        Ok(id)
    }

    /// Verifies credentials against an active user and bumps `last_login`.
    /// Never reveals whether the username or the password was wrong.
    pub async fn verify_user_password(&self, username: &str, plaintext: &str) -> Result<User> {
        let db = self.db.lock().await;
        let user = db
            .query_row(
                "SELECT id, username, password_hash, created_at, last_login, active, must_change_password FROM users WHERE username = ?1 AND active = 1",
                [username],
                row_to_user,
            )
            .map_err(|_| GatewayError::BadCredentials)?;

        if !verify_password(plaintext, &user.password_hash)? {
            return Err(GatewayError::BadCredentials);
        }

        with_retry(|| {
            db.execute("UPDATE users SET last_login = datetime('now') WHERE id = ?1", [&user.id])
        })?;

        Ok(user)
    }

    /// Changes a user's password. `old_password` is required unless the
    /// account is flagged `must_change_password`.
    pub async fn change_user_password(&self, id: &str, old_password: Option<&str>, new_password: &str) -> Result<()> {
        let db = self.db.lock().await;
        let (current_hash, must_change): (String, bool) = db
            .query_row(
                "SELECT password_hash, must_change_password FROM users WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(|_| GatewayError::BadRequest(format!("no such user: {id}")))?;

        if !must_change {
            let supplied = old_password.ok_or(GatewayError::BadCredentials)?;
            if !verify_password(supplied, &current_hash)? {
                return Err(GatewayError::BadCredentials);
            }
        }

        let new_hash = hash_password(new_password)?;
        with_retry(|| {
            db.execute(
                "UPDATE users SET password_hash = ?1, must_change_password = 0 WHERE id = ?2",
                params![new_hash, id],
            )
        })?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT id, username, password_hash, created_at, last_login, active, must_change_password FROM users WHERE id = ?1",
                [id],
                row_to_user,
            )
            .ok();
        Ok(row)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, username, password_hash, created_at, last_login, active, must_change_password FROM users ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn set_user_active(&self, id: &str, active: bool) -> Result<()> {
        let db = self.db.lock().await;
        with_retry(|| db.execute("UPDATE users SET active = ?1 WHERE id = ?2", params![active, id]))?;
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
        last_login: row.get(4)?,
        active: row.get(5)?,
        must_change_password: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_store;
    use super::*;

    #[tokio::test]
    async fn create_and_verify_user() {
        let store = test_store();
        store.create_user("alice", "correct-horse", false).await.unwrap();
        let user = store.verify_user_password("alice", "correct-horse").await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn wrong_password_is_bad_credentials() {
        let store = test_store();
        store.create_user("alice", "correct-horse", false).await.unwrap();
        let err = store.verify_user_password("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, GatewayError::BadCredentials));
    }

    #[tokio::test]
    async fn unknown_username_is_bad_credentials_not_not_found() {
        let store = test_store();
        let err = store.verify_user_password("ghost", "whatever").await.unwrap_err();
        assert!(matches!(err, GatewayError::BadCredentials));
    }

    #[tokio::test]
    async fn change_password_requires_old_password() {
        let store = test_store();
        let id = store.create_user("alice", "old-pw", false).await.unwrap();
        let err = store.change_user_password(&id, None, "new-pw").await.unwrap_err();
        assert!(matches!(err, GatewayError::BadCredentials));

        store.change_user_password(&id, Some("old-pw"), "new-pw").await.unwrap();
        assert!(store.verify_user_password("alice", "new-pw").await.is_ok());
    }

    #[tokio::test]
    async fn must_change_password_skips_old_password_check() {
        let store = test_store();
        let id = store.create_user("alice", "temp-pw", true).await.unwrap();
        store.change_user_password(&id, None, "chosen-pw").await.unwrap();
        assert!(store.verify_user_password("alice", "chosen-pw").await.is_ok());
    }

    #[tokio::test]
    async fn inactive_user_cannot_verify() {
        let store = test_store();
        let id = store.create_user("alice", "pw", false).await.unwrap();
        store.set_user_active(&id, false).await.unwrap();
        let err = store.verify_user_password("alice", "pw").await.unwrap_err();
        assert!(matches!(err, GatewayError::BadCredentials));
    }
}
