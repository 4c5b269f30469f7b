use rusqlite::params;
use uuid::Uuid;

use crate::db::with_retry;
use crate::error::Result;

use super::model::Connection;
use super::CatalogStore;

impl CatalogStore {
    /// Encrypts `password`, atomically inserts, returns the new id.
    pub async fn create_connection(
        &self,
        name: &str,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let ciphertext = self.enc.encrypt(password);
        let db = self.db.lock().await;
        with_retry(|| {
            db.execute(
                "INSERT INTO connections (id, name, host, port, user, password_ciphertext) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, name, host, port, user, ciphertext],
            )
        })?;
        Ok(id)
    }

    pub async fn update_connection(
        &self,
        id: &str,
        name: Option<&str>,
        host: Option<&str>,
        port: Option<u16>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        if let Some(name) = name {
            with_retry(|| db.execute("UPDATE connections SET name = ?1 WHERE id = ?2", params![name, id]))?;
        }
        if let Some(host) = host {
            with_retry(|| db.execute("UPDATE connections SET host = ?1 WHERE id = ?2", params![host, id]))?;
        }
        if let Some(port) = port {
            with_retry(|| db.execute("UPDATE connections SET port = ?1 WHERE id = ?2", params![port, id]))?;
        }
        if let Some(user) = user {
            with_retry(|| db.execute("UPDATE connections SET user = ?1 WHERE id = ?2", params![user, id]))?;
        }
        if let Some(password) = password {
            let ciphertext = self.enc.encrypt(password);
            with_retry(|| {
                db.execute(
                    "UPDATE connections SET password_ciphertext = ?1 WHERE id = ?2",
                    params![ciphertext, id],
                )
            })?;
        }
        Ok(())
    }

    /// Cascades to Databases via the `ON DELETE CASCADE` foreign key.
    pub async fn delete_connection(&self, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        with_retry(|| db.execute("DELETE FROM connections WHERE id = ?1", [id]))?;
        Ok(())
    }

    pub async fn list_connections(&self) -> Result<Vec<Connection>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, host, port, user, password_ciphertext, created_at FROM connections ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], row_to_connection)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT id, name, host, port, user, password_ciphertext, created_at FROM connections WHERE id = ?1",
                [id],
                row_to_connection,
            )
            .ok();
        Ok(row)
    }

    /// Decrypts the stored ciphertext for outbound use (pool manager only).
    pub async fn decrypt_connection_password(&self, conn: &Connection) -> Result<String> {
        self.enc.decrypt(&conn.password_ciphertext)
    }
}

fn row_to_connection(row: &rusqlite::Row) -> rusqlite::Result<Connection> {
    Ok(Connection {
        id: row.get(0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        port: row.get::<_, i64>(3)? as u16,
        user: row.get(4)?,
        password_ciphertext: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_store;

    #[tokio::test]
    async fn create_and_get_connection() {
        let store = test_store();
        let id = store
            .create_connection("c1", "127.0.0.1", 3306, "root", "p")
            .await
            .unwrap();
        let conn = store.get_connection(&id).await.unwrap().unwrap();
        assert_eq!(conn.name, "c1");
        assert_eq!(conn.port, 3306);
        assert_eq!(store.decrypt_connection_password(&conn).await.unwrap(), "p");
    }

    #[tokio::test]
    async fn update_connection_fields() {
        let store = test_store();
        let id = store
            .create_connection("c1", "127.0.0.1", 3306, "root", "p")
            .await
            .unwrap();
        store
            .update_connection(&id, Some("c2"), None, Some(3307), None, Some("p2"))
            .await
            .unwrap();
        let conn = store.get_connection(&id).await.unwrap().unwrap();
        assert_eq!(conn.name, "c2");
        assert_eq!(conn.port, 3307);
        assert_eq!(store.decrypt_connection_password(&conn).await.unwrap(), "p2");
    }

    #[tokio::test]
    async fn delete_connection_cascades_to_databases() {
        let store = test_store();
        let id = store
            .create_connection("c1", "127.0.0.1", 3306, "root", "p")
            .await
            .unwrap();
        store.add_discovered_databases(&id, &["app".into()]).await.unwrap();
        store.delete_connection(&id).await.unwrap();
        assert!(store.list_databases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_connections_orders_by_creation() {
        let store = test_store();
        store.create_connection("c1", "h", 1, "u", "p").await.unwrap();
        store.create_connection("c2", "h", 1, "u", "p").await.unwrap();
        let all = store.list_connections().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
