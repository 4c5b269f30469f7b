//! Pool manager: one outbound MySQL pool per catalog connection,
//! lazily created, with a single probe acquisition on creation.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::CatalogStore;
use crate::error::{GatewayError, Result};

const POOL_MAX_CONNECTIONS: u32 = 10;

pub struct PoolManager {
    pools: Arc<Mutex<HashMap<String, MySqlPool>>>,
    catalog: Arc<CatalogStore>,
}

impl PoolManager {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { pools: Arc::new(Mutex::new(HashMap::new())), catalog }
    }

    /// Returns the pool for `connection_id`, building and probing it on
    /// first use.
    pub async fn get_pool(&self, connection_id: &str) -> Result<MySqlPool> {
        {
            let pools = self.pools.lock().await;
            if let Some(pool) = pools.get(connection_id) {
                return Ok(pool.clone());
            }
        }

        let conn = self
            .catalog
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| GatewayError::ConnectionRefused(format!("unknown connection id: {connection_id}")))?;
        let password = self.catalog.decrypt_connection_password(&conn).await?;

        let options = MySqlConnectOptions::new()
            .host(&conn.host)
            .port(conn.port)
            .username(&conn.user)
            .password(&password);

        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::ConnectionRefused(e.to_string()))?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(GatewayError::ConnectionRefused(e.to_string()));
        }

        let mut pools = self.pools.lock().await;
        pools.insert(connection_id.to_string(), pool.clone());
        info!(connection_id, "mysql pool created");
        Ok(pool)
    }

    /// Closes then recreates the pool for `connection_id`.
    pub async fn recreate_pool(&self, connection_id: &str) -> Result<MySqlPool> {
        self.close_pool(connection_id).await;
        self.get_pool(connection_id).await
    }

    pub async fn close_pool(&self, connection_id: &str) {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.remove(connection_id) {
            pool.close().await;
            warn!(connection_id, "mysql pool closed");
        }
    }

    pub async fn close_all(&self) {
        let mut pools = self.pools.lock().await;
        for (id, pool) in pools.drain() {
            pool.close().await;
            info!(connection_id = %id, "mysql pool closed at shutdown");
        }
    }

    /// Closes any pool in `connection_ids` that has no other caller-visible
    /// reference, driven by the session/context manager's LRU eviction.
    pub async fn close_unreferenced(&self, connection_ids: &[String]) {
        for id in connection_ids {
            self.close_pool(id).await;
        }
    }
}
