//! Connection Pool for LumaDB

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::{LumaDbError, Result};

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub url: String,
    pub max_size: usize,
}

impl PoolConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_size: 16,
        }
    }

    /// `LUMADB_URL` plus optional `LUMADB_POOL_SIZE`
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("LUMADB_URL")
            .map_err(|_| LumaDbError::Configuration("LUMADB_URL is not set".to_string()))?;
        let max_size = std::env::var("LUMADB_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(16);
        Ok(Self { url, max_size })
    }
}

/// LumaDB Connection Pool
#[derive(Clone)]
pub struct LumaDbPool {
    pool: Pool,
}

impl LumaDbPool {
    pub fn new(config: &PoolConfig) -> Result<Self> {
        info!(max_size = config.max_size, "Creating LumaDB connection pool");

        let pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| LumaDbError::Configuration(format!("Invalid URL: {}", e)))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(config.max_size)
            .build()
            .map_err(|e| LumaDbError::Pool(e.to_string()))?;

        debug!("LumaDB pool created");
        Ok(Self { pool })
    }

    pub async fn get(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| LumaDbError::Pool(e.to_string()))
    }

    pub async fn is_healthy(&self) -> bool {
        match self.pool.get().await {
            Ok(conn) => conn.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_url() {
        let config = PoolConfig::new("postgres://brivas@localhost:notaport/brivas");
        assert!(matches!(
            LumaDbPool::new(&config),
            Err(LumaDbError::Configuration(_))
        ));
    }
}
