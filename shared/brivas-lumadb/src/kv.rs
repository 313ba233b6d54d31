//! Key/value table with per-key expiry
//!
//! Values are text. Expired rows are invisible to reads and are removed
//! lazily by `purge_expired`.

use std::time::Duration;
use tracing::{debug, instrument};

use crate::{LumaDbError, LumaDbPool, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transport_kv (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    expires_at  TIMESTAMPTZ NULL
);
CREATE INDEX IF NOT EXISTS transport_kv_expires_at ON transport_kv (expires_at);
";

/// Key/value access on top of a LumaDB pool
#[derive(Clone)]
pub struct LumaKv {
    pool: LumaDbPool,
}

impl LumaKv {
    pub fn new(pool: LumaDbPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA).await?;
        debug!("transport_kv schema ready");
        Ok(())
    }

    /// Overwrites the value and clears any expiry, like Redis `SET`
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO transport_kv (key, value, expires_at) VALUES ($1, $2, NULL)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = NULL",
            &[&key, &value],
        )
        .await?;
        Ok(())
    }

    /// Returns false when the key does not exist (or already expired)
    #[instrument(skip(self))]
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let conn = self.pool.get().await?;
        let seconds = ttl.as_secs_f64();
        let updated = conn
            .execute(
                "UPDATE transport_kv SET expires_at = now() + make_interval(secs => $2)
                 WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
                &[&key, &seconds],
            )
            .await?;
        Ok(updated > 0)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT value FROM transport_kv
                 WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
                &[&key],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, String>(0)))
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get().await?;
        let deleted = conn
            .execute("DELETE FROM transport_kv WHERE key = $1", &[&key])
            .await?;
        Ok(deleted > 0)
    }

    /// Atomic increment; a missing or expired key counts from zero
    #[instrument(skip(self))]
    pub async fn incr(&self, key: &str) -> Result<i64> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO transport_kv (key, value, expires_at) VALUES ($1, '1', NULL)
                 ON CONFLICT (key) DO UPDATE SET
                    value = CASE
                        WHEN transport_kv.expires_at IS NOT NULL AND transport_kv.expires_at <= now()
                            THEN '1'
                        ELSE (transport_kv.value::bigint + 1)::text
                    END,
                    expires_at = CASE
                        WHEN transport_kv.expires_at IS NOT NULL AND transport_kv.expires_at <= now()
                            THEN NULL
                        ELSE transport_kv.expires_at
                    END
                 RETURNING value",
                &[&key],
            )
            .await?;
        let value: String = row.get(0);
        value.parse().map_err(|_| LumaDbError::NotAnInteger {
            key: key.to_string(),
        })
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let conn = self.pool.get().await?;
        let purged = conn
            .execute(
                "DELETE FROM transport_kv WHERE expires_at IS NOT NULL AND expires_at <= now()",
                &[],
            )
            .await?;
        if purged > 0 {
            debug!(purged, "Purged expired transport_kv rows");
        }
        Ok(purged)
    }

    pub async fn is_healthy(&self) -> bool {
        self.pool.is_healthy().await
    }
}
