//! LumaDB-backed store

use async_trait::async_trait;
use brivas_lumadb::LumaKv;
use std::time::Duration;

use super::{KeyValueStore, StoreResult};

#[async_trait]
impl KeyValueStore for LumaKv {
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        Ok(LumaKv::set(self, key, value).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        Ok(LumaKv::expire(self, key, ttl).await?)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(LumaKv::get(self, key).await?)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(LumaKv::delete(self, key).await?)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        Ok(LumaKv::incr(self, key).await?)
    }
}
