//! Brivas LumaDB Client
//!
//! PostgreSQL wire-protocol client for LumaDB: a connection pool and a
//! key/value table with per-key expiry.

mod error;
mod kv;
mod pool;

pub use error::{LumaDbError, Result};
pub use kv::LumaKv;
pub use pool::{LumaDbPool, PoolConfig};
