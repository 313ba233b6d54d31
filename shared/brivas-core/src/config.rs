//! Service-level configuration shared by every Brivas binary

use crate::error::{BrivasError, Result};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub http_bind: String,
    pub log_level: String,
    /// When unset, services fall back to in-process state
    pub lumadb_url: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "unknown".to_string()),
            http_bind: env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            lumadb_url: env::var("LUMADB_URL").ok().filter(|url| !url.is_empty()),
        };
        config.http_addr()?;
        Ok(config)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.http_bind
            .parse()
            .map_err(|e| BrivasError::Config(format!("Invalid HTTP_BIND {}: {}", self.http_bind, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_addr_validation() {
        let mut config = ServiceConfig {
            service_name: "smpp-transport".into(),
            http_bind: "127.0.0.1:8080".into(),
            log_level: "info".into(),
            lumadb_url: None,
        };
        assert!(config.http_addr().is_ok());

        config.http_bind = "not-an-address".into();
        assert!(matches!(config.http_addr(), Err(BrivasError::Config(_))));
    }
}
