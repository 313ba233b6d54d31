//! Telemetry Configuration

/// How log output is produced for a service
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_level: String,
    pub json_logs: bool,
    pub thread_ids: bool,
}

impl TelemetryConfig {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            log_level: "info".to_string(),
            json_logs: true,
            thread_ids: false,
        }
    }

    /// `LOG_LEVEL` (falling back to `RUST_LOG`), `JSON_LOGS` and `LOG_THREAD_IDS`
    pub fn from_env(service_name: &str) -> Self {
        let defaults = Self::new(service_name);
        Self {
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            json_logs: std::env::var("JSON_LOGS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.json_logs),
            thread_ids: std::env::var("LOG_THREAD_IDS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.thread_ids),
            service_name: defaults.service_name,
        }
    }
}
