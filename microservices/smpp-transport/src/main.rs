//! SMPP Transport microservice
//!
//! Binds to an SMSC as an ESME and relays bus traffic over the session.
//! Correlation state lives in LumaDB when `LUMADB_URL` is set.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use brivas_core::{
    BrivasError, BrivasService, DependencyStatus, HealthStatus, MicroserviceRuntime, OutboundMessage,
    ReadinessStatus, Result, ServiceConfig,
};
use brivas_lumadb::{LumaDbPool, LumaKv, PoolConfig};
use parking_lot::Mutex;
use serde_json::{json, Value};
use smpp_transport::{KeyValueStore, LogPublisher, MemoryStore, SmppTransport, SmppTransportConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bus messages buffered ahead of the session
const OUTBOUND_QUEUE_DEPTH: usize = 1024;

const PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry =
        brivas_telemetry::init("smpp-transport").map_err(|e| BrivasError::Internal(e.to_string()))?;

    info!("Starting SMPP transport microservice");

    let service = Arc::new(SmppTransportService::new().await?);
    MicroserviceRuntime::run(service).await
}

pub struct SmppTransportService {
    config: ServiceConfig,
    transport: Arc<SmppTransport>,
    backend: Backend,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
    start_time: std::time::Instant,
}

impl SmppTransportService {
    pub async fn new() -> Result<Self> {
        let config = ServiceConfig::from_env()?;
        let transport_config = match std::env::var("SMPP_CONFIG_FILE") {
            Ok(path) => SmppTransportConfig::from_file(&path)?,
            Err(_) => SmppTransportConfig::from_env()?,
        };

        let backend = match &config.lumadb_url {
            Some(url) => {
                let mut pool_config = PoolConfig::from_env().map_err(|e| BrivasError::Config(e.to_string()))?;
                pool_config.url = url.clone();
                let pool = LumaDbPool::new(&pool_config).map_err(|e| BrivasError::Store(e.to_string()))?;
                let kv = LumaKv::new(pool);
                kv.ensure_schema()
                    .await
                    .map_err(|e| BrivasError::Store(e.to_string()))?;
                Backend::LumaDb(kv)
            }
            None => {
                warn!("LUMADB_URL not set, correlation state will not survive restarts");
                Backend::Memory(MemoryStore::new())
            }
        };

        let transport = SmppTransport::new(transport_config, backend.store(), Arc::new(LogPublisher))?;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        Ok(Self {
            config,
            transport: Arc::new(transport),
            backend,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            start_time: std::time::Instant::now(),
        })
    }
}

/// Where correlation state is kept
#[derive(Clone)]
enum Backend {
    LumaDb(LumaKv),
    Memory(MemoryStore),
}

impl Backend {
    fn store(&self) -> Arc<dyn KeyValueStore> {
        match self {
            Self::LumaDb(kv) => Arc::new(kv.clone()),
            Self::Memory(store) => Arc::new(store.clone()),
        }
    }

    /// Periodically drop expired keys
    async fn purge_loop(self) {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match &self {
                Self::LumaDb(kv) => match kv.purge_expired().await {
                    Ok(purged) => debug!(purged, "Purged expired LumaDB keys"),
                    Err(e) => warn!(error = %e, "Purging expired keys failed"),
                },
                Self::Memory(store) => {
                    let purged = store.purge_expired();
                    debug!(purged, "Purged expired in-memory keys");
                }
            }
        }
    }
}

#[derive(Clone)]
struct AppState {
    transport: Arc<SmppTransport>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
}

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let bound = state.transport.is_bound();
    let status = if bound {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "ready": bound })))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(state.transport.metrics().snapshot())
}

async fn enqueue(State(state): State<AppState>, Json(message): Json<OutboundMessage>) -> (StatusCode, Json<Value>) {
    let message_id = message.message_id.clone();
    match state.outbound_tx.send(message).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "message_id": message_id }))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "transport is shutting down" })),
        ),
    }
}

#[async_trait::async_trait]
impl BrivasService for SmppTransportService {
    fn service_id(&self) -> &'static str {
        "smpp-transport"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        let mut dependencies = vec![DependencyStatus::new("smsc", self.transport.is_bound())];
        if let Backend::LumaDb(kv) = &self.backend {
            dependencies.push(DependencyStatus::new("lumadb", kv.is_healthy().await));
        }
        ReadinessStatus::from_dependencies(dependencies)
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down SMPP transport");
        self.transport.stop().await;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or_else(|| BrivasError::Internal("transport already started".into()))?;
        self.transport.start(outbound_rx);
        tokio::spawn(self.backend.clone().purge_loop());

        let state = AppState {
            transport: self.transport.clone(),
            outbound_tx: self.outbound_tx.clone(),
        };
        let app = Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(metrics))
            .route("/outbound", post(enqueue))
            .with_state(state);

        let addr = self.config.http_addr()?;
        info!(http_addr = %addr, "Starting HTTP server");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
