//! Process lifecycle for service binaries
//!
//! A binary implements [`BrivasService`] and hands itself to
//! [`MicroserviceRuntime::run`], which serves until a stop signal arrives or
//! the service's own `start` returns, then shuts it down once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::{BrivasError, Result};

/// Liveness report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub service_id: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Readiness report; ready only when every dependency is available
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub dependencies: Vec<DependencyStatus>,
}

impl ReadinessStatus {
    pub fn from_dependencies(dependencies: Vec<DependencyStatus>) -> Self {
        Self {
            ready: dependencies.iter().all(|d| d.available),
            dependencies,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    pub latency_ms: Option<u64>,
}

impl DependencyStatus {
    pub fn new(name: impl Into<String>, available: bool) -> Self {
        Self {
            name: name.into(),
            available,
            latency_ms: None,
        }
    }
}

#[async_trait]
pub trait BrivasService: Send + Sync + 'static {
    fn service_id(&self) -> &'static str;

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    async fn health(&self) -> HealthStatus;

    async fn ready(&self) -> ReadinessStatus;

    /// Called exactly once by the runtime
    async fn shutdown(&self) -> Result<()>;

    /// Serve; returning early ends the process
    async fn start(&self) -> Result<()>;
}

pub struct MicroserviceRuntime;

impl MicroserviceRuntime {
    /// Serve until Ctrl-C or SIGTERM
    pub async fn run<S: BrivasService>(service: Arc<S>) -> Result<()> {
        Self::run_until(service, stop_signal()).await
    }

    /// Serve until `stop` resolves. An error from `start` is returned after
    /// the service has been shut down.
    pub async fn run_until<S, F>(service: Arc<S>, stop: F) -> Result<()>
    where
        S: BrivasService,
        F: Future<Output = ()> + Send,
    {
        let started = Instant::now();
        info!(service_id = service.service_id(), version = service.version(), "Service starting");

        let serving = service.clone();
        let mut task = tokio::spawn(async move { serving.start().await });

        let outcome = tokio::select! {
            _ = stop => {
                info!("Stop signal received");
                None
            }
            joined = &mut task => Some(joined),
        };

        if let Err(e) = service.shutdown().await {
            warn!(error = %e, "Shutdown did not complete cleanly");
        }

        let result = match outcome {
            None => {
                task.abort();
                Ok(())
            }
            Some(Ok(Ok(()))) => {
                info!("Service finished on its own");
                Ok(())
            }
            Some(Ok(Err(e))) => {
                error!(error = %e, "Service failed");
                Err(e)
            }
            Some(Err(e)) => Err(BrivasError::Internal(format!("service task ended abnormally: {}", e))),
        };

        info!(uptime_seconds = started.elapsed().as_secs(), "Service stopped");
        result
    }
}

async fn stop_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Idle {
        fail_start: bool,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl BrivasService for Idle {
        fn service_id(&self) -> &'static str {
            "idle"
        }

        async fn health(&self) -> HealthStatus {
            HealthStatus {
                healthy: true,
                service_id: self.service_id().into(),
                version: self.version().into(),
                uptime_seconds: 0,
            }
        }

        async fn ready(&self) -> ReadinessStatus {
            ReadinessStatus::from_dependencies(vec![])
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn start(&self) -> Result<()> {
            if self.fail_start {
                return Err(BrivasError::Config("missing endpoint".into()));
            }
            std::future::pending().await
        }
    }

    fn idle(fail_start: bool) -> Arc<Idle> {
        Arc::new(Idle {
            fail_start,
            shutdowns: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_stop_signal_shuts_down_once() {
        let service = idle(false);
        MicroserviceRuntime::run_until(service.clone(), async {}).await.unwrap();
        assert_eq!(service.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_failure_is_returned_after_shutdown() {
        let service = idle(true);
        let err = MicroserviceRuntime::run_until(service.clone(), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, BrivasError::Config(_)));
        assert_eq!(service.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_readiness_requires_every_dependency() {
        let status = ReadinessStatus::from_dependencies(vec![
            DependencyStatus::new("smsc", true),
            DependencyStatus::new("lumadb", false),
        ]);
        assert!(!status.ready);
        assert!(ReadinessStatus::from_dependencies(vec![DependencyStatus::new("smsc", true)]).ready);
    }
}
