//! One SMPP transport instance: wiring and lifecycle

use brivas_core::OutboundMessage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::MessagePublisher;
use crate::config::SmppTransportConfig;
use crate::connection::{ConnectionDriver, DriverSettings};
use crate::correlation::CorrelationStore;
use crate::dispatcher::ResponseDispatcher;
use crate::error::Result;
use crate::inbound::InboundHandler;
use crate::metrics::TransportMetrics;
use crate::outbound::OutboundPipeline;
use crate::sequence::SequenceGenerator;
use crate::session::Session;
use crate::store::{KeyValueStore, NamespacedStore};
use crate::throttle::{AcceptanceGate, Throttle};

const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SmppTransport {
    config: SmppTransportConfig,
    session: Arc<Session>,
    gate: AcceptanceGate,
    throttle: Arc<Throttle>,
    correlation: CorrelationStore,
    pipeline: OutboundPipeline,
    dispatcher: ResponseDispatcher,
    inbound: InboundHandler,
    metrics: Arc<TransportMetrics>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SmppTransport {
    /// Assemble a transport; `store` is namespaced for this instance here
    pub fn new(
        config: SmppTransportConfig,
        store: Arc<dyn KeyValueStore>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn KeyValueStore> = Arc::new(NamespacedStore::new(store, config.namespace()));
        let metrics = Arc::new(TransportMetrics::new());
        let gate = AcceptanceGate::new();
        let throttle = Arc::new(Throttle::new(gate.clone(), metrics.clone()));
        let correlation = CorrelationStore::new(store.clone(), config.ttl.correlation_ttls());

        let session = Arc::new(Session::new(
            config.bind.role,
            config.bind.credentials(),
            SequenceGenerator::new(store),
            gate.clone(),
            metrics.clone(),
        ));
        let pipeline = OutboundPipeline::new(session.clone(), correlation.clone(), config.submit.clone());
        let dispatcher = ResponseDispatcher::new(
            correlation.clone(),
            publisher.clone(),
            throttle.clone(),
            pipeline.clone(),
            config.throttle_delay(),
            metrics.clone(),
        );
        let inbound = InboundHandler::new(
            config.transport_name.clone(),
            correlation.clone(),
            publisher,
            config.inbound.clone(),
            metrics.clone(),
        );
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            session,
            gate,
            throttle,
            correlation,
            pipeline,
            dispatcher,
            inbound,
            metrics,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the connection driver and the bus consumer
    pub fn start(&self, outbound: mpsc::Receiver<OutboundMessage>) {
        info!(
            transport = %self.config.transport_name,
            endpoint = %self.config.endpoint,
            role = %self.config.bind.role,
            namespace = %self.config.namespace(),
            "Starting SMPP transport"
        );

        let driver = ConnectionDriver::new(
            DriverSettings {
                endpoint: self.config.endpoint.clone(),
                connect_timeout: self.config.connect_timeout(),
                enquire_link_interval: self.config.enquire_link_interval(),
                reconnect: self.config.reconnect,
            },
            self.session.clone(),
            self.dispatcher.clone(),
            self.inbound.clone(),
            self.metrics.clone(),
        );
        let driver_task = tokio::spawn(driver.run(self.shutdown.subscribe()));

        let consumer_task = tokio::spawn(consume(
            outbound,
            self.gate.clone(),
            self.pipeline.clone(),
            self.shutdown.subscribe(),
        ));

        self.tasks.lock().extend([driver_task, consumer_task]);
    }

    /// Unbind, stop the background tasks and wait for them to finish
    pub async fn stop(&self) {
        self.session.stop().await;
        self.shutdown.send_replace(true);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await.is_err() {
                debug!("Task did not stop in time");
            }
        }
        info!(transport = %self.config.transport_name, "SMPP transport stopped");
    }

    pub fn config(&self) -> &SmppTransportConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn gate(&self) -> &AcceptanceGate {
        &self.gate
    }

    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }

    pub fn correlation(&self) -> &CorrelationStore {
        &self.correlation
    }

    pub fn pipeline(&self) -> &OutboundPipeline {
        &self.pipeline
    }

    pub fn dispatcher(&self) -> &ResponseDispatcher {
        &self.dispatcher
    }

    pub fn inbound(&self) -> &InboundHandler {
        &self.inbound
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        &self.metrics
    }

    pub fn is_bound(&self) -> bool {
        self.session.is_bound()
    }
}

/// Take bus messages one at a time, only while the gate is open
async fn consume(
    mut outbound: mpsc::Receiver<OutboundMessage>,
    gate: AcceptanceGate,
    pipeline: OutboundPipeline,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = gate.wait_open() => {}
            _ = shutdown.changed() => break,
        }
        let message = tokio::select! {
            message = outbound.recv() => message,
            _ = shutdown.changed() => break,
        };
        match message {
            Some(message) => pipeline.handle_outbound(message).await,
            None => break,
        }
    }
    debug!("Outbound consumer stopped");
}
