//! Publishing onto the message bus

use async_trait::async_trait;
use brivas_core::{BusMessage, FailureMessage, InboundMessage, TransportEvent};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Result, TransportError};

#[async_trait]
pub trait MessagePublisher: Send + Sync + 'static {
    /// ack, nack and delivery_report events
    async fn publish_event(&self, event: TransportEvent) -> Result<()>;

    async fn publish_message(&self, message: InboundMessage) -> Result<()>;

    async fn publish_failure(&self, failure: FailureMessage) -> Result<()>;
}

/// Forwards everything to an in-process channel
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, message: BusMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| TransportError::Bus("bus receiver dropped".into()))
    }
}

#[async_trait]
impl MessagePublisher for ChannelPublisher {
    async fn publish_event(&self, event: TransportEvent) -> Result<()> {
        self.forward(BusMessage::Event(event))
    }

    async fn publish_message(&self, message: InboundMessage) -> Result<()> {
        self.forward(BusMessage::Inbound(message))
    }

    async fn publish_failure(&self, failure: FailureMessage) -> Result<()> {
        self.forward(BusMessage::Failure(failure))
    }
}

/// Writes each bus message as a JSON log line
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

impl LogPublisher {
    fn emit(&self, message: &BusMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        info!(target: "bus", %payload, "Published");
        Ok(())
    }
}

#[async_trait]
impl MessagePublisher for LogPublisher {
    async fn publish_event(&self, event: TransportEvent) -> Result<()> {
        self.emit(&BusMessage::Event(event))
    }

    async fn publish_message(&self, message: InboundMessage) -> Result<()> {
        self.emit(&BusMessage::Inbound(message))
    }

    async fn publish_failure(&self, failure: FailureMessage) -> Result<()> {
        self.emit(&BusMessage::Failure(failure))
    }
}
