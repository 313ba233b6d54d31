//! Resolution of submit_sm responses

use brivas_core::{FailureMessage, MessageId, OutboundMessage, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::MessagePublisher;
use crate::correlation::{CorrelationStore, SegmentResolution, Submission};
use crate::error::{Result, TransportError};
use crate::metrics::TransportMetrics;
use crate::outbound::OutboundPipeline;
use crate::pdu::CommandStatus;
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Success,
    Throttled,
    Failure,
}

impl SubmitOutcome {
    pub fn classify(status: CommandStatus) -> Self {
        match status {
            CommandStatus::ESME_ROK => Self::Success,
            CommandStatus::ESME_RTHROTTLED | CommandStatus::ESME_RMSGQFUL => Self::Throttled,
            _ => Self::Failure,
        }
    }
}

#[derive(Clone)]
pub struct ResponseDispatcher {
    correlation: CorrelationStore,
    publisher: Arc<dyn MessagePublisher>,
    throttle: Arc<Throttle>,
    pipeline: OutboundPipeline,
    throttle_delay: Duration,
    metrics: Arc<TransportMetrics>,
}

impl ResponseDispatcher {
    pub fn new(
        correlation: CorrelationStore,
        publisher: Arc<dyn MessagePublisher>,
        throttle: Arc<Throttle>,
        pipeline: OutboundPipeline,
        throttle_delay: Duration,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            correlation,
            publisher,
            throttle,
            pipeline,
            throttle_delay,
            metrics,
        }
    }

    /// Handle a submit_sm_resp (or generic_nack) for `sequence_number`
    #[instrument(skip(self, remote_id, status), fields(status = %status))]
    pub async fn handle_submit_sm_resp(
        &self,
        sequence_number: u32,
        remote_id: Option<String>,
        status: CommandStatus,
    ) -> Result<SubmitOutcome> {
        let Some((message_id, segment)) = self.correlation.get_sequence_segment(sequence_number).await? else {
            self.metrics.correlation_misses.inc();
            let err = TransportError::CorrelationUnknown(format!("sequence_number:{}", sequence_number));
            warn!(error = %err, "Correlation lost, dropping response");
            return Err(err);
        };

        let remote_id = remote_id.filter(|id| !id.is_empty());
        if let Some(remote_id) = &remote_id {
            self.correlation.set_remote_message_id(&message_id, remote_id).await?;
        }

        let outcome = SubmitOutcome::classify(status);
        match outcome {
            SubmitOutcome::Success => self.on_success(message_id, remote_id).await?,
            SubmitOutcome::Throttled => self.on_throttled(message_id, segment, status).await?,
            SubmitOutcome::Failure => self.on_failure(message_id, status).await?,
        }
        Ok(outcome)
    }

    /// Acks once every segment of the message has been accepted
    async fn on_success(&self, message_id: MessageId, remote_id: Option<String>) -> Result<()> {
        self.throttle.clear();
        match self.correlation.resolve_segment(&message_id).await? {
            SegmentResolution::Complete => {}
            SegmentResolution::Outstanding(remaining) => {
                debug!(message_id = %message_id, remaining, "Segment accepted");
                return Ok(());
            }
            SegmentResolution::Duplicate => {
                info!(message_id = %message_id, "Already acknowledged, not acking again");
                return Ok(());
            }
            SegmentResolution::Failed => {
                info!(message_id = %message_id, "Segment accepted after the message failed");
                return Ok(());
            }
        }

        if !self.correlation.delete_cached_message(&message_id).await? {
            debug!(message_id = %message_id, "No cached message left to clear");
        }
        self.metrics.acks.inc();
        self.publisher
            .publish_event(TransportEvent::Ack {
                user_message_id: message_id,
                sent_message_id: remote_id.unwrap_or_default(),
            })
            .await
    }

    async fn on_throttled(&self, message_id: MessageId, segment: usize, status: CommandStatus) -> Result<()> {
        self.metrics.throttled_responses.inc();
        warn!(
            message_id = %message_id,
            segment,
            error = %TransportError::TransientPeerRejection(status),
            "Submission throttled"
        );

        // Every path below releases the throttle after the delay
        let lookup = self.retry_target(&message_id).await;
        self.throttle.engage();

        let delay = self.throttle_delay;
        match lookup {
            Ok(Some((message, submission))) => {
                let pipeline = self.pipeline.clone();
                let metrics = self.metrics.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    metrics.retries.inc();
                    info!(message_id = %message.message_id, segment, "Retrying throttled message");
                    pipeline.handle_retry(message, segment, submission).await;
                });
                Ok(())
            }
            Ok(None) => {
                error!(message_id = %message_id, "Could not retrieve throttled message");
                self.clear_after(delay);
                Ok(())
            }
            Err(e) => {
                self.clear_after(delay);
                Err(e)
            }
        }
    }

    async fn retry_target(&self, message_id: &MessageId) -> Result<Option<(OutboundMessage, Option<Submission>)>> {
        let Some(message) = self.correlation.get_cached_message(message_id).await? else {
            return Ok(None);
        };
        let submission = self.correlation.get_submission(message_id).await?;
        Ok(Some((message, submission)))
    }

    fn clear_after(&self, delay: Duration) {
        let throttle = self.throttle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            throttle.clear();
        });
    }

    /// Nacks on the first rejected segment; later outcomes for the message are ignored
    async fn on_failure(&self, message_id: MessageId, status: CommandStatus) -> Result<()> {
        let reason = status.to_string();
        if !self.correlation.mark_failed(&message_id).await? {
            info!(message_id = %message_id, reason = %reason, "Already failed, not failing again");
            return Ok(());
        }
        let Some(message) = self.correlation.get_cached_message(&message_id).await? else {
            error!(message_id = %message_id, reason = %reason, "Could not retrieve failed message");
            return Ok(());
        };
        warn!(
            message_id = %message_id,
            error = %TransportError::PermanentPeerRejection(status),
            "Submission failed"
        );

        self.correlation.delete_cached_message(&message_id).await?;
        self.metrics.nacks.inc();
        self.publisher
            .publish_event(TransportEvent::Nack {
                user_message_id: message_id,
                nack_reason: reason.clone(),
            })
            .await?;
        self.publisher
            .publish_failure(FailureMessage {
                message: serde_json::to_value(&message)?,
                failure_code: None,
                reason,
            })
            .await
    }
}
