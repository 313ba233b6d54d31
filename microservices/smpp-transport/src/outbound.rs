//! Outbound submission pipeline

use brivas_core::{OutboundMessage, SessionEvent};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::config::SubmitConfig;
use crate::correlation::{CorrelationStore, Submission};
use crate::encoding::encode_text;
use crate::error::{Result, TransportError};
use crate::fragment::fragment;
use crate::pdu::{tag, ShortMessage, Tlv};
use crate::session::Session;

/// ussd_service_op value for a network-bound USSD response
pub const USSD_OP_RESPONSE: u8 = 0x02;

/// its_session_info to send for a USSD reply.
///
/// The previous value arrives in the `session_info` metadata as four hex
/// digits; closing the session bumps it by one.
pub fn next_session_info(message: &OutboundMessage) -> Result<u16> {
    let previous = message.metadata_str("session_info").unwrap_or("0000");
    let value = u16::from_str_radix(previous, 16)
        .map_err(|_| TransportError::InvalidSessionInfo(previous.to_string()))?;
    if message.session_event == Some(SessionEvent::Close) {
        value
            .checked_add(1)
            .ok_or_else(|| TransportError::InvalidSessionInfo(previous.to_string()))
    } else {
        Ok(value)
    }
}

#[derive(Clone)]
pub struct OutboundPipeline {
    session: Arc<Session>,
    correlation: CorrelationStore,
    config: SubmitConfig,
}

impl OutboundPipeline {
    pub fn new(session: Arc<Session>, correlation: CorrelationStore, config: SubmitConfig) -> Self {
        Self {
            session,
            correlation,
            config,
        }
    }

    /// Submit a message from the bus; failures end here as log entries
    pub async fn handle_outbound(&self, message: OutboundMessage) {
        if let Err(e) = self.submit(&message).await {
            error!(message_id = %message.message_id, error = %e, "Failed to submit message");
        }
    }

    /// Returns the sequence numbers used, one per PDU
    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    pub async fn submit(&self, message: &OutboundMessage) -> Result<Vec<u32>> {
        self.session.ensure_can_submit()?;

        let reference = rand::random::<u16>();
        let parts = self.build(message, reference)?;

        // Cached before the first frame so even an immediate response finds it
        self.correlation.cache_message(message).await?;
        self.correlation
            .begin_submission(
                &message.message_id,
                Submission {
                    segments: parts.len(),
                    reference,
                },
            )
            .await?;

        let mut sequence_numbers = Vec::with_capacity(parts.len());
        for (segment, part) in parts.into_iter().enumerate() {
            sequence_numbers.push(self.send_segment(message, segment, part).await?);
        }
        debug!(?sequence_numbers, "Submitted");
        Ok(sequence_numbers)
    }

    /// Send one segment of an earlier submission again
    #[instrument(skip(self, message, submission), fields(message_id = %message.message_id))]
    pub async fn resubmit_segment(
        &self,
        message: &OutboundMessage,
        segment: usize,
        submission: Submission,
    ) -> Result<u32> {
        self.session.ensure_can_submit()?;

        let mut parts = self.build(message, submission.reference)?;
        if segment >= parts.len() {
            return Err(TransportError::UnknownSegment {
                segment,
                segments: parts.len(),
            });
        }
        let part = parts.swap_remove(segment);
        let sequence_number = self.send_segment(message, segment, part).await?;
        debug!(sequence_number, segment, "Resubmitted");
        Ok(sequence_number)
    }

    /// Retry after a throttled response. Only the throttled segment goes out
    /// again when the submission is still on record.
    pub async fn handle_retry(&self, message: OutboundMessage, segment: usize, submission: Option<Submission>) {
        let result = match submission {
            Some(submission) => self.resubmit_segment(&message, segment, submission).await.map(|_| ()),
            None => self.submit(&message).await.map(|_| ()),
        };
        if let Err(e) = result {
            error!(message_id = %message.message_id, segment, error = %e, "Failed to retry message");
        }
    }

    fn build(&self, message: &OutboundMessage, reference: u16) -> Result<Vec<ShortMessage>> {
        let template = self.template(message)?;
        let body = encode_text(message.content.as_deref().unwrap_or_default(), &self.config.encoding)?;
        fragment(
            &template,
            &body,
            self.config.fragmentation,
            self.config.csm_split_length,
            reference,
        )
    }

    async fn send_segment(&self, message: &OutboundMessage, segment: usize, part: ShortMessage) -> Result<u32> {
        let sequence_number = self.session.next_sequence().await?;
        self.correlation
            .set_sequence_segment(sequence_number, &message.message_id, segment)
            .await?;
        self.session.submit(sequence_number, part).await?;
        Ok(sequence_number)
    }

    fn template(&self, message: &OutboundMessage) -> Result<ShortMessage> {
        let mut template = ShortMessage {
            service_type: self.config.service_type.clone(),
            source_addr_ton: self.config.source_addr_ton,
            source_addr_npi: self.config.source_addr_npi,
            source_addr: message.from_addr.clone(),
            dest_addr_ton: self.config.dest_addr_ton,
            dest_addr_npi: self.config.dest_addr_npi,
            destination_addr: message.to_addr.clone(),
            registered_delivery: self.config.registered_delivery,
            data_coding: self.config.data_coding,
            short_message: Bytes::new(),
            ..Default::default()
        };

        if message.transport_type.is_session_oriented() {
            let session_info = next_session_info(message)?;
            template.optional_parameters.extend([
                Tlv::u8(tag::USSD_SERVICE_OP, USSD_OP_RESPONSE),
                Tlv::u16(tag::ITS_SESSION_INFO, session_info),
            ]);
        }
        Ok(template)
    }
}
