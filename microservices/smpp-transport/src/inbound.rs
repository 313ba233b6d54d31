//! deliver_sm handling: delivery reports and mobile-originated messages

use brivas_core::{
    DeliveryStatus, InboundMessage, MessageId, SessionEvent, Timestamp, TransportEvent, TransportType,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::MessagePublisher;
use crate::config::InboundConfig;
use crate::correlation::CorrelationStore;
use crate::encoding::{decode_short_message, DecodedContent};
use crate::error::Result;
use crate::metrics::TransportMetrics;
use crate::pdu::{tag, ShortMessage, ESM_CLASS_DELIVERY_RECEIPT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub remote_id: String,
    pub status: DeliveryStatus,
    /// State as the peer reported it
    pub state: String,
}

/// Recognizes delivery receipts and extracts their outcome
pub struct DeliveryReportProcessor;

impl DeliveryReportProcessor {
    /// Map a receipt `stat:` value
    pub fn status_from_text(state: &str) -> DeliveryStatus {
        match state.to_ascii_uppercase().as_str() {
            "DELIVRD" => DeliveryStatus::Delivered,
            "EXPIRED" | "DELETED" | "UNDELIV" | "REJECTD" => DeliveryStatus::Failed,
            "ENROUTE" | "ACCEPTD" | "UNKNOWN" => DeliveryStatus::Pending,
            other => {
                debug!(state = other, "Unrecognized receipt state, treating as pending");
                DeliveryStatus::Pending
            }
        }
    }

    /// Map a `message_state` optional parameter
    pub fn status_from_message_state(state: u8) -> (DeliveryStatus, &'static str) {
        match state {
            1 => (DeliveryStatus::Pending, "ENROUTE"),
            2 => (DeliveryStatus::Delivered, "DELIVRD"),
            3 => (DeliveryStatus::Failed, "EXPIRED"),
            4 => (DeliveryStatus::Failed, "DELETED"),
            5 => (DeliveryStatus::Failed, "UNDELIV"),
            6 => (DeliveryStatus::Pending, "ACCEPTD"),
            8 => (DeliveryStatus::Failed, "REJECTD"),
            _ => (DeliveryStatus::Pending, "UNKNOWN"),
        }
    }

    /// Whether the PDU is meant to be a receipt, parsable or not
    pub fn looks_like_receipt(sm: &ShortMessage) -> bool {
        sm.esm_class & ESM_CLASS_DELIVERY_RECEIPT != 0
            || sm.tlv(tag::RECEIPTED_MESSAGE_ID).is_some()
            || Self::parse_receipt_text(&sm.payload()).is_some()
    }

    pub fn parse(sm: &ShortMessage) -> Option<DeliveryReport> {
        let receipted = sm.tlv(tag::RECEIPTED_MESSAGE_ID).map(|t| t.as_cstring());
        let state = sm.tlv(tag::MESSAGE_STATE).and_then(|t| t.as_u8());
        if let (Some(remote_id), Some(state)) = (receipted.clone(), state) {
            let (status, name) = Self::status_from_message_state(state);
            return Some(DeliveryReport {
                remote_id,
                status,
                state: name.to_string(),
            });
        }

        let (text_id, stat) = Self::parse_receipt_text(&sm.payload())?;
        Some(DeliveryReport {
            remote_id: receipted.unwrap_or(text_id),
            status: Self::status_from_text(&stat),
            state: stat,
        })
    }

    /// `id:<id> sub:001 dlvrd:001 submit date:... done date:... stat:DELIVRD err:000 text:...`
    fn parse_receipt_text(body: &[u8]) -> Option<(String, String)> {
        let text = std::str::from_utf8(body).ok()?;
        let mut id = None;
        let mut stat = None;
        for token in text.split_ascii_whitespace() {
            let Some((key, value)) = token.split_once(':') else {
                continue;
            };
            match key.to_ascii_lowercase().as_str() {
                "id" if id.is_none() => id = Some(value.to_string()),
                "stat" if stat.is_none() => stat = Some(value.to_string()),
                "text" => break,
                _ => {}
            }
        }
        match (id, stat) {
            (Some(id), Some(stat)) if !id.is_empty() => Some((id, stat)),
            _ => None,
        }
    }
}

/// Session-oriented (USSD) aspects of a mobile-originated message
pub struct ShortMessageProcessor;

impl ShortMessageProcessor {
    pub fn session_event(service_op: u8) -> SessionEvent {
        match service_op {
            0x01 => SessionEvent::New,
            0x12 => SessionEvent::Resume,
            0x81 => SessionEvent::Close,
            _ => SessionEvent::Resume,
        }
    }

    /// USSD event and `session_info` metadata, when the PDU is USSD traffic
    pub fn ussd(sm: &ShortMessage) -> Option<(SessionEvent, Option<String>)> {
        let service_op = sm.tlv(tag::USSD_SERVICE_OP)?.as_u8()?;
        let session_info = sm
            .tlv(tag::ITS_SESSION_INFO)
            .and_then(|t| t.as_u16())
            .map(|info| format!("{:04x}", info));
        Some((Self::session_event(service_op), session_info))
    }
}

#[derive(Clone)]
pub struct InboundHandler {
    transport_name: String,
    correlation: CorrelationStore,
    publisher: Arc<dyn MessagePublisher>,
    config: InboundConfig,
    metrics: Arc<TransportMetrics>,
}

impl InboundHandler {
    pub fn new(
        transport_name: impl Into<String>,
        correlation: CorrelationStore,
        publisher: Arc<dyn MessagePublisher>,
        config: InboundConfig,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            transport_name: transport_name.into(),
            correlation,
            publisher,
            config,
            metrics,
        }
    }

    pub async fn handle_deliver_sm(&self, sm: &ShortMessage) -> Result<()> {
        if let Some(report) = DeliveryReportProcessor::parse(sm) {
            self.handle_delivery_report(report).await?;
            return Ok(());
        }
        if DeliveryReportProcessor::looks_like_receipt(sm) {
            warn!(source_addr = %sm.source_addr, "Unparsable delivery receipt dropped");
            return Ok(());
        }
        self.handle_raw_inbound(sm).await
    }

    /// Returns whether an event was published
    pub async fn handle_delivery_report(&self, report: DeliveryReport) -> Result<bool> {
        let Some(message_id) = self.correlation.get_internal_message_id(&report.remote_id).await? else {
            self.metrics.correlation_misses.inc();
            warn!(
                remote_id = %report.remote_id,
                state = %report.state,
                "Failed to retrieve message id for delivery report"
            );
            return Ok(false);
        };

        info!(
            message_id = %message_id,
            remote_id = %report.remote_id,
            status = %report.status,
            "Delivery report"
        );
        self.metrics.delivery_reports.inc();
        self.publisher
            .publish_event(TransportEvent::DeliveryReport {
                user_message_id: message_id,
                delivery_status: report.status,
            })
            .await?;
        Ok(true)
    }

    pub async fn handle_raw_inbound(&self, sm: &ShortMessage) -> Result<()> {
        let body = sm.payload();
        let mut metadata = Map::new();

        let content = match decode_short_message(
            &body,
            sm.data_coding,
            &self.config.default_encoding,
            self.config.undecodable_content,
        ) {
            Ok(DecodedContent::Text(text)) => text,
            Ok(DecodedContent::Hex(hex)) => {
                metadata.insert("content_encoding".into(), Value::from("hex"));
                metadata.insert("data_coding".into(), Value::from(sm.data_coding));
                hex
            }
            Err(e) => {
                warn!(
                    source_addr = %sm.source_addr,
                    data_coding = sm.data_coding,
                    error = %e,
                    "Dropping inbound message"
                );
                return Ok(());
            }
        };

        let (transport_type, session_event) = match ShortMessageProcessor::ussd(sm) {
            Some((event, session_info)) => {
                if let Some(info) = session_info {
                    metadata.insert("session_info".into(), Value::from(info));
                }
                (TransportType::Ussd, Some(event))
            }
            None => (TransportType::Sms, None),
        };

        let message = InboundMessage {
            message_id: MessageId::generate(),
            to_addr: sm.destination_addr.clone(),
            from_addr: sm.source_addr.clone(),
            content: Some(content),
            transport_name: self.transport_name.clone(),
            transport_type,
            session_event,
            transport_metadata: metadata,
            timestamp: Timestamp::now(),
        };
        debug!(message_id = %message.message_id, from = %message.from_addr, "Inbound message");
        self.metrics.inbound_messages.inc();
        self.publisher.publish_message(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::Tlv;
    use bytes::Bytes;

    fn receipt(text: &str) -> ShortMessage {
        ShortMessage {
            esm_class: ESM_CLASS_DELIVERY_RECEIPT,
            short_message: Bytes::copy_from_slice(text.as_bytes()),
            ..Default::default()
        }
    }

    #[test]
    fn test_text_receipt() {
        let sm = receipt(
            "id:P1 sub:001 dlvrd:001 submit date:2401011200 done date:2401011201 stat:DELIVRD err:000 text:hi",
        );
        let report = DeliveryReportProcessor::parse(&sm).unwrap();
        assert_eq!(report.remote_id, "P1");
        assert_eq!(report.status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_tlv_receipt_wins() {
        let sm = ShortMessage {
            optional_parameters: vec![
                Tlv::cstring(tag::RECEIPTED_MESSAGE_ID, "P9"),
                Tlv::u8(tag::MESSAGE_STATE, 5),
            ],
            ..receipt("id:OTHER stat:DELIVRD")
        };
        let report = DeliveryReportProcessor::parse(&sm).unwrap();
        assert_eq!(report.remote_id, "P9");
        assert_eq!(report.status, DeliveryStatus::Failed);
        assert_eq!(report.state, "UNDELIV");
    }

    #[test]
    fn test_status_mapping() {
        for (state, status) in [
            ("DELIVRD", DeliveryStatus::Delivered),
            ("EXPIRED", DeliveryStatus::Failed),
            ("DELETED", DeliveryStatus::Failed),
            ("UNDELIV", DeliveryStatus::Failed),
            ("REJECTD", DeliveryStatus::Failed),
            ("ENROUTE", DeliveryStatus::Pending),
            ("ACCEPTD", DeliveryStatus::Pending),
            ("UNKNOWN", DeliveryStatus::Pending),
        ] {
            assert_eq!(DeliveryReportProcessor::status_from_text(state), status, "{}", state);
        }
        assert_eq!(DeliveryReportProcessor::status_from_message_state(2).0, DeliveryStatus::Delivered);
        assert_eq!(DeliveryReportProcessor::status_from_message_state(8).0, DeliveryStatus::Failed);
        assert_eq!(DeliveryReportProcessor::status_from_message_state(6).0, DeliveryStatus::Pending);
    }

    #[test]
    fn test_plain_text_is_not_a_receipt() {
        let sm = ShortMessage {
            short_message: Bytes::from_static(b"hello there: how are you"),
            ..Default::default()
        };
        assert!(DeliveryReportProcessor::parse(&sm).is_none());
        assert!(!DeliveryReportProcessor::looks_like_receipt(&sm));
    }

    #[test]
    fn test_ussd_session_mapping() {
        let sm = ShortMessage {
            optional_parameters: vec![
                Tlv::u8(tag::USSD_SERVICE_OP, 0x01),
                Tlv::u16(tag::ITS_SESSION_INFO, 0x1a),
            ],
            ..Default::default()
        };
        assert_eq!(
            ShortMessageProcessor::ussd(&sm),
            Some((SessionEvent::New, Some("001a".to_string())))
        );
        assert_eq!(ShortMessageProcessor::session_event(0x12), SessionEvent::Resume);
        assert_eq!(ShortMessageProcessor::session_event(0x81), SessionEvent::Close);
        assert_eq!(ShortMessageProcessor::session_event(0x33), SessionEvent::Resume);
        assert_eq!(ShortMessageProcessor::ussd(&ShortMessage::default()), None);
    }
}
