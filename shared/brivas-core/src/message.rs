//! Message shapes exchanged between transports and the message bus

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{DeliveryStatus, MessageId, SessionEvent, Timestamp, TransportType};

/// A message the bus hands to a transport for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: MessageId,
    pub to_addr: String,
    pub from_addr: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub transport_type: TransportType,
    #[serde(default)]
    pub session_event: Option<SessionEvent>,
    #[serde(default)]
    pub transport_metadata: Map<String, Value>,
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl OutboundMessage {
    pub fn new(
        message_id: impl Into<MessageId>,
        to_addr: impl Into<String>,
        from_addr: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            to_addr: to_addr.into(),
            from_addr: from_addr.into(),
            content: Some(content.into()),
            transport_type: TransportType::Sms,
            session_event: None,
            transport_metadata: Map::new(),
            timestamp: Timestamp::now(),
        }
    }

    /// Mark the message as session-oriented traffic
    pub fn with_session(mut self, event: SessionEvent) -> Self {
        self.transport_type = TransportType::Ussd;
        self.session_event = Some(event);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.transport_metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.transport_metadata.get(key).and_then(Value::as_str)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// A message received from the network, republished onto the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub to_addr: String,
    pub from_addr: String,
    pub content: Option<String>,
    pub transport_name: String,
    pub transport_type: TransportType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_event: Option<SessionEvent>,
    #[serde(default)]
    pub transport_metadata: Map<String, Value>,
    pub timestamp: Timestamp,
}

/// Events about previously submitted outbound messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TransportEvent {
    Ack {
        user_message_id: MessageId,
        sent_message_id: String,
    },
    Nack {
        user_message_id: MessageId,
        nack_reason: String,
    },
    DeliveryReport {
        user_message_id: MessageId,
        delivery_status: DeliveryStatus,
    },
}

impl TransportEvent {
    pub fn user_message_id(&self) -> &MessageId {
        match self {
            Self::Ack { user_message_id, .. }
            | Self::Nack { user_message_id, .. }
            | Self::DeliveryReport { user_message_id, .. } => user_message_id,
        }
    }
}

/// Record published on the failure channel for permanently failed submissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMessage {
    pub message: Value,
    pub failure_code: Option<String>,
    pub reason: String,
}

/// Anything a transport puts on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "snake_case")]
pub enum BusMessage {
    Inbound(InboundMessage),
    Event(TransportEvent),
    Failure(FailureMessage),
}
