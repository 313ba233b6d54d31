//! Transport error taxonomy

use brivas_core::BrivasError;
use thiserror::Error;

use crate::pdu::{CodecError, CommandStatus};
use crate::session::BindRole;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Correlation entry missing or expired; the work is abandoned
    #[error("No correlation for {0}")]
    CorrelationUnknown(String),

    #[error("Peer throttled submission: {0}")]
    TransientPeerRejection(CommandStatus),

    #[error("Peer rejected submission: {0}")]
    PermanentPeerRejection(CommandStatus),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Content cannot be represented: {0}")]
    UnencodableContent(String),

    #[error("A {role} session cannot {operation}")]
    RoleViolation {
        role: BindRole,
        operation: &'static str,
    },

    #[error("Message needs {segments} segments, at most 255 are allowed")]
    MessageTooLong { segments: usize },

    /// A retry named a segment the message no longer splits into
    #[error("Segment {segment} out of range for a {segments}-segment message")]
    UnknownSegment { segment: usize, segments: usize },

    #[error("Invalid session_info {0:?}")]
    InvalidSessionInfo(String),

    #[error("Bind rejected with {0}")]
    BindRejected(CommandStatus),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<TransportError> for BrivasError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Store(e) => BrivasError::Store(e.to_string()),
            TransportError::Bus(e) => BrivasError::Bus(e),
            TransportError::Config(e) => BrivasError::Config(e),
            TransportError::Serialization(e) => BrivasError::Serialization(e),
            TransportError::Io(e) => BrivasError::Network(e.to_string()),
            TransportError::ConnectionLost => BrivasError::Unavailable("SMPP session not bound".into()),
            e @ (TransportError::UnencodableContent(_)
            | TransportError::RoleViolation { .. }
            | TransportError::MessageTooLong { .. }
            | TransportError::InvalidSessionInfo(_)) => BrivasError::Validation(e.to_string()),
            e => BrivasError::Protocol(e.to_string()),
        }
    }
}
