//! Bind state machine for the single active SMPP session
//!
//! The session owns the writer of the current physical connection. The
//! connection driver attaches a writer on connect, feeds bind responses in,
//! and detaches on loss; everything else sends PDUs through the session.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, TransportError};
use crate::metrics::TransportMetrics;
use crate::pdu::{Bind, CommandId, CommandStatus, Pdu, PduBody, ShortMessage, INTERFACE_VERSION};
use crate::sequence::SequenceGenerator;
use crate::throttle::{AcceptanceGate, PauseReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindRole {
    #[default]
    Transceiver,
    Receiver,
    Transmitter,
}

/// What a bound session may do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_submit: bool,
    pub can_receive: bool,
}

impl BindRole {
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Transceiver => Capabilities {
                can_submit: true,
                can_receive: true,
            },
            Self::Transmitter => Capabilities {
                can_submit: true,
                can_receive: false,
            },
            Self::Receiver => Capabilities {
                can_submit: false,
                can_receive: true,
            },
        }
    }

    pub fn bind_command(&self) -> CommandId {
        match self {
            Self::Transceiver => CommandId::BindTransceiver,
            Self::Receiver => CommandId::BindReceiver,
            Self::Transmitter => CommandId::BindTransmitter,
        }
    }

    pub fn bind_resp_command(&self) -> CommandId {
        match self {
            Self::Transceiver => CommandId::BindTransceiverResp,
            Self::Receiver => CommandId::BindReceiverResp,
            Self::Transmitter => CommandId::BindTransmitterResp,
        }
    }

    /// Role of a bind request or bind response
    pub fn from_command(command: CommandId) -> Option<Self> {
        match command {
            CommandId::BindTransceiver | CommandId::BindTransceiverResp => Some(Self::Transceiver),
            CommandId::BindReceiver | CommandId::BindReceiverResp => Some(Self::Receiver),
            CommandId::BindTransmitter | CommandId::BindTransmitterResp => Some(Self::Transmitter),
            _ => None,
        }
    }
}

impl fmt::Display for BindRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transceiver => "transceiver",
            Self::Receiver => "receiver",
            Self::Transmitter => "transmitter",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BindRole {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "transceiver" | "trx" => Ok(Self::Transceiver),
            "receiver" | "rx" => Ok(Self::Receiver),
            "transmitter" | "tx" => Ok(Self::Transmitter),
            other => Err(TransportError::Config(format!("Unknown bind role {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Bound(BindRole),
    Stopped,
}

/// Credential triple and addressing sent with every bind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindCredentials {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

pub struct Session {
    role: BindRole,
    credentials: BindCredentials,
    state: watch::Sender<SessionState>,
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    sequence: SequenceGenerator,
    gate: AcceptanceGate,
    metrics: Arc<TransportMetrics>,
}

impl Session {
    pub fn new(
        role: BindRole,
        credentials: BindCredentials,
        sequence: SequenceGenerator,
        gate: AcceptanceGate,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        let (state, _rx) = watch::channel(SessionState::Disconnected);
        Self {
            role,
            credentials,
            state,
            writer: Mutex::new(None),
            sequence,
            gate,
            metrics,
        }
    }

    pub fn role(&self) -> BindRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state(), SessionState::Bound(_))
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SessionState::Stopped
    }

    /// Attach a new connection and start the bind handshake.
    ///
    /// Returns the sequence number of the bind request.
    #[instrument(skip(self, writer), fields(role = %self.role))]
    pub async fn connection_made(&self, writer: mpsc::UnboundedSender<Bytes>) -> Result<u32> {
        if self.is_stopped() {
            return Err(TransportError::ConnectionLost);
        }
        *self.writer.lock() = Some(writer);
        self.state.send_replace(SessionState::Connecting);
        self.gate.resume(PauseReason::Disconnected);

        let sequence_number = self.next_sequence().await?;
        let bind = Bind {
            system_id: self.credentials.system_id.clone(),
            password: self.credentials.password.clone(),
            system_type: self.credentials.system_type.clone(),
            interface_version: INTERFACE_VERSION,
            addr_ton: self.credentials.addr_ton,
            addr_npi: self.credentials.addr_npi,
            address_range: self.credentials.address_range.clone(),
        };
        info!(
            sequence_number,
            system_id = %self.credentials.system_id,
            "Sending bind request"
        );
        self.send(&Pdu::request(
            sequence_number,
            PduBody::Bind {
                role: self.role,
                bind,
            },
        ))?;
        Ok(sequence_number)
    }

    /// Apply the peer's bind response; true when it completed the handshake
    pub fn on_bind_resp(&self, status: CommandStatus, system_id: &str) -> Result<bool> {
        if !status.is_ok() {
            warn!(status = %status, "Bind rejected by peer");
            return Err(TransportError::BindRejected(status));
        }
        let changed = self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Bound(self.role);
                true
            } else {
                false
            }
        });
        if changed {
            info!(role = %self.role, peer = %system_id, "Session bound");
            self.metrics.bound.set_flag(true);
        } else {
            debug!(state = ?self.state(), "Ignoring bind response outside of bind handshake");
        }
        Ok(changed)
    }

    /// The connection is gone; close the gate before anything else
    pub fn connection_lost(&self) {
        self.gate.pause(PauseReason::Disconnected);
        self.writer.lock().take();
        self.metrics.bound.set_flag(false);
        self.state.send_if_modified(|state| {
            if *state == SessionState::Stopped || *state == SessionState::Disconnected {
                false
            } else {
                *state = SessionState::Disconnected;
                true
            }
        });
        info!("Session disconnected");
    }

    /// Terminal shutdown; sends unbind when a connection is attached
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.gate.pause(PauseReason::Disconnected);
        if self.writer.lock().is_some() {
            match self.next_sequence().await {
                Ok(sequence_number) => {
                    if let Err(e) = self.send(&Pdu::request(sequence_number, PduBody::Unbind)) {
                        debug!(error = %e, "Unbind not sent");
                    }
                }
                Err(e) => debug!(error = %e, "No sequence number for unbind"),
            }
        }
        self.writer.lock().take();
        self.metrics.bound.set_flag(false);
        self.state.send_replace(SessionState::Stopped);
        info!("Session stopped");
    }

    pub fn ensure_can_submit(&self) -> Result<()> {
        if self.role.capabilities().can_submit {
            Ok(())
        } else {
            Err(TransportError::RoleViolation {
                role: self.role,
                operation: "submit messages",
            })
        }
    }

    pub fn accepts_inbound(&self) -> bool {
        self.role.capabilities().can_receive
    }

    /// Wait until the session is bound; fails once it is stopped
    pub async fn wait_bound(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| matches!(s, SessionState::Bound(_) | SessionState::Stopped))
            .await
            .map_err(|_| TransportError::ConnectionLost)?;
        match state {
            SessionState::Bound(_) => Ok(()),
            _ => Err(TransportError::ConnectionLost),
        }
    }

    pub async fn next_sequence(&self) -> Result<u32> {
        Ok(self.sequence.next().await?)
    }

    /// Queue a PDU on the current connection
    pub fn send(&self, pdu: &Pdu) -> Result<()> {
        let frame = pdu.encode()?;
        let writer = self.writer.lock();
        let writer = writer.as_ref().ok_or(TransportError::ConnectionLost)?;
        writer.send(frame).map_err(|_| TransportError::ConnectionLost)
    }

    /// Send a submit_sm under an already allocated sequence number
    pub async fn submit(&self, sequence_number: u32, message: ShortMessage) -> Result<()> {
        self.ensure_can_submit()?;
        let pdu = Pdu::request(sequence_number, PduBody::SubmitSm(message));
        loop {
            self.wait_bound().await?;
            match self.send(&pdu) {
                // Lost between the bound check and the write; wait for the rebind
                Err(TransportError::ConnectionLost) if !self.is_stopped() => {
                    tokio::task::yield_now().await;
                    continue;
                }
                result => {
                    if result.is_ok() {
                        self.metrics.submitted_pdus.inc();
                    }
                    return result;
                }
            }
        }
    }

    pub async fn enquire_link(&self) -> Result<u32> {
        let sequence_number = self.next_sequence().await?;
        self.send(&Pdu::request(sequence_number, PduBody::EnquireLink))?;
        Ok(sequence_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::decode_frame;
    use crate::store::MemoryStore;
    use bytes::BytesMut;

    fn session(role: BindRole) -> (Session, AcceptanceGate) {
        let gate = AcceptanceGate::new();
        let session = Session::new(
            role,
            BindCredentials {
                system_id: "esme".into(),
                password: "secret".into(),
                ..Default::default()
            },
            SequenceGenerator::new(Arc::new(MemoryStore::new())),
            gate.clone(),
            Arc::new(TransportMetrics::new()),
        );
        (session, gate)
    }

    fn decode(frame: Bytes) -> Pdu {
        decode_frame(&mut BytesMut::from(&frame[..])).unwrap().unwrap()
    }

    #[test]
    fn test_role_capabilities() {
        assert_eq!(
            BindRole::Transceiver.capabilities(),
            Capabilities {
                can_submit: true,
                can_receive: true
            }
        );
        assert!(!BindRole::Transmitter.capabilities().can_receive);
        assert!(!BindRole::Receiver.capabilities().can_submit);
        assert_eq!("TX".parse::<BindRole>().unwrap(), BindRole::Transmitter);
    }

    #[tokio::test]
    async fn test_bind_handshake() {
        let (session, gate) = session(BindRole::Transmitter);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let seq = session.connection_made(tx).await.unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(gate.is_open());

        let bind = decode(rx.recv().await.unwrap());
        assert_eq!(bind.sequence_number, seq);
        match bind.body {
            PduBody::Bind { role, bind } => {
                assert_eq!(role, BindRole::Transmitter);
                assert_eq!(bind.system_id, "esme");
                assert_eq!(bind.password, "secret");
                assert_eq!(bind.interface_version, 0x34);
            }
            other => panic!("expected bind, got {:?}", other),
        }

        assert!(session.on_bind_resp(CommandStatus::ESME_ROK, "smsc").unwrap());
        assert_eq!(session.state(), SessionState::Bound(BindRole::Transmitter));

        // A repeated response is ignored
        assert!(!session.on_bind_resp(CommandStatus::ESME_ROK, "smsc").unwrap());
        assert_eq!(session.state(), SessionState::Bound(BindRole::Transmitter));
    }

    #[tokio::test]
    async fn test_rejected_bind_stays_connecting() {
        let (session, _gate) = session(BindRole::Transceiver);
        let (tx, _rx) = mpsc::unbounded_channel();
        session.connection_made(tx).await.unwrap();
        assert!(matches!(
            session.on_bind_resp(CommandStatus::ESME_RINVPASWD, ""),
            Err(TransportError::BindRejected(CommandStatus::ESME_RINVPASWD))
        ));
        assert!(!session.is_bound());
    }

    #[tokio::test]
    async fn test_connection_lost_closes_gate() {
        let (session, gate) = session(BindRole::Transceiver);
        let (tx, _rx) = mpsc::unbounded_channel();
        session.connection_made(tx).await.unwrap();
        session.on_bind_resp(CommandStatus::ESME_ROK, "").unwrap();

        session.connection_lost();
        assert!(!gate.is_open());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.send(&Pdu::request(1, PduBody::EnquireLink)),
            Err(TransportError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_receiver_cannot_submit() {
        let (session, _gate) = session(BindRole::Receiver);
        let err = session.submit(1, ShortMessage::default()).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::RoleViolation {
                role: BindRole::Receiver,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stop_sends_unbind() {
        let (session, _gate) = session(BindRole::Transceiver);
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.connection_made(tx).await.unwrap();
        session.on_bind_resp(CommandStatus::ESME_ROK, "").unwrap();
        rx.recv().await.unwrap();

        session.stop().await;
        assert_eq!(decode(rx.recv().await.unwrap()).body, PduBody::Unbind);
        assert!(session.is_stopped());
        assert!(matches!(session.wait_bound().await, Err(TransportError::ConnectionLost)));
    }
}
