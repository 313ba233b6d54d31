//! Connection driver: connect, bind, route frames, reconnect
//!
//! One task per transport instance. Each physical connection gets a writer
//! task fed by the session; frames read from the socket are handled in
//! arrival order on the driver task itself.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::ResponseDispatcher;
use crate::error::{Result, TransportError};
use crate::inbound::InboundHandler;
use crate::metrics::TransportMetrics;
use crate::pdu::{decode_frame, CodecError, CommandStatus, Pdu, PduBody};
use crate::reconnect::{Backoff, ReconnectPolicy};
use crate::session::Session;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Time allowed for queued frames (such as a final unbind) to reach the socket
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What the driver does after handling a PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Bind handshake completed
    Bound,
    /// Peer ended the session
    Close,
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub enquire_link_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

#[derive(Clone)]
pub struct ConnectionDriver {
    settings: DriverSettings,
    session: Arc<Session>,
    dispatcher: ResponseDispatcher,
    inbound: InboundHandler,
    metrics: Arc<TransportMetrics>,
}

impl ConnectionDriver {
    pub fn new(
        settings: DriverSettings,
        session: Arc<Session>,
        dispatcher: ResponseDispatcher,
        inbound: InboundHandler,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            settings,
            session,
            dispatcher,
            inbound,
            metrics,
        }
    }

    /// Keep a bound session alive until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.settings.reconnect.backoff();
        let mut connected_before = false;

        while !self.stopping(&shutdown) {
            match self.connect().await {
                Ok(stream) => {
                    if connected_before {
                        self.metrics.reconnects.inc();
                    }
                    connected_before = true;
                    match self.serve(stream, &mut shutdown, &mut backoff).await {
                        Ok(()) => info!(endpoint = %self.settings.endpoint, "Connection closed"),
                        Err(e) => warn!(endpoint = %self.settings.endpoint, error = %e, "Connection lost"),
                    }
                }
                Err(e) => warn!(endpoint = %self.settings.endpoint, error = %e, "Connect failed"),
            }

            if self.stopping(&shutdown) {
                break;
            }
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, attempt = backoff.failure_count(), "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Connection driver stopped");
    }

    fn stopping(&self, shutdown: &watch::Receiver<bool>) -> bool {
        *shutdown.borrow() || self.session.is_stopped()
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = timeout(self.settings.connect_timeout, TcpStream::connect(&self.settings.endpoint))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    #[instrument(skip_all, fields(endpoint = %self.settings.endpoint))]
    async fn serve(
        &self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    warn!(error = %e, "Write failed");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let result = self.read_loop(&mut reader, tx, shutdown, backoff).await;

        // Drops the session's sender, letting the writer drain and exit
        self.session.connection_lost();
        if timeout(WRITER_DRAIN_TIMEOUT, writer_task).await.is_err() {
            debug!("Writer did not drain in time");
        }
        result
    }

    async fn read_loop(
        &self,
        reader: &mut tokio::net::tcp::OwnedReadHalf,
        tx: mpsc::UnboundedSender<Bytes>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<()> {
        self.session.connection_made(tx).await?;

        let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut ticker = tokio::time::interval(self.settings.enquire_link_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            loop {
                let pdu = match decode_frame(&mut buffer) {
                    Ok(Some(pdu)) => pdu,
                    Ok(None) => break,
                    Err(CodecError::UnknownCommand {
                        command_id,
                        sequence_number,
                    }) => {
                        warn!(sequence_number, "Unknown command 0x{:08x}", command_id);
                        self.session.send(&Pdu::response(
                            sequence_number,
                            CommandStatus::ESME_RINVCMDID,
                            PduBody::GenericNack,
                        ))?;
                        continue;
                    }
                    Err(e @ CodecError::Truncated(_)) => {
                        warn!(error = %e, "Discarding malformed PDU");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                match self.handle_pdu(pdu).await? {
                    Flow::Continue => {}
                    Flow::Bound => backoff.reset(),
                    Flow::Close => return Ok(()),
                }
            }

            tokio::select! {
                read = reader.read_buf(&mut buffer) => {
                    if read? == 0 {
                        return Err(TransportError::ConnectionLost);
                    }
                }
                _ = ticker.tick() => {
                    if self.session.is_bound() {
                        self.session.enquire_link().await?;
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Route one PDU read from the peer
    pub async fn handle_pdu(&self, pdu: Pdu) -> Result<Flow> {
        let sequence_number = pdu.sequence_number;
        let status = pdu.command_status;
        match pdu.body {
            PduBody::BindResp { system_id, .. } => {
                if self.session.on_bind_resp(status, &system_id)? {
                    Ok(Flow::Bound)
                } else {
                    Ok(Flow::Continue)
                }
            }
            PduBody::SubmitSmResp { message_id } => {
                self.resolve_submission(sequence_number, message_id, status).await;
                Ok(Flow::Continue)
            }
            PduBody::GenericNack => {
                self.resolve_submission(sequence_number, None, status).await;
                Ok(Flow::Continue)
            }
            PduBody::DeliverSm(sm) => {
                let status = if self.session.accepts_inbound() {
                    if let Err(e) = self.inbound.handle_deliver_sm(&sm).await {
                        error!(sequence_number, error = %e, "Failed to handle deliver_sm");
                    }
                    CommandStatus::ESME_ROK
                } else {
                    warn!(
                        role = %self.session.role(),
                        sequence_number,
                        "Ignoring deliver_sm on a session that cannot receive"
                    );
                    CommandStatus::ESME_RINVBNDSTS
                };
                self.session
                    .send(&Pdu::response(sequence_number, status, PduBody::DeliverSmResp))?;
                Ok(Flow::Continue)
            }
            PduBody::EnquireLink => {
                self.session.send(&Pdu::response(
                    sequence_number,
                    CommandStatus::ESME_ROK,
                    PduBody::EnquireLinkResp,
                ))?;
                Ok(Flow::Continue)
            }
            PduBody::EnquireLinkResp | PduBody::DeliverSmResp => {
                debug!(sequence_number, "Response received");
                Ok(Flow::Continue)
            }
            PduBody::Unbind => {
                info!("Peer requested unbind");
                self.session.send(&Pdu::response(
                    sequence_number,
                    CommandStatus::ESME_ROK,
                    PduBody::UnbindResp,
                ))?;
                Ok(Flow::Close)
            }
            PduBody::UnbindResp => Ok(Flow::Close),
            PduBody::Bind { .. } | PduBody::SubmitSm(_) => {
                warn!(sequence_number, "Peer sent a request only an SMSC accepts");
                self.session.send(&Pdu::response(
                    sequence_number,
                    CommandStatus::ESME_RINVCMDID,
                    PduBody::GenericNack,
                ))?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn resolve_submission(&self, sequence_number: u32, remote_id: Option<String>, status: CommandStatus) {
        match self
            .dispatcher
            .handle_submit_sm_resp(sequence_number, remote_id, status)
            .await
        {
            Ok(outcome) => debug!(sequence_number, ?outcome, "Submission resolved"),
            // Already logged by the dispatcher
            Err(TransportError::CorrelationUnknown(_)) => {}
            Err(e) => error!(sequence_number, error = %e, "Failed to resolve submission"),
        }
    }
}
