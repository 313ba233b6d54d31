//! Submission and delivery flows against a bound session
//!
//! The session is attached to an in-memory writer instead of a socket, so
//! every frame the transport emits can be decoded and inspected.

use brivas_core::{BusMessage, DeliveryStatus, MessageId, OutboundMessage, SessionEvent, TransportEvent, TransportType};
use bytes::{Bytes, BytesMut};
use smpp_transport::config::BindConfig;
use smpp_transport::connection::{ConnectionDriver, DriverSettings, Flow};
use smpp_transport::pdu::{decode_frame, tag, CommandStatus, Pdu, PduBody, ShortMessage, Tlv, ESM_CLASS_DELIVERY_RECEIPT};
use smpp_transport::{
    BindRole, ChannelPublisher, FragmentationStrategy, MemoryStore, PauseReason, SmppTransport, SmppTransportConfig,
    SubmitOutcome, TransportError,
};
use async_trait::async_trait;
use smpp_transport::store::{KeyValueStore, StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{timeout, Instant};

struct Harness {
    transport: SmppTransport,
    bus: UnboundedReceiver<BusMessage>,
    wire: UnboundedReceiver<Bytes>,
}

fn config(role: BindRole) -> SmppTransportConfig {
    SmppTransportConfig {
        transport_name: "sms_out".into(),
        bind: BindConfig {
            system_id: "esme".into(),
            password: "secret".into(),
            role,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn bound(config: SmppTransportConfig) -> Harness {
    let (publisher, bus) = ChannelPublisher::new();
    let transport = SmppTransport::new(config, Arc::new(MemoryStore::new()), Arc::new(publisher)).unwrap();

    let (tx, mut wire) = mpsc::unbounded_channel();
    transport.session().connection_made(tx).await.unwrap();
    assert!(matches!(next_pdu(&mut wire).await.body, PduBody::Bind { .. }));
    assert!(transport.session().on_bind_resp(CommandStatus::ESME_ROK, "smsc").unwrap());

    Harness { transport, bus, wire }
}

async fn next_pdu(wire: &mut UnboundedReceiver<Bytes>) -> Pdu {
    let frame = timeout(Duration::from_secs(5), wire.recv())
        .await
        .expect("no frame written")
        .expect("writer closed");
    decode_frame(&mut BytesMut::from(&frame[..])).unwrap().unwrap()
}

fn submitted(pdu: Pdu) -> ShortMessage {
    match pdu.body {
        PduBody::SubmitSm(sm) => sm,
        other => panic!("expected submit_sm, got {:?}", other),
    }
}

fn driver(transport: &SmppTransport) -> ConnectionDriver {
    ConnectionDriver::new(
        DriverSettings {
            endpoint: transport.config().endpoint.clone(),
            connect_timeout: transport.config().connect_timeout(),
            enquire_link_interval: transport.config().enquire_link_interval(),
            reconnect: transport.config().reconnect,
        },
        transport.session().clone(),
        transport.dispatcher().clone(),
        transport.inbound().clone(),
        transport.metrics().clone(),
    )
}

fn receipt(remote_id: &str, stat: &str) -> ShortMessage {
    let text = format!(
        "id:{} sub:001 dlvrd:001 submit date:2401011200 done date:2401011201 stat:{} err:000 text:hello",
        remote_id, stat
    );
    ShortMessage {
        source_addr: "27831234567".into(),
        destination_addr: "12345".into(),
        esm_class: ESM_CLASS_DELIVERY_RECEIPT,
        short_message: Bytes::from(text),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_successful_submit_acks_and_clears_cache() {
    let mut h = bound(config(BindRole::Transceiver)).await;
    let msg = OutboundMessage::new("M1", "27831234567", "12345", "hello");

    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    assert_eq!(seqs.len(), 1);
    let pdu = next_pdu(&mut h.wire).await;
    assert_eq!(pdu.sequence_number, seqs[0]);
    let sm = submitted(pdu);
    assert_eq!(&sm.short_message[..], b"hello");
    assert_eq!(sm.destination_addr, "27831234567");
    assert_eq!(sm.registered_delivery, 1);

    let outcome = h
        .transport
        .dispatcher()
        .handle_submit_sm_resp(seqs[0], Some("P1".into()), CommandStatus::ESME_ROK)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Success);

    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::Ack {
            user_message_id: MessageId::new("M1"),
            sent_message_id: "P1".into(),
        })
    );
    let correlation = h.transport.correlation();
    assert!(correlation.get_cached_message(&msg.message_id).await.unwrap().is_none());
    assert_eq!(
        correlation.get_internal_message_id("P1").await.unwrap(),
        Some(MessageId::new("M1"))
    );

    // The receipt for the acked message resolves through the remote id
    h.transport.inbound().handle_deliver_sm(&receipt("P1", "DELIVRD")).await.unwrap();
    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::DeliveryReport {
            user_message_id: MessageId::new("M1"),
            delivery_status: DeliveryStatus::Delivered,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_throttled_submit_is_retried_after_delay() {
    let mut h = bound(config(BindRole::Transceiver)).await;
    let msg = OutboundMessage::new("M2", "27831234567", "12345", "hello");

    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    next_pdu(&mut h.wire).await;

    let throttled_at = Instant::now();
    let outcome = h
        .transport
        .dispatcher()
        .handle_submit_sm_resp(seqs[0], None, CommandStatus::ESME_RTHROTTLED)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Throttled);
    assert!(h.transport.throttle().is_engaged());
    assert!(h.transport.gate().is_paused_for(PauseReason::Throttled));
    assert!(h.bus.try_recv().is_err());

    let retry = next_pdu(&mut h.wire).await;
    assert!(throttled_at.elapsed() >= Duration::from_millis(100));
    assert_ne!(retry.sequence_number, seqs[0]);
    assert_eq!(&submitted(retry.clone()).short_message[..], b"hello");
    assert_eq!(h.transport.metrics().retries.get(), 1);

    h.transport
        .dispatcher()
        .handle_submit_sm_resp(retry.sequence_number, Some("P2".into()), CommandStatus::ESME_ROK)
        .await
        .unwrap();
    assert!(!h.transport.throttle().is_engaged());
    assert!(h.transport.gate().is_open());
    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::Ack {
            user_message_id: MessageId::new("M2"),
            sent_message_id: "P2".into(),
        })
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.wire.try_recv().is_err());
    assert!(h.bus.try_recv().is_err());
}

#[tokio::test]
async fn test_rejected_submit_publishes_nack_and_failure() {
    let mut h = bound(config(BindRole::Transmitter)).await;
    let msg = OutboundMessage::new("M3", "27831234567", "12345", "hello");

    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    next_pdu(&mut h.wire).await;

    let outcome = h
        .transport
        .dispatcher()
        .handle_submit_sm_resp(seqs[0], None, CommandStatus::ESME_RINVMSGLEN)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Failure);

    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::Nack {
            user_message_id: MessageId::new("M3"),
            nack_reason: "ESME_RINVMSGLEN".into(),
        })
    );
    match h.bus.recv().await.unwrap() {
        BusMessage::Failure(failure) => {
            assert_eq!(failure.reason, "ESME_RINVMSGLEN");
            assert_eq!(failure.message["message_id"], "M3");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(h
        .transport
        .correlation()
        .get_cached_message(&msg.message_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_generic_nack_resolves_submission() {
    let mut h = bound(config(BindRole::Transceiver)).await;
    let msg = OutboundMessage::new("M4", "27831234567", "12345", "hello");
    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    next_pdu(&mut h.wire).await;

    let flow = driver(&h.transport)
        .handle_pdu(Pdu::response(seqs[0], CommandStatus::ESME_RSYSERR, PduBody::GenericNack))
        .await
        .unwrap();
    assert_eq!(flow, Flow::Continue);
    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::Nack {
            user_message_id: MessageId::new("M4"),
            nack_reason: "ESME_RSYSERR".into(),
        })
    );
}

#[tokio::test]
async fn test_unknown_sequence_number_is_reported() {
    let mut h = bound(config(BindRole::Transceiver)).await;
    let err = h
        .transport
        .dispatcher()
        .handle_submit_sm_resp(4242, Some("P9".into()), CommandStatus::ESME_ROK)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::CorrelationUnknown(_)));
    assert!(h.bus.try_recv().is_err());
    assert!(h.transport.correlation().get_internal_message_id("P9").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_sequence_correlation_is_absent() {
    let mut config = config(BindRole::Transceiver);
    config.ttl.sequence_secs = 0;
    let mut h = bound(config).await;

    let msg = OutboundMessage::new("M5", "27831234567", "12345", "hello");
    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    next_pdu(&mut h.wire).await;

    let err = h
        .transport
        .dispatcher()
        .handle_submit_sm_resp(seqs[0], Some("P5".into()), CommandStatus::ESME_ROK)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::CorrelationUnknown(_)));
    assert!(h.bus.try_recv().is_err());
}

#[tokio::test]
async fn test_receipt_for_unknown_message_publishes_nothing() {
    let mut h = bound(config(BindRole::Transceiver)).await;
    h.transport
        .inbound()
        .handle_deliver_sm(&receipt("never-sent", "DELIVRD"))
        .await
        .unwrap();
    assert!(h.bus.try_recv().is_err());
    assert_eq!(h.transport.metrics().correlation_misses.get(), 1);
}

#[tokio::test]
async fn test_sar_segments_ack_once_all_accepted() {
    let mut config = config(BindRole::Transceiver);
    config.submit.fragmentation = FragmentationStrategy::Sar;
    config.submit.csm_split_length = 10;
    let mut h = bound(config).await;

    let msg = OutboundMessage::new("M6", "27831234567", "12345", "abcdefghijklmnopqrstuvwxy");
    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    assert_eq!(seqs.len(), 3);

    let mut body = Vec::new();
    let mut reference = None;
    for (i, seq) in seqs.iter().enumerate() {
        let pdu = next_pdu(&mut h.wire).await;
        assert_eq!(pdu.sequence_number, *seq);
        let sm = submitted(pdu);
        assert_eq!(sm.tlv(tag::SAR_TOTAL_SEGMENTS).and_then(Tlv::as_u8), Some(3));
        assert_eq!(sm.tlv(tag::SAR_SEGMENT_SEQNUM).and_then(Tlv::as_u8), Some(i as u8 + 1));
        let ref_num = sm.tlv(tag::SAR_MSG_REF_NUM).and_then(Tlv::as_u16);
        assert!(ref_num.is_some());
        assert!(reference.is_none() || reference == ref_num);
        reference = ref_num;
        body.extend_from_slice(&sm.short_message);
    }
    assert_eq!(body, b"abcdefghijklmnopqrstuvwxy");

    for (i, seq) in seqs.iter().enumerate() {
        h.transport
            .dispatcher()
            .handle_submit_sm_resp(*seq, Some(format!("P6-{}", i)), CommandStatus::ESME_ROK)
            .await
            .unwrap();
        if i < 2 {
            assert!(h.bus.try_recv().is_err());
        }
    }
    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::Ack {
            user_message_id: MessageId::new("M6"),
            sent_message_id: "P6-2".into(),
        })
    );
    assert!(h.bus.try_recv().is_err());
    assert_eq!(h.transport.metrics().acks.get(), 1);

    // Every segment's remote id maps back for delivery reports
    for i in 0..3 {
        assert_eq!(
            h.transport
                .correlation()
                .get_internal_message_id(&format!("P6-{}", i))
                .await
                .unwrap(),
            Some(MessageId::new("M6"))
        );
    }
}

#[tokio::test]
async fn test_receiver_cannot_submit() {
    let (publisher, _bus) = ChannelPublisher::new();
    let transport = SmppTransport::new(
        config(BindRole::Receiver),
        Arc::new(MemoryStore::new()),
        Arc::new(publisher),
    )
    .unwrap();

    let msg = OutboundMessage::new("M7", "27831234567", "12345", "hello");
    let err = transport.pipeline().submit(&msg).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::RoleViolation {
            role: BindRole::Receiver,
            ..
        }
    ));
    assert!(transport
        .correlation()
        .get_cached_message(&msg.message_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_ussd_close_bumps_session_info() {
    let mut h = bound(config(BindRole::Transceiver)).await;
    let msg = OutboundMessage::new("M8", "27831234567", "*120#", "Goodbye")
        .with_session(SessionEvent::Close)
        .with_metadata("session_info", "000a");

    h.transport.pipeline().submit(&msg).await.unwrap();
    let sm = submitted(next_pdu(&mut h.wire).await);
    assert_eq!(sm.tlv(tag::ITS_SESSION_INFO).and_then(Tlv::as_u16), Some(0x000b));
    assert_eq!(sm.tlv(tag::USSD_SERVICE_OP).and_then(Tlv::as_u8), Some(0x02));
}

#[tokio::test]
async fn test_mobile_originated_ussd_is_published() {
    let mut h = bound(config(BindRole::Transceiver)).await;
    let deliver = ShortMessage {
        source_addr: "27831234567".into(),
        destination_addr: "*120#".into(),
        short_message: Bytes::from_static(b"1"),
        optional_parameters: vec![
            Tlv::u8(tag::USSD_SERVICE_OP, 0x01),
            Tlv::u16(tag::ITS_SESSION_INFO, 0x0005),
        ],
        ..Default::default()
    };

    let flow = driver(&h.transport)
        .handle_pdu(Pdu::request(77, PduBody::DeliverSm(deliver)))
        .await
        .unwrap();
    assert_eq!(flow, Flow::Continue);

    let resp = next_pdu(&mut h.wire).await;
    assert_eq!(resp.sequence_number, 77);
    assert_eq!(resp.body, PduBody::DeliverSmResp);
    assert_eq!(resp.command_status, CommandStatus::ESME_ROK);

    match h.bus.recv().await.unwrap() {
        BusMessage::Inbound(message) => {
            assert_eq!(message.content.as_deref(), Some("1"));
            assert_eq!(message.from_addr, "27831234567");
            assert_eq!(message.transport_name, "sms_out");
            assert_eq!(message.transport_type, TransportType::Ussd);
            assert_eq!(message.session_event, Some(SessionEvent::New));
            assert_eq!(message.transport_metadata["session_info"], "0005");
        }
        other => panic!("expected inbound message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transmitter_refuses_deliver_sm() {
    let mut h = bound(config(BindRole::Transmitter)).await;
    let deliver = ShortMessage {
        source_addr: "27831234567".into(),
        short_message: Bytes::from_static(b"hi"),
        ..Default::default()
    };

    driver(&h.transport)
        .handle_pdu(Pdu::request(78, PduBody::DeliverSm(deliver)))
        .await
        .unwrap();
    let resp = next_pdu(&mut h.wire).await;
    assert_eq!(resp.command_status, CommandStatus::ESME_RINVBNDSTS);
    assert!(h.bus.try_recv().is_err());
}

fn sar(csm_split_length: usize) -> SmppTransportConfig {
    let mut config = config(BindRole::Transceiver);
    config.submit.fragmentation = FragmentationStrategy::Sar;
    config.submit.csm_split_length = csm_split_length;
    config
}

fn uncached() -> SmppTransportConfig {
    let mut config = config(BindRole::Transceiver);
    config.ttl.cached_message_secs = 0;
    config
}

/// Memory store whose cached-message reads can be made to fail
struct FlakyStore {
    inner: MemoryStore,
    fail_message_reads: AtomicBool,
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        if key.contains(":message:") && self.fail_message_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.inner.incr(key).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_throttled_sar_message_resends_only_throttled_segments() {
    let mut h = bound(sar(10)).await;
    let msg = OutboundMessage::new("M7", "27831234567", "12345", "abcdefghijklmnopqrstuvwxy");
    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    assert_eq!(seqs.len(), 3);
    let mut reference = None;
    for _ in 0..3 {
        let sm = submitted(next_pdu(&mut h.wire).await);
        reference = sm.tlv(tag::SAR_MSG_REF_NUM).and_then(Tlv::as_u16);
    }

    for seq in &seqs {
        let outcome = h
            .transport
            .dispatcher()
            .handle_submit_sm_resp(*seq, None, CommandStatus::ESME_RTHROTTLED)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Throttled);
    }
    assert!(h.transport.throttle().is_engaged());

    let mut resent = Vec::new();
    for _ in 0..3 {
        let pdu = next_pdu(&mut h.wire).await;
        let sm = submitted(pdu.clone());
        assert_eq!(sm.tlv(tag::SAR_MSG_REF_NUM).and_then(Tlv::as_u16), reference);
        resent.push((sm.tlv(tag::SAR_SEGMENT_SEQNUM).and_then(Tlv::as_u8), pdu.sequence_number));
    }
    resent.sort();
    assert_eq!(
        resent.iter().map(|(segment, _)| *segment).collect::<Vec<_>>(),
        vec![Some(1), Some(2), Some(3)]
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.wire.try_recv().is_err());
    assert_eq!(h.transport.metrics().retries.get(), 3);
    assert_eq!(h.transport.metrics().submitted_pdus.get(), 6);

    for (i, (_, seq)) in resent.iter().enumerate() {
        h.transport
            .dispatcher()
            .handle_submit_sm_resp(*seq, Some(format!("P7-{}", i)), CommandStatus::ESME_ROK)
            .await
            .unwrap();
    }
    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::Ack {
            user_message_id: MessageId::new("M7"),
            sent_message_id: "P7-2".into(),
        })
    );
    assert!(h.bus.try_recv().is_err());
    assert_eq!(h.transport.metrics().acks.get(), 1);
    assert!(h.transport.gate().is_open());
}

#[tokio::test]
async fn test_ack_does_not_depend_on_cached_message() {
    let mut h = bound(uncached()).await;
    let msg = OutboundMessage::new("M8", "27831234567", "12345", "hello");
    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    next_pdu(&mut h.wire).await;
    assert!(h
        .transport
        .correlation()
        .get_cached_message(&msg.message_id)
        .await
        .unwrap()
        .is_none());

    h.transport
        .dispatcher()
        .handle_submit_sm_resp(seqs[0], Some("P8".into()), CommandStatus::ESME_ROK)
        .await
        .unwrap();
    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::Ack {
            user_message_id: MessageId::new("M8"),
            sent_message_id: "P8".into(),
        })
    );
    assert_eq!(h.transport.metrics().acks.get(), 1);
}

#[tokio::test]
async fn test_sar_segment_failure_after_partial_success_nacks() {
    let mut h = bound(sar(10)).await;
    let msg = OutboundMessage::new("M9", "27831234567", "12345", "abcdefghijklmnopqrstuvwxy");
    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    for _ in 0..3 {
        next_pdu(&mut h.wire).await;
    }
    let dispatcher = h.transport.dispatcher();

    dispatcher
        .handle_submit_sm_resp(seqs[0], Some("P9-0".into()), CommandStatus::ESME_ROK)
        .await
        .unwrap();
    assert!(h.bus.try_recv().is_err());

    let outcome = dispatcher
        .handle_submit_sm_resp(seqs[1], None, CommandStatus::ESME_RINVMSGLEN)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Failure);
    assert_eq!(
        h.bus.recv().await.unwrap(),
        BusMessage::Event(TransportEvent::Nack {
            user_message_id: MessageId::new("M9"),
            nack_reason: "ESME_RINVMSGLEN".into(),
        })
    );
    match h.bus.recv().await.unwrap() {
        BusMessage::Failure(failure) => assert_eq!(failure.message["message_id"], "M9"),
        other => panic!("expected failure, got {:?}", other),
    }

    dispatcher
        .handle_submit_sm_resp(seqs[2], Some("P9-2".into()), CommandStatus::ESME_ROK)
        .await
        .unwrap();
    assert!(h.bus.try_recv().is_err());
    assert_eq!(h.transport.metrics().acks.get(), 0);
    assert_eq!(h.transport.metrics().nacks.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_without_cached_message_clears_after_delay() {
    let mut h = bound(uncached()).await;
    let msg = OutboundMessage::new("M10", "27831234567", "12345", "hello");
    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    next_pdu(&mut h.wire).await;

    let outcome = h
        .transport
        .dispatcher()
        .handle_submit_sm_resp(seqs[0], None, CommandStatus::ESME_RMSGQFUL)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Throttled);
    assert!(h.transport.throttle().is_engaged());
    assert!(h.transport.gate().is_paused_for(PauseReason::Throttled));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!h.transport.throttle().is_engaged());
    assert!(h.transport.gate().is_open());
    assert!(h.wire.try_recv().is_err());
    assert!(h.bus.try_recv().is_err());
    assert_eq!(h.transport.metrics().retries.get(), 0);
}

#[tokio::test]
async fn test_failure_without_cached_message_publishes_nothing() {
    let mut h = bound(uncached()).await;
    let msg = OutboundMessage::new("M11", "27831234567", "12345", "hello");
    let seqs = h.transport.pipeline().submit(&msg).await.unwrap();
    next_pdu(&mut h.wire).await;

    let outcome = h
        .transport
        .dispatcher()
        .handle_submit_sm_resp(seqs[0], None, CommandStatus::ESME_RINVDSTADR)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Failure);
    assert!(h.bus.try_recv().is_err());
    assert_eq!(h.transport.metrics().nacks.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_released_when_cache_lookup_fails() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        fail_message_reads: AtomicBool::new(false),
    });
    let (publisher, mut bus) = ChannelPublisher::new();
    let transport =
        SmppTransport::new(config(BindRole::Transceiver), store.clone(), Arc::new(publisher)).unwrap();
    let (tx, mut wire) = mpsc::unbounded_channel();
    transport.session().connection_made(tx).await.unwrap();
    next_pdu(&mut wire).await;
    transport.session().on_bind_resp(CommandStatus::ESME_ROK, "smsc").unwrap();

    let msg = OutboundMessage::new("M12", "27831234567", "12345", "hello");
    let seqs = transport.pipeline().submit(&msg).await.unwrap();
    next_pdu(&mut wire).await;

    store.fail_message_reads.store(true, Ordering::SeqCst);
    let err = transport
        .dispatcher()
        .handle_submit_sm_resp(seqs[0], None, CommandStatus::ESME_RTHROTTLED)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Store(_)));
    assert!(transport.throttle().is_engaged());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!transport.throttle().is_engaged());
    assert!(transport.gate().is_open());
    assert!(wire.try_recv().is_err());
    assert!(bus.try_recv().is_err());
}

#[tokio::test]
async fn test_bind_resp_outside_handshake_keeps_flow() {
    let h = bound(config(BindRole::Transceiver)).await;
    let flow = driver(&h.transport)
        .handle_pdu(Pdu::response(
            77,
            CommandStatus::ESME_ROK,
            PduBody::BindResp {
                role: BindRole::Transceiver,
                system_id: "smsc".into(),
            },
        ))
        .await
        .unwrap();
    assert_eq!(flow, Flow::Continue);
    assert!(h.transport.session().is_bound());
}
