use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::address::Address;
use crate::config::TransportConfig;
use crate::driver::{DriverError, MediaDriver, Publication, Subscription, CONTROL_STREAM_ID};
use crate::envelope::InboundEnvelope;
use crate::error::Result;
use crate::event::TransportEvent;
use crate::inbound::InboundDispatcher;
use crate::transport::Transport;
use crate::udp::UdpDriver;

struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<InboundEnvelope>,
}

impl InboundDispatcher for ChannelDispatcher {
    fn dispatch(&self, envelope: &InboundEnvelope) {
        let _ = self.tx.send(envelope.clone());
    }
}

fn test_config(system: &str) -> TransportConfig {
    TransportConfig {
        system_name: system.to_owned(),
        hostname: "127.0.0.1".to_owned(),
        port: 0,
        handshake_timeout: Duration::from_secs(5),
        inject_handshake_interval: Duration::from_millis(50),
        system_message_resend_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

async fn start(
    config: TransportConfig,
) -> (Arc<Transport>, mpsc::UnboundedReceiver<InboundEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Transport::start(config, Arc::new(ChannelDispatcher { tx }))
        .await
        .expect("transport start");
    (transport, rx)
}

async fn recv_within(
    rx: &mut mpsc::UnboundedReceiver<InboundEnvelope>,
    duration: Duration,
) -> Option<InboundEnvelope> {
    timeout(duration, rx.recv()).await.ok().flatten()
}

#[tokio::test]
async fn test_auto_port_assignment() {
    let (transport, _rx) = start(test_config("auto-port")).await;
    let port = transport.local_address().address.port;
    assert!(port > 1024, "ephemeral port expected, got {port}");
    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handshake_and_first_message() {
    let (a, _a_rx) = start(test_config("a")).await;
    let (b, mut b_rx) = start(test_config("b")).await;
    let b_addr = b.local_address().address.clone();

    a.send(
        &b_addr,
        "/user/echo",
        Some("/user/pinger"),
        Bytes::from_static(b"hello"),
        "Text",
        9,
    )
    .await
    .unwrap();

    let delivered = recv_within(&mut b_rx, Duration::from_secs(5))
        .await
        .expect("first message after implicit handshake");
    assert_eq!(delivered.message, Bytes::from_static(b"hello"));
    assert_eq!(delivered.recipient.as_deref(), Some("/user/echo"));
    assert_eq!(delivered.sender.as_deref(), Some("/user/pinger"));
    assert_eq!(delivered.manifest, "Text");
    assert_eq!(delivered.serializer_id, 9);
    assert_eq!(delivered.originating_uid, a.local_address().uid);

    // the promise on A's side is fulfilled with B's UID
    let association = a.association(&b_addr).unwrap();
    let state = association.association_state();
    assert_eq!(state.uid(), Some(b.local_address().uid));

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_quarantine_stops_traffic_and_notifies_peer() {
    let (a, _a_rx) = start(test_config("a")).await;
    let (b, mut b_rx) = start(test_config("b")).await;
    let a_addr = a.local_address().address.clone();
    let b_addr = b.local_address().address.clone();
    let mut b_events = b.subscribe_events();

    a.send(&b_addr, "/user/echo", None, Bytes::from_static(b"m1"), "", 0)
        .await
        .unwrap();
    recv_within(&mut b_rx, Duration::from_secs(5))
        .await
        .expect("m1 before quarantine");

    a.quarantine(&b_addr, Some(b.local_address().uid), "test quarantine")
        .unwrap();

    a.send(&b_addr, "/user/echo", None, Bytes::from_static(b"m2"), "", 0)
        .await
        .unwrap();
    assert!(
        recv_within(&mut b_rx, Duration::from_millis(500)).await.is_none(),
        "messages to a quarantined incarnation must not be delivered"
    );

    // B observes that it has been quarantined by A
    let event = timeout(Duration::from_secs(5), async {
        loop {
            match b_events.recv().await {
                Ok(TransportEvent::ThisActorSystemQuarantined { local, remote }) => {
                    break (local, remote)
                }
                Ok(_) => continue,
                Err(err) => panic!("event stream ended: {err}"),
            }
        }
    })
    .await
    .expect("ThisActorSystemQuarantined event");
    assert_eq!(event.0, b_addr);
    assert_eq!(event.1, a_addr);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reincarnation_keeps_old_ban() {
    let (a, mut a_rx) = start(test_config("a")).await;
    let (b, mut b_rx) = start(test_config("b")).await;
    let a_addr = a.local_address().address.clone();
    let b_addr = b.local_address().address.clone();
    let first_uid = b.local_address().uid;

    a.send(&b_addr, "/user/echo", None, Bytes::from_static(b"m1"), "", 0)
        .await
        .unwrap();
    recv_within(&mut b_rx, Duration::from_secs(5)).await.expect("m1");

    a.quarantine(&b_addr, Some(first_uid), "gone").unwrap();

    // restart B on the same port with a fresh UID
    b.shutdown().await.unwrap();
    drop(b);
    drop(b_rx);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let (b2, _b2_rx) = start(TransportConfig {
        port: b_addr.port,
        ..test_config("b")
    })
    .await;
    assert_eq!(b2.local_address().address, b_addr);
    assert_ne!(b2.local_address().uid, first_uid);

    // the reincarnated peer reaches out, handing A its new UID
    b2.send(&a_addr, "/user/back", None, Bytes::from_static(b"hi"), "", 0)
        .await
        .unwrap();
    recv_within(&mut a_rx, Duration::from_secs(5))
        .await
        .expect("message from reincarnated peer");

    let state = a.association(&b_addr).unwrap().association_state();
    assert_eq!(state.incarnation, 2);
    assert_eq!(state.uid(), Some(b2.local_address().uid));
    assert!(
        state.is_quarantined(first_uid),
        "the old incarnation stays banned"
    );
    assert!(!state.unique_remote_address.is_pending());

    a.shutdown().await.unwrap();
    b2.shutdown().await.unwrap();
}

/// Deterministically drops every other control-stream frame.
struct LossyDriver {
    inner: Arc<dyn MediaDriver>,
    sent: Arc<AtomicUsize>,
}

#[async_trait]
impl MediaDriver for LossyDriver {
    fn local_port(&self) -> u16 {
        self.inner.local_port()
    }

    async fn add_publication(
        &self,
        remote: &Address,
        stream_id: u32,
    ) -> Result<Arc<dyn Publication>> {
        let publication = self.inner.add_publication(remote, stream_id).await?;
        if stream_id == CONTROL_STREAM_ID {
            Ok(Arc::new(LossyPublication {
                inner: publication,
                sent: Arc::clone(&self.sent),
            }))
        } else {
            Ok(publication)
        }
    }

    async fn add_subscription(&self, stream_id: u32) -> Result<Arc<dyn Subscription>> {
        self.inner.add_subscription(stream_id).await
    }

    fn poll_errors(&self) -> Vec<DriverError> {
        self.inner.poll_errors()
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

struct LossyPublication {
    inner: Arc<dyn Publication>,
    sent: Arc<AtomicUsize>,
}

#[async_trait]
impl Publication for LossyPublication {
    async fn offer(&self, frame: &[u8]) -> Result<()> {
        if self.sent.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            // swallowed by the wire
            return Ok(());
        }
        self.inner.offer(frame).await
    }
}

#[tokio::test]
async fn test_system_messages_survive_control_stream_loss() {
    let config_a = test_config("a");
    let udp = UdpDriver::bind("a", "127.0.0.1", 0).await.unwrap();
    let lossy = Arc::new(LossyDriver {
        inner: udp as Arc<dyn MediaDriver>,
        sent: Arc::new(AtomicUsize::new(0)),
    });
    let (tx, _a_rx) = mpsc::unbounded_channel();
    let a = Transport::start_with_driver(config_a, lossy, Arc::new(ChannelDispatcher { tx }))
        .await
        .unwrap();
    let (b, mut b_rx) = start(test_config("b")).await;
    let b_addr = b.local_address().address.clone();

    for i in 0..100u64 {
        a.send_system(&b_addr, Bytes::from(i.to_be_bytes().to_vec()))
            .await
            .unwrap();
    }

    let mut received = vec![];
    while received.len() < 100 {
        let envelope = recv_within(&mut b_rx, Duration::from_secs(20))
            .await
            .expect("system message despite 50% loss");
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&envelope.message);
        received.push(u64::from_be_bytes(raw));
    }
    // delivered to the dispatcher strictly in order, no gaps, no duplicates
    assert_eq!(received, (0..100).collect::<Vec<u64>>());

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_large_destinations_use_the_large_stream() {
    let mut config_a = test_config("a");
    config_a.large_message_destinations = vec!["/user/big/*".to_owned()];
    let mut config_b = test_config("b");
    config_b.large_message_destinations = vec!["/user/big/*".to_owned()];

    let (a, _a_rx) = start(config_a).await;
    let (b, mut b_rx) = start(config_b).await;
    let b_addr = b.local_address().address.clone();

    a.send(&b_addr, "/user/big/blob", None, Bytes::from_static(b"L"), "", 0)
        .await
        .unwrap();
    a.send(&b_addr, "/user/small", None, Bytes::from_static(b"S"), "", 0)
        .await
        .unwrap();

    let mut by_payload = std::collections::HashMap::new();
    for _ in 0..2 {
        let envelope = recv_within(&mut b_rx, Duration::from_secs(5))
            .await
            .expect("both messages");
        by_payload.insert(envelope.message.clone(), envelope.stream_id);
    }
    assert_eq!(
        by_payload.get(&Bytes::from_static(b"L")),
        Some(&crate::driver::LARGE_STREAM_ID)
    );
    assert_eq!(
        by_payload.get(&Bytes::from_static(b"S")),
        Some(&crate::driver::ORDINARY_STREAM_ID)
    );

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_compression_advertisement_lands_in_outbound_table() {
    let (a, _a_rx) = start(test_config("a")).await;
    let (b, mut b_rx) = start(test_config("b")).await;
    let a_addr = a.local_address().address.clone();
    let b_addr = b.local_address().address.clone();
    let mut a_events = a.subscribe_events();

    // handshake first, advertisements are gated like any control message
    a.send(&b_addr, "/user/echo", None, Bytes::from_static(b"m1"), "", 0)
        .await
        .unwrap();
    recv_within(&mut b_rx, Duration::from_secs(5)).await.expect("m1");

    // B advertises an id for a hot actor ref
    b.send_control(
        &a_addr,
        Box::new(crate::control::compression_advertisement::ActorRefCompressionAdvertisement {
            from: b.local_address().clone(),
            path: "/user/echo".to_owned(),
            id: 42,
        }),
    )
    .unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            match a_events.recv().await {
                Ok(TransportEvent::ActorRefCompressionAdvertised { path, id, .. }) => {
                    assert_eq!(path, "/user/echo");
                    assert_eq!(id, 42);
                    break;
                }
                Ok(_) => continue,
                Err(err) => panic!("event stream ended: {err}"),
            }
        }
    })
    .await
    .expect("advertisement event");

    let state = a.association(&b_addr).unwrap().association_state();
    assert_eq!(
        state.outbound_compression.compress_actor_ref("/user/echo"),
        Some(42)
    );

    // an advertisement claiming a third party's identity is discarded
    let spoofed = crate::address::UniqueAddress::new(Address::new("c", "127.0.0.1", 39999), 777);
    b.send_control(
        &a_addr,
        Box::new(crate::control::compression_advertisement::ActorRefCompressionAdvertisement {
            from: spoofed,
            path: "/user/poison".to_owned(),
            id: 13,
        }),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        a.registry().association_by_uid(777).is_none(),
        "the claimed identity must not gain an association"
    );
    while let Ok(event) = a_events.try_recv() {
        if let TransportEvent::ActorRefCompressionAdvertised { path, .. } = event {
            assert_ne!(path, "/user/poison", "spoofed mapping must not be recorded");
        }
    }
    let state = a.association(&b_addr).unwrap().association_state();
    assert_eq!(state.outbound_compression.compress_actor_ref("/user/poison"), None);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_budget_exhaustion_fails_the_transport() {
    let udp = UdpDriver::bind("a", "127.0.0.1", 0).await.unwrap();
    let driver = Arc::clone(&udp) as Arc<dyn MediaDriver>;
    let (tx, _rx) = mpsc::unbounded_channel();
    let a = Transport::start_with_driver(test_config("a"), driver, Arc::new(ChannelDispatcher { tx }))
        .await
        .unwrap();
    let mut events = a.subscribe_events();

    // kill the substrate underneath the transport; every poll now fails
    udp.close().await.unwrap();

    let mut control_restarts = 0;
    let failed = timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(TransportEvent::InboundPipelineRestarted { stream_id })
                    if stream_id == CONTROL_STREAM_ID =>
                {
                    control_restarts += 1;
                }
                Ok(TransportEvent::TransportFailed { .. }) => break true,
                Ok(_) => continue,
                Err(_) => break false,
            }
        }
    })
    .await
    .expect("transport failure within the restart window");
    assert!(failed, "restart budget exhaustion must surface TransportFailed");

    // whichever pipeline lost the race was stopped by the kill-switch; no
    // pipeline ever restarts more than max-restarts times
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            TransportEvent::InboundPipelineRestarted { stream_id: CONTROL_STREAM_ID }
        ) {
            control_restarts += 1;
        }
    }
    assert!(
        (1..=5).contains(&control_restarts),
        "restart budget must bound restarts, saw {control_restarts}"
    );

    a.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_quiesces() {
    let (a, _rx) = start(test_config("a")).await;
    let mut events = a.subscribe_events();

    a.shutdown().await.unwrap();
    a.shutdown().await.unwrap();
    assert!(a.is_shutdown());

    // the driver is gone, yet nothing restarts after shutdown
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut restarts = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            TransportEvent::InboundPipelineRestarted { .. }
                | TransportEvent::OutboundLaneRestarted { .. }
        ) {
            restarts += 1;
        }
    }
    assert_eq!(restarts, 0, "no pipeline restarts after shutdown");
}

#[tokio::test]
async fn test_send_after_shutdown_is_rejected() {
    let (a, _rx) = start(test_config("a")).await;
    a.shutdown().await.unwrap();
    let somewhere = Address::new("b", "127.0.0.1", 1);
    assert_eq!(
        a.send(&somewhere, "/user/x", None, Bytes::new(), "", 0)
            .await
            .err(),
        Some(crate::error::Error::ErrTransportShutdown)
    );
}
