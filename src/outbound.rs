use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::sync::{broadcast, mpsc};

use crate::address::{Address, UniqueAddress};
use crate::association::state::AssociationState;
use crate::association::Association;
use crate::compression::{
    NoOutboundCompression, OutboundCompression, OutboundCompressionTable,
};
use crate::config::TransportConfig;
use crate::control::handshake::HandshakeReq;
use crate::control::ControlMessage;
use crate::delivery::SystemMessageDelivery;
use crate::driver::{MediaDriver, Publication, CONTROL_STREAM_ID, LARGE_STREAM_ID};
use crate::envelope::OutboundEnvelope;
use crate::error::{Error, Result};
use crate::event::TransportEvent;
use crate::frame;
use crate::inbound::ControlJunction;
use crate::pool::{EnvelopeBufferPool, ObjectPool, MAX_FRAME_SIZE, MAX_LARGE_FRAME_SIZE};
use crate::restart::RestartCounter;
use crate::wildcard::WildcardMatcher;

/// What the outbound side of an association exposes to pipeline stages.
pub trait OutboundContext: Send + Sync {
    fn local_address(&self) -> &UniqueAddress;
    fn remote_address(&self) -> &Address;
    fn association_state(&self) -> Arc<AssociationState>;
    fn quarantine(&self, reason: &str);
    fn send_control(&self, message: Box<dyn ControlMessage>);
    /// Where inbound stages hand over received control messages.
    fn control_subject(&self) -> Arc<ControlJunction>;
}

/// Everything an outbound lane needs from the transport, shared by all
/// associations.
pub(crate) struct OutboundSetup {
    pub(crate) config: Arc<TransportConfig>,
    pub(crate) driver: Arc<dyn MediaDriver>,
    pub(crate) local: UniqueAddress,
    pub(crate) events: broadcast::Sender<TransportEvent>,
    pub(crate) kill: broadcast::Sender<()>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) large_matcher: Arc<WildcardMatcher>,
    pub(crate) junction: Arc<ControlJunction>,
    pub(crate) envelope_pool: Arc<ObjectPool<OutboundEnvelope>>,
    pub(crate) frame_pool: Arc<EnvelopeBufferPool>,
    pub(crate) large_frame_pool: Arc<EnvelopeBufferPool>,
}

impl OutboundSetup {
    pub(crate) fn publish(&self, event: TransportEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn is_large_destination(&self, path: &str) -> bool {
        !self.large_matcher.is_empty() && self.large_matcher.matches(path)
    }

    pub(crate) fn fresh_outbound_compression(&self) -> Arc<dyn OutboundCompression> {
        if self.config.compression_enabled {
            OutboundCompressionTable::new()
        } else {
            Arc::new(NoOutboundCompression)
        }
    }
}

/// Work items on the control lane.
pub(crate) enum ControlItem {
    /// Unsequenced transport-protocol message.
    Message(Box<dyn ControlMessage>),
    /// System message payload, sequenced by the delivery buffer.
    System(Bytes),
}

/// Acknowledgements routed from the inbound control stage to the delivery
/// buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AckEvent {
    Ack(u64),
    Nack(u64),
}

/// Drives one ordinary or large lane until the kill-switch, the queue
/// closing, or a failure.
pub(crate) async fn run_message_lane(
    association: &Arc<Association>,
    stream_id: u32,
    rx: &mut mpsc::Receiver<OutboundEnvelope>,
) -> Result<()> {
    let setup = association.setup();
    let name = association.log_name();
    let publication = setup
        .driver
        .add_publication(association.remote_address(), stream_id)
        .await?;
    let (pool, max_frame) = if stream_id == LARGE_STREAM_ID {
        (&setup.large_frame_pool, MAX_LARGE_FRAME_SIZE)
    } else {
        (&setup.frame_pool, MAX_FRAME_SIZE)
    };
    let mut kill_rx = setup.kill.subscribe();

    log::debug!("[{}] outbound lane {} entered", name, stream_id);
    loop {
        let envelope = tokio::select! {
            _ = kill_rx.recv() => return Ok(()),
            envelope = rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => return Ok(()),
            },
        };

        // hold the envelope until the peer UID is known
        let peer = match association
            .wait_handshake(setup.config.handshake_timeout)
            .await
        {
            Ok(peer) => peer,
            Err(err) => {
                setup.envelope_pool.release(envelope);
                return Err(err);
            }
        };

        let state = association.association_state();
        if state.is_quarantined(peer.uid) {
            log::debug!("[{}] dropping message to quarantined {}", name, peer);
            setup.envelope_pool.release(envelope);
            continue;
        }

        let mut buf = pool.acquire().await;
        let encoded = frame::encode(
            &mut buf,
            setup.local.uid,
            &envelope,
            state.outbound_compression.as_ref(),
            max_frame,
        );
        setup.envelope_pool.release(envelope);
        match encoded {
            Ok(_) => {
                if let Err(err) = offer_frame(setup, &publication, &buf, name).await {
                    pool.release(buf);
                    return Err(err);
                }
                pool.release(buf);
            }
            Err(err) => {
                log::warn!("[{}] failed to encode envelope, dropping: {}", name, err);
                pool.release(buf);
            }
        }
    }
}

/// Drives the control lane: protocol messages, sequenced system messages
/// with periodic retransmission, and handshake injection while the UID
/// promise is pending.
pub(crate) async fn run_control_lane(
    association: &Arc<Association>,
    rx: &mut mpsc::Receiver<ControlItem>,
    ack_rx: &mut mpsc::UnboundedReceiver<AckEvent>,
    delivery: &mut SystemMessageDelivery,
) -> Result<()> {
    let setup = association.setup();
    let name = association.log_name();
    let publication = setup
        .driver
        .add_publication(association.remote_address(), CONTROL_STREAM_ID)
        .await?;
    let mut kill_rx = setup.kill.subscribe();

    let mut resend = tokio::time::interval(setup.config.system_message_resend_interval);
    resend.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut inject = tokio::time::interval(setup.config.inject_handshake_interval);
    inject.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // reseeded on every lane (re)start
    let handshake_deadline = Instant::now() + setup.config.handshake_timeout;

    log::debug!("[{}] control lane entered", name);
    if association
        .association_state()
        .unique_remote_address
        .is_pending()
    {
        let req = HandshakeReq {
            from: setup.local.clone(),
            to: association.remote_address().clone(),
        };
        offer_control(setup, &publication, &req, name).await?;
    }

    loop {
        tokio::select! {
            _ = kill_rx.recv() => return Ok(()),
            item = rx.recv() => {
                let item = match item {
                    Some(item) => item,
                    None => return Ok(()),
                };
                match item {
                    ControlItem::Message(message) => {
                        offer_control(setup, &publication, message.as_ref(), name).await?;
                    }
                    ControlItem::System(payload) => {
                        let envelope = match delivery.offer(payload, setup.local.clone()) {
                            Ok(envelope) => envelope,
                            Err(err) => {
                                association.quarantine(
                                    "system message delivery buffer overflow",
                                    None,
                                );
                                return Err(err);
                            }
                        };
                        offer_control(setup, &publication, &envelope, name).await?;
                    }
                }
            }
            ack = ack_rx.recv() => {
                match ack {
                    Some(AckEvent::Ack(seq_no)) => delivery.on_ack(seq_no),
                    Some(AckEvent::Nack(seq_no)) => {
                        for envelope in delivery.on_nack(seq_no) {
                            offer_control(setup, &publication, &envelope, name).await?;
                        }
                    }
                    None => return Ok(()),
                }
            }
            _ = resend.tick() => {
                for envelope in delivery.unacked() {
                    offer_control(setup, &publication, &envelope, name).await?;
                }
            }
            _ = inject.tick() => {
                if association
                    .association_state()
                    .unique_remote_address
                    .is_pending()
                {
                    if Instant::now() >= handshake_deadline {
                        return Err(Error::ErrHandshakeTimeout);
                    }
                    let req = HandshakeReq {
                        from: setup.local.clone(),
                        to: association.remote_address().clone(),
                    };
                    offer_control(setup, &publication, &req, name).await?;
                }
            }
        }
    }
}

/// Frames a control message and offers it. Control frames are never
/// compressed; the peer's inbound tables may be gone after a restart.
async fn offer_control(
    setup: &Arc<OutboundSetup>,
    publication: &Arc<dyn Publication>,
    message: &dyn ControlMessage,
    name: &str,
) -> Result<()> {
    let mut payload = BytesMut::new();
    message.marshal_to(&mut payload)?;
    let envelope = OutboundEnvelope {
        message: payload.freeze(),
        ..Default::default()
    };

    let mut buf = setup.frame_pool.acquire().await;
    let encoded = frame::encode(
        &mut buf,
        setup.local.uid,
        &envelope,
        &NoOutboundCompression,
        MAX_FRAME_SIZE,
    );
    let result = match encoded {
        Ok(_) => offer_frame(setup, publication, &buf, name).await,
        Err(err) => {
            log::warn!("[{}] failed to encode {}, dropping: {}", name, message, err);
            Ok(())
        }
    };
    setup.frame_pool.release(buf);
    result
}

/// Offers one frame within `give_up_send_after`. A saturated publication
/// drops the frame with a warning; a substrate failure fails the lane.
async fn offer_frame(
    setup: &Arc<OutboundSetup>,
    publication: &Arc<dyn Publication>,
    buf: &[u8],
    name: &str,
) -> Result<()> {
    match tokio::time::timeout(setup.config.give_up_send_after, publication.offer(buf)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err),
        Err(_) => {
            log::warn!(
                "[{}] publication did not accept a frame within {:?}, dropping",
                name,
                setup.config.give_up_send_after
            );
            Ok(())
        }
    }
}

pub(crate) async fn supervise_message_lane(
    association: Arc<Association>,
    stream_id: u32,
    mut rx: mpsc::Receiver<OutboundEnvelope>,
) {
    let setup = Arc::clone(association.setup());
    let counter = RestartCounter::new(setup.config.max_restarts, setup.config.restart_timeout);
    loop {
        match run_message_lane(&association, stream_id, &mut rx).await {
            Ok(()) => break,
            Err(err) => {
                if setup.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if counter.restart() {
                    log::warn!(
                        "[{}] outbound lane {} failed, restarting: {}",
                        association.log_name(),
                        stream_id,
                        err
                    );
                    setup.publish(TransportEvent::OutboundLaneRestarted {
                        remote: association.remote_address().clone(),
                        stream_id,
                    });
                } else {
                    give_up(&setup, &association, stream_id, &err);
                    break;
                }
            }
        }
    }
    log::debug!(
        "[{}] outbound lane {} exited",
        association.log_name(),
        stream_id
    );
}

pub(crate) async fn supervise_control_lane(
    association: Arc<Association>,
    mut rx: mpsc::Receiver<ControlItem>,
) {
    let setup = Arc::clone(association.setup());
    let mut ack_rx = match association.take_ack_receiver() {
        Some(ack_rx) => ack_rx,
        None => return,
    };
    // the delivery buffer survives lane restarts; only acks trim it
    let mut delivery = SystemMessageDelivery::new(setup.config.sys_msg_buffer_size);
    let counter = RestartCounter::new(setup.config.max_restarts, setup.config.restart_timeout);
    loop {
        match run_control_lane(&association, &mut rx, &mut ack_rx, &mut delivery).await {
            Ok(()) => break,
            Err(err) => {
                if setup.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if counter.restart() {
                    log::warn!(
                        "[{}] control lane failed, restarting: {}",
                        association.log_name(),
                        err
                    );
                    setup.publish(TransportEvent::OutboundLaneRestarted {
                        remote: association.remote_address().clone(),
                        stream_id: CONTROL_STREAM_ID,
                    });
                } else {
                    give_up(&setup, &association, CONTROL_STREAM_ID, &err);
                    break;
                }
            }
        }
    }
    log::debug!("[{}] control lane exited", association.log_name());
}

fn give_up(setup: &Arc<OutboundSetup>, association: &Arc<Association>, stream_id: u32, err: &Error) {
    log::error!(
        "[{}] outbound lane {} failed beyond the restart budget: {}",
        association.log_name(),
        stream_id,
        err
    );
    association.fail_handshake_promise();
    setup.publish(TransportEvent::TransportFailed {
        reason: format!(
            "outbound lane {} to {} failed beyond the restart budget: {}",
            stream_id,
            association.remote_address(),
            err
        ),
    });
    let _ = setup.kill.send(());
}
