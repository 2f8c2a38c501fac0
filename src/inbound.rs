use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::address::{Address, UniqueAddress};
use crate::association::Association;
use crate::compression::{InboundCompressionTables, InboundCompressions};
use crate::config::TransportConfig;
use crate::control::compression_advertisement::{
    ActorRefCompressionAdvertisement, ClassManifestCompressionAdvertisement,
};
use crate::control::handshake::{HandshakeReq, HandshakeRsp};
use crate::control::quarantined::Quarantined;
use crate::control::system_message::{
    SystemMessageAck, SystemMessageEnvelope, SystemMessageNack,
};
use crate::control::{unmarshal_control, ControlMessage};
use crate::delivery::{AckDecision, SystemMessageAcker};
use crate::driver::{MediaDriver, CONTROL_STREAM_ID};
use crate::envelope::InboundEnvelope;
use crate::error::Result;
use crate::event::TransportEvent;
use crate::frame;
use crate::pool::{ObjectPool, INBOUND_ENVELOPE_POOL_CAPACITY};
use crate::restart::RestartCounter;

/// What inbound pipeline stages see of the transport.
pub trait InboundContext: Send + Sync {
    fn local_address(&self) -> &UniqueAddress;
    /// Enqueues a protocol message towards `to` on its control lane.
    fn send_control(&self, to: &Address, message: Box<dyn ControlMessage>);
    fn association(&self, remote: &Address) -> Result<Arc<Association>>;
    fn association_by_uid(&self, uid: u64) -> Option<Arc<Association>>;
    /// Registers the peer under its UID and fulfils the promise.
    fn complete_handshake(&self, peer: UniqueAddress) -> Result<Arc<Association>>;
    fn publish_event(&self, event: TransportEvent);
}

/// The terminal sink: whatever ultimately consumes decoded envelopes.
/// Called on the pipeline task; implementations hand off and return.
pub trait InboundDispatcher: Send + Sync {
    fn dispatch(&self, envelope: &InboundEnvelope);
}

/// Observes control messages as they pass the control-stream pipeline.
/// Notified synchronously in registration order; must not block.
pub trait ControlMessageObserver: Send + Sync {
    fn notify(&self, envelope: &InboundEnvelope, message: &dyn ControlMessage);
}

/// Fan-out point for inbound control messages.
#[derive(Default)]
pub struct ControlJunction {
    observers: Mutex<Vec<Arc<dyn ControlMessageObserver>>>,
}

impl ControlJunction {
    pub fn new() -> Arc<Self> {
        Arc::new(ControlJunction::default())
    }

    pub fn attach(&self, observer: Arc<dyn ControlMessageObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    pub(crate) fn notify_all(&self, envelope: &InboundEnvelope, message: &dyn ControlMessage) {
        let observers = self.observers.lock().unwrap().clone();
        for observer in &observers {
            observer.notify(envelope, message);
        }
    }
}

/// Built-in observer: a `Quarantined` message naming this incarnation bans
/// the sender in return and surfaces the event.
pub(crate) struct QuarantineObserver {
    pub(crate) ctx: Arc<dyn InboundContext>,
}

impl ControlMessageObserver for QuarantineObserver {
    fn notify(&self, _envelope: &InboundEnvelope, message: &dyn ControlMessage) {
        let quarantined = match message.as_any().downcast_ref::<Quarantined>() {
            Some(q) => q,
            None => return,
        };
        let local = self.ctx.local_address().clone();
        if quarantined.to != local {
            return;
        }
        if let Ok(association) = self.ctx.association(&quarantined.from.address) {
            association.quarantine("peer has quarantined this system", Some(quarantined.from.uid));
        }
        self.ctx
            .publish_event(TransportEvent::ThisActorSystemQuarantined {
                local: local.address,
                remote: quarantined.from.address.clone(),
            });
    }
}

/// Built-in observer: compression advertisements land in the advertising
/// peer's outbound table.
pub(crate) struct CompressionObserver {
    pub(crate) ctx: Arc<dyn InboundContext>,
}

impl ControlMessageObserver for CompressionObserver {
    fn notify(&self, envelope: &InboundEnvelope, message: &dyn ControlMessage) {
        // the mapping goes to the association the inbound gate verified for
        // this frame, never to one named by a payload field
        if let Some(adv) = message
            .as_any()
            .downcast_ref::<ActorRefCompressionAdvertisement>()
        {
            if adv.from.uid != envelope.originating_uid {
                log::warn!(
                    "[{}] dropping compression advertisement claiming {} but sent by UID {}",
                    self.ctx.local_address().address.system,
                    adv.from,
                    envelope.originating_uid
                );
                return;
            }
            if let Some(association) = self.ctx.association_by_uid(envelope.originating_uid) {
                association
                    .association_state()
                    .outbound_compression
                    .advertise_actor_ref(adv.path.clone(), adv.id);
                self.ctx
                    .publish_event(TransportEvent::ActorRefCompressionAdvertised {
                        peer: adv.from.clone(),
                        path: adv.path.clone(),
                        id: adv.id,
                    });
            }
        } else if let Some(adv) = message
            .as_any()
            .downcast_ref::<ClassManifestCompressionAdvertisement>()
        {
            if adv.from.uid != envelope.originating_uid {
                log::warn!(
                    "[{}] dropping compression advertisement claiming {} but sent by UID {}",
                    self.ctx.local_address().address.system,
                    adv.from,
                    envelope.originating_uid
                );
                return;
            }
            if let Some(association) = self.ctx.association_by_uid(envelope.originating_uid) {
                association
                    .association_state()
                    .outbound_compression
                    .advertise_class_manifest(adv.manifest.clone(), adv.id);
                self.ctx
                    .publish_event(TransportEvent::ClassManifestCompressionAdvertised {
                        peer: adv.from.clone(),
                        manifest: adv.manifest.clone(),
                        id: adv.id,
                    });
            }
        }
    }
}

/// One inbound pipeline: a single stream id, decoded and filtered on its own
/// task, restarted under the shared budget.
pub(crate) struct InboundPipeline {
    pub(crate) name: String,
    pub(crate) stream_id: u32,
    pub(crate) ctx: Arc<dyn InboundContext>,
    pub(crate) dispatcher: Arc<dyn InboundDispatcher>,
    pub(crate) junction: Arc<ControlJunction>,
    pub(crate) driver: Arc<dyn MediaDriver>,
    pub(crate) kill: broadcast::Sender<()>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) events: broadcast::Sender<TransportEvent>,
    pub(crate) config: Arc<TransportConfig>,
}

impl InboundPipeline {
    pub(crate) async fn supervise(self) {
        let counter =
            RestartCounter::new(self.config.max_restarts, self.config.restart_timeout);
        let envelope_pool: ObjectPool<InboundEnvelope> =
            ObjectPool::new(INBOUND_ENVELOPE_POOL_CAPACITY);
        // ack bookkeeping survives restarts, sequence numbers must not reset
        let mut ackers: HashMap<u64, SystemMessageAcker> = HashMap::new();

        loop {
            // a restarted pipeline starts over with fresh compression tables
            let compressions: Arc<dyn InboundCompressions> = InboundCompressionTables::new();
            match self.run(compressions, &envelope_pool, &mut ackers).await {
                Ok(()) => break,
                Err(err) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    if counter.restart() {
                        log::warn!(
                            "[{}] inbound pipeline {} failed, restarting: {}",
                            self.name,
                            self.stream_id,
                            err
                        );
                        let _ = self.events.send(TransportEvent::InboundPipelineRestarted {
                            stream_id: self.stream_id,
                        });
                    } else {
                        log::error!(
                            "[{}] inbound pipeline {} failed beyond the restart budget: {}",
                            self.name,
                            self.stream_id,
                            err
                        );
                        let _ = self.events.send(TransportEvent::TransportFailed {
                            reason: format!(
                                "inbound pipeline {} failed beyond the restart budget: {}",
                                self.stream_id, err
                            ),
                        });
                        let _ = self.kill.send(());
                        break;
                    }
                }
            }
        }
        log::debug!("[{}] inbound pipeline {} exited", self.name, self.stream_id);
    }

    async fn run(
        &self,
        compressions: Arc<dyn InboundCompressions>,
        envelope_pool: &ObjectPool<InboundEnvelope>,
        ackers: &mut HashMap<u64, SystemMessageAcker>,
    ) -> Result<()> {
        let subscription = self.driver.add_subscription(self.stream_id).await?;
        let mut kill_rx = self.kill.subscribe();

        log::debug!("[{}] inbound pipeline {} entered", self.name, self.stream_id);
        loop {
            let raw = tokio::select! {
                _ = kill_rx.recv() => return Ok(()),
                raw = subscription.poll() => raw?,
            };

            let mut envelope = envelope_pool.acquire();
            envelope.stream_id = self.stream_id;
            envelope.recipient_address = Some(self.ctx.local_address().address.clone());
            if let Err(err) = frame::decode(&raw, compressions.as_ref(), &mut envelope) {
                log::warn!(
                    "[{}] dropping undecodable frame on stream {}: {}",
                    self.name,
                    self.stream_id,
                    err
                );
                envelope_pool.release(envelope);
                continue;
            }

            if self.stream_id == CONTROL_STREAM_ID {
                self.on_control_envelope(&mut envelope, ackers);
            } else {
                self.on_message_envelope(&envelope);
            }
            envelope_pool.release(envelope);
        }
    }

    /// Handshake, gate, quarantine check, junction fan-out and the
    /// system-message ack protocol, in that order.
    fn on_control_envelope(
        &self,
        envelope: &mut InboundEnvelope,
        ackers: &mut HashMap<u64, SystemMessageAcker>,
    ) {
        let message = match unmarshal_control(&envelope.message) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("[{}] dropping undecodable control message: {}", self.name, err);
                return;
            }
        };

        if let Some(req) = message.as_any().downcast_ref::<HandshakeReq>() {
            let local = self.ctx.local_address().clone();
            if req.to == local.address {
                // a banned incarnation retrying its handshake is told so
                if let Ok(association) = self.ctx.association(&req.from.address) {
                    if association.association_state().is_quarantined(req.from.uid) {
                        association.send_control(Box::new(Quarantined {
                            from: local,
                            to: req.from.clone(),
                        }));
                        return;
                    }
                }
                match self.ctx.complete_handshake(req.from.clone()) {
                    Ok(_) => {
                        self.ctx.send_control(
                            &req.from.address,
                            Box::new(HandshakeRsp { from: local }),
                        );
                    }
                    Err(err) => {
                        log::warn!("[{}] could not register {}: {}", self.name, req.from, err);
                    }
                }
            } else {
                log::warn!(
                    "[{}] dropping handshake request addressed to {}, not this system",
                    self.name,
                    req.to
                );
            }
            return;
        }
        if let Some(rsp) = message.as_any().downcast_ref::<HandshakeRsp>() {
            // a banned incarnation cannot (re)fulfil the promise
            if let Ok(association) = self.ctx.association(&rsp.from.address) {
                if association.association_state().is_quarantined(rsp.from.uid) {
                    log::warn!(
                        "[{}] dropping handshake response from quarantined {}",
                        self.name,
                        rsp.from
                    );
                    return;
                }
            }
            if let Err(err) = self.ctx.complete_handshake(rsp.from.clone()) {
                log::warn!("[{}] could not register {}: {}", self.name, rsp.from, err);
            }
            return;
        }

        // everything else is gated until the handshake has completed
        let association = match self.ctx.association_by_uid(envelope.originating_uid) {
            Some(association) => association,
            None => {
                log::debug!(
                    "[{}] dropping {} from unknown UID {}",
                    self.name,
                    message,
                    envelope.originating_uid
                );
                return;
            }
        };

        if association
            .association_state()
            .is_quarantined(envelope.originating_uid)
        {
            log::warn!(
                "[{}] dropping {} from quarantined UID {}",
                self.name,
                message,
                envelope.originating_uid
            );
            self.ctx.publish_event(TransportEvent::QuarantinedEnvelopeDropped {
                uid: envelope.originating_uid,
            });
            return;
        }

        self.junction.notify_all(envelope, message.as_ref());

        if let Some(ack) = message.as_any().downcast_ref::<SystemMessageAck>() {
            association.on_system_ack(ack.seq_no);
        } else if let Some(nack) = message.as_any().downcast_ref::<SystemMessageNack>() {
            association.on_system_nack(nack.seq_no);
        } else if let Some(sys) = message.as_any().downcast_ref::<SystemMessageEnvelope>() {
            let local = self.ctx.local_address().clone();
            let acker = ackers.entry(envelope.originating_uid).or_default();
            match acker.on_envelope(sys.seq_no) {
                AckDecision::Deliver { ack } => {
                    envelope.message = sys.message.clone();
                    self.dispatcher.dispatch(envelope);
                    association.send_control(Box::new(SystemMessageAck {
                        seq_no: ack,
                        from: local,
                    }));
                }
                AckDecision::Duplicate { ack } => {
                    association.send_control(Box::new(SystemMessageAck {
                        seq_no: ack,
                        from: local,
                    }));
                }
                AckDecision::Gap { nack } => {
                    association.send_control(Box::new(SystemMessageNack {
                        seq_no: nack,
                        from: local,
                    }));
                }
            }
        }
    }

    /// Ordinary and large streams: gate, quarantine check, dispatch.
    fn on_message_envelope(&self, envelope: &InboundEnvelope) {
        let association = match self.ctx.association_by_uid(envelope.originating_uid) {
            Some(association) => association,
            None => {
                log::debug!(
                    "[{}] dropping message from UID {} before handshake",
                    self.name,
                    envelope.originating_uid
                );
                return;
            }
        };

        if association
            .association_state()
            .is_quarantined(envelope.originating_uid)
        {
            log::warn!(
                "[{}] dropping message from quarantined UID {}",
                self.name,
                envelope.originating_uid
            );
            self.ctx.publish_event(TransportEvent::QuarantinedEnvelopeDropped {
                uid: envelope.originating_uid,
            });
            return;
        }

        self.dispatcher.dispatch(envelope);
    }
}
