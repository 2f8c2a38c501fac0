
pub(crate) mod registry;
pub(crate) mod state;

use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::address::{Address, UniqueAddress};
use crate::control::quarantined::Quarantined;
use crate::control::ControlMessage;
use crate::envelope::OutboundEnvelope;
use crate::error::{Error, Result};
use crate::event::TransportEvent;
use crate::inbound::ControlJunction;
use crate::outbound::{
    supervise_control_lane, supervise_message_lane, AckEvent, ControlItem, OutboundContext,
    OutboundSetup,
};

use state::{AssociationState, UidPromise};

/// Runtime relationship with one remote actor system.
///
/// Owns the three outbound lanes towards the peer and the per-peer state
/// snapshot. Lanes are materialized on first use; the registry keeps every
/// association alive until the transport shuts down, so no lane ever
/// outlives its association.
pub struct Association {
    name: String,
    remote_address: Address,
    setup: Arc<OutboundSetup>,
    state: ArcSwap<AssociationState>,
    handshake_tx: watch::Sender<Option<UniqueAddress>>,
    control_tx: OnceLock<mpsc::Sender<ControlItem>>,
    ordinary_tx: OnceLock<mpsc::Sender<OutboundEnvelope>>,
    large_tx: OnceLock<mpsc::Sender<OutboundEnvelope>>,
    ack_tx: mpsc::UnboundedSender<AckEvent>,
    ack_rx: Mutex<Option<mpsc::UnboundedReceiver<AckEvent>>>,
    me: Weak<Association>,
}

impl Association {
    pub(crate) fn new(setup: Arc<OutboundSetup>, remote_address: Address) -> Arc<Self> {
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (handshake_tx, _) = watch::channel(None);
        let initial = AssociationState::initial(setup.fresh_outbound_compression());
        let name = format!("{}->{}:{}", setup.local.address.system, remote_address.host, remote_address.port);

        Arc::new_cyclic(|me| Association {
            name,
            remote_address,
            setup,
            state: ArcSwap::from_pointee(initial),
            handshake_tx,
            control_tx: OnceLock::new(),
            ordinary_tx: OnceLock::new(),
            large_tx: OnceLock::new(),
            ack_tx,
            ack_rx: Mutex::new(Some(ack_rx)),
            me: me.clone(),
        })
    }

    pub fn remote_address(&self) -> &Address {
        &self.remote_address
    }

    pub(crate) fn log_name(&self) -> &str {
        &self.name
    }

    pub(crate) fn setup(&self) -> &Arc<OutboundSetup> {
        &self.setup
    }

    /// Current snapshot; one atomic load.
    pub fn association_state(&self) -> Arc<AssociationState> {
        self.state.load_full()
    }

    /// Enqueues a user message onto the ordinary or large lane, classified
    /// by the recipient path. Blocks up to `give_up_send_after` on a
    /// saturated queue, then drops with a warning.
    pub async fn send(&self, envelope: OutboundEnvelope) -> Result<()> {
        // materializing the control lane kicks the handshake on first contact
        let _ = self.control_sender();

        let recipient = envelope.recipient.as_deref().unwrap_or("");
        let tx = if self.setup.is_large_destination(recipient) {
            self.large_sender()
        } else {
            self.ordinary_sender()
        };

        match tx
            .send_timeout(envelope, self.setup.config.give_up_send_after)
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(envelope)) => {
                log::warn!(
                    "[{}] outbound queue saturated for {}, dropping message",
                    self.name,
                    self.remote_address
                );
                self.setup.envelope_pool.release(envelope);
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Closed(envelope)) => {
                self.setup.envelope_pool.release(envelope);
                Err(Error::ErrOutboundQueueClosed)
            }
        }
    }

    /// Enqueues a system message for reliable, ordered delivery over the
    /// control stream.
    pub async fn send_system(&self, message: Bytes) -> Result<()> {
        let tx = self.control_sender();
        match tx
            .send_timeout(
                ControlItem::System(message),
                self.setup.config.give_up_send_after,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                log::warn!(
                    "[{}] control queue saturated, dropping system message",
                    self.name
                );
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(Error::ErrOutboundQueueClosed),
        }
    }

    /// Enqueues a transport-protocol message onto the control lane. Never
    /// blocks; a full queue drops the message, periodic retransmission
    /// covers the loss.
    pub fn send_control(&self, message: Box<dyn ControlMessage>) {
        let tx = self.control_sender();
        if let Err(err) = tx.try_send(ControlItem::Message(message)) {
            let dropped = match err {
                mpsc::error::TrySendError::Full(item) | mpsc::error::TrySendError::Closed(item) => {
                    item
                }
            };
            if let ControlItem::Message(msg) = dropped {
                log::warn!("[{}] control queue unavailable, dropping {}", self.name, msg);
            }
        }
    }

    /// Fulfils the UID promise, reporting whether the promise is (now or
    /// already) fulfilled with that UID. A different UID on an
    /// already-completed promise starts the next incarnation; the
    /// quarantined set survives. A banned UID is refused and the promise is
    /// left untouched.
    pub(crate) fn complete_handshake(&self, peer: UniqueAddress) -> bool {
        loop {
            let current = self.state.load_full();
            if current.is_quarantined(peer.uid) {
                log::warn!(
                    "[{}] refusing handshake with quarantined {}",
                    self.name,
                    peer
                );
                return false;
            }
            let next = match &current.unique_remote_address {
                UidPromise::Completed(existing) if existing.uid == peer.uid => return true,
                UidPromise::Completed(_) => {
                    current.new_incarnation(peer.clone(), self.setup.fresh_outbound_compression())
                }
                UidPromise::Pending | UidPromise::Failed => current.completed(peer.clone()),
            };
            let incarnation = next.incarnation;
            let prev = self.state.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&prev, &current) {
                log::debug!(
                    "[{}] handshake completed with {}, incarnation {}",
                    self.name,
                    peer,
                    incarnation
                );
                let _ = self.handshake_tx.send(Some(peer.clone()));
                self.setup
                    .publish(TransportEvent::HandshakeCompleted { peer, incarnation });
                return true;
            }
        }
    }

    /// Bans `uid` (or the current peer UID when unspecified) permanently.
    pub fn quarantine(&self, reason: &str, uid: Option<u64>) {
        loop {
            let current = self.state.load_full();
            let target = match (uid, current.uid()) {
                (Some(requested), Some(known)) if requested == known => requested,
                (Some(requested), None) => requested,
                (None, Some(known)) => known,
                (Some(requested), Some(_)) => {
                    log::debug!(
                        "[{}] quarantine of UID {} ignored, not the current incarnation",
                        self.name,
                        requested
                    );
                    return;
                }
                (None, None) => {
                    log::debug!(
                        "[{}] quarantine ignored, handshake with {} still pending",
                        self.name,
                        self.remote_address
                    );
                    return;
                }
            };
            if current.is_quarantined(target) {
                return;
            }
            let next = current.new_quarantined(target);
            let prev = self.state.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&prev, &current) {
                log::warn!(
                    "[{}] association to {} quarantined, UID {}: {}",
                    self.name,
                    self.remote_address,
                    target,
                    reason
                );
                self.setup.publish(TransportEvent::Quarantined {
                    remote: self.remote_address.clone(),
                    uid: target,
                    reason: reason.to_owned(),
                });
                // best effort: tell the peer it is banned
                self.send_control(Box::new(Quarantined {
                    from: self.setup.local.clone(),
                    to: UniqueAddress::new(self.remote_address.clone(), target),
                }));
                return;
            }
        }
    }

    /// Marks the promise failed; the transport has given up on this peer.
    pub(crate) fn fail_handshake_promise(&self) {
        loop {
            let current = self.state.load_full();
            if !current.unique_remote_address.is_pending() {
                return;
            }
            let next = current.failed();
            let prev = self.state.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&prev, &current) {
                return;
            }
        }
    }

    /// Resolves once the promise is fulfilled, or fails after `timeout`.
    pub(crate) async fn wait_handshake(&self, timeout: Duration) -> Result<UniqueAddress> {
        if let UidPromise::Completed(peer) = &self.state.load().unique_remote_address {
            return Ok(peer.clone());
        }

        let mut rx = self.handshake_tx.subscribe();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            if let Some(peer) = rx.borrow_and_update().clone() {
                return Ok(peer);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::ErrTransportShutdown);
                    }
                }
                _ = &mut deadline => return Err(Error::ErrHandshakeTimeout),
            }
        }
    }

    /// Inbound control stage feeds acknowledgements back to the delivery
    /// buffer through these.
    pub(crate) fn on_system_ack(&self, seq_no: u64) {
        let _ = self.ack_tx.send(AckEvent::Ack(seq_no));
    }

    pub(crate) fn on_system_nack(&self, seq_no: u64) {
        let _ = self.ack_tx.send(AckEvent::Nack(seq_no));
    }

    pub(crate) fn take_ack_receiver(&self) -> Option<mpsc::UnboundedReceiver<AckEvent>> {
        self.ack_rx.lock().unwrap().take()
    }

    fn control_sender(&self) -> mpsc::Sender<ControlItem> {
        self.control_tx
            .get_or_init(|| {
                let (tx, rx) = mpsc::channel(self.setup.config.outbound_control_queue_capacity);
                if let Some(assoc) = self.me.upgrade() {
                    tokio::spawn(async move {
                        supervise_control_lane(assoc, rx).await;
                    });
                }
                tx
            })
            .clone()
    }

    fn ordinary_sender(&self) -> mpsc::Sender<OutboundEnvelope> {
        self.ordinary_tx
            .get_or_init(|| {
                let (tx, rx) = mpsc::channel(self.setup.config.outbound_queue_capacity);
                if let Some(assoc) = self.me.upgrade() {
                    tokio::spawn(async move {
                        supervise_message_lane(assoc, crate::driver::ORDINARY_STREAM_ID, rx).await;
                    });
                }
                tx
            })
            .clone()
    }

    fn large_sender(&self) -> mpsc::Sender<OutboundEnvelope> {
        self.large_tx
            .get_or_init(|| {
                let (tx, rx) = mpsc::channel(self.setup.config.outbound_queue_capacity);
                if let Some(assoc) = self.me.upgrade() {
                    tokio::spawn(async move {
                        supervise_message_lane(assoc, crate::driver::LARGE_STREAM_ID, rx).await;
                    });
                }
                tx
            })
            .clone()
    }
}

impl OutboundContext for Association {
    fn local_address(&self) -> &UniqueAddress {
        &self.setup.local
    }

    fn remote_address(&self) -> &Address {
        &self.remote_address
    }

    fn association_state(&self) -> Arc<AssociationState> {
        Association::association_state(self)
    }

    fn quarantine(&self, reason: &str) {
        Association::quarantine(self, reason, None)
    }

    fn send_control(&self, message: Box<dyn ControlMessage>) {
        Association::send_control(self, message)
    }

    fn control_subject(&self) -> Arc<ControlJunction> {
        Arc::clone(&self.setup.junction)
    }
}
