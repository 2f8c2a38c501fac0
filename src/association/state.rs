use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::address::UniqueAddress;
use crate::compression::{NoOutboundCompression, OutboundCompression};

/// One-shot peer-UID promise. Completes exactly once per incarnation; a
/// reincarnation replaces the whole snapshot and with it the promise.
#[derive(Clone)]
pub enum UidPromise {
    Pending,
    Completed(UniqueAddress),
    /// The transport gave up on this peer (restart budget exhausted).
    Failed,
}

impl UidPromise {
    pub fn uid(&self) -> Option<u64> {
        match self {
            UidPromise::Completed(peer) => Some(peer.uid),
            _ => None,
        }
    }

    pub fn peer(&self) -> Option<&UniqueAddress> {
        match self {
            UidPromise::Completed(peer) => Some(peer),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, UidPromise::Pending)
    }
}

/// makes UidPromise printable
impl fmt::Display for UidPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UidPromise::Pending => write!(f, "Pending"),
            UidPromise::Completed(peer) => write!(f, "Completed({peer})"),
            UidPromise::Failed => write!(f, "Failed"),
        }
    }
}

impl fmt::Debug for UidPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Immutable per-peer snapshot. Transitions construct a fresh value which the
/// owning [`Association`](super::Association) installs with a compare-and-swap
/// of the whole snapshot, so readers always observe a consistent view.
#[derive(Clone)]
pub struct AssociationState {
    /// 1-based, incremented on every reincarnation of the peer.
    pub incarnation: u32,
    /// The peer-UID promise for the current incarnation.
    pub unique_remote_address: UidPromise,
    /// UIDs banned for the life of this association, with the monotonic
    /// stamp of the ban.
    pub quarantined: HashMap<u64, Instant>,
    /// Compression consulted by the encoder; the no-op sentinel once the
    /// current incarnation is quarantined.
    pub outbound_compression: Arc<dyn OutboundCompression>,
}

impl AssociationState {
    pub(crate) fn initial(outbound_compression: Arc<dyn OutboundCompression>) -> Self {
        AssociationState {
            incarnation: 1,
            unique_remote_address: UidPromise::Pending,
            quarantined: HashMap::new(),
            outbound_compression,
        }
    }

    /// Fulfils the pending promise within the current incarnation.
    pub(crate) fn completed(&self, peer: UniqueAddress) -> Self {
        AssociationState {
            incarnation: self.incarnation,
            unique_remote_address: UidPromise::Completed(peer),
            quarantined: self.quarantined.clone(),
            outbound_compression: Arc::clone(&self.outbound_compression),
        }
    }

    /// The peer came back with a different UID: next incarnation, fresh
    /// fulfilled promise, fresh compression. The quarantined set carries
    /// over.
    pub(crate) fn new_incarnation(
        &self,
        peer: UniqueAddress,
        outbound_compression: Arc<dyn OutboundCompression>,
    ) -> Self {
        AssociationState {
            incarnation: self.incarnation + 1,
            unique_remote_address: UidPromise::Completed(peer),
            quarantined: self.quarantined.clone(),
            outbound_compression,
        }
    }

    /// Bans `uid` permanently and silences outbound compression.
    pub(crate) fn new_quarantined(&self, uid: u64) -> Self {
        let mut quarantined = self.quarantined.clone();
        quarantined.entry(uid).or_insert_with(Instant::now);
        AssociationState {
            incarnation: self.incarnation,
            unique_remote_address: self.unique_remote_address.clone(),
            quarantined,
            outbound_compression: Arc::new(NoOutboundCompression),
        }
    }

    /// Marks the promise failed; installed when the transport gives up on
    /// the peer.
    pub(crate) fn failed(&self) -> Self {
        AssociationState {
            incarnation: self.incarnation,
            unique_remote_address: UidPromise::Failed,
            quarantined: self.quarantined.clone(),
            outbound_compression: Arc::clone(&self.outbound_compression),
        }
    }

    pub fn uid(&self) -> Option<u64> {
        self.unique_remote_address.uid()
    }

    pub fn is_quarantined(&self, uid: u64) -> bool {
        self.quarantined.contains_key(&uid)
    }

    /// Whether the current incarnation itself is banned.
    pub fn is_current_quarantined(&self) -> bool {
        match self.uid() {
            Some(uid) => self.is_quarantined(uid),
            None => false,
        }
    }
}

impl fmt::Debug for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationState")
            .field("incarnation", &self.incarnation)
            .field("unique_remote_address", &self.unique_remote_address)
            .field("quarantined", &self.quarantined.keys().collect::<Vec<_>>())
            .finish()
    }
}
