use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::address::{Address, UniqueAddress};
use crate::error::{Error, Result};
use crate::outbound::OutboundSetup;

use super::Association;

/// Owner of every [`Association`].
///
/// Address entries are created lazily and never removed while the transport
/// lives. UID entries appear when a handshake completes; a reincarnated peer
/// remaps its address to the new association state while the old UID entry
/// remains, shadowed by the newer snapshot.
pub struct AssociationRegistry {
    setup: Arc<OutboundSetup>,
    by_address: Mutex<HashMap<Address, Arc<Association>>>,
    by_uid: Mutex<HashMap<u64, Arc<Association>>>,
}

impl AssociationRegistry {
    pub(crate) fn new(setup: Arc<OutboundSetup>) -> Self {
        AssociationRegistry {
            setup,
            by_address: Mutex::new(HashMap::new()),
            by_uid: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent lookup-or-create. Two concurrent calls for the same
    /// address observe the same instance. Asking for the local address is a
    /// caller error.
    pub fn association(&self, remote: &Address) -> Result<Arc<Association>> {
        if *remote == self.setup.local.address {
            return Err(Error::ErrLocalAssociation);
        }

        let mut by_address = self.by_address.lock().unwrap();
        if let Some(existing) = by_address.get(remote) {
            return Ok(Arc::clone(existing));
        }
        let association = Association::new(Arc::clone(&self.setup), remote.clone());
        by_address.insert(remote.clone(), Arc::clone(&association));
        Ok(association)
    }

    /// None until a handshake has completed for that UID.
    pub fn association_by_uid(&self, uid: u64) -> Option<Arc<Association>> {
        self.by_uid.lock().unwrap().get(&uid).cloned()
    }

    /// Binds the peer's UID to its address-indexed association, fulfilling
    /// the UID promise. Idempotent. A quarantined UID is refused and never
    /// indexed.
    pub fn set_uid(&self, peer: UniqueAddress) -> Result<Arc<Association>> {
        let association = self.association(&peer.address)?;
        if association.complete_handshake(peer.clone()) {
            self.by_uid
                .lock()
                .unwrap()
                .insert(peer.uid, Arc::clone(&association));
        }
        Ok(association)
    }
}
