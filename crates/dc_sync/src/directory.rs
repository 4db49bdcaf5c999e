//! Peer public-key cache shared by every open conversation.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use dc_client::{Relay, RelayError};
use dc_crypto::{Fingerprint, PublicKey};
use dc_proto::Handle;

/// A peer as published in the relay directory. Untrusted input: the
/// display fingerprint is offered for optional out-of-band comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub handle: Handle,
    pub public_key: PublicKey,
}

impl PeerEntry {
    pub fn fingerprint(&self) -> Fingerprint {
        self.public_key.fingerprint()
    }

    pub fn display_fingerprint(&self) -> String {
        self.public_key.display_fingerprint()
    }
}

pub struct PeerDirectory {
    relay: Arc<dyn Relay>,
    cache: RwLock<HashMap<Handle, PeerEntry>>,
}

impl PeerDirectory {
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        Self { relay, cache: RwLock::new(HashMap::new()) }
    }

    pub fn cached(&self, handle: &Handle) -> Option<PeerEntry> {
        self.cache.read().get(handle).cloned()
    }

    /// Cache first, relay lookup on miss.
    pub async fn resolve(&self, handle: &Handle) -> Result<PeerEntry, RelayError> {
        if let Some(entry) = self.cached(handle) {
            return Ok(entry);
        }
        let found = self.relay.lookup(handle).await?;
        if &found.handle != handle {
            warn!(event = "lookup_handle_mismatch", requested = %handle, returned = %found.handle);
            return Err(RelayError::Unexpected {
                status: 200,
                message: format!("lookup for {handle} returned {}", found.handle),
            });
        }
        let entry = PeerEntry { handle: handle.clone(), public_key: found.public_key };
        let previous = self.cache.write().insert(handle.clone(), entry.clone());
        match previous {
            Some(old) if old.public_key != entry.public_key => info!(
                event = "peer_key_changed",
                peer = %handle,
                fingerprint = %entry.fingerprint()
            ),
            _ => debug!(event = "peer_resolved", peer = %handle, fingerprint = %entry.fingerprint()),
        }
        Ok(entry)
    }

    /// Drops the cached key so the next `resolve` refetches it (key rotation).
    pub fn invalidate(&self, handle: &Handle) {
        if self.cache.write().remove(handle).is_some() {
            debug!(event = "peer_invalidated", peer = %handle);
        }
    }
}
