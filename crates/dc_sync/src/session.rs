//! The explicit per-conversation context: who I am, who the peer is, and the
//! key we share. Passed by reference to every merge and send instead of
//! living in shared mutable state, so switching conversations cannot race.

use dc_crypto::{conversation, ConversationKey, CryptoError, Fingerprint};
use dc_proto::{Handle, MessageRecord};
use dc_store::Identity;

use crate::directory::PeerEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// me → peer
    Outgoing,
    /// peer → me
    Incoming,
}

#[derive(Debug)]
pub struct ConversationSession {
    me: Handle,
    my_fingerprint: Fingerprint,
    peer: PeerEntry,
    key: ConversationKey,
}

impl ConversationSession {
    pub fn new(identity: &Identity, peer: PeerEntry) -> Result<Self, CryptoError> {
        let key = conversation::derive_key(identity.secret(), &peer.public_key)?;
        Ok(Self {
            me: identity.handle().clone(),
            my_fingerprint: identity.fingerprint(),
            peer,
            key,
        })
    }

    pub fn me(&self) -> &Handle {
        &self.me
    }

    pub fn my_fingerprint(&self) -> Fingerprint {
        self.my_fingerprint
    }

    pub fn peer(&self) -> &PeerEntry {
        &self.peer
    }

    pub fn peer_handle(&self) -> &Handle {
        &self.peer.handle
    }

    pub fn peer_fingerprint(&self) -> Fingerprint {
        self.peer.fingerprint()
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// `Some` only when the directed pair is exactly (me, peer) or
    /// (peer, me). A record between me and a third party is `None`.
    pub fn direction(&self, record: &MessageRecord) -> Option<Direction> {
        if record.from == self.me && record.to == self.peer.handle {
            Some(Direction::Outgoing)
        } else if record.from == self.peer.handle && record.to == self.me {
            Some(Direction::Incoming)
        } else {
            None
        }
    }
}
