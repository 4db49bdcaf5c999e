//! Client-local conversation timeline and the poll merge.
//!
//! The timeline is never authoritative: replaying polls from cursor 0 rebuilds
//! it. Merging a poll response:
//!
//!   1. drop records whose id is already in the timeline, already tombstoned,
//!      or already rejected
//!   2. admit only the directed pairs (me → peer) and (peer → me)
//!   3. for peer → me, require `senderFingerprint == fingerprint(peer key)`
//!   4. decrypt; failure drops the record and it is never retried
//!   5. apply tombstones with `deletedAt >= tombstone cursor`, oldest first,
//!      advancing the tombstone cursor
//!   6. keep the timeline sorted by `(createdAt, id)`
//!
//! Steps 1 and 5 make a merge idempotent: merging the same response twice
//! leaves the timeline unchanged. Steps 2 and 3 drop silently: wrong-
//! conversation noise is expected and is never an error.
//!
//! The poll cursor moves only for records in this conversation's directed
//! pair, and never past the local clock. Sender timestamps are unchecked by
//! the relay; a future-dated record must not hide everything after it.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use dc_crypto::conversation;
use dc_proto::{api::PollResponse, now_millis, Deletion, MessageKind, MessageRecord, Millis, RecordId};

use crate::session::{ConversationSession, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Local placeholder, not yet accepted by the relay.
    Sending,
    /// Accepted by the relay.
    Sent,
    /// From the peer.
    Received,
}

/// Where to find an attachment's bytes, plus the decrypted caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentHandle {
    pub blob_ref: String,
    pub kind: MessageKind,
    pub mime: Option<String>,
    pub name: Option<String>,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Body {
    Text(String),
    Attachment(AttachmentHandle),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayMessage {
    pub id: RecordId,
    pub from_me: bool,
    pub body: Body,
    pub timestamp: Millis,
    pub status: DeliveryState,
}

impl DisplayMessage {
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            Body::Text(t) => Some(t),
            Body::Attachment(_) => None,
        }
    }

    pub fn attachment(&self) -> Option<&AttachmentHandle> {
        match &self.body {
            Body::Attachment(a) => Some(a),
            Body::Text(_) => None,
        }
    }

    fn sort_key(&self) -> (Millis, &RecordId) {
        (self.timestamp, &self.id)
    }
}

/// What a merge did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub admitted: usize,
    pub duplicates: usize,
    pub dropped: usize,
    pub removed: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.admitted > 0 || self.removed > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    messages: Vec<DisplayMessage>,
    ids: HashSet<RecordId>,
    tombstones: HashSet<RecordId>,
    /// Ids that failed admission. A given record either decrypts or never
    /// will, so they are not looked at again.
    rejected: HashSet<RecordId>,
    cursor: Millis,
    tombstone_cursor: Millis,
}

impl Timeline {
    pub fn new(initial_cursor: Millis) -> Self {
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            tombstones: HashSet::new(),
            rejected: HashSet::new(),
            cursor: initial_cursor,
            tombstone_cursor: initial_cursor,
        }
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<&DisplayMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.ids.contains(id)
    }

    /// `since` for the next poll.
    pub fn cursor(&self) -> Millis {
        self.cursor
    }

    pub fn tombstone_cursor(&self) -> Millis {
        self.tombstone_cursor
    }

    pub fn is_tombstoned(&self, id: &RecordId) -> bool {
        self.tombstones.contains(id)
    }

    pub fn merge(&mut self, session: &ConversationSession, response: &PollResponse) -> MergeOutcome {
        self.merge_at(session, response, now_millis())
    }

    /// `merge` with an explicit local clock reading.
    pub fn merge_at(&mut self, session: &ConversationSession, response: &PollResponse, now: Millis) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for record in &response.messages {
            if session.direction(record).is_some() {
                self.cursor = self.cursor.max(record.created_at.min(now));
            }

            if self.ids.contains(&record.id) || self.tombstones.contains(&record.id) || self.rejected.contains(&record.id) {
                outcome.duplicates += 1;
                continue;
            }
            if record.deleted {
                self.tombstone(&record.id);
                continue;
            }
            match self.admit(session, record) {
                Some(message) => {
                    self.insert(message);
                    outcome.admitted += 1;
                }
                None => {
                    self.rejected.insert(record.id.clone());
                    outcome.dropped += 1;
                }
            }
        }

        outcome.removed = self.apply_deletions(&response.deletions);

        if outcome.changed() || outcome.dropped > 0 {
            debug!(
                event = "timeline_merged",
                peer = %session.peer_handle(),
                admitted = outcome.admitted,
                dropped = outcome.dropped,
                removed = outcome.removed,
                cursor = self.cursor
            );
        }
        outcome
    }

    fn admit(&self, session: &ConversationSession, record: &MessageRecord) -> Option<DisplayMessage> {
        let Some(direction) = session.direction(record) else {
            debug!(event = "record_dropped", reason = "directed_pair", record_id = %record.id);
            return None;
        };

        if direction == Direction::Incoming && !session.peer_fingerprint().matches(&record.sender_fingerprint) {
            debug!(event = "record_dropped", reason = "fingerprint_mismatch", record_id = %record.id);
            return None;
        }

        let Some(ciphertext) = record.ciphertext.as_deref() else {
            debug!(event = "record_dropped", reason = "no_ciphertext", record_id = %record.id);
            return None;
        };
        let Some(plaintext) = conversation::decrypt(ciphertext, &record.nonce, session.key()) else {
            debug!(
                event = "record_dropped",
                reason = "decrypt_failed",
                record_id = %record.id,
                ciphertext_len = ciphertext.len()
            );
            return None;
        };
        let text = String::from_utf8_lossy(&plaintext).into_owned();

        let body = match &record.blob_ref {
            Some(blob_ref) if !blob_ref.is_empty() => Body::Attachment(AttachmentHandle {
                blob_ref: blob_ref.clone(),
                kind: if record.kind.is_attachment() { record.kind } else { MessageKind::File },
                mime: record.mime.clone(),
                name: record.name.clone(),
                caption: text,
            }),
            _ => Body::Text(text),
        };

        let from_me = direction == Direction::Outgoing;
        Some(DisplayMessage {
            id: record.id.clone(),
            from_me,
            body,
            timestamp: record.created_at,
            status: if from_me { DeliveryState::Sent } else { DeliveryState::Received },
        })
    }

    fn apply_deletions(&mut self, deletions: &[Deletion]) -> usize {
        let mut ordered: Vec<&Deletion> = deletions.iter().collect();
        ordered.sort_by_key(|d| d.deleted_at);

        let mut removed = 0;
        for deletion in ordered {
            if deletion.deleted_at < self.tombstone_cursor {
                continue;
            }
            if self.tombstone(&deletion.id) {
                removed += 1;
            }
            self.tombstone_cursor = deletion.deleted_at;
        }
        removed
    }

    /// Removes `id` (if present) and remembers it so no later poll can bring
    /// it back. Returns whether a message was removed.
    pub fn tombstone(&mut self, id: &RecordId) -> bool {
        self.tombstones.insert(id.clone());
        self.remove(id)
    }

    /// Inserts keeping `(timestamp, id)` order. Equal keys keep arrival order.
    pub(crate) fn insert(&mut self, message: DisplayMessage) {
        let at = self.messages.partition_point(|m| m.sort_key() <= message.sort_key());
        self.ids.insert(message.id.clone());
        self.messages.insert(at, message);
    }

    pub(crate) fn remove(&mut self, id: &RecordId) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.messages.retain(|m| &m.id != id);
        true
    }

    /// Replaces a local placeholder with the relay-assigned id. If a poll
    /// already brought the accepted record back, the placeholder just goes.
    pub(crate) fn confirm(&mut self, placeholder: &RecordId, id: RecordId) -> Option<DisplayMessage> {
        let pos = self.messages.iter().position(|m| &m.id == placeholder)?;
        let mut message = self.messages.remove(pos);
        self.ids.remove(placeholder);

        if self.ids.contains(&id) {
            return self.get(&id).cloned();
        }
        if self.tombstones.contains(&id) {
            return None;
        }
        message.id = id;
        message.status = DeliveryState::Sent;
        self.insert(message.clone());
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_crypto::{identity::KeyPair, PublicKey};
    use dc_proto::Handle;
    use dc_store::{Identity, IdentityStore, MemoryCredentials};
    use std::sync::Arc;

    use crate::directory::PeerEntry;

    struct Pair {
        alice: ConversationSession,
        bob: ConversationSession,
        alice_pub: PublicKey,
        bob_pub: PublicKey,
    }

    fn identity(handle: &str) -> Identity {
        IdentityStore::new(Arc::new(MemoryCredentials::new())).create(handle).unwrap()
    }

    fn pair() -> Pair {
        let a = identity("alice");
        let b = identity("bob");
        let alice = ConversationSession::new(
            &a,
            PeerEntry { handle: b.handle().clone(), public_key: *b.public_key() },
        )
        .unwrap();
        let bob = ConversationSession::new(
            &b,
            PeerEntry { handle: a.handle().clone(), public_key: *a.public_key() },
        )
        .unwrap();
        Pair { alice, bob, alice_pub: *a.public_key(), bob_pub: *b.public_key() }
    }

    fn record(id: u64, from: &str, to: &str, fp: &PublicKey, ts: Millis, text: &str, s: &ConversationSession) -> MessageRecord {
        let sealed = conversation::encrypt(text.as_bytes(), s.key()).unwrap();
        MessageRecord {
            id: RecordId::from(id),
            from: Handle::parse(from).unwrap(),
            to: Handle::parse(to).unwrap(),
            ciphertext: Some(sealed.ciphertext),
            nonce: sealed.nonce.to_vec(),
            sender_fingerprint: fp.fingerprint().as_bytes().to_vec(),
            created_at: ts,
            kind: MessageKind::Text,
            blob_ref: None,
            mime: None,
            name: None,
            deleted: false,
            deleted_at: None,
        }
    }

    fn texts(t: &Timeline) -> Vec<&str> {
        t.messages().iter().filter_map(|m| m.text()).collect()
    }

    #[test]
    fn merge_orders_by_created_at_then_id_and_marks_direction() {
        let p = pair();
        let resp = PollResponse {
            messages: vec![
                record(3, "bob", "alice", &p.bob_pub, 20, "third", &p.bob),
                record(2, "alice", "bob", &p.alice_pub, 10, "second", &p.alice),
                record(1, "bob", "alice", &p.bob_pub, 10, "first", &p.bob),
            ],
            deletions: vec![],
        };
        let mut t = Timeline::new(0);
        let out = t.merge(&p.alice, &resp);
        assert_eq!(out.admitted, 3);
        assert_eq!(texts(&t), vec!["first", "second", "third"]);
        assert!(t.messages()[1].from_me);
        assert_eq!(t.messages()[1].status, DeliveryState::Sent);
        assert_eq!(t.messages()[0].status, DeliveryState::Received);
        assert_eq!(t.cursor(), 20);
    }

    #[test]
    fn cursor_ignores_other_conversations_and_future_dates() {
        let p = pair();
        let carol = KeyPair::generate().unwrap();
        let now = 1_000_000;
        let mut t = Timeline::new(0);

        let elsewhere = record(1, "carol", "alice", &carol.public, now * 50, "later", &p.bob);
        let out = t.merge_at(&p.alice, &PollResponse { messages: vec![elsewhere], deletions: vec![] }, now);
        assert_eq!(out.dropped, 1);
        assert_eq!(t.cursor(), 0);

        let skewed = record(2, "bob", "alice", &p.bob_pub, now + 60_000, "fast clock", &p.bob);
        t.merge_at(&p.alice, &PollResponse { messages: vec![skewed], deletions: vec![] }, now);
        assert_eq!(texts(&t), vec!["fast clock"]);
        assert_eq!(t.cursor(), now);

        let on_time = record(3, "bob", "alice", &p.bob_pub, now + 10, "on time", &p.bob);
        t.merge_at(&p.alice, &PollResponse { messages: vec![on_time], deletions: vec![] }, now + 20);
        assert_eq!(texts(&t), vec!["on time", "fast clock"]);
        assert_eq!(t.cursor(), now + 10);
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let p = pair();
        let resp = PollResponse {
            messages: vec![
                record(1, "bob", "alice", &p.bob_pub, 5, "hi", &p.bob),
                record(2, "alice", "bob", &p.alice_pub, 6, "yo", &p.alice),
            ],
            deletions: vec![Deletion { id: RecordId::from(1), deleted_at: 7 }],
        };
        let mut t = Timeline::new(0);
        t.merge(&p.alice, &resp);
        let snapshot = t.clone();
        let second = t.merge(&p.alice, &resp);
        assert!(!second.changed());
        assert_eq!(t, snapshot);
    }

    #[test]
    fn third_party_and_foreign_fingerprints_are_dropped() {
        let p = pair();
        let carol = KeyPair::generate().unwrap();
        let mut forged = record(2, "bob", "alice", &carol.public, 2, "forged", &p.bob);
        forged.sender_fingerprint = carol.public.fingerprint().as_bytes().to_vec();
        let resp = PollResponse {
            messages: vec![
                record(1, "carol", "alice", &carol.public, 1, "from carol", &p.bob),
                forged,
                record(3, "bob", "alice", &p.bob_pub, 3, "real", &p.bob),
            ],
            deletions: vec![],
        };
        let mut t = Timeline::new(0);
        let out = t.merge(&p.alice, &resp);
        assert_eq!(out.dropped, 2);
        assert_eq!(texts(&t), vec!["real"]);
    }

    #[test]
    fn undecryptable_record_is_dropped_not_fatal() {
        let p = pair();
        let mut bad = record(1, "bob", "alice", &p.bob_pub, 1, "hello", &p.bob);
        if let Some(ct) = bad.ciphertext.as_mut() {
            ct[0] ^= 0xFF;
        }
        let mut t = Timeline::new(0);
        let out = t.merge(&p.alice, &PollResponse { messages: vec![bad], deletions: vec![] });
        assert_eq!(out.dropped, 1);
        assert!(t.is_empty());
    }

    #[test]
    fn tombstoned_ids_are_never_resurrected() {
        let p = pair();
        let msg = record(42, "bob", "alice", &p.bob_pub, 1, "gone soon", &p.bob);
        let mut t = Timeline::new(0);
        t.merge(&p.alice, &PollResponse { messages: vec![msg.clone()], deletions: vec![] });
        assert_eq!(t.len(), 1);

        let out = t.merge(
            &p.alice,
            &PollResponse { messages: vec![], deletions: vec![Deletion { id: RecordId::from(42), deleted_at: 9 }] },
        );
        assert_eq!(out.removed, 1);
        assert_eq!(t.tombstone_cursor(), 9);

        t.merge(&p.alice, &PollResponse { messages: vec![msg], deletions: vec![] });
        assert!(t.is_empty());
        assert!(t.is_tombstoned(&RecordId::from(42)));
    }

    #[test]
    fn deletions_apply_oldest_first_and_stale_ones_are_skipped() {
        let p = pair();
        let mut t = Timeline::new(0);
        t.merge(
            &p.alice,
            &PollResponse {
                messages: vec![
                    record(1, "bob", "alice", &p.bob_pub, 1, "a", &p.bob),
                    record(2, "bob", "alice", &p.bob_pub, 2, "b", &p.bob),
                    record(3, "bob", "alice", &p.bob_pub, 3, "c", &p.bob),
                ],
                deletions: vec![
                    Deletion { id: RecordId::from(2), deleted_at: 50 },
                    Deletion { id: RecordId::from(1), deleted_at: 40 },
                ],
            },
        );
        assert_eq!(texts(&t), vec!["c"]);
        assert_eq!(t.tombstone_cursor(), 50);

        let out = t.merge(
            &p.alice,
            &PollResponse { messages: vec![], deletions: vec![Deletion { id: RecordId::from(3), deleted_at: 10 }] },
        );
        assert_eq!(out.removed, 0);
        assert_eq!(texts(&t), vec!["c"]);
    }

    #[test]
    fn confirm_replaces_placeholder_or_collapses_duplicate() {
        let p = pair();
        let mut t = Timeline::new(0);
        let placeholder = DisplayMessage {
            id: RecordId::new("local-1"),
            from_me: true,
            body: Body::Text("hi".into()),
            timestamp: 5,
            status: DeliveryState::Sending,
        };
        t.insert(placeholder.clone());
        let confirmed = t.confirm(&RecordId::new("local-1"), RecordId::from(9)).unwrap();
        assert_eq!(confirmed.status, DeliveryState::Sent);
        assert!(t.contains(&RecordId::from(9)));
        assert!(!t.contains(&RecordId::new("local-1")));

        // The poll won the race: the record is already in the timeline.
        t.insert(DisplayMessage { id: RecordId::new("local-2"), ..placeholder });
        t.merge(
            &p.alice,
            &PollResponse { messages: vec![record(10, "alice", "bob", &p.alice_pub, 5, "hi", &p.alice)], deletions: vec![] },
        );
        assert_eq!(t.len(), 3);
        t.confirm(&RecordId::new("local-2"), RecordId::from(10)).unwrap();
        assert_eq!(t.len(), 2);
    }
}
