//! In-process relay.
//!
//! Implements the same observable contract as a real relay: handle
//! normalisation, request validation, monotonic id assignment, participant
//! scoping, `since` filtering, tombstones moving records from `messages` to
//! `deletions`, and an opaque blob store. Used by tests and offline demos.
//!
//! A few hooks (`set_offline`, `set_latency`, `fail_next`, `tamper`,
//! `inject`) let tests model the failures a real network and a misbehaving
//! relay produce.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use dc_crypto::PublicKey;
use dc_proto::{
    api::{DeleteRequest, LookupResponse, PollResponse, RegisterRequest, SendRequest},
    now_millis, Deletion, Handle, MessageRecord, Millis, RecordId,
};

use crate::{error::RelayError, relay::Relay};

type Clock = Arc<dyn Fn() -> Millis + Send + Sync>;

#[derive(Default)]
struct State {
    next_id: u64,
    directory: HashMap<Handle, PublicKey>,
    records: Vec<MessageRecord>,
    blobs: HashMap<String, Vec<u8>>,
    offline: bool,
    latency: Duration,
}

pub struct MemoryRelay {
    state: Mutex<State>,
    clock: Clock,
    fail_next: AtomicU32,
    polls: AtomicU64,
    lookups: AtomicU64,
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(now_millis))
    }

    /// Tombstone timestamps come from `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            state: Mutex::new(State { next_id: 1, ..State::default() }),
            clock,
            fail_next: AtomicU32::new(0),
            polls: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    /// While offline every call fails with `RelayError::Network`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Every call waits `latency` before it is served.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// The next `n` calls fail with `RelayError::Network`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of poll requests served, including failed ones.
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Number of key lookups served, including failed ones.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Mutates a stored record in place, as a faulty or hostile relay might.
    /// Returns false if no record has that id.
    pub fn tamper(&self, id: &RecordId, f: impl FnOnce(&mut MessageRecord)) -> bool {
        let mut state = self.state.lock();
        match state.records.iter_mut().find(|r| &r.id == id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Same as `tamper`, for a stored blob.
    pub fn tamper_blob(&self, id: &str, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.state.lock().blobs.get_mut(id) {
            Some(blob) => {
                f(blob);
                true
            }
            None => false,
        }
    }

    /// Stores a record verbatim (bypassing validation) under a fresh id.
    pub fn inject(&self, mut record: MessageRecord) -> RecordId {
        let mut state = self.state.lock();
        record.id = RecordId::from(state.next_id);
        state.next_id += 1;
        let id = record.id.clone();
        state.records.push(record);
        id
    }

    /// Every stored record, tombstoned or not.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.state.lock().records.clone()
    }

    async fn gate(&self) -> Result<(), RelayError> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.state.lock().offline {
            return Err(RelayError::Network("relay offline".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RelayError::Network("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn register(&self, req: &RegisterRequest) -> Result<(), RelayError> {
        self.gate().await?;
        req.validate()?;
        self.state.lock().directory.insert(req.handle.clone(), req.public_key);
        Ok(())
    }

    async fn lookup(&self, handle: &Handle) -> Result<LookupResponse, RelayError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let state = self.state.lock();
        let public_key = state
            .directory
            .get(handle)
            .copied()
            .ok_or_else(|| RelayError::PeerNotFound(handle.to_string()))?;
        Ok(LookupResponse { handle: handle.clone(), public_key })
    }

    async fn send(&self, req: &SendRequest) -> Result<RecordId, RelayError> {
        self.gate().await?;
        req.validate()?;
        let mut state = self.state.lock();
        let id = RecordId::from(state.next_id);
        state.next_id += 1;
        state.records.push(req.clone().into_record(id.clone()));
        debug!(event = "memory_relay_stored", record_id = %id, from = %req.from, to = %req.to);
        Ok(id)
    }

    async fn poll(&self, handle: &Handle, since: Millis) -> Result<PollResponse, RelayError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let state = self.state.lock();
        let mut out = PollResponse::default();
        for record in state.records.iter().filter(|r| r.involves(handle)) {
            match (record.deleted, record.deleted_at) {
                (true, Some(at)) if at >= since => out.deletions.push(Deletion {
                    id: record.id.clone(),
                    deleted_at: at,
                }),
                (true, _) => {}
                (false, _) if record.created_at >= since => out.messages.push(record.clone()),
                (false, _) => {}
            }
        }
        Ok(out)
    }

    async fn delete(&self, req: &DeleteRequest) -> Result<(), RelayError> {
        self.gate().await?;
        req.validate()?;
        let now = (self.clock)();
        let mut state = self.state.lock();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == req.id && r.involves(&req.requester))
            .ok_or_else(|| RelayError::NotFound(format!("message {}", req.id)))?;
        if !record.deleted {
            record.deleted = true;
            record.deleted_at = Some(now);
        }
        Ok(())
    }

    async fn upload(&self, bytes: Vec<u8>, _name: Option<&str>) -> Result<String, RelayError> {
        self.gate().await?;
        if bytes.is_empty() {
            return Err(RelayError::Validation("no file part".into()));
        }
        let id = Uuid::new_v4().to_string();
        self.state.lock().blobs.insert(id.clone(), bytes);
        Ok(id)
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>, RelayError> {
        self.gate().await?;
        self.state
            .lock()
            .blobs
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("blob {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_crypto::KeyPair;
    use dc_proto::MessageKind;

    fn h(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    fn msg(from: &str, to: &str, ts: Millis) -> SendRequest {
        SendRequest {
            from: h(from),
            to: h(to),
            ciphertext: Some(vec![7; 20]),
            nonce: vec![0; 24],
            sender_fingerprint: vec![1; 8],
            timestamp: ts,
            kind: MessageKind::Text,
            blob_ref: None,
            mime: None,
            name: None,
        }
    }

    #[tokio::test]
    async fn register_then_lookup_is_case_insensitive() {
        let relay = MemoryRelay::new();
        let kp = KeyPair::generate().unwrap();
        relay
            .register(&RegisterRequest { handle: h("Alice"), public_key: kp.public })
            .await
            .unwrap();
        let found = relay.lookup(&h(" ALICE")).await.unwrap();
        assert_eq!(found.public_key, kp.public);
        assert!(matches!(relay.lookup(&h("bob")).await, Err(RelayError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_send_validates() {
        let relay = MemoryRelay::new();
        let a = relay.send(&msg("alice", "bob", 1)).await.unwrap();
        let b = relay.send(&msg("bob", "alice", 2)).await.unwrap();
        assert!(a < b);
        assert!(matches!(relay.send(&msg("alice", "ALICE", 3)).await, Err(RelayError::Validation(_))));
    }

    #[tokio::test]
    async fn poll_is_scoped_to_participant_and_since() {
        let relay = MemoryRelay::new();
        relay.send(&msg("alice", "bob", 10)).await.unwrap();
        relay.send(&msg("carol", "dave", 20)).await.unwrap();
        relay.send(&msg("bob", "alice", 30)).await.unwrap();

        let all = relay.poll(&h("bob"), 0).await.unwrap();
        assert_eq!(all.messages.len(), 2);
        let recent = relay.poll(&h("bob"), 30).await.unwrap();
        assert_eq!(recent.messages.len(), 1);
        assert_eq!(recent.messages[0].created_at, 30);
    }

    #[tokio::test]
    async fn delete_moves_record_to_deletions() {
        let relay = MemoryRelay::with_clock(Arc::new(|| 500i64));
        let id = relay.send(&msg("alice", "bob", 10)).await.unwrap();

        let stranger = DeleteRequest { id: id.clone(), requester: h("carol") };
        assert!(matches!(relay.delete(&stranger).await, Err(RelayError::NotFound(_))));

        relay.delete(&DeleteRequest { id: id.clone(), requester: h("Alice") }).await.unwrap();
        let polled = relay.poll(&h("bob"), 0).await.unwrap();
        assert!(polled.messages.is_empty());
        assert_eq!(polled.deletions, vec![Deletion { id, deleted_at: 500 }]);

        assert!(relay.poll(&h("bob"), 501).await.unwrap().deletions.is_empty());
    }

    #[tokio::test]
    async fn blobs_roundtrip_and_unknown_ids_are_not_found() {
        let relay = MemoryRelay::new();
        let id = relay.upload(vec![1, 2, 3], Some("a.bin")).await.unwrap();
        assert_eq!(relay.download(&id).await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(relay.download("nope").await, Err(RelayError::NotFound(_))));
        assert!(matches!(relay.upload(vec![], None).await, Err(RelayError::Validation(_))));
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_counted() {
        let relay = MemoryRelay::new();
        relay.fail_next(2);
        assert!(relay.poll(&h("a"), 0).await.unwrap_err().is_transient());
        assert!(relay.poll(&h("a"), 0).await.unwrap_err().is_transient());
        assert!(relay.poll(&h("a"), 0).await.is_ok());
        assert_eq!(relay.poll_count(), 3);

        relay.set_offline(true);
        assert!(matches!(relay.send(&msg("a", "b", 1)).await, Err(RelayError::Network(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_every_call() {
        let relay = MemoryRelay::new();
        relay.set_latency(Duration::from_millis(300));
        let started = tokio::time::Instant::now();
        assert!(matches!(relay.lookup(&h("nobody")).await, Err(RelayError::PeerNotFound(_))));
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(relay.lookup_count(), 1);
    }
}
