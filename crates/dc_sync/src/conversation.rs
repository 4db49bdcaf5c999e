//! One open conversation: state machine, poll task, and the send pipeline.
//!
//! ```text
//! Idle ──open──▶ Resolving ──key found──▶ Syncing ──close──▶ Closed
//!                    │
//!                    └──404──▶ PeerNotFound ──open (retry)──▶ Resolving
//! ```
//!
//! The timeline sits behind one mutex and has exactly two writers, the
//! poll merge and the send acknowledgement. Snapshots are published on a
//! `watch` channel while the lock is held, so subscribers never see them out
//! of order.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use dc_client::{Relay, RelayError};
use dc_crypto::{
    attachment::{self, OCTET_STREAM},
    conversation, DecryptedBlob, Sealed,
};
use dc_proto::{
    api::{DeleteRequest, SendRequest},
    now_millis, Handle, MessageKind, RecordId,
};
use dc_store::Identity;

use crate::{
    config::SyncConfig,
    directory::{PeerDirectory, PeerEntry},
    error::SyncError,
    retry::{timed, with_retry},
    session::ConversationSession,
    timeline::{AttachmentHandle, Body, DeliveryState, DisplayMessage, MergeOutcome, Timeline},
};

const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Resolving,
    Syncing,
    Closed,
    PeerNotFound,
}

/// State shared with the poll task and self-destruct timers.
struct Shared {
    timeline: Mutex<Timeline>,
    updates: watch::Sender<Vec<DisplayMessage>>,
    /// Held across a poll request: at most one poll is outstanding.
    poll_gate: tokio::sync::Mutex<()>,
}

impl Shared {
    /// Applies `f`; publishes a snapshot when it reports a change.
    fn update<R>(&self, f: impl FnOnce(&mut Timeline) -> (R, bool)) -> R {
        let mut timeline = self.timeline.lock();
        let (out, changed) = f(&mut timeline);
        if changed {
            self.updates.send_replace(timeline.messages().to_vec());
        }
        out
    }

    fn merge(&self, session: &ConversationSession, response: &dc_proto::api::PollResponse) -> MergeOutcome {
        self.update(|t| {
            let outcome = t.merge(session, response);
            (outcome, outcome.changed())
        })
    }

    /// One poll + merge. `Ok(None)` when the conversation closed while the
    /// request was in flight; the response is discarded.
    async fn poll_once(
        &self,
        relay: &dyn Relay,
        session: &ConversationSession,
        config: &SyncConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<MergeOutcome>, RelayError> {
        let _gate = self.poll_gate.lock().await;
        let since = self.timeline.lock().cursor();
        let response = timed(config.request_timeout, relay.poll(session.me(), since)).await?;
        if cancel.is_cancelled() {
            debug!(event = "poll_discarded", peer = %session.peer_handle(), count = response.messages.len());
            return Ok(None);
        }
        if !response.messages.is_empty() || !response.deletions.is_empty() {
            debug!(
                event = "poll_inbox",
                peer = %session.peer_handle(),
                since,
                count = response.messages.len(),
                deletions = response.deletions.len()
            );
        }
        Ok(Some(self.merge(session, &response)))
    }
}

pub struct Conversation {
    identity: Identity,
    peer: Handle,
    relay: Arc<dyn Relay>,
    directory: Arc<PeerDirectory>,
    config: SyncConfig,
    state: watch::Sender<SessionState>,
    session: RwLock<Option<Arc<ConversationSession>>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl Conversation {
    /// A conversation in `Idle`. Nothing touches the network until `open`.
    pub fn new(
        identity: Identity,
        peer: &str,
        relay: Arc<dyn Relay>,
        directory: Arc<PeerDirectory>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let peer = Handle::parse(peer).map_err(|e| SyncError::Validation(e.to_string()))?;
        if &peer == identity.handle() {
            return Err(SyncError::Validation("cannot open a conversation with yourself".into()));
        }
        let timeline = Timeline::new(config.initial_cursor.resolve(now_millis()));
        let (updates, _) = watch::channel(Vec::new());
        let (state, _) = watch::channel(SessionState::Idle);
        Ok(Self {
            identity,
            peer,
            relay,
            directory,
            config,
            state,
            session: RwLock::new(None),
            shared: Arc::new(Shared {
                timeline: Mutex::new(timeline),
                updates,
                poll_gate: tokio::sync::Mutex::new(()),
            }),
            cancel: CancellationToken::new(),
            poll_task: Mutex::new(None),
        })
    }

    pub fn peer(&self) -> &Handle {
        &self.peer
    }

    /// The resolved peer, once `open` has succeeded.
    pub fn peer_entry(&self) -> Option<PeerEntry> {
        self.session.read().as_ref().map(|s| s.peer().clone())
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Receives a fresh timeline snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<DisplayMessage>> {
        self.shared.updates.subscribe()
    }

    pub fn timeline(&self) -> Vec<DisplayMessage> {
        self.shared.timeline.lock().messages().to_vec()
    }

    pub fn cursor(&self) -> dc_proto::Millis {
        self.shared.timeline.lock().cursor()
    }

    /// `Closed` is terminal: nothing moves a conversation out of it.
    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == SessionState::Closed || *current == next {
                return false;
            }
            debug!(event = "session_state", peer = %self.peer, from = ?*current, to = ?next);
            *current = next;
            true
        });
    }

    /// Claims the Resolving state in one step, so concurrent `open` calls
    /// cannot both proceed. `Ok(false)` when the conversation is already
    /// syncing.
    fn claim_resolving(&self) -> Result<bool, SyncError> {
        let mut refused = None;
        let claimed = self.state.send_if_modified(|current| match *current {
            from @ (SessionState::Idle | SessionState::PeerNotFound) => {
                debug!(event = "session_state", peer = %self.peer, from = ?from, to = ?SessionState::Resolving);
                *current = SessionState::Resolving;
                true
            }
            SessionState::Syncing => false,
            SessionState::Resolving => {
                refused = Some(SyncError::Validation("conversation is already opening".into()));
                false
            }
            SessionState::Closed => {
                refused = Some(SyncError::Closed);
                false
            }
        });
        match refused {
            Some(e) => Err(e),
            None => Ok(claimed),
        }
    }

    /// Idle / PeerNotFound → Resolving → Syncing, then starts polling.
    /// Opening an already syncing conversation is a no-op.
    pub async fn open(&self) -> Result<(), SyncError> {
        if !self.claim_resolving()? {
            return Ok(());
        }
        let entry = match self.directory.resolve(&self.peer).await {
            Ok(entry) => entry,
            Err(RelayError::PeerNotFound(_)) => {
                warn!(event = "peer_not_found", peer = %self.peer);
                self.set_state(SessionState::PeerNotFound);
                return Err(SyncError::PeerNotFound(self.peer.to_string()));
            }
            Err(e) => {
                warn!(event = "peer_resolve_failed", peer = %self.peer, error = %e);
                self.set_state(SessionState::Idle);
                return Err(e.into());
            }
        };
        if self.cancel.is_cancelled() {
            return Err(SyncError::Closed);
        }

        let session = match ConversationSession::new(&self.identity, entry) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                self.set_state(SessionState::Idle);
                return Err(e.into());
            }
        };
        *self.session.write() = Some(session.clone());

        let task = self.spawn_poll_loop(session.clone());
        *self.poll_task.lock() = Some(task);
        self.set_state(SessionState::Syncing);
        info!(
            event = "conversation_open",
            peer = %self.peer,
            fingerprint = %session.peer().display_fingerprint(),
            cursor = self.cursor()
        );
        Ok(())
    }

    /// Stops the poll task. A poll already in flight completes and its
    /// result is dropped.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.set_state(SessionState::Closed);
        // The task exits on its own once it observes the token.
        drop(self.poll_task.lock().take());
        info!(event = "conversation_closed", peer = %self.peer);
    }

    fn session(&self) -> Result<Arc<ConversationSession>, SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Closed);
        }
        self.session
            .read()
            .clone()
            .ok_or_else(|| SyncError::Validation("conversation is not open".into()))
    }

    fn spawn_poll_loop(&self, session: Arc<ConversationSession>) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let relay = self.relay.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                let delay = match shared.poll_once(relay.as_ref(), &session, &config, &cancel).await {
                    Ok(Some(_)) => {
                        failures = 0;
                        config.poll_interval
                    }
                    Ok(None) => break,
                    Err(e) if e.is_transient() => {
                        failures = failures.saturating_add(1);
                        let delay = config.retry.delay_for(failures);
                        warn!(
                            event = "poll_failed",
                            peer = %session.peer_handle(),
                            attempt = failures,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e
                        );
                        delay
                    }
                    Err(e) => {
                        error!(event = "poll_rejected", peer = %session.peer_handle(), error = %e);
                        config.retry.max_delay
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            debug!(event = "poll_loop_stopped", peer = %session.peer_handle());
        })
    }

    /// Polls once now, outside the schedule. Waits for any poll already in
    /// flight rather than issuing a second one concurrently.
    pub async fn poll_now(&self) -> Result<MergeOutcome, SyncError> {
        let session = self.session()?;
        self.shared
            .poll_once(self.relay.as_ref(), &session, &self.config, &self.cancel)
            .await?
            .ok_or(SyncError::Closed)
    }

    // ── Sending ─────────────────────────────────────────────────────────────

    fn request(&self, session: &ConversationSession, sealed: Sealed, kind: MessageKind) -> SendRequest {
        SendRequest {
            from: session.me().clone(),
            to: session.peer_handle().clone(),
            ciphertext: Some(sealed.ciphertext),
            nonce: sealed.nonce.to_vec(),
            sender_fingerprint: session.my_fingerprint().as_bytes().to_vec(),
            timestamp: now_millis(),
            kind,
            blob_ref: None,
            mime: None,
            name: None,
        }
    }

    /// Placeholder in, submit, then confirm or roll back.
    async fn submit(&self, req: SendRequest, body: Body) -> Result<DisplayMessage, SyncError> {
        req.validate().map_err(RelayError::from)?;

        let placeholder = DisplayMessage {
            id: RecordId::new(format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())),
            from_me: true,
            body,
            timestamp: req.timestamp,
            status: DeliveryState::Sending,
        };
        let placeholder_id = placeholder.id.clone();
        self.shared.update(|t| {
            t.insert(placeholder.clone());
            ((), true)
        });

        info!(
            event = "send_message_start",
            peer = %req.to,
            kind = ?req.kind,
            ciphertext_len = req.ciphertext.as_ref().map_or(0, Vec::len)
        );

        let relay = self.relay.as_ref();
        let result = with_retry("send", &self.config.retry, self.config.request_timeout, || relay.send(&req)).await;

        match result {
            Ok(id) => {
                let confirmed = self.shared.update(|t| (t.confirm(&placeholder_id, id.clone()), true));
                info!(event = "send_message_ok", peer = %req.to, record_id = %id);
                Ok(confirmed.unwrap_or(DisplayMessage { id, status: DeliveryState::Sent, ..placeholder }))
            }
            Err(e) => {
                self.shared.update(|t| {
                    let removed = t.remove(&placeholder_id);
                    ((), removed)
                });
                error!(event = "send_message_failed", peer = %req.to, error = %e);
                Err(e.into())
            }
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<DisplayMessage, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::Validation("message is empty".into()));
        }
        let session = self.session()?;
        let sealed = conversation::encrypt(text.as_bytes(), session.key())?;
        let req = self.request(&session, sealed, MessageKind::Text);
        self.submit(req, Body::Text(text.to_owned())).await
    }

    /// `send_text`, then a best-effort remote delete after
    /// `self_destruct_after`. The local copy goes either way.
    pub async fn send_text_ephemeral(&self, text: &str) -> Result<DisplayMessage, SyncError> {
        let message = self.send_text(text).await?;
        self.schedule_self_destruct(message.id.clone())?;
        Ok(message)
    }

    fn schedule_self_destruct(&self, id: RecordId) -> Result<JoinHandle<()>, SyncError> {
        let session = self.session()?;
        let shared = self.shared.clone();
        let relay = self.relay.clone();
        let after = self.config.self_destruct_after;
        let timeout = self.config.request_timeout;

        debug!(event = "self_destruct_scheduled", record_id = %id, after_ms = after.as_millis() as u64);
        Ok(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let req = DeleteRequest { id: id.clone(), requester: session.me().clone() };
            match timed(timeout, relay.delete(&req)).await {
                Ok(()) => debug!(event = "self_destruct_deleted", record_id = %id),
                Err(e) => warn!(event = "self_destruct_remote_failed", record_id = %id, error = %e),
            }
            shared.update(|t| ((), t.tombstone(&id)));
        }))
    }

    /// Encrypts `bytes` as one blob, uploads it, then sends a record pointing
    /// at it. `mime` is passed through as declared; when absent the receiver
    /// sniffs the decrypted bytes.
    pub async fn send_attachment(
        &self,
        bytes: &[u8],
        name: Option<&str>,
        mime: Option<&str>,
    ) -> Result<DisplayMessage, SyncError> {
        if bytes.is_empty() {
            return Err(SyncError::Validation("attachment is empty".into()));
        }
        let session = self.session()?;
        let declared = mime.map(str::trim).filter(|m| !m.is_empty());
        let kind = MessageKind::from_mime(
            declared.or_else(|| attachment::sniff_mime(bytes)).unwrap_or(OCTET_STREAM),
        );

        let blob = attachment::encrypt_blob(bytes, session.key())?.to_wire();
        let relay = self.relay.as_ref();
        let blob_ref = with_retry("upload", &self.config.retry, self.config.request_timeout, || {
            relay.upload(blob.clone(), name)
        })
        .await?;
        info!(event = "attachment_uploaded", peer = %self.peer, blob_id = %blob_ref, len = blob.len());

        let caption = conversation::encrypt(b"", session.key())?;
        let mut req = self.request(&session, caption, kind);
        req.blob_ref = Some(blob_ref.clone());
        req.mime = declared.map(str::to_owned);
        req.name = name.map(str::to_owned);

        let body = Body::Attachment(AttachmentHandle {
            blob_ref,
            kind,
            mime: req.mime.clone(),
            name: req.name.clone(),
            caption: String::new(),
        });
        self.submit(req, body).await
    }

    /// Downloads and decrypts an attachment. Decryption failure is returned:
    /// the user asked for this file.
    pub async fn fetch_attachment(&self, message: &DisplayMessage) -> Result<DecryptedBlob, SyncError> {
        let handle = message
            .attachment()
            .ok_or_else(|| SyncError::Validation("message has no attachment".into()))?;
        let session = self.session()?;
        let relay = self.relay.as_ref();
        let wire = with_retry("download", &self.config.retry, self.config.request_timeout, || {
            relay.download(&handle.blob_ref)
        })
        .await?;
        let blob = attachment::decrypt_blob_wire(&wire, session.key(), handle.mime.as_deref()).map_err(|e| {
            error!(event = "attachment_decrypt_failed", blob_id = %handle.blob_ref, len = wire.len());
            e
        })?;
        info!(
            event = "attachment_fetched",
            blob_id = %handle.blob_ref,
            len = blob.bytes.len(),
            mime = %blob.mime,
            sniffed = blob.sniffed
        );
        Ok(blob)
    }

    /// Deletes a message for both participants: remote delete, then a local
    /// tombstone. A message the relay no longer has is still removed locally
    /// and reported as `NotFound`.
    pub async fn delete(&self, id: &RecordId) -> Result<(), SyncError> {
        if id.as_str().starts_with(LOCAL_ID_PREFIX) {
            return Err(SyncError::Validation("message is still sending".into()));
        }
        let session = self.session()?;
        let req = DeleteRequest { id: id.clone(), requester: session.me().clone() };
        let relay = self.relay.as_ref();
        let result = with_retry("delete", &self.config.retry, self.config.request_timeout, || {
            relay.delete(&req)
        })
        .await;

        match result {
            Ok(()) => {
                self.shared.update(|t| ((), t.tombstone(id)));
                info!(event = "message_deleted", peer = %self.peer, record_id = %id);
                Ok(())
            }
            Err(RelayError::NotFound(m)) => {
                self.shared.update(|t| ((), t.tombstone(id)));
                warn!(event = "message_delete_not_found", peer = %self.peer, record_id = %id);
                Err(SyncError::NotFound(m))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
