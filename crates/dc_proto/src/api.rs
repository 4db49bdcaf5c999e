//! API request/response types shared between clients and relays.
//! These map directly to JSON bodies on the wire.
//!
//! `validate()` on each request mirrors the relay's 400 rules so a client
//! can reject a malformed request without a network round trip.

use serde::{Deserialize, Serialize};

use dc_crypto::{encoding, PublicKey};

use crate::{
    envelope::{Deletion, MessageKind, MessageRecord, Millis, RecordId},
    error::ProtoError,
    handle::Handle,
};

// ── Directory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub handle: Handle,
    pub public_key: PublicKey,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.handle.is_empty() {
            return Err(ProtoError::Validation("handle is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub handle: Handle,
    pub public_key: PublicKey,
}

// ── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub from: Handle,
    pub to: Handle,
    #[serde(default, with = "encoding::serde_b64_opt", skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<Vec<u8>>,
    #[serde(with = "encoding::serde_b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "encoding::serde_b64")]
    pub sender_fingerprint: Vec<u8>,
    pub timestamp: Millis,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SendRequest {
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.from.is_empty() || self.to.is_empty() {
            return Err(ProtoError::Validation("from and to are required".into()));
        }
        if self.from == self.to {
            return Err(ProtoError::Validation("cannot send to self".into()));
        }
        let has_ciphertext = self.ciphertext.as_ref().is_some_and(|c| !c.is_empty());
        let has_blob = self.blob_ref.as_ref().is_some_and(|b| !b.trim().is_empty());
        if !has_ciphertext && !has_blob {
            return Err(ProtoError::Validation("ciphertext or blobRef is required".into()));
        }
        if self.nonce.is_empty() {
            return Err(ProtoError::Validation("nonce is required".into()));
        }
        if self.sender_fingerprint.is_empty() {
            return Err(ProtoError::Validation("senderFingerprint is required".into()));
        }
        Ok(())
    }

    /// The record a relay stores on acceptance.
    pub fn into_record(self, id: RecordId) -> MessageRecord {
        MessageRecord {
            id,
            from: self.from,
            to: self.to,
            ciphertext: self.ciphertext,
            nonce: self.nonce,
            sender_fingerprint: self.sender_fingerprint,
            created_at: self.timestamp,
            kind: self.kind,
            blob_ref: self.blob_ref,
            mime: self.mime,
            name: self.name,
            deleted: false,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAccepted {
    #[serde(default = "ok_true")]
    pub ok: bool,
    pub id: RecordId,
}

/// `GET /messages/{handle}?since=…`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    #[serde(default)]
    pub deletions: Vec<Deletion>,
}

impl PollResponse {
    /// Largest `created_at` / `deleted_at` in the response, if any.
    pub fn high_watermark(&self) -> Option<Millis> {
        let created = self.messages.iter().map(|m| m.created_at);
        let deleted = self.deletions.iter().map(|d| d.deleted_at);
        created.chain(deleted).max()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub id: RecordId,
    pub requester: Handle,
}

impl DeleteRequest {
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.id.as_str().trim().is_empty() || self.requester.is_empty() {
            return Err(ProtoError::Validation("id and requester are required".into()));
        }
        Ok(())
    }
}

// ── Blobs ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
}

// ── Common ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn ok_true() -> bool {
    true
}
