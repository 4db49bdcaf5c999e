//! dc_sync: Conversation sync for Darklock Courier
//!
//! Turns a stream of polled, possibly duplicated, possibly out-of-order
//! ciphertext records into one ordered timeline per peer, with deletions
//! propagated as tombstones.
//!
//! # Modules
//! - `courier`: `Courier`: identity + relay + peer directory, opens conversations
//! - `conversation`: `Conversation`: state machine, poll task, send pipeline
//! - `timeline`: `Timeline` and the poll merge
//! - `session`: `ConversationSession`: the explicit per-peer context
//! - `directory`: `PeerDirectory`: shared public-key cache
//! - `config`: `SyncConfig`, `RetryPolicy`, `InitialCursor`
//! - `error`: `SyncError`
//!
//! Isolation between conversations rests on two checks during merge: the
//! directed (from, to) pair, and the 8-byte sender fingerprint. The
//! fingerprint is a heuristic, not a cryptographic binding. A relay that
//! scopes polls too broadly is caught only as far as that prefix match goes.

pub mod config;
pub mod conversation;
pub mod courier;
pub mod directory;
pub mod error;
mod retry;
pub mod session;
pub mod timeline;

pub use config::{InitialCursor, RetryPolicy, SyncConfig};
pub use conversation::{Conversation, SessionState};
pub use courier::Courier;
pub use directory::{PeerDirectory, PeerEntry};
pub use error::SyncError;
pub use session::ConversationSession;
pub use timeline::{AttachmentHandle, Body, DeliveryState, DisplayMessage, MergeOutcome, Timeline};
