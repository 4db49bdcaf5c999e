//! dc_proto: Wire types and serialisation for the Darklock Courier relay
//!
//! Every body is JSON; every binary field is a standard base64 string at the
//! boundary (see `dc_crypto::encoding`). Handles are normalized on the way in,
//! so the relay's identifier space is case-insensitive for callers.
//!
//! # Modules
//! - `envelope`: Message records and tombstones (what the relay sees)
//! - `api`: Request/response bodies shared between clients and relays
//! - `handle`: Handle normalisation

pub mod api;
pub mod envelope;
pub mod error;
pub mod handle;

pub use envelope::{now_millis, Deletion, MessageKind, MessageRecord, Millis, RecordId};
pub use error::ProtoError;
pub use handle::{normalize_handle, Handle};
