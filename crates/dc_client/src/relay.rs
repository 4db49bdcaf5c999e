//! The relay wire contract as an async trait.
//!
//! | Operation | Route                              | Errors                         |
//! |-----------|------------------------------------|--------------------------------|
//! | register  | `POST /api/register`               | Validation                     |
//! | lookup    | `GET  /api/keys/{handle}`          | PeerNotFound                   |
//! | send      | `POST /api/messages`               | Validation                     |
//! | poll      | `GET  /api/messages/{handle}?since`|                                |
//! | delete    | `POST /api/messages/delete`        | NotFound                       |
//! | upload    | `POST /api/blobs` (multipart)      | Validation                     |
//! | download  | `GET  /api/blobs/{id}`             | NotFound                       |
//!
//! Any operation may also fail with `Network`. Implementations normalize
//! handles and validate requests before anything leaves the process.

use async_trait::async_trait;

use dc_proto::{
    api::{DeleteRequest, LookupResponse, PollResponse, RegisterRequest, SendRequest},
    Handle, Millis, RecordId,
};

use crate::error::RelayError;

#[async_trait]
pub trait Relay: Send + Sync {
    async fn register(&self, req: &RegisterRequest) -> Result<(), RelayError>;

    async fn lookup(&self, handle: &Handle) -> Result<LookupResponse, RelayError>;

    /// Returns the id the relay assigned to the stored record.
    async fn send(&self, req: &SendRequest) -> Result<RecordId, RelayError>;

    /// Records and tombstones involving `handle` at or after `since`.
    async fn poll(&self, handle: &Handle, since: Millis) -> Result<PollResponse, RelayError>;

    async fn delete(&self, req: &DeleteRequest) -> Result<(), RelayError>;

    /// Stores an opaque blob and returns its id.
    async fn upload(&self, bytes: Vec<u8>, name: Option<&str>) -> Result<String, RelayError>;

    async fn download(&self, id: &str) -> Result<Vec<u8>, RelayError>;
}
