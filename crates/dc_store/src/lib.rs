//! dc_store: Identity persistence for Darklock Courier
//!
//! Exactly one identity per device. It lives in the platform credential store
//! when one is available; the file backend is a documented, weaker fallback.
//!
//! # Modules
//! - `identity`: `Identity` and `IdentityStore` (create/load/export/import/reset)
//! - `credentials`: `CredentialStore` trait and its keyring/file/memory backends
//! - `error`: `StoreError`

pub mod credentials;
pub mod error;
pub mod identity;

pub use credentials::{CredentialStore, FileCredentials, KeyringCredentials, MemoryCredentials};
pub use error::StoreError;
pub use identity::{Identity, IdentityStore};
