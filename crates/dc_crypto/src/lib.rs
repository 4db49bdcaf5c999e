//! dc_crypto: Darklock Courier cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Everything here is synchronous and free of I/O.
//!
//! # Module layout
//! - `identity`: X25519 identity keypair, public key, fingerprints
//! - `conversation`: per-peer key agreement + message encrypt/decrypt
//! - `attachment`: whole-file blob encryption + MIME sniffing
//! - `sealed`: passphrase-sealed export of key material
//! - `aead`: XChaCha20-Poly1305 helpers
//! - `kdf`: Argon2id / HKDF key derivation
//! - `encoding`: canonical base64 for text boundaries
//! - `error`: unified error type

pub mod aead;
pub mod attachment;
pub mod conversation;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod sealed;

pub use attachment::DecryptedBlob;
pub use conversation::{ConversationKey, Sealed};
pub use error::CryptoError;
pub use identity::{Fingerprint, KeyPair, PublicKey, SecretKey};
pub use sealed::SealedBlob;
