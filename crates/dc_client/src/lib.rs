//! dc_client: Relay client for Darklock Courier
//!
//! No cryptographic logic lives here. The client marshals requests,
//! normalizes handles, rejects malformed requests locally, and maps relay
//! status codes onto `RelayError`.
//!
//! # Modules
//! - `relay`: the `Relay` trait (wire contract)
//! - `http`: `HttpRelay`, reqwest-backed
//! - `memory`: `MemoryRelay`, an in-process relay for tests and demos
//! - `error`: `RelayError`

pub mod error;
pub mod http;
pub mod memory;
pub mod relay;

pub use error::RelayError;
pub use http::HttpRelay;
pub use memory::MemoryRelay;
pub use relay::Relay;
