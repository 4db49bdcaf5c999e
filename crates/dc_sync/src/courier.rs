//! Entry point for front-ends: one identity, one relay, one shared peer
//! directory, any number of conversations.

use std::sync::Arc;

use tracing::info;

use dc_client::Relay;
use dc_proto::{api::RegisterRequest, Handle};
use dc_store::{Identity, IdentityStore};

use crate::{
    config::SyncConfig,
    conversation::Conversation,
    directory::{PeerDirectory, PeerEntry},
    error::SyncError,
};

pub struct Courier {
    identity: Identity,
    relay: Arc<dyn Relay>,
    directory: Arc<PeerDirectory>,
    config: SyncConfig,
}

impl Courier {
    pub fn new(identity: Identity, relay: Arc<dyn Relay>, config: SyncConfig) -> Self {
        let directory = Arc::new(PeerDirectory::new(relay.clone()));
        Self { identity, relay, directory, config }
    }

    /// Loads the device identity; `SyncError::Authentication` if there is none.
    pub fn from_store(store: &IdentityStore, relay: Arc<dyn Relay>, config: SyncConfig) -> Result<Self, SyncError> {
        Ok(Self::new(store.require()?, relay, config))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Publishes this identity's public key under its handle.
    pub async fn register(&self) -> Result<(), SyncError> {
        let req = RegisterRequest {
            handle: self.identity.handle().clone(),
            public_key: *self.identity.public_key(),
        };
        self.relay.register(&req).await?;
        info!(
            event = "identity_registered",
            handle = %req.handle,
            fingerprint = %self.identity.fingerprint()
        );
        Ok(())
    }

    /// Fresh directory lookup, bypassing and then refreshing the cache.
    pub async fn lookup(&self, handle: &str) -> Result<PeerEntry, SyncError> {
        let handle = Handle::parse(handle).map_err(|e| SyncError::Validation(e.to_string()))?;
        self.directory.invalidate(&handle);
        Ok(self.directory.resolve(&handle).await?)
    }

    /// A conversation with `peer` in `Idle`.
    pub fn conversation(&self, peer: &str) -> Result<Conversation, SyncError> {
        Conversation::new(
            self.identity.clone(),
            peer,
            self.relay.clone(),
            self.directory.clone(),
            self.config.clone(),
        )
    }

    /// `conversation` + `open`.
    pub async fn open(&self, peer: &str) -> Result<Conversation, SyncError> {
        let conversation = self.conversation(peer)?;
        conversation.open().await?;
        Ok(conversation)
    }
}
