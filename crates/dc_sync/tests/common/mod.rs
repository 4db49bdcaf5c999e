#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use dc_client::MemoryRelay;
use dc_store::{IdentityStore, MemoryCredentials};
use dc_sync::{Conversation, Courier, DisplayMessage, InitialCursor, RetryPolicy, SyncConfig};

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(1),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
        initial_cursor: InitialCursor::Epoch,
        self_destruct_after: Duration::from_secs(5),
    }
}

pub async fn party_with(relay: &Arc<MemoryRelay>, handle: &str, config: SyncConfig) -> Courier {
    let identity = IdentityStore::new(Arc::new(MemoryCredentials::new()))
        .create(handle)
        .unwrap();
    let courier = Courier::new(identity, relay.clone(), config);
    courier.register().await.unwrap();
    courier
}

pub async fn party(relay: &Arc<MemoryRelay>, handle: &str) -> Courier {
    party_with(relay, handle, fast_config()).await
}

/// Waits (in virtual time) until the timeline satisfies `pred`.
pub async fn wait_until(
    conversation: &Conversation,
    pred: impl Fn(&[DisplayMessage]) -> bool,
) -> Vec<DisplayMessage> {
    let mut rx = conversation.subscribe();
    let waited = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.unwrap();
        }
    })
    .await;
    match waited {
        Ok(snapshot) => snapshot,
        Err(_) => panic!("timeline never matched; last: {:?}", conversation.timeline()),
    }
}

pub fn texts(messages: &[DisplayMessage]) -> Vec<&str> {
    messages.iter().filter_map(|m| m.text()).collect()
}
