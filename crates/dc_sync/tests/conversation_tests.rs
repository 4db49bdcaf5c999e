mod common;

use std::{sync::Arc, time::Duration};

use common::{fast_config, party, party_with, texts, wait_until};
use dc_client::{MemoryRelay, Relay};
use dc_crypto::conversation;
use dc_proto::{api::SendRequest, now_millis, Handle, MessageKind, RecordId};
use dc_sync::{ConversationSession, DeliveryState, InitialCursor, RetryPolicy, SessionState, SyncError};

#[tokio::test(start_paused = true)]
async fn unknown_peer_halts_setup_until_retried() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;

    let conv = alice.conversation("dave").unwrap();
    assert_eq!(conv.state(), SessionState::Idle);
    assert!(matches!(conv.open().await, Err(SyncError::PeerNotFound(h)) if h == "dave"));
    assert_eq!(conv.state(), SessionState::PeerNotFound);
    assert!(matches!(conv.send_text("hi").await, Err(SyncError::Validation(_))));

    party(&relay, "dave").await;
    conv.open().await.unwrap();
    assert_eq!(conv.state(), SessionState::Syncing);
    conv.send_text("hi").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cannot_talk_to_yourself() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    assert!(matches!(alice.conversation(" ALICE "), Err(SyncError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn close_stops_polling_and_rejects_sends() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    party(&relay, "bob").await;

    let conv = alice.open("bob").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(relay.poll_count() >= 5);

    conv.close();
    assert_eq!(conv.state(), SessionState::Closed);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let polls_at_close = relay.poll_count();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(relay.poll_count(), polls_at_close);
    assert!(matches!(conv.send_text("late").await, Err(SyncError::Closed)));
    assert!(matches!(conv.open().await, Err(SyncError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn own_messages_come_back_once() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    party(&relay, "bob").await;

    let conv = alice.open("bob").await.unwrap();
    let sent = conv.send_text("echo").await.unwrap();
    conv.poll_now().await.unwrap();
    conv.poll_now().await.unwrap();

    let timeline = conv.timeline();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].id, sent.id);
    assert!(timeline[0].from_me);
    assert_eq!(timeline[0].status, DeliveryState::Sent);
}

#[tokio::test(start_paused = true)]
async fn failed_send_removes_placeholder_and_surfaces_network_error() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    party(&relay, "bob").await;
    let conv = alice.open("bob").await.unwrap();

    relay.set_offline(true);
    let err = conv.send_text("lost").await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert!(err.is_transient());
    assert!(conv.timeline().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_send_failure_is_retried() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    party(&relay, "bob").await;
    let conv = alice.open("bob").await.unwrap();

    relay.fail_next(2);
    let sent = conv.send_text("persistent").await.unwrap();
    assert_eq!(sent.status, DeliveryState::Sent);
}

#[tokio::test(start_paused = true)]
async fn poll_backs_off_while_relay_is_down() {
    let relay = Arc::new(MemoryRelay::new());
    let mut config = fast_config();
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
    };
    let alice = party_with(&relay, "alice", config).await;
    let bob = party(&relay, "bob").await;
    let conv = alice.open("bob").await.unwrap();

    relay.set_offline(true);
    let before = relay.poll_count();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let during = relay.poll_count() - before;
    // 60 polls at the steady interval; backoff keeps it to a handful.
    assert!(during <= 10, "polled {during} times while offline");

    relay.set_offline(false);
    let b2a = bob.open("alice").await.unwrap();
    b2a.send_text("back online").await.unwrap();
    let timeline = wait_until(&conv, |m| m.len() == 1).await;
    assert_eq!(texts(&timeline), vec!["back online"]);
}

#[tokio::test(start_paused = true)]
async fn ephemeral_message_self_destructs_everywhere() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    let bob = party(&relay, "bob").await;
    let a2b = alice.open("bob").await.unwrap();
    let b2a = bob.open("alice").await.unwrap();

    let sent = a2b.send_text_ephemeral("burn after reading").await.unwrap();
    wait_until(&b2a, |m| m.len() == 1).await;

    tokio::time::sleep(fast_config().self_destruct_after + Duration::from_secs(1)).await;
    assert!(a2b.timeline().is_empty());
    assert!(relay.records().iter().any(|r| r.id == sent.id && r.deleted));
    wait_until(&b2a, |m| m.is_empty()).await;
}

#[tokio::test(start_paused = true)]
async fn self_destruct_removes_local_copy_even_if_relay_is_down() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    party(&relay, "bob").await;
    let a2b = alice.open("bob").await.unwrap();

    let sent = a2b.send_text_ephemeral("gone").await.unwrap();
    relay.set_offline(true);
    tokio::time::sleep(fast_config().self_destruct_after + Duration::from_secs(1)).await;

    assert!(a2b.timeline().is_empty());
    assert!(relay.records().iter().any(|r| r.id == sent.id && !r.deleted));
}

#[tokio::test(start_paused = true)]
async fn deleting_unknown_message_is_not_found() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    party(&relay, "bob").await;
    let conv = alice.open("bob").await.unwrap();

    assert!(matches!(conv.delete(&RecordId::from(999)).await, Err(SyncError::NotFound(_))));
    assert!(matches!(conv.delete(&RecordId::new("local-123")).await, Err(SyncError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn lookback_cursor_skips_old_history() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    let mut config = fast_config();
    config.initial_cursor = InitialCursor::Lookback { secs: 3600 };
    let bob = party_with(&relay, "bob", config).await;

    let session = ConversationSession::new(alice.identity(), alice.lookup("bob").await.unwrap()).unwrap();
    for (text, age_ms) in [("ancient", 2 * 3600 * 1000), ("recent", 60 * 1000)] {
        let sealed = conversation::encrypt(text.as_bytes(), session.key()).unwrap();
        relay
            .send(&SendRequest {
                from: Handle::parse("alice").unwrap(),
                to: Handle::parse("bob").unwrap(),
                ciphertext: Some(sealed.ciphertext),
                nonce: sealed.nonce.to_vec(),
                sender_fingerprint: alice.identity().fingerprint().as_bytes().to_vec(),
                timestamp: now_millis() - age_ms,
                kind: MessageKind::Text,
                blob_ref: None,
                mime: None,
                name: None,
            })
            .await
            .unwrap();
    }

    let b2a = bob.open("alice").await.unwrap();
    b2a.poll_now().await.unwrap();
    assert_eq!(texts(&b2a.timeline()), vec!["recent"]);
}

#[tokio::test(start_paused = true)]
async fn state_changes_are_observable() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    party(&relay, "bob").await;

    let conv = alice.conversation("bob").unwrap();
    let states = conv.subscribe_state();
    conv.open().await.unwrap();
    assert_eq!(*states.borrow(), SessionState::Syncing);
    conv.close();
    assert_eq!(*states.borrow(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn future_dated_record_from_another_conversation_does_not_stall_polling() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    let bob = party(&relay, "bob").await;
    let carol = party(&relay, "carol").await;

    let a2b = alice.open("bob").await.unwrap();

    let session = ConversationSession::new(carol.identity(), carol.lookup("alice").await.unwrap()).unwrap();
    let sealed = conversation::encrypt(b"from next year", session.key()).unwrap();
    relay
        .send(&SendRequest {
            from: Handle::parse("carol").unwrap(),
            to: Handle::parse("alice").unwrap(),
            ciphertext: Some(sealed.ciphertext),
            nonce: sealed.nonce.to_vec(),
            sender_fingerprint: carol.identity().fingerprint().as_bytes().to_vec(),
            timestamp: now_millis() + 365 * 24 * 3600 * 1000,
            kind: MessageKind::Text,
            blob_ref: None,
            mime: None,
            name: None,
        })
        .await
        .unwrap();
    a2b.poll_now().await.unwrap();
    assert!(a2b.cursor() <= now_millis());

    let b2a = bob.open("alice").await.unwrap();
    b2a.send_text("hi alice").await.unwrap();
    a2b.poll_now().await.unwrap();
    a2b.poll_now().await.unwrap();
    assert_eq!(texts(&a2b.timeline()), vec!["hi alice"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_resolve_and_start_polling_once() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = party(&relay, "alice").await;
    party(&relay, "bob").await;
    relay.set_latency(Duration::from_millis(50));

    let conv = Arc::new(alice.conversation("bob").unwrap());
    let opens: Vec<_> = (0..8)
        .map(|_| {
            let conv = conv.clone();
            tokio::spawn(async move { conv.open().await })
        })
        .collect();

    let mut opened = 0;
    for open in opens {
        match open.await.unwrap() {
            Ok(()) => opened += 1,
            Err(SyncError::Validation(_)) => {}
            Err(e) => panic!("unexpected open error: {e:?}"),
        }
    }
    assert!(opened >= 1);
    assert_eq!(relay.lookup_count(), 1);
    assert_eq!(conv.state(), SessionState::Syncing);
    conv.close();
}
