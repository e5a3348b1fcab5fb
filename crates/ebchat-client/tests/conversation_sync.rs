//! Message stream, read receipts and the write paths of a conversation,
//! exercised by several simulated users against one realtime server.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use ebchat_client::{ClientError, ConversationView, OutgoingImage, UnreadAggregator};
use ebchat_store::RealtimeStore;

use common::{raw_message, uid, wait_until, FailingBlobs, World};

#[tokio::test]
async fn out_of_order_arrival_renders_by_timestamp() {
    let world = World::new().await;
    let a = world.user("u1").await;
    let b = world.user("u2").await;

    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    let mut messages = view.watch();

    a.connection
        .set(&world.message_path("u1", "u2", "m-a"), raw_message("u1", "hi", 1000, false))
        .await
        .unwrap();
    b.connection
        .set(&world.message_path("u1", "u2", "m-b"), raw_message("u2", "hey", 900, false))
        .await
        .unwrap();

    wait_until(&mut messages, |m| m.len() == 2).await;
    let rendered: Vec<(String, i64)> = view
        .messages()
        .into_iter()
        .map(|m| (m.text, m.timestamp))
        .collect();
    assert_eq!(rendered, vec![("hey".into(), 900), ("hi".into(), 1000)]);
}

#[tokio::test]
async fn viewing_marks_inbound_messages_seen() {
    let world = World::new().await;
    let a = world.user("u1").await;
    let b = world.user("u2").await;

    b.connection
        .set(&world.message_path("u1", "u2", "m1"), raw_message("u2", "ping", 10, false))
        .await
        .unwrap();
    a.connection
        .set(&world.message_path("u1", "u2", "m2"), raw_message("u1", "mine", 20, false))
        .await
        .unwrap();

    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    let mut messages = view.watch();
    wait_until(&mut messages, |m| m.iter().any(|m| m.text == "ping" && m.seen)).await;

    // Our own message is never flipped by us.
    let own = world.server.snapshot(&world.message_path("u1", "u2", "m2")).unwrap();
    assert_eq!(own["seen"], false);

    // Repeating the receipt is a no-op.
    let before = world.server.snapshot(&world.messages_path("u1", "u2"));
    let id = ebchat_shared::MessageId("m1".into());
    view.mark_seen(&id).await.unwrap();
    view.mark_seen(&id).await.unwrap();
    assert_eq!(world.server.snapshot(&world.messages_path("u1", "u2")), before);
}

#[tokio::test]
async fn failed_upload_leaves_no_record() {
    let world = World::new().await;
    let connection = Arc::new(world.server.connect());
    let mut backends = world.backends(connection.clone());
    backends.blobs = Arc::new(FailingBlobs);
    let mut a = world.user_with("u1", backends, connection).await;

    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    let image = OutgoingImage {
        file_name: "cat.png".into(),
        mime_type: "image/png".into(),
        data: Bytes::from_static(b"\x89PNG"),
    };
    let err = view.send("look", Some(image)).await.unwrap_err();

    assert!(matches!(err, ClientError::UploadFailed(_)));
    assert_eq!(world.server.snapshot(&world.messages_path("u1", "u2")), None);
    let notices = a.drain_notices();
    assert!(notices.iter().any(|n| n.is_error()));
}

#[tokio::test]
async fn image_message_references_uploaded_blob() {
    let world = World::new().await;
    let a = world.user("u1").await;

    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    let image = OutgoingImage {
        file_name: "cat.png".into(),
        mime_type: "image/png".into(),
        data: Bytes::from_static(b"\x89PNG"),
    };
    let sent = view.send("", Some(image)).await.unwrap();
    assert!(sent.reply.is_none());

    let record = world
        .server
        .snapshot(&world.message_path("u1", "u2", sent.id.as_str()))
        .unwrap();
    assert_eq!(record["type"], "image");
    let url = record["metadata"]["url"].as_str().unwrap();
    assert!(url.starts_with("https://blobs.test/chats/u1_u2/"));
    assert!(url.ends_with("_cat.png"));
}

#[tokio::test]
async fn send_is_rejected_when_peer_blocked_us() {
    let world = World::new().await;
    let mut a = world.user("u1").await;
    let b = world.user("u2").await;
    let mut b_unread = UnreadAggregator::start(b.ctx.clone());

    assert!(b.ctx.toggle_block(&uid("u1")).await.unwrap());

    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    let err = view.send("let me in", None).await.unwrap_err();

    assert!(matches!(err, ClientError::Blocked(ref peer) if peer == &uid("u2")));
    assert_eq!(world.server.snapshot(&world.messages_path("u1", "u2")), None);
    assert!(a.drain_notices().iter().any(|n| n.text() == "User is Blocked"));
    assert!(b_unread.unread().is_empty());
    b_unread.stop();
}

#[tokio::test]
async fn send_is_rejected_when_we_blocked_peer() {
    let world = World::new().await;
    let a = world.user("u1").await;
    let _b = world.user("u2").await;

    a.ctx.toggle_block(&uid("u2")).await.unwrap();
    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    assert!(matches!(view.send("hi", None).await, Err(ClientError::Blocked(_))));

    a.ctx.toggle_block(&uid("u2")).await.unwrap();
    assert!(view.send("hi again", None).await.is_ok());
}

#[tokio::test]
async fn edit_keeps_position_and_delete_is_author_only() {
    let world = World::new().await;
    let mut a = world.user("u1").await;
    let mut b = world.user("u2").await;

    let view_a = ConversationView::open(a.ctx.clone(), uid("u2"));
    let view_b = ConversationView::open(b.ctx.clone(), uid("u1"));
    let first = view_a.send("first", None).await.unwrap().id;
    let second = view_a.send("second", None).await.unwrap().id;

    let mut seen_by_a = view_a.watch();
    let mut seen_by_b = view_b.watch();
    wait_until(&mut seen_by_a, |m| m.len() == 2).await;
    wait_until(&mut seen_by_b, |m| m.len() == 2).await;
    let original = world
        .server
        .snapshot(&world.message_path("u1", "u2", first.as_str()))
        .unwrap();

    view_a.edit(&first, "first (fixed)").await.unwrap();
    wait_until(&mut seen_by_b, |m| m.first().is_some_and(|m| m.edited)).await;
    let messages = view_b.messages();
    assert_eq!(messages[0].id, first);
    assert_eq!(messages[0].text, "first (fixed)");
    assert_eq!(Value::from(messages[0].timestamp), original["timestamp"]);
    assert_eq!(messages[1].id, second);

    assert!(matches!(view_b.edit(&first, "hijack").await, Err(ClientError::NotAuthor(_))));
    assert!(matches!(view_b.delete(&first).await, Err(ClientError::NotAuthor(_))));
    assert!(b.drain_notices().iter().any(|n| n.text() == "Permission Denied."));

    wait_until(&mut seen_by_a, |m| m.first().is_some_and(|m| m.edited)).await;
    view_a.delete(&first).await.unwrap();
    assert!(a.drain_notices().iter().any(|n| n.text() == "Message Unsent"));
    wait_until(&mut seen_by_b, |m| m.len() == 1).await;
    assert_eq!(
        world.server.snapshot(&world.message_path("u1", "u2", first.as_str())),
        None
    );
}

#[tokio::test]
async fn reactions_are_set_and_cleared() {
    let world = World::new().await;
    let a = world.user("u1").await;
    let b = world.user("u2").await;

    let view_a = ConversationView::open(a.ctx.clone(), uid("u2"));
    let view_b = ConversationView::open(b.ctx.clone(), uid("u1"));
    let id = view_a.send("react to me", None).await.unwrap().id;

    let mut messages = view_b.watch();
    wait_until(&mut messages, |m| m.len() == 1).await;
    view_b.react(&id, Some("🔥")).await.unwrap();
    wait_until(&mut messages, |m| m[0].reactions.get(&uid("u2")).map(String::as_str) == Some("🔥")).await;

    view_b.react(&id, None).await.unwrap();
    wait_until(&mut messages, |m| m[0].reactions.is_empty()).await;
}

#[tokio::test]
async fn empty_send_is_refused() {
    let world = World::new().await;
    let a = world.user("u1").await;
    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    assert!(matches!(view.send("   ", None).await, Err(ClientError::EmptyMessage)));
}

#[tokio::test]
async fn switching_conversations_detaches_listeners() {
    let world = World::new().await;
    let a = world.user("u1").await;
    let baseline = world.server.watcher_count();

    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    assert_eq!(world.server.watcher_count(), baseline + 1);
    view.close();
    assert_eq!(world.server.watcher_count(), baseline);

    let next = ConversationView::open(a.ctx.clone(), uid("u3"));
    assert_eq!(world.server.watcher_count(), baseline + 1);
    drop(next);
    assert_eq!(world.server.watcher_count(), baseline);
}

#[tokio::test]
async fn unreadable_conversation_degrades_to_empty_view() {
    let world = World::new().await;
    world
        .server
        .deny_read(ebchat_shared::RealtimePath::chats_root());
    let mut a = world.user("u1").await;

    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    assert!(view.messages().is_empty());
    assert!(a.drain_notices().iter().any(|n| n.is_error()));
}

#[tokio::test]
async fn opening_conversation_clears_badge_for_malformed_records() {
    let world = World::new().await;
    let a = world.user("u1").await;
    let b = world.user("u2").await;

    let stub = world.message_path("u1", "u2", "no-ts");
    b.connection
        .set(&stub, serde_json::json!({ "senderId": "u2", "text": "no ts", "seen": false }))
        .await
        .unwrap();

    let unread = UnreadAggregator::start(a.ctx.clone());
    let mut badges = unread.watch();
    wait_until(&mut badges, |set| set.contains(&uid("u2"))).await;

    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    wait_until(&mut badges, |set| set.is_empty()).await;
    assert!(view.messages().is_empty());
    assert_eq!(world.server.snapshot(&stub).unwrap()["seen"], true);
}

#[tokio::test]
async fn failed_read_receipt_is_retried_on_next_delivery() {
    let world = World::new().await;
    let a = world.user("u1").await;
    let b = world.user("u2").await;

    a.connection.disconnect();
    let view = ConversationView::open(a.ctx.clone(), uid("u2"));
    let mut messages = view.watch();

    let first = world.message_path("u1", "u2", "m1");
    b.connection
        .set(&first, raw_message("u2", "while you were away", 10, false))
        .await
        .unwrap();
    wait_until(&mut messages, |m| m.len() == 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(world.server.snapshot(&first).unwrap()["seen"], false);

    a.connection.reconnect();
    b.connection
        .set(&world.message_path("u1", "u2", "m2"), raw_message("u2", "back?", 20, false))
        .await
        .unwrap();
    wait_until(&mut messages, |m| m.len() == 2 && m.iter().all(|m| m.seen)).await;
    assert_eq!(world.server.snapshot(&first).unwrap()["seen"], true);
}
