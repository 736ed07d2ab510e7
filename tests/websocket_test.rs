// End-to-end messaging over real sockets against an in-process server

mod common;

use futures_util::SinkExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

use common::*;
use rusty_relay::core::RoomId;

async fn send(ws: &mut WsStream, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

async fn join(server: &TestServer, ws: &mut WsStream, expected_members: usize) {
    send(
        ws,
        json!({"event": "join_conversation", "data": {"conversationId": "c1"}}),
    )
    .await;
    let router = server.gateway.router().clone();
    wait_until(move || {
        router
            .members(&RoomId::conversation("c1"))
            .map(|m| m.len() == expected_members)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_message_flow_between_participants() {
    let server = start_default_server().await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    join(&server, &mut alice, 1).await;
    join(&server, &mut bob, 2).await;

    let joined = next_event_named(&mut alice, "user_joined_conversation").await;
    assert_eq!(joined["data"]["userId"], "bob");

    let hello = json!({"event": "send_message", "data": {"conversationId": "c1", "content": "hello"}});
    send(&mut alice, hello.clone()).await;

    let delivered = next_event_named(&mut bob, "new_message").await;
    assert_eq!(delivered["data"]["content"], "hello");
    assert_eq!(delivered["data"]["senderId"], "alice");
    let ack = next_event_named(&mut alice, "message_sent").await;
    assert_eq!(ack["data"]["messageId"], delivered["data"]["id"]);

    // Resent within the duplicate window
    send(&mut alice, hello).await;
    let rejected = next_event_named(&mut alice, "message_error").await;
    assert_eq!(rejected["data"]["code"], "DUPLICATE_MESSAGE");
    assert_no_event(&mut bob, "new_message", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_every_tab_receives_new_message() {
    let server = start_default_server().await;
    let mut tab1 = server.connect("alice").await;
    let mut tab2 = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    join(&server, &mut tab1, 1).await;
    join(&server, &mut tab2, 2).await;
    join(&server, &mut bob, 3).await;

    send(
        &mut bob,
        json!({"event": "send_message", "data": {"conversationId": "c1", "content": "hi all"}}),
    )
    .await;

    for ws in [&mut tab1, &mut tab2, &mut bob] {
        let delivered = next_event_named(ws, "new_message").await;
        assert_eq!(delivered["data"]["content"], "hi all");
    }
}

#[tokio::test]
async fn test_typing_excludes_sender() {
    let server = start_default_server().await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    join(&server, &mut alice, 1).await;
    join(&server, &mut bob, 2).await;

    let typing = json!({"event": "typing_start", "data": {"conversationId": "c1"}});
    send(&mut alice, typing.clone()).await;
    send(&mut alice, typing).await;

    let event = next_event_named(&mut bob, "user_typing").await;
    assert_eq!(event["data"]["userId"], "alice");
    assert_eq!(event["data"]["isTyping"], true);
    // Second start fell inside the throttle window
    assert_no_event(&mut bob, "user_typing", Duration::from_millis(300)).await;
    assert_no_event(&mut alice, "user_typing", Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_fourth_connection_replaces_oldest() {
    let server = start_default_server().await;
    let mut first = server.connect("bob").await;
    let _second = server.connect("bob").await;
    let _third = server.connect("bob").await;
    let _fourth = server.connect("bob").await;

    let notice = next_event_named(&mut first, "connection_error").await;
    assert_eq!(notice["data"]["code"], "CONNECTION_REPLACED");

    loop {
        match next_message(&mut first).await {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4000);
                assert_eq!(frame.reason, "replaced");
                break;
            }
            Message::Close(None) => panic!("close frame without a code"),
            _ => {}
        }
    }

    let registry = server.gateway.registry().clone();
    wait_until(move || registry.connection_count().map(|n| n == 3).unwrap_or(false)).await;
    assert!(server.gateway.presence().is_online("bob").unwrap());
}

#[tokio::test]
async fn test_disconnect_leaves_every_room() {
    let server = start_default_server().await;
    let mut alice = server.connect("alice").await;
    join(&server, &mut alice, 1).await;

    alice.close(None).await.unwrap();

    let gateway = server.gateway.clone();
    wait_until(move || {
        gateway
            .stats()
            .map(|s| s.connections == 0 && s.rooms == 0)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_health_reports_live_counts() {
    let server = start_default_server().await;
    let _alice = server.connect("alice").await;
    let _alice_again = server.connect("alice").await;

    let body: Value = reqwest::get(server.http_url("health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
    assert_eq!(body["users"], 1);
    assert_eq!(body["rooms"], 1);
}

#[tokio::test]
async fn test_conversation_created_reaches_participants() {
    let server = start_default_server().await;
    let mut alice = server.connect("alice").await;

    let participants = vec!["alice".to_string(), "carol".to_string()];
    let delivered = server
        .gateway
        .notify_conversation_created("c2", &participants, Some("carol"))
        .unwrap();
    assert_eq!(delivered, 1);

    let event = next_event_named(&mut alice, "conversation_created").await;
    assert_eq!(event["data"]["conversationId"], "c2");
    assert_eq!(event["data"]["createdBy"], "carol");
}
