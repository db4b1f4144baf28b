//! Integration tests for the realtime message flow: create, join, fan-out.

mod common;

use common::{TestClient, TestServer};
use serde_json::json;

#[tokio::test]
async fn room_fanout_over_real_sockets() {
    let server = TestServer::spawn(17411, 17412)
        .await
        .expect("failed to spawn test server");

    server.seed_principal(1, "alice", "user").await.unwrap();
    server.seed_principal(2, "bob", "user").await.unwrap();

    let mut alice = TestClient::connect(&server.ws_url(&server.token_for(1)))
        .await
        .expect("alice connect");
    let mut bob = TestClient::connect(&server.ws_url(&server.token_for(2)))
        .await
        .expect("bob connect");

    // Alice creates the room; the slash command acks with the room id.
    alice
        .send(json!({
            "type": "message",
            "data": { "room": "@2", "content": "/create general General Chat" },
        }))
        .await
        .unwrap();
    let ack = alice.recv_ack().await.unwrap();
    let room_id = ack["data"]["room_id"].as_i64().unwrap();
    assert!(room_id > 0);

    bob.join("general").await.unwrap();
    bob.recv_ack().await.unwrap();

    alice.send_message("general", "hello everyone").await.unwrap();
    let ack = alice.recv_ack().await.unwrap();
    assert_eq!(ack["data"]["message_id"], 1);
    assert_eq!(ack["data"]["room_id"], room_id);

    let msg = bob
        .recv_until(|v| v["type"] == "message")
        .await
        .expect("bob should receive the broadcast");
    assert_eq!(msg["data"]["id"], 1);
    assert_eq!(msg["data"]["author_id"], 1);
    assert_eq!(msg["data"]["author_name"], "alice");
    assert_eq!(msg["data"]["content"], "hello everyone");

    // Messages keep their per-room order on the wire.
    alice.send_message("general", "second").await.unwrap();
    alice.recv_ack().await.unwrap();
    let msg = bob.recv_until(|v| v["type"] == "message").await.unwrap();
    assert_eq!(msg["data"]["id"], 2);

    alice.close().await.unwrap();
    bob.close().await.unwrap();
}

#[tokio::test]
async fn reactions_and_edits_broadcast() {
    let server = TestServer::spawn(17421, 17422)
        .await
        .expect("failed to spawn test server");

    server.seed_principal(1, "alice", "user").await.unwrap();
    server.seed_principal(2, "bob", "user").await.unwrap();

    let mut alice = TestClient::connect(&server.ws_url(&server.token_for(1)))
        .await
        .unwrap();
    let mut bob = TestClient::connect(&server.ws_url(&server.token_for(2)))
        .await
        .unwrap();

    alice
        .send(json!({
            "type": "message",
            "data": { "room": "@2", "content": "/create lounge" },
        }))
        .await
        .unwrap();
    alice.recv_ack().await.unwrap();
    bob.join("lounge").await.unwrap();
    bob.recv_ack().await.unwrap();

    alice.send_message("lounge", "tpyo").await.unwrap();
    alice.recv_ack().await.unwrap();
    bob.recv_until(|v| v["type"] == "message").await.unwrap();

    // Edit within the window.
    alice
        .send(json!({
            "type": "edit",
            "data": { "room": "lounge", "message_id": 1, "content": "typo" },
        }))
        .await
        .unwrap();
    alice.recv_ack().await.unwrap();
    let edited = bob
        .recv_until(|v| v["type"] == "message-edited")
        .await
        .unwrap();
    assert_eq!(edited["data"]["content"], "typo");
    assert_eq!(edited["data"]["is_edited"], true);

    // React; bob sees the reaction event.
    alice
        .send(json!({
            "type": "react",
            "data": { "room": "lounge", "message_id": 1, "emoji": "👍" },
        }))
        .await
        .unwrap();
    alice.recv_ack().await.unwrap();
    let reaction = bob.recv_until(|v| v["type"] == "reaction").await.unwrap();
    assert_eq!(reaction["data"]["emoji"], "👍");
    assert_eq!(reaction["data"]["added"], true);

    // Delete; bob sees the deletion.
    alice
        .send(json!({
            "type": "delete",
            "data": { "room": "lounge", "message_id": 1 },
        }))
        .await
        .unwrap();
    alice.recv_ack().await.unwrap();
    let deleted = bob
        .recv_until(|v| v["type"] == "message-deleted")
        .await
        .unwrap();
    assert_eq!(deleted["data"]["message_id"], 1);

    alice.close().await.unwrap();
    bob.close().await.unwrap();
}

#[tokio::test]
async fn typing_indicators_reach_subscribers() {
    let server = TestServer::spawn(17431, 17432)
        .await
        .expect("failed to spawn test server");

    server.seed_principal(1, "alice", "user").await.unwrap();
    server.seed_principal(2, "bob", "user").await.unwrap();

    let mut alice = TestClient::connect(&server.ws_url(&server.token_for(1)))
        .await
        .unwrap();
    let mut bob = TestClient::connect(&server.ws_url(&server.token_for(2)))
        .await
        .unwrap();

    alice
        .send(json!({
            "type": "message",
            "data": { "room": "@2", "content": "/create typing-test" },
        }))
        .await
        .unwrap();
    alice.recv_ack().await.unwrap();
    bob.join("typing-test").await.unwrap();
    bob.recv_ack().await.unwrap();

    alice
        .send(json!({
            "type": "typing",
            "data": { "room": "typing-test", "state": "start" },
        }))
        .await
        .unwrap();

    let typing = bob.recv_until(|v| v["type"] == "typing").await.unwrap();
    assert_eq!(typing["data"]["principal_id"], 1);
    assert_eq!(typing["data"]["typing"], true);

    alice.close().await.unwrap();
    bob.close().await.unwrap();
}
