//! Integration tests for the connection lifecycle: handshake, liveness,
//! and credential failures.

mod common;

use common::{TestClient, TestServer};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn valid_token_establishes_session() {
    let server = TestServer::spawn(17511, 17512)
        .await
        .expect("failed to spawn test server");
    server.seed_principal(1, "alice", "user").await.unwrap();

    let mut client = TestClient::connect(&server.ws_url(&server.token_for(1)))
        .await
        .expect("connect");

    // The session answers protocol pings.
    client.send(json!({"type": "ping"})).await.unwrap();
    let pong = client.recv_until(|v| v["type"] == "pong").await.unwrap();
    assert_eq!(pong["type"], "pong");

    client.close().await.unwrap();
}

#[tokio::test]
async fn garbage_token_is_rejected_with_unauthenticated() {
    let server = TestServer::spawn(17521, 17522)
        .await
        .expect("failed to spawn test server");

    let mut client = TestClient::connect(&server.ws_url("not-a-token"))
        .await
        .expect("upgrade still succeeds");
    let err = client.recv().await.expect("error frame before close");
    assert_eq!(err["type"], "error");
    assert_eq!(err["data"]["code"], "unauthenticated");

    // The server closes after the error.
    assert!(client.recv().await.is_err());
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let server = TestServer::spawn(17531, 17532)
        .await
        .expect("failed to spawn test server");
    server.seed_principal(1, "alice", "user").await.unwrap();

    let mut client = TestClient::connect(&server.ws_url(&server.expired_token_for(1)))
        .await
        .expect("upgrade still succeeds");
    let err = client.recv().await.unwrap();
    assert_eq!(err["data"]["code"], "unauthenticated");
}

#[tokio::test]
async fn unknown_principal_is_rejected() {
    let server = TestServer::spawn(17541, 17542)
        .await
        .expect("failed to spawn test server");

    // Token is valid but the directory has no row 99.
    let mut client = TestClient::connect(&server.ws_url(&server.token_for(99)))
        .await
        .expect("upgrade still succeeds");
    let err = client.recv().await.unwrap();
    assert_eq!(err["data"]["code"], "unauthenticated");
}

#[tokio::test]
async fn token_via_connect_frame_works() {
    let server = TestServer::spawn(17551, 17552)
        .await
        .expect("failed to spawn test server");
    server.seed_principal(1, "alice", "user").await.unwrap();

    // No token in the URL; present it in a `connect` frame instead.
    let url = format!("ws://127.0.0.1:{}/ws", 17551);
    let mut client = TestClient::connect(&url).await.expect("connect");
    client
        .send(json!({"type": "connect", "data": {"token": server.token_for(1)}}))
        .await
        .unwrap();

    client.send(json!({"type": "ping"})).await.unwrap();
    let pong = client.recv_until(|v| v["type"] == "pong").await.unwrap();
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn unknown_command_yields_unsupported_command() {
    let server = TestServer::spawn(17561, 17562)
        .await
        .expect("failed to spawn test server");
    server.seed_principal(1, "alice", "user").await.unwrap();

    let mut client = TestClient::connect(&server.ws_url(&server.token_for(1)))
        .await
        .unwrap();
    client.send(json!({"type": "teleport", "data": {}})).await.unwrap();
    let err = client.recv_error().await.unwrap();
    assert_eq!(err["data"]["code"], "unsupported-command");

    // The connection survives a bad command.
    client.send(json!({"type": "ping"})).await.unwrap();
    client.recv_until(|v| v["type"] == "pong").await.unwrap();
}

#[tokio::test]
async fn commands_are_acked_in_submission_order() {
    let server = TestServer::spawn(17571, 17572)
        .await
        .expect("failed to spawn test server");
    server.seed_principal(1, "alice", "user").await.unwrap();
    server.seed_principal(2, "bob", "user").await.unwrap();

    let mut alice = TestClient::connect(&server.ws_url(&server.token_for(1)))
        .await
        .unwrap();
    alice
        .send(json!({
            "type": "message",
            "data": { "room": "@2", "content": "/create ordered" },
        }))
        .await
        .unwrap();
    alice.recv_ack().await.unwrap();

    for i in 0..5 {
        alice
            .send(json!({
                "type": "message",
                "data": { "room": "ordered", "content": format!("m{i}") },
                "id": format!("corr-{i}"),
            }))
            .await
            .unwrap();
    }

    for i in 0..5 {
        let ack = alice.recv_ack().await.unwrap();
        assert_eq!(ack["data"]["correlation_id"], format!("corr-{i}").as_str());
        assert_eq!(ack["data"]["message_id"], i + 1);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    alice.close().await.unwrap();
}
