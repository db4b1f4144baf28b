//! Integration tests for the auxiliary HTTP surface: paginated history,
//! statistics, and authorization.

mod common;

use common::{TestClient, TestServer};
use serde_json::{Value, json};

async fn get_json(url: &str, token: Option<&str>) -> (u16, Value) {
    let client = reqwest::Client::new();
    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {token}"));
    }
    let response = request.send().await.expect("http request");
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn history_pagination_descends_with_cursor() {
    let server = TestServer::spawn(17611, 17612)
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
            "data": { "room": "@2", "content": "/create archive" },
        }))
        .await
        .unwrap();
    let ack = alice.recv_ack().await.unwrap();
    let room_id = ack["data"]["room_id"].as_i64().unwrap();

    for i in 1..=150 {
        alice
            .send_message("archive", &format!("message {i}"))
            .await
            .unwrap();
        alice.recv_ack().await.unwrap();
    }

    let token = server.token_for(1);
    let (status, body) = get_json(
        &format!("{}/api/messages?room={room_id}&limit=50", server.http_url()),
        Some(&token),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let messages = body["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 50);
    assert_eq!(messages.first().unwrap()["id"], 150);
    assert_eq!(messages.last().unwrap()["id"], 101);
    assert_eq!(body["data"]["next_before"], 101);

    let (status, body) = get_json(
        &format!(
            "{}/api/messages?room={room_id}&limit=50&before=101",
            server.http_url()
        ),
        Some(&token),
    )
    .await;
    assert_eq!(status, 200);
    let messages = body["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.first().unwrap()["id"], 100);
    assert_eq!(messages.last().unwrap()["id"], 51);

    alice.close().await.unwrap();
}

#[tokio::test]
async fn history_requires_authentication_and_membership() {
    let server = TestServer::spawn(17621, 17622)
        .await
        .expect("failed to spawn test server");
    server.seed_principal(1, "alice", "user").await.unwrap();
    server.seed_principal(2, "bob", "user").await.unwrap();
    server.seed_principal(3, "eve", "user").await.unwrap();

    let mut alice = TestClient::connect(&server.ws_url(&server.token_for(1)))
        .await
        .unwrap();
    alice
        .send(json!({
            "type": "message",
            "data": { "room": "@2", "content": "/create private-ish" },
        }))
        .await
        .unwrap();
    let ack = alice.recv_ack().await.unwrap();
    let room_id = ack["data"]["room_id"].as_i64().unwrap();

    // No token: 401.
    let (status, _) = get_json(
        &format!("{}/api/messages?room={room_id}", server.http_url()),
        None,
    )
    .await;
    assert_eq!(status, 401);

    // Eve is not a member: 403.
    let eve_token = server.token_for(3);
    let (status, _) = get_json(
        &format!("{}/api/messages?room={room_id}", server.http_url()),
        Some(&eve_token),
    )
    .await;
    assert_eq!(status, 403);

    // Malformed limit: 400.
    let alice_token = server.token_for(1);
    let (status, _) = get_json(
        &format!("{}/api/messages?room={room_id}&limit=9999", server.http_url()),
        Some(&alice_token),
    )
    .await;
    assert_eq!(status, 400);

    // Unknown room: 404.
    let (status, _) = get_json(
        &format!("{}/api/messages?room=424242", server.http_url()),
        Some(&alice_token),
    )
    .await;
    assert_eq!(status, 404);

    alice.close().await.unwrap();
}

#[tokio::test]
async fn stats_and_member_listing() {
    let server = TestServer::spawn(17631, 17632)
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
            "data": { "room": "@2", "content": "/create stats-room" },
        }))
        .await
        .unwrap();
    let ack = alice.recv_ack().await.unwrap();
    let room_id = ack["data"]["room_id"].as_i64().unwrap();

    bob.join("stats-room").await.unwrap();
    bob.recv_ack().await.unwrap();

    for i in 0..4 {
        alice
            .send_message("stats-room", &format!("hello {i}"))
            .await
            .unwrap();
        alice.recv_ack().await.unwrap();
    }

    let token = server.token_for(1);
    let (status, body) = get_json(
        &format!("{}/api/messages/stats?room={room_id}", server.http_url()),
        Some(&token),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["room"]["message_count"], 4);
    assert_eq!(body["data"]["room"]["member_count"], 2);

    let (status, body) = get_json(
        &format!("{}/api/rooms/{room_id}/members", server.http_url()),
        Some(&token),
    )
    .await;
    assert_eq!(status, 200);
    let members = body["data"]["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    let owner = members.iter().find(|m| m["principal_id"] == 1).unwrap();
    assert_eq!(owner["role"], "owner");
    assert_eq!(owner["online"], true);

    // Room listing for the caller.
    let (status, body) = get_json(&format!("{}/api/rooms", server.http_url()), Some(&token)).await;
    assert_eq!(status, 200);
    let rooms = body["data"]["rooms"].as_array().unwrap();
    assert!(rooms.iter().any(|r| r["id"] == room_id));

    // Search finds content within the room.
    let (status, body) = get_json(
        &format!(
            "{}/api/messages/search?room={room_id}&q=hello%202",
            server.http_url()
        ),
        Some(&token),
    )
    .await;
    assert_eq!(status, 200);
    let hits = body["data"]["messages"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["content"], "hello 2");

    alice.close().await.unwrap();
    bob.close().await.unwrap();
}

#[tokio::test]
async fn probes_respond() {
    let server = TestServer::spawn(17641, 17642)
        .await
        .expect("failed to spawn test server");

    let client = reqwest::Client::new();
    let health = client
        .get(format!("{}/healthz", server.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);

    let ready = client
        .get(format!("{}/readyz", server.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status().as_u16(), 200);

    let metrics = client
        .get(format!("{}/metrics", server.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(metrics.status().as_u16(), 200);
    let body = metrics.text().await.unwrap();
    assert!(body.contains("chat_open_connections"));
}
