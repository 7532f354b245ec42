use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use serial_test::serial;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

async fn spawn_app() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    tokio::spawn(async move {
        lobby_server::run(addr).await.unwrap();
    });
    sleep(Duration::from_millis(100)).await;
    addr
}

async fn login(client: &Client, addr: SocketAddr, username: &str) -> (String, String) {
    let response = client
        .post(format!("http://{}/auth/login", addr))
        .json(&json!({ "username": username }))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    (
        body["token"].as_str().unwrap().to_string(),
        body["userId"].as_str().unwrap().to_string(),
    )
}

async fn create_lobby(client: &Client, addr: SocketAddr, token: &str, body: Value) -> String {
    let response = client
        .post(format!("http://{}/lobbies", addr))
        .header("Authorization", format!("Bearer {}", token))
        .json(&body)
        .send()
        .await
        .unwrap();
    let lobby: Value = response.json().await.unwrap();
    lobby["id"].as_str().unwrap().to_string()
}

async fn connect(
    addr: SocketAddr,
    token: &str,
) -> (
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    WsRead,
) {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = connect_async(&url).await.expect("Failed to connect");
    // Give the server a moment to register the session and its rooms.
    sleep(Duration::from_millis(100)).await;
    ws_stream.split()
}

async fn next_event(read: &mut WsRead) -> Value {
    timeout(Duration::from_secs(2), async {
        while let Some(msg) = read.next().await {
            if let Ok(Message::Text(text)) = msg {
                return serde_json::from_str::<Value>(&text).unwrap();
            }
        }
        panic!("websocket stream ended unexpectedly");
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
#[serial]
async fn test_connection_without_credential_is_refused() {
    let addr = spawn_app().await;

    let result = connect_async(format!("ws://{}/ws", addr)).await;
    assert!(result.is_err(), "handshake without a token must fail");

    let result = connect_async(format!("ws://{}/ws?token=bogus", addr)).await;
    assert!(result.is_err(), "handshake with a bad token must fail");
}

#[tokio::test]
#[serial]
async fn test_owner_receives_join_request_event() {
    let addr = spawn_app().await;
    let client = Client::new();
    let (owner_token, _) = login(&client, addr, "owner").await;
    let (member_token, member_id) = login(&client, addr, "joiner").await;
    let lobby_id = create_lobby(&client, addr, &owner_token, json!({ "name": "Club" })).await;

    let (_owner_write, mut owner_read) = connect(addr, &owner_token).await;

    let response = client
        .post(format!("http://{}/lobbies/{}/requests", addr, lobby_id))
        .header("Authorization", format!("Bearer {}", member_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let event = next_event(&mut owner_read).await;
    assert_eq!(event["event"], "join-request");
    assert_eq!(event["data"]["userId"].as_str().unwrap(), member_id);
    assert_eq!(event["data"]["username"], "joiner");
    assert!(event["data"]["timestamp"].is_string());
}

#[tokio::test]
#[serial]
async fn test_rejected_user_receives_cooldown() {
    let addr = spawn_app().await;
    let client = Client::new();
    let (owner_token, _) = login(&client, addr, "owner").await;
    let (member_token, member_id) = login(&client, addr, "joiner").await;
    let lobby_id = create_lobby(&client, addr, &owner_token, json!({ "name": "Club" })).await;

    let response = client
        .post(format!("http://{}/lobbies/{}/requests", addr, lobby_id))
        .header("Authorization", format!("Bearer {}", member_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let (_member_write, mut member_read) = connect(addr, &member_token).await;

    let response = client
        .post(format!(
            "http://{}/lobbies/{}/requests/{}/reject",
            addr, lobby_id, member_id
        ))
        .header("Authorization", format!("Bearer {}", owner_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let event = next_event(&mut member_read).await;
    assert_eq!(event["event"], "request-updated");
    assert_eq!(event["data"]["status"], "rejected");
    assert_eq!(event["data"]["cooldown"], "6h");
    assert_eq!(event["data"]["lobbyId"].as_str().unwrap(), lobby_id);
}

#[tokio::test]
#[serial]
async fn test_rejecting_a_disconnected_user_is_not_an_error() {
    let addr = spawn_app().await;
    let client = Client::new();
    let (owner_token, _) = login(&client, addr, "owner").await;
    let (member_token, member_id) = login(&client, addr, "joiner").await;
    let lobby_id = create_lobby(&client, addr, &owner_token, json!({ "name": "Club" })).await;

    client
        .post(format!("http://{}/lobbies/{}/requests", addr, lobby_id))
        .header("Authorization", format!("Bearer {}", member_token))
        .send()
        .await
        .unwrap();

    // Nobody is connected; delivery is silently dropped.
    let response = client
        .post(format!(
            "http://{}/lobbies/{}/requests/{}/reject",
            addr, lobby_id, member_id
        ))
        .header("Authorization", format!("Bearer {}", owner_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn test_approval_over_socket() {
    let addr = spawn_app().await;
    let client = Client::new();
    let (owner_token, _) = login(&client, addr, "owner").await;
    let (member_token, member_id) = login(&client, addr, "joiner").await;
    let lobby_id = create_lobby(&client, addr, &owner_token, json!({ "name": "Club" })).await;

    client
        .post(format!("http://{}/lobbies/{}/requests", addr, lobby_id))
        .header("Authorization", format!("Bearer {}", member_token))
        .send()
        .await
        .unwrap();

    let (mut owner_write, mut owner_read) = connect(addr, &owner_token).await;
    let (_member_write, mut member_read) = connect(addr, &member_token).await;

    let frame = json!({
        "event": "request-response",
        "data": { "lobbyId": lobby_id, "userId": member_id, "status": "accepted" }
    });
    owner_write
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();

    // The target hears the outcome on their personal channel.
    let event = next_event(&mut member_read).await;
    assert_eq!(event["event"], "request-updated");
    assert_eq!(event["data"]["status"], "accepted");
    assert!(event["data"].get("cooldown").is_none());

    // The lobby room hears the membership change.
    let event = next_event(&mut owner_read).await;
    assert_eq!(event["event"], "member-joined");
    assert_eq!(event["data"]["userId"].as_str().unwrap(), member_id);
}

#[tokio::test]
#[serial]
async fn test_pending_requests_replayed_on_demand() {
    let addr = spawn_app().await;
    let client = Client::new();
    let (owner_token, _) = login(&client, addr, "owner").await;
    let (member_token, member_id) = login(&client, addr, "joiner").await;
    let lobby_id = create_lobby(&client, addr, &owner_token, json!({ "name": "Club" })).await;

    client
        .post(format!("http://{}/lobbies/{}/requests", addr, lobby_id))
        .header("Authorization", format!("Bearer {}", member_token))
        .send()
        .await
        .unwrap();

    let (mut owner_write, mut owner_read) = connect(addr, &owner_token).await;
    let frame = json!({ "event": "join-request", "data": { "lobbyId": lobby_id } });
    owner_write
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();

    let event = next_event(&mut owner_read).await;
    assert_eq!(event["event"], "join-request");
    assert_eq!(event["data"]["userId"].as_str().unwrap(), member_id);
}

#[tokio::test]
#[serial]
async fn test_malformed_message_yields_sanitized_exception() {
    let addr = spawn_app().await;
    let client = Client::new();
    let (owner_token, _) = login(&client, addr, "owner").await;
    create_lobby(&client, addr, &owner_token, json!({ "name": "Club" })).await;

    let (mut owner_write, mut owner_read) = connect(addr, &owner_token).await;
    owner_write
        .send(Message::Text("{\"event\":\"no-such-event\"}".into()))
        .await
        .unwrap();

    let event = next_event(&mut owner_read).await;
    assert_eq!(event["event"], "exception");
    assert_eq!(event["data"]["status"], "error");
    assert_eq!(event["data"]["message"], "Invalid message payload");
}

#[tokio::test]
#[serial]
async fn test_socket_actions_require_cached_ownership() {
    let addr = spawn_app().await;
    let client = Client::new();
    let (owner_token, _) = login(&client, addr, "owner").await;
    let (stranger_token, stranger_id) = login(&client, addr, "stranger").await;
    let lobby_id = create_lobby(&client, addr, &owner_token, json!({ "name": "Club" })).await;

    // A session with no owned lobby cannot act as this lobby's owner.
    let (mut stranger_write, mut stranger_read) = connect(addr, &stranger_token).await;
    let frame = json!({
        "event": "request-response",
        "data": { "lobbyId": lobby_id, "userId": stranger_id, "status": "accepted" }
    });
    stranger_write
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();

    let event = next_event(&mut stranger_read).await;
    assert_eq!(event["event"], "exception");
    assert_eq!(
        event["data"]["message"],
        "Only the lobby owner may perform this action"
    );
}
