use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use parley_core::{AppConfig, AppState, GatewayConfig};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct SocketTestContext {
    url: String,
    _server: JoinHandle<()>,
}

impl SocketTestContext {
    async fn new() -> anyhow::Result<Self> {
        let (gateway, _hub) = parley_core::hub::spawn(GatewayConfig::default());
        let state = AppState::new(gateway, AppConfig::default());
        let app = parley_ws::gateway_router().with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self {
            url: format!("ws://{addr}/socket"),
            _server: server,
        })
    }

    async fn connect(&self) -> anyhow::Result<Client> {
        let (client, _) = connect_async(&self.url).await?;
        Ok(client)
    }
}

async fn send(client: &mut Client, event: &str, data: Value) -> anyhow::Result<()> {
    let frame = json!({ "event": event, "data": data });
    client.send(Message::Text(frame.to_string().into())).await?;
    Ok(())
}

/// Read frames until one carries `event`, skipping everything else.
async fn expect_event(client: &mut Client, event: &str) -> anyhow::Result<Value> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = client
                .next()
                .await
                .context("socket closed")??;
            let Message::Text(text) = frame else {
                continue;
            };
            let value: Value = serde_json::from_str(&text)?;
            if value["event"] == event {
                return Ok::<_, anyhow::Error>(value["data"].clone());
            }
        }
    })
    .await
    .with_context(|| format!("timed out waiting for {event}"))?
}

/// Presence is sent both directly and by broadcast; wait for a given set.
async fn expect_online(client: &mut Client, expected: Value) -> anyhow::Result<()> {
    loop {
        if expect_event(client, "online users updated").await? == expected {
            return Ok(());
        }
    }
}

#[tokio::test]
async fn two_clients_set_up_and_complete_a_call() -> anyhow::Result<()> {
    let ctx = SocketTestContext::new().await?;
    let mut alice = ctx.connect().await?;
    let mut bob = ctx.connect().await?;

    send(&mut alice, "setup", json!({ "_id": "alice", "name": "Alice" })).await?;
    expect_event(&mut alice, "connected").await?;
    expect_online(&mut alice, json!(["alice"])).await?;

    send(&mut bob, "setup", json!({ "userId": "bob", "name": "Bob" })).await?;
    expect_event(&mut bob, "connected").await?;
    expect_online(&mut bob, json!(["alice", "bob"])).await?;
    expect_online(&mut alice, json!(["alice", "bob"])).await?;

    send(
        &mut alice,
        "call:initiate",
        json!({
            "to": "bob",
            "callType": "video",
            "offer": { "type": "offer", "sdp": "v=0" },
            "callerInfo": { "name": "Alice" }
        }),
    )
    .await?;
    let initiated = expect_event(&mut alice, "call:initiated").await?;
    let call_id = initiated["callId"].as_str().context("callId")?.to_string();

    let incoming = expect_event(&mut bob, "call:incoming").await?;
    assert_eq!(incoming["callId"], call_id.as_str());
    assert_eq!(incoming["from"], "alice");
    assert_eq!(incoming["callType"], "video");
    assert_eq!(incoming["offer"]["sdp"], "v=0");

    send(
        &mut bob,
        "call:accept",
        json!({ "callId": call_id, "answer": { "type": "answer", "sdp": "v=1" } }),
    )
    .await?;
    let accepted = expect_event(&mut alice, "call:accepted").await?;
    assert_eq!(accepted["callId"], call_id.as_str());
    assert_eq!(accepted["answer"]["sdp"], "v=1");

    send(&mut alice, "call:end", json!({ "callId": call_id })).await?;
    let ended = expect_event(&mut bob, "call:ended").await?;
    assert_eq!(ended["callId"], call_id.as_str());
    Ok(())
}

#[tokio::test]
async fn undecodable_frames_get_invalid_event() -> anyhow::Result<()> {
    let ctx = SocketTestContext::new().await?;
    let mut client = ctx.connect().await?;

    client.send(Message::Text("not json".into())).await?;
    let error = expect_event(&mut client, "error").await?;
    assert_eq!(error["code"], "INVALID_EVENT");

    send(&mut client, "call:teleport", json!({})).await?;
    let error = expect_event(&mut client, "error").await?;
    assert_eq!(error["code"], "INVALID_EVENT");

    // The socket survives bad input.
    client
        .send(Message::Text(json!({ "event": "get online users" }).to_string().into()))
        .await?;
    assert_eq!(expect_event(&mut client, "online users updated").await?, json!([]));
    Ok(())
}

#[tokio::test]
async fn closing_a_socket_updates_presence() -> anyhow::Result<()> {
    let ctx = SocketTestContext::new().await?;
    let mut watcher = ctx.connect().await?;
    let mut leaver = ctx.connect().await?;

    send(&mut watcher, "setup", json!({ "_id": "w" })).await?;
    expect_event(&mut watcher, "connected").await?;
    send(&mut leaver, "setup", json!({ "_id": "l" })).await?;
    expect_event(&mut leaver, "connected").await?;
    expect_online(&mut watcher, json!(["l", "w"])).await?;

    leaver.close(None).await?;
    expect_online(&mut watcher, json!(["w"])).await?;
    Ok(())
}

#[tokio::test]
async fn meeting_roster_over_sockets() -> anyhow::Result<()> {
    let ctx = SocketTestContext::new().await?;
    let mut host = ctx.connect().await?;
    let mut guest = ctx.connect().await?;
    for (client, id) in [(&mut host, "h"), (&mut guest, "g")] {
        send(client, "setup", json!({ "_id": id })).await?;
        expect_event(client, "connected").await?;
        send(client, "join chat", json!("room-1")).await?;
    }
    // join chat has no reply; a round trip proves it was applied.
    send(&mut guest, "meeting:check-active", json!({ "chatId": "room-1" })).await?;
    let status = expect_event(&mut guest, "meeting:active-status").await?;
    assert_eq!(status["activeMeeting"], Value::Null);

    send(
        &mut host,
        "meeting:create",
        json!({ "chatId": "room-1", "creatorInfo": { "name": "Host" } }),
    )
    .await?;
    let created = expect_event(&mut host, "meeting:created").await?;
    let meeting_id = created["meetingId"].as_str().context("meetingId")?.to_string();
    let started = expect_event(&mut guest, "meeting:started").await?;
    assert_eq!(started["meetingId"], meeting_id.as_str());

    send(
        &mut guest,
        "meeting:join",
        json!({ "meetingId": meeting_id, "userInfo": { "name": "Guest" } }),
    )
    .await?;
    let joined = expect_event(&mut guest, "meeting:joined").await?;
    let roster = joined["participants"].as_array().context("participants")?;
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0]["userId"], "h");
    let host_connection = roster[0]["connectionId"].clone();

    let user_joined = expect_event(&mut host, "meeting:user-joined").await?;
    assert_eq!(user_joined["userId"], "g");

    send(
        &mut guest,
        "meeting:offer",
        json!({ "meetingId": meeting_id, "to": host_connection, "offer": { "sdp": "m" } }),
    )
    .await?;
    let offer = expect_event(&mut host, "meeting:offer").await?;
    assert_eq!(offer["from"], user_joined["connectionId"]);
    assert_eq!(offer["offer"]["sdp"], "m");
    Ok(())
}
