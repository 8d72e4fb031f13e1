mod support;

use std::time::Duration;

use application::realtime::Target;
use application::SseEvent;
use domain::ChannelId;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{connect_async, tungstenite::Message as TungsteniteMessage};

use support::TestServer;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// 跳过 ping/pong，返回下一个文本或关闭帧
async fn next_frame(socket: &mut Socket) -> TungsteniteMessage {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("frame ok");
        match message {
            TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn health_and_stats_are_public_but_streams_need_a_token() {
    let server = TestServer::start().await;
    let client = Client::new();

    let health = client.get(server.http("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let stats: Value = client
        .get(server.http("/api/v1/stats/realtime"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["ws_sessions"], 0);

    let sse = client.get(server.http("/api/v1/sse")).send().await.unwrap();
    assert_eq!(sse.status(), StatusCode::UNAUTHORIZED);

    let err = connect_async(format!("ws://{}/api/v1/ws", server.addr))
        .await
        .expect_err("handshake must fail");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 401)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn websocket_commands_update_viewers_and_receive_frames() {
    let server = TestServer::start().await;
    let user = server.add_user("alice", false);
    let token = server.token(user);
    let (mut socket, _) = connect_async(server.ws_url("/api/v1/ws", &token))
        .await
        .expect("connect");

    let state = server.state.clone();
    wait_until(|| state.ws.session_count() == 1).await;

    let channel = ChannelId::generate();
    socket
        .send(TungsteniteMessage::Text(
            format!("viewstate:{channel}:monitoring").into(),
        ))
        .await
        .unwrap();
    let viewers = server.state.viewers.clone();
    wait_until(|| viewers.viewer_count() == 1).await;

    socket
        .send(TungsteniteMessage::Text("dance".into()))
        .await
        .unwrap();
    match next_frame(&mut socket).await {
        TungsteniteMessage::Text(text) => {
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(frame["type"], "ERROR");
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    let delivered = server.state.ws.write_message(
        "CHANNEL_UPDATED",
        &json!({ "id": channel }),
        &Target::channel_viewers(channel),
    );
    assert_eq!(delivered, 1);
    match next_frame(&mut socket).await {
        TungsteniteMessage::Text(text) => {
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(frame["type"], "CHANNEL_UPDATED");
            assert_eq!(frame["body"]["id"], channel.to_string());
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    socket.close(None).await.unwrap();
    let ws = server.state.ws.clone();
    wait_until(|| ws.session_count() == 0).await;
    assert_eq!(server.state.viewers.viewer_count(), 0);
}

#[tokio::test]
async fn binary_frames_close_the_connection() {
    let server = TestServer::start().await;
    let token = server.token(server.add_user("bob", false));
    let (mut socket, _) = connect_async(server.ws_url("/api/v1/ws", &token))
        .await
        .expect("connect");

    socket
        .send(TungsteniteMessage::Binary(vec![1, 2, 3].into()))
        .await
        .unwrap();
    match next_frame(&mut socket).await {
        TungsteniteMessage::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Error);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_sends_service_restart() {
    let server = TestServer::start().await;
    let token = server.token(server.add_user("carol", false));
    let (mut socket, _) = connect_async(server.ws_url("/api/v1/ws", &token))
        .await
        .expect("connect");
    let ws = server.state.ws.clone();
    wait_until(|| ws.session_count() == 1).await;

    assert_eq!(server.state.ws.shutdown(), Ok(1));
    match next_frame(&mut socket).await {
        TungsteniteMessage::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Restart);
            assert_eq!(frame.reason.as_str(), "Server is stopping...");
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    let err = connect_async(server.ws_url("/api/v1/ws", &token))
        .await
        .expect_err("new sessions are refused");
    assert!(matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(response) if response.status().as_u16() == 503
    ));
}

#[tokio::test]
async fn bot_endpoint_rejects_regular_users() {
    let server = TestServer::start().await;
    let human = server.token(server.add_user("dave", false));
    let err = connect_async(server.ws_url("/api/v1/bots/ws", &human))
        .await
        .expect_err("humans are rejected");
    assert!(matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(response) if response.status().as_u16() == 403
    ));

    let bot = server.token(server.add_user("BOT_erin", true));
    let (_socket, _) = connect_async(server.ws_url("/api/v1/bots/ws", &bot))
        .await
        .expect("bot connects");
    let bots = server.state.bots.clone();
    wait_until(|| bots.session_count() == 1).await;
}

#[tokio::test]
async fn sse_delivers_events_for_the_user() {
    let server = TestServer::start().await;
    let user = server.add_user("frank", false);
    let token = server.token(user);

    let mut response = Client::new()
        .get(server.http("/api/v1/sse"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-accel-buffering"], "no");
    assert_eq!(server.state.sse.connection_count(), 1);

    server.state.sse.multicast(
        user,
        &SseEvent::new("USER_UPDATED", json!({ "id": user })),
    );

    let mut body = String::new();
    while !body.contains("\n\n") {
        let chunk = timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("chunk in time")
            .unwrap()
            .expect("stream open");
        body.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(body.contains("event: USER_UPDATED"));
    assert!(body.contains(&user.to_string()));
}
