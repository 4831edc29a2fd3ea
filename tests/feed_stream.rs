use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use stockwatch::{ConnectionState, FeedArgs, StockDashboard, StreamStatusSnapshot};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type ServerWs = WebSocketStream<TcpStream>;

/// In-process feed: accepts websocket connections and hands them to the
/// test in arrival order.
async fn start_feed_server() -> (String, mpsc::Receiver<ServerWs>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind feed listener");
    let addr = listener.local_addr().expect("feed listener addr");
    let (connections_tx, connections_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            if connections_tx.send(ws).await.is_err() {
                break;
            }
        }
    });

    (format!("ws://{addr}"), connections_rx)
}

fn test_args(ws_url: &str) -> FeedArgs {
    FeedArgs {
        token: "test-token".to_string(),
        ws_base_url: Some(ws_url.to_string()),
        rest_base_url: Some("http://127.0.0.1:9".to_string()),
        heartbeat_interval_ms: Some(5_000),
        reconnect_delay_ms: Some(200),
        resubscribe_stagger_ms: Some(20),
    }
}

async fn wait_for_state(status_rx: &mut watch::Receiver<StreamStatusSnapshot>, target: ConnectionState) {
    timeout(Duration::from_secs(5), async {
        loop {
            if status_rx.borrow_and_update().state == target {
                return;
            }
            status_rx.changed().await.expect("status channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"));
}

async fn next_text_frame(ws: &mut ServerWs) -> Option<String> {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame timeout")?;
        match frame.expect("frame error") {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sends_keep_alive_pings_while_open() {
    let (ws_url, mut connections) = start_feed_server().await;
    let mut args = test_args(&ws_url);
    args.heartbeat_interval_ms = Some(100);

    let dashboard = StockDashboard::start(args).expect("dashboard starts");
    let mut status_rx = dashboard.watch_status();
    wait_for_state(&mut status_rx, ConnectionState::Open).await;

    let mut server_ws = connections.recv().await.expect("first connection");
    let started = Instant::now();

    for _ in 0..2 {
        let payload = next_text_frame(&mut server_ws)
            .await
            .expect("ping frame before close");
        let frame: Value = serde_json::from_str(&payload).expect("valid json frame");
        assert_eq!(frame["type"], "ping");
    }

    assert!(started.elapsed() >= Duration::from_millis(150));
    dashboard.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnects_after_server_close_with_fixed_delay() {
    let (ws_url, mut connections) = start_feed_server().await;
    let dashboard = StockDashboard::start(test_args(&ws_url)).expect("dashboard starts");
    let mut status_rx = dashboard.watch_status();

    wait_for_state(&mut status_rx, ConnectionState::Open).await;
    let mut server_ws = connections.recv().await.expect("first connection");

    let closed_at = Instant::now();
    server_ws.close(None).await.expect("server close");

    wait_for_state(&mut status_rx, ConnectionState::Closed).await;
    wait_for_state(&mut status_rx, ConnectionState::Open).await;

    let _second_ws = connections.recv().await.expect("second connection");
    assert!(closed_at.elapsed() >= Duration::from_millis(200));
    assert!(dashboard.status().reconnect_attempt >= 1);

    dashboard.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn keeps_retrying_when_the_feed_stays_down() {
    // Accepts TCP connections but hangs up before the websocket handshake
    // completes, so every connect attempt fails.
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind refusing listener");
    let dead_addr = listener.local_addr().expect("refusing listener addr");
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => drop(stream),
                Err(_) => break,
            }
        }
    });

    let dashboard = StockDashboard::start(test_args(&format!("ws://{dead_addr}")))
        .expect("dashboard starts");

    timeout(Duration::from_secs(5), async {
        loop {
            if dashboard.status().reconnect_attempt >= 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("expected repeated reconnect attempts");

    assert_ne!(dashboard.connection_state(), ConnectionState::Open);
    dashboard.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_without_reconnecting() {
    let (ws_url, mut connections) = start_feed_server().await;
    let dashboard = StockDashboard::start(test_args(&ws_url)).expect("dashboard starts");
    let mut status_rx = dashboard.watch_status();

    wait_for_state(&mut status_rx, ConnectionState::Open).await;
    let mut server_ws = connections.recv().await.expect("first connection");

    dashboard.shutdown().await;

    // The server sees a close frame (or the stream just ends), never data.
    let frame = next_text_frame(&mut server_ws).await;
    assert_eq!(frame, None);

    // Well past the 200ms reconnect delay: no new connection may arrive.
    let no_reconnect = timeout(Duration::from_millis(600), connections.recv()).await;
    assert!(no_reconnect.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn tolerates_ping_acks_and_unknown_frames() {
    let (ws_url, mut connections) = start_feed_server().await;
    let dashboard = StockDashboard::start(test_args(&ws_url)).expect("dashboard starts");
    let mut status_rx = dashboard.watch_status();

    wait_for_state(&mut status_rx, ConnectionState::Open).await;
    let mut server_ws = connections.recv().await.expect("first connection");

    use futures_util::SinkExt;
    server_ws
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .expect("send ping ack");
    server_ws
        .send(Message::Text(r#"{"type":"news","data":[1]}"#.to_string()))
        .await
        .expect("send unknown frame");
    server_ws
        .send(Message::Text("not json".to_string()))
        .await
        .expect("send malformed frame");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dashboard.connection_state(), ConnectionState::Open);
    assert_eq!(dashboard.status().reconnect_attempt, 0);

    dashboard.shutdown().await;
}
