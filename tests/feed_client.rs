//! End-to-end tests: a real `FeedClient` against a local WebSocket server.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

use garden_stock_feed::config::{FeedConfig, ReconnectConfig};
use garden_stock_feed::{ConnectionState, FeedClient, Phase, Snapshot};

const CARROT: &str = r#"{"seed_stock":[{"item_id":"s1","display_name":"Carrot Seed","quantity":5,"icon":"x","Date_Start":"","Date_End":""}]}"#;
const WAIT: Duration = Duration::from_secs(5);

/// Accepts connections forever; `handler` gets the connection index (0-based).
async fn serve<F, Fut>(handler: F) -> String
where
    F: Fn(usize, WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut n = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            tokio::spawn(handler(n, ws));
            n += 1;
        }
    });

    format!("ws://{addr}/")
}

/// Keeps the server side open until the client goes away.
async fn hold(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(_)) = ws.next().await {}
}

fn fast_config(url: String) -> FeedConfig {
    FeedConfig {
        url,
        reconnect: ReconnectConfig {
            base_delay_ms: 50,
            growth_factor: 1.5,
            max_delay_ms: 200,
        },
        settle_delay_ms: 20,
        ..FeedConfig::default()
    }
}

fn channels(
    client: &FeedClient,
) -> (
    garden_stock_feed::Subscription,
    mpsc::UnboundedReceiver<Arc<Snapshot>>,
    mpsc::UnboundedReceiver<ConnectionState>,
) {
    let (snap_tx, snap_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = mpsc::unbounded_channel();
    let sub = client.subscribe(
        move |s: &Arc<Snapshot>| {
            let _ = snap_tx.send(s.clone());
        },
        move |c: &ConnectionState| {
            let _ = state_tx.send(c.clone());
        },
    );
    (sub, snap_rx, state_rx)
}

#[tokio::test]
async fn receives_snapshot_from_server() {
    let url = serve(|_, mut ws| async move {
        ws.send(Message::text(CARROT)).await.unwrap();
        hold(ws).await;
    })
    .await;

    let client = FeedClient::spawn(fast_config(url));
    let (_sub, mut snaps, _states) = channels(&client);

    let snap = timeout(WAIT, snaps.recv()).await.unwrap().unwrap();
    assert_eq!(snap.seed_stock.len(), 1);
    assert_eq!(snap.seed_stock[0].name, "Carrot Seed");
    assert_eq!(snap.seed_stock[0].quantity, 5);
    assert!(snap.gear_stock.is_empty());
    assert!(snap.weather.is_empty());

    assert!(client.connection_state().is_connected());
    assert_eq!(
        client.latest_snapshot().map(|s| s.sequence_id),
        Some(snap.sequence_id)
    );

    client.shutdown().await;
    assert_eq!(client.connection_state().phase, Phase::Disconnected);
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let url = serve(|n, mut ws| async move {
        ws.send(Message::text(CARROT)).await.unwrap();
        if n == 0 {
            let _ = ws.close(None).await;
        } else {
            hold(ws).await;
        }
    })
    .await;

    let client = FeedClient::spawn(fast_config(url));
    let (_sub, mut snaps, _states) = channels(&client);

    let first = timeout(WAIT, snaps.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, snaps.recv()).await.unwrap().unwrap();
    assert!(second.sequence_id > first.sequence_id);

    let mut state = client.watch_connection();
    timeout(WAIT, state.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();

    let metrics = client.metrics();
    assert_eq!(metrics.connections_opened.load(Ordering::Relaxed), 2);
    assert!(metrics.reconnects_scheduled.load(Ordering::Relaxed) >= 1);
    assert_eq!(client.connection_state().consecutive_failures, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_keeps_connection() {
    let url = serve(|_, mut ws| async move {
        ws.send(Message::text("definitely not json")).await.unwrap();
        ws.send(Message::text(CARROT)).await.unwrap();
        hold(ws).await;
    })
    .await;

    let client = FeedClient::spawn(fast_config(url));
    let (_sub, mut snaps, mut states) = channels(&client);

    let snap = timeout(WAIT, snaps.recv()).await.unwrap().unwrap();
    assert_eq!(snap.seed_stock[0].name, "Carrot Seed");

    let mut saw_parse_error = false;
    while let Ok(state) = states.try_recv() {
        if let Some(err) = &state.last_error {
            assert!(err.starts_with("Failed to parse"), "unexpected error {err}");
            assert_eq!(state.phase, Phase::Connected);
            saw_parse_error = true;
        }
    }
    assert!(saw_parse_error);

    let metrics = client.metrics();
    assert_eq!(metrics.connections_opened.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.parse_errors.load(Ordering::Relaxed), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn force_reconnect_replaces_socket_without_backoff() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let url = serve(move |_, mut ws| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            ws.send(Message::text(CARROT)).await.unwrap();
            hold(ws).await;
        }
    })
    .await;

    let client = FeedClient::spawn(fast_config(url));
    let (_sub, mut snaps, _states) = channels(&client);
    timeout(WAIT, snaps.recv()).await.unwrap().unwrap();

    client.force_reconnect();
    client.force_reconnect();
    timeout(WAIT, snaps.recv()).await.unwrap().unwrap();

    // Let any stray timers fire before counting.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let metrics = client.metrics();
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.connections_opened.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.reconnects_scheduled.load(Ordering::Relaxed), 0);
    assert!(client.connection_state().is_connected());

    client.shutdown().await;
}
