//! Feed Reconnect Integration Tests
//!
//! Runs the Kraken client against a scripted local WebSocket server to
//! exercise the full connection lifecycle: subscribe handshake,
//! reconnection with growing attempt numbers, and the idle watchdog.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use candle_cascade::infrastructure::kraken::SubscribeRequest;
use candle_cascade::{
    ConnectionState, FeedEvent, KrakenClient, KrakenClientConfig, PairMapping, ReconnectConfig,
};

const SUBSCRIBED_FRAME: &str = r#"{"channelID":340,"channelName":"ticker","event":"subscriptionStatus","pair":"XBT/USD","status":"subscribed","subscription":{"name":"ticker"}}"#;
const TICKER_FRAME: &str = r#"[340,{"a":["31208.10000",0,"0.50000000"],"b":["31207.90000",1,"1.00000000"],"c":["31208.00000","0.00992710"]},"ticker","XBT/USD"]"#;

// =============================================================================
// Scripted Server
// =============================================================================

async fn accept_session(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn read_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text.to_string(),
            Some(Ok(_)) => {}
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Confirm the subscription, stream one ticker frame, then hold the
/// session open until the client goes away.
async fn serve_healthy_session(mut ws: WebSocketStream<TcpStream>) {
    let _subscribe = read_text(&mut ws).await;
    ws.send(Message::Text(SUBSCRIBED_FRAME.into())).await.unwrap();
    ws.send(Message::Text(TICKER_FRAME.into())).await.unwrap();
    while let Some(Ok(_)) = ws.next().await {}
}

// =============================================================================
// Client Harness
// =============================================================================

fn spawn_client(
    port: u16,
    idle_timeout: Duration,
) -> (
    Arc<KrakenClient>,
    mpsc::Receiver<FeedEvent>,
    CancellationToken,
) {
    let (event_tx, event_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let config = KrakenClientConfig {
        url: format!("ws://127.0.0.1:{port}"),
        pairs: vec![PairMapping {
            pair: "XBT/USD".to_string(),
            symbol: "BTCUSD".to_string(),
        }],
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        },
        idle_timeout,
    };
    let client = Arc::new(KrakenClient::new(config, event_tx, cancel.clone()));
    tokio::spawn(Arc::clone(&client).run());
    (client, event_rx, cancel)
}

async fn next_event(events: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a feed event")
        .expect("event channel closed")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_reconnects_with_growing_attempts_until_server_accepts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (subscribe_tx, subscribe_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        // Three sessions that die right after the subscribe request.
        for _ in 0..3 {
            let mut ws = accept_session(&listener).await;
            let _ = read_text(&mut ws).await;
            drop(ws);
        }

        let mut ws = accept_session(&listener).await;
        let request = read_text(&mut ws).await;
        let _ = subscribe_tx.send(request);
        ws.send(Message::Text(SUBSCRIBED_FRAME.into())).await.unwrap();
        ws.send(Message::Text(TICKER_FRAME.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (client, mut events, cancel) = spawn_client(port, Duration::from_secs(5));

    assert!(matches!(next_event(&mut events).await, FeedEvent::Disconnected));
    assert!(matches!(
        next_event(&mut events).await,
        FeedEvent::Reconnecting { attempt: 1 }
    ));
    assert!(matches!(next_event(&mut events).await, FeedEvent::Disconnected));
    assert!(matches!(
        next_event(&mut events).await,
        FeedEvent::Reconnecting { attempt: 2 }
    ));
    assert!(matches!(next_event(&mut events).await, FeedEvent::Disconnected));
    assert!(matches!(
        next_event(&mut events).await,
        FeedEvent::Reconnecting { attempt: 3 }
    ));

    assert!(matches!(next_event(&mut events).await, FeedEvent::Connected));
    match next_event(&mut events).await {
        FeedEvent::Subscribed { pair } => assert_eq!(pair, "XBT/USD"),
        other => panic!("expected Subscribed, got {other:?}"),
    }
    match next_event(&mut events).await {
        FeedEvent::Tick(tick) => {
            assert_eq!(tick.symbol, "BTCUSD");
            assert_eq!(tick.bid, Decimal::from_str("31207.90000").unwrap());
            assert_eq!(tick.ask, Decimal::from_str("31208.10000").unwrap());
        }
        other => panic!("expected Tick, got {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Streaming);

    // The subscribe request sent on the wire is the canonical ticker
    // subscription for the configured pairs.
    let raw = subscribe_rx.await.unwrap();
    let request: SubscribeRequest = serde_json::from_str(&raw).unwrap();
    assert_eq!(request, SubscribeRequest::ticker(vec!["XBT/USD".to_string()]));

    cancel.cancel();
}

#[tokio::test]
async fn test_idle_connection_is_recycled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        // First session confirms the subscription, then goes silent so
        // the idle watchdog fires.
        let mut ws = accept_session(&listener).await;
        let _ = read_text(&mut ws).await;
        ws.send(Message::Text(SUBSCRIBED_FRAME.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}

        serve_healthy_session(accept_session(&listener).await).await;
    });

    let (client, mut events, cancel) = spawn_client(port, Duration::from_millis(200));

    assert!(matches!(next_event(&mut events).await, FeedEvent::Connected));
    assert!(matches!(
        next_event(&mut events).await,
        FeedEvent::Subscribed { .. }
    ));

    // Silence past the idle timeout recycles the connection.
    assert!(matches!(next_event(&mut events).await, FeedEvent::Disconnected));
    assert!(matches!(
        next_event(&mut events).await,
        FeedEvent::Reconnecting { attempt: 1 }
    ));

    assert!(matches!(next_event(&mut events).await, FeedEvent::Connected));
    assert!(matches!(
        next_event(&mut events).await,
        FeedEvent::Subscribed { .. }
    ));
    assert!(matches!(next_event(&mut events).await, FeedEvent::Tick(_)));
    assert_eq!(client.state(), ConnectionState::Streaming);

    cancel.cancel();
}
