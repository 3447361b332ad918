//! Kraken WebSocket Client
//!
//! Connects to Kraken's public v1 WebSocket stream, subscribes to the
//! ticker channel for the configured pairs, and emits one [`Tick`] per
//! best-quote update.
//!
//! # Stream URL
//!
//! - Production: `wss://ws.kraken.com`
//!
//! # Lifecycle
//!
//! The client moves through `Disconnected → Connecting → Streaming` and
//! back through `Reconnecting` on any transport failure, with
//! exponential backoff between attempts. The backoff schedule resets as
//! soon as a subscription is confirmed again. Malformed frames are
//! dropped and counted without terminating the session; ticks are only
//! ever produced from decoded ticker frames.
//!
//! # Timestamps
//!
//! The v1 ticker payload carries no event timestamp, so ticks are
//! stamped with the receive time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, Decoded, TickerCodec};
use super::messages::{KrakenEvent, SubscribeRequest};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::market_data::Tick;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the feed client.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Encoding the subscribe request failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server closed the connection or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// No frame (heartbeats included) arrived within the idle timeout.
    #[error("no frames within idle timeout")]
    IdleTimeout,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Disconnected,
    /// Dialing and subscribing.
    Connecting,
    /// Subscription confirmed, ticks flowing.
    Streaming,
    /// Waiting out a backoff delay after a failure.
    Reconnecting,
}

impl ConnectionState {
    /// Stable label for logs and the health payload.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Numeric encoding for the connection-state gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Streaming => 2.0,
            Self::Reconnecting => 3.0,
        }
    }
}

// =============================================================================
// Feed Events
// =============================================================================

/// Events emitted by the feed client.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Subscription confirmed, stream is live.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Waiting to reconnect.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// One pair's subscription was confirmed.
    Subscribed {
        /// Venue pair name.
        pair: String,
    },
    /// Best-quote update, stamped at receipt.
    Tick(Tick),
}

// =============================================================================
// Configuration
// =============================================================================

/// Maps one venue pair to the canonical symbol stored downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairMapping {
    /// Venue pair name, e.g. `XBT/USD`.
    pub pair: String,
    /// Canonical symbol, e.g. `BTCUSD`.
    pub symbol: String,
}

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct KrakenClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Pairs to subscribe, with their canonical symbols.
    pub pairs: Vec<PairMapping>,
    /// Reconnection backoff configuration.
    pub reconnect: ReconnectConfig,
    /// Recycle the connection when no frame arrives for this long.
    pub idle_timeout: Duration,
}

impl KrakenClientConfig {
    /// Create a configuration with default backoff and idle timeout.
    #[must_use]
    pub fn new(url: String, pairs: Vec<PairMapping>) -> Self {
        Self {
            url,
            pairs,
            reconnect: ReconnectConfig::default(),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Kraken Client
// =============================================================================

/// Feed client for Kraken ticker data.
pub struct KrakenClient {
    config: KrakenClientConfig,
    codec: TickerCodec,
    symbol_by_pair: HashMap<String, String>,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    state: parking_lot::RwLock<ConnectionState>,
}

impl KrakenClient {
    /// Create a new feed client.
    #[must_use]
    pub fn new(
        config: KrakenClientConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let symbol_by_pair = config
            .pairs
            .iter()
            .map(|mapping| (mapping.pair.clone(), mapping.symbol.clone()))
            .collect();

        Self {
            config,
            codec: TickerCodec::new(),
            symbol_by_pair,
            event_tx,
            cancel,
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        metrics::record_feed_state(state.gauge_value());
        tracing::debug!(state = state.as_str(), "Feed connection state changed");
    }

    /// Run the feed connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::MaxReconnectAttemptsExceeded`] when a
    /// bounded attempt budget runs out; with the default unlimited
    /// budget the loop only returns on cancellation.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                tracing::info!("Feed client cancelled");
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            match self.connect_and_stream(&mut policy).await {
                Ok(()) => {
                    self.set_state(ConnectionState::Disconnected);
                    tracing::info!("Feed connection closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection error");
                    metrics::record_feed_connection(false);
                    self.set_state(ConnectionState::Reconnecting);
                    let _ = self.event_tx.send(FeedEvent::Disconnected).await;

                    if let Some(delay) = policy.next_delay() {
                        let attempt = policy.attempt_count();
                        tracing::info!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Reconnecting to feed"
                        );
                        metrics::record_feed_reconnect();
                        let _ = self.event_tx.send(FeedEvent::Reconnecting { attempt }).await;

                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                self.set_state(ConnectionState::Disconnected);
                                tracing::info!("Feed client cancelled during reconnect delay");
                                return Ok(());
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        return Err(FeedError::MaxReconnectAttemptsExceeded);
                    }
                }
            }
        }
    }

    /// Connect, subscribe, and pump frames until error or cancellation.
    async fn connect_and_stream(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedError> {
        tracing::info!(url = %self.config.url, "Connecting to feed");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        // No auth on the public stream; subscribe straight away.
        let pairs: Vec<String> = self.config.pairs.iter().map(|m| m.pair.clone()).collect();
        let request = SubscribeRequest::ticker(pairs);
        let json = serde_json::to_string(&request).map_err(CodecError::from)?;
        write.send(Message::Text(json.into())).await?;
        tracing::debug!(pairs = ?request.pair, "Sent ticker subscribe request");

        let idle = tokio::time::sleep(self.config.idle_timeout);
        tokio::pin!(idle);
        let mut streaming = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Ok(());
                }
                () = &mut idle => {
                    tracing::warn!(
                        idle_secs = self.config.idle_timeout.as_secs(),
                        "No frames within idle timeout, recycling connection"
                    );
                    return Err(FeedError::IdleTimeout);
                }
                msg = read.next() => {
                    idle.as_mut()
                        .reset(tokio::time::Instant::now() + self.config.idle_timeout);

                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text, &mut streaming, policy).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(FeedError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore binary and pong frames
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(FeedError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Handle one text frame. Parse failures are dropped and counted,
    /// never surfaced as session errors.
    async fn handle_frame(&self, text: &str, streaming: &mut bool, policy: &mut ReconnectPolicy) {
        match self.codec.decode(text) {
            Ok(Decoded::Ticker(update)) => {
                metrics::record_feed_message("ticker");

                let Some(symbol) = self.symbol_by_pair.get(&update.pair) else {
                    tracing::warn!(pair = %update.pair, "Ticker for unmapped pair dropped");
                    return;
                };

                let tick = Tick::new(symbol.clone(), Utc::now(), update.bid, update.ask);
                if self.event_tx.send(FeedEvent::Tick(tick)).await.is_err() {
                    tracing::debug!("Event channel closed, dropping tick");
                }
            }
            Ok(Decoded::Event(event)) => {
                self.handle_event(event, streaming, policy).await;
            }
            Ok(Decoded::Ignored) => {
                metrics::record_feed_message("other");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed feed frame dropped");
                metrics::record_feed_parse_error();
            }
        }
    }

    /// Handle one control event.
    async fn handle_event(
        &self,
        event: KrakenEvent,
        streaming: &mut bool,
        policy: &mut ReconnectPolicy,
    ) {
        match event {
            KrakenEvent::SystemStatus {
                connection_id,
                status,
                version,
            } => {
                metrics::record_feed_message("system_status");
                tracing::info!(
                    status = %status,
                    connection_id = ?connection_id,
                    version = ?version,
                    "Feed system status"
                );
            }
            KrakenEvent::SubscriptionStatus {
                pair,
                channel_name,
                status,
                error_message,
                ..
            } => {
                metrics::record_feed_message("subscription_status");

                if status == "subscribed" {
                    tracing::info!(
                        pair = ?pair,
                        channel = ?channel_name,
                        "Subscription confirmed"
                    );

                    // First confirmation marks the stream live and
                    // collapses the backoff schedule.
                    if !*streaming {
                        *streaming = true;
                        self.set_state(ConnectionState::Streaming);
                        policy.reset();
                        metrics::record_feed_connection(true);
                        let _ = self.event_tx.send(FeedEvent::Connected).await;
                    }

                    let _ = self
                        .event_tx
                        .send(FeedEvent::Subscribed {
                            pair: pair.unwrap_or_default(),
                        })
                        .await;
                } else if status == "error" {
                    tracing::warn!(
                        pair = ?pair,
                        reason = ?error_message,
                        "Subscription rejected by venue"
                    );
                } else {
                    tracing::debug!(pair = ?pair, status = %status, "Subscription status");
                }
            }
            KrakenEvent::Heartbeat => {
                metrics::record_feed_message("heartbeat");
                tracing::trace!("Feed heartbeat");
            }
            KrakenEvent::Pong { .. } => {}
            KrakenEvent::Unknown => {
                metrics::record_feed_message("unknown");
                tracing::debug!("Ignoring unknown feed event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use std::str::FromStr;

    use super::*;

    const TICKER_FRAME: &str = r#"[340,{"a":["31208.10000",0,"0.50000000"],"b":["31207.90000",1,"1.00000000"],"c":["31208.00000","0.00992710"]},"ticker","XBT/USD"]"#;

    fn client_with_channel(capacity: usize) -> (Arc<KrakenClient>, mpsc::Receiver<FeedEvent>) {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let config = KrakenClientConfig::new(
            "wss://ws.kraken.com".to_string(),
            vec![PairMapping {
                pair: "XBT/USD".to_string(),
                symbol: "BTCUSD".to_string(),
            }],
        );
        let client = Arc::new(KrakenClient::new(
            config,
            event_tx,
            CancellationToken::new(),
        ));
        (client, event_rx)
    }

    fn fresh_policy() -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig::default())
    }

    #[tokio::test]
    async fn ticker_frame_becomes_canonical_tick() {
        let (client, mut events) = client_with_channel(4);
        let mut streaming = true;
        let before = Utc::now();

        client
            .handle_frame(TICKER_FRAME, &mut streaming, &mut fresh_policy())
            .await;

        match events.try_recv().unwrap() {
            FeedEvent::Tick(tick) => {
                assert_eq!(tick.symbol, "BTCUSD");
                assert_eq!(tick.bid, Decimal::from_str("31207.90000").unwrap());
                assert_eq!(tick.ask, Decimal::from_str("31208.10000").unwrap());
                assert!(tick.time >= before && tick.time <= Utc::now());
            }
            other => panic!("expected Tick, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_events() {
        let (client, mut events) = client_with_channel(4);
        let mut streaming = true;

        client
            .handle_frame("{{{{ nonsense", &mut streaming, &mut fresh_policy())
            .await;
        client
            .handle_frame(
                r#"[340,{"a":["bad",0,"0.5"],"b":["31207.9",1,"1.0"]},"ticker","XBT/USD"]"#,
                &mut streaming,
                &mut fresh_policy(),
            )
            .await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unmapped_pair_is_dropped() {
        let (client, mut events) = client_with_channel(4);
        let mut streaming = true;
        let frame = r#"[7,{"a":["1850.1",0,"1.0"],"b":["1850.0",1,"2.0"]},"ticker","ETH/USD"]"#;

        client
            .handle_frame(frame, &mut streaming, &mut fresh_policy())
            .await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn first_subscription_confirmation_goes_live_and_resets_backoff() {
        let (client, mut events) = client_with_channel(4);
        let mut streaming = false;
        let mut policy = fresh_policy();
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        let frame = r#"{"channelID":340,"channelName":"ticker","event":"subscriptionStatus","pair":"XBT/USD","status":"subscribed","subscription":{"name":"ticker"}}"#;
        client.handle_frame(frame, &mut streaming, &mut policy).await;

        assert!(streaming);
        assert_eq!(client.state(), ConnectionState::Streaming);
        assert_eq!(policy.attempt_count(), 0);
        assert!(matches!(events.try_recv().unwrap(), FeedEvent::Connected));
        assert!(matches!(
            events.try_recv().unwrap(),
            FeedEvent::Subscribed { .. }
        ));
    }

    #[tokio::test]
    async fn heartbeat_keeps_stream_state_untouched() {
        let (client, mut events) = client_with_channel(4);
        let mut streaming = true;

        client
            .handle_frame(r#"{"event":"heartbeat"}"#, &mut streaming, &mut fresh_policy())
            .await;

        assert!(events.try_recv().is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connection_state_labels() {
        let cases = [
            (ConnectionState::Disconnected, "disconnected", 0.0),
            (ConnectionState::Connecting, "connecting", 1.0),
            (ConnectionState::Streaming, "streaming", 2.0),
            (ConnectionState::Reconnecting, "reconnecting", 3.0),
        ];

        for (state, label, gauge) in cases {
            assert_eq!(state.as_str(), label);
            assert!((state.gauge_value() - gauge).abs() < f64::EPSILON);
        }
    }
}
