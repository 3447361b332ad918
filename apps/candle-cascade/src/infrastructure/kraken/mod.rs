//! Kraken WebSocket Adapter
//!
//! Tick source adapter over Kraken's public v1 WebSocket stream:
//!
//! - **client**: connection lifecycle, subscription, idle watchdog
//! - **codec**: frame classification and best-quote extraction
//! - **messages**: wire format types
//! - **reconnect**: exponential backoff policy

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;

pub use client::{
    ConnectionState, FeedError, FeedEvent, KrakenClient, KrakenClientConfig, PairMapping,
};
pub use codec::{CodecError, Decoded, TickerCodec, TickerUpdate};
pub use messages::{KrakenEvent, KrakenMessage, SubscribeRequest, TickerPayload};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
