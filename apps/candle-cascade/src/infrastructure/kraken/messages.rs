//! Kraken WebSocket Message Types
//!
//! Wire format types for the Kraken v1 public WebSocket API. The stream
//! mixes two frame shapes:
//!
//! - **Event frames**: JSON objects carrying an `event` discriminator
//!   (`systemStatus`, `subscriptionStatus`, `heartbeat`, `pong`).
//! - **Channel frames**: JSON arrays of the form
//!   `[channelID, payload, channelName, pair]` carrying market data.
//!
//! Prices inside channel payloads are decimal strings, so they pass
//! through without float rounding until parsed into `Decimal`.
//!
//! # References
//!
//! - [Kraken WebSocket API v1](https://docs.kraken.com/websockets/)

use serde::{Deserialize, Serialize};

// =============================================================================
// Outbound Messages
// =============================================================================

/// Subscription request sent right after connecting.
///
/// # Wire Format (JSON)
/// ```json
/// {"event":"subscribe","pair":["XBT/USD"],"subscription":{"name":"ticker"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Always `"subscribe"`.
    pub event: String,
    /// Venue pair names, e.g. `XBT/USD`.
    pub pair: Vec<String>,
    /// Channel selector.
    pub subscription: SubscriptionSpec,
}

/// Channel selector inside a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Channel name, e.g. `ticker`.
    pub name: String,
}

impl SubscribeRequest {
    /// Build a ticker subscription for the given pairs.
    #[must_use]
    pub fn ticker(pairs: Vec<String>) -> Self {
        Self {
            event: "subscribe".to_string(),
            pair: pairs,
            subscription: SubscriptionSpec {
                name: "ticker".to_string(),
            },
        }
    }
}

// =============================================================================
// Event Frames
// =============================================================================

/// Object frames, discriminated by their `event` field.
///
/// Unrecognized events deserialize as [`KrakenEvent::Unknown`] instead
/// of failing, so venue-side additions never break the read loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event")]
pub enum KrakenEvent {
    /// Sent once per connection.
    ///
    /// # Wire Format (JSON)
    /// ```json
    /// {"connectionID":8628615390848610000,"event":"systemStatus","status":"online","version":"1.0.0"}
    /// ```
    #[serde(rename = "systemStatus")]
    SystemStatus {
        /// Venue-assigned connection id.
        #[serde(rename = "connectionID")]
        connection_id: Option<u64>,
        /// `online`, `maintenance`, ...
        status: String,
        /// API version string.
        version: Option<String>,
    },

    /// Response to a subscribe request, one per pair.
    ///
    /// # Wire Format (JSON)
    /// ```json
    /// {"channelID":340,"channelName":"ticker","event":"subscriptionStatus","pair":"XBT/USD","status":"subscribed","subscription":{"name":"ticker"}}
    /// ```
    ///
    /// Rejections use `"status":"error"` with an `errorMessage` instead
    /// of a channel id.
    #[serde(rename = "subscriptionStatus")]
    SubscriptionStatus {
        /// Channel id for subsequent data frames.
        #[serde(rename = "channelID")]
        channel_id: Option<i64>,
        /// Channel name, e.g. `ticker`.
        #[serde(rename = "channelName")]
        channel_name: Option<String>,
        /// Pair the status applies to.
        pair: Option<String>,
        /// `subscribed`, `unsubscribed`, or `error`.
        status: String,
        /// Venue reason when `status` is `error`.
        #[serde(rename = "errorMessage")]
        error_message: Option<String>,
    },

    /// Keep-alive sent roughly once per second on an idle channel.
    ///
    /// # Wire Format (JSON)
    /// ```json
    /// {"event":"heartbeat"}
    /// ```
    #[serde(rename = "heartbeat")]
    Heartbeat,

    /// Response to an application-level ping.
    #[serde(rename = "pong")]
    Pong {
        /// Request id echoed back, if one was sent.
        reqid: Option<i64>,
    },

    /// Any event this client does not model.
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Channel Frames
// =============================================================================

/// One inbound frame: either an event object or a channel data array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KrakenMessage {
    /// Object frame with an `event` discriminator.
    Event(KrakenEvent),
    /// Array frame `[channelID, payload, channelName, pair]`.
    ChannelData(Vec<serde_json::Value>),
}

/// Ticker channel payload.
///
/// Only the best-quote arrays are modeled; the venue's volume, VWAP and
/// OHLC fields are ignored. The `a`/`b` arrays are
/// `[price, wholeLotVolume, lotVolume]` with the price as a decimal
/// string.
///
/// # Wire Format (JSON)
/// ```json
/// {"a":["31208.10000",0,"0.50000000"],"b":["31207.90000",1,"1.00000000"],"c":["31208.00000","0.00992710"]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPayload {
    /// Best ask `[price, whole lot volume, lot volume]`.
    #[serde(rename = "a")]
    pub ask: Vec<serde_json::Value>,
    /// Best bid `[price, whole lot volume, lot volume]`.
    #[serde(rename = "b")]
    pub bid: Vec<serde_json::Value>,
}
