//! Feed Codec
//!
//! Decodes raw Kraken v1 text frames into either control events or
//! ticker updates. Channel frames for channels other than `ticker` are
//! classified as ignorable rather than errors, so an over-subscribed
//! connection cannot poison the read loop.

use std::str::FromStr;

use rust_decimal::Decimal;

use super::messages::{KrakenEvent, KrakenMessage, TickerPayload};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON parsing failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A channel frame did not have the expected shape.
    #[error("malformed channel frame: {0}")]
    MalformedFrame(String),

    /// A price field could not be parsed as a decimal.
    #[error("invalid {field} price: {value}")]
    InvalidPrice {
        /// Payload field the price came from.
        field: &'static str,
        /// Offending raw value.
        value: String,
    },
}

/// One successfully decoded frame.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// Control event (status, heartbeat, ...).
    Event(KrakenEvent),
    /// Best bid/ask update from the ticker channel.
    Ticker(TickerUpdate),
    /// Valid frame for a channel this client does not consume.
    Ignored,
}

/// Best quote extracted from one ticker frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerUpdate {
    /// Venue pair name, e.g. `XBT/USD`.
    pub pair: String,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
}

/// Decoder for Kraken v1 text frames.
#[derive(Debug, Default, Clone)]
pub struct TickerCodec;

impl TickerCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error when the frame is not valid JSON, a channel
    /// frame is structurally wrong, or a ticker price fails to parse.
    pub fn decode(&self, text: &str) -> Result<Decoded, CodecError> {
        match serde_json::from_str::<KrakenMessage>(text)? {
            KrakenMessage::Event(event) => Ok(Decoded::Event(event)),
            KrakenMessage::ChannelData(frame) => Self::decode_channel_frame(&frame),
        }
    }

    /// Decode an array frame `[channelID, payload, channelName, pair]`.
    fn decode_channel_frame(frame: &[serde_json::Value]) -> Result<Decoded, CodecError> {
        if frame.len() < 4 {
            return Err(CodecError::MalformedFrame(format!(
                "expected 4 elements, got {}",
                frame.len()
            )));
        }

        // Channel name and pair trail the payload.
        let channel = frame[frame.len() - 2]
            .as_str()
            .ok_or_else(|| CodecError::MalformedFrame("channel name is not a string".to_string()))?;
        if channel != "ticker" {
            return Ok(Decoded::Ignored);
        }

        let pair = frame[frame.len() - 1]
            .as_str()
            .ok_or_else(|| CodecError::MalformedFrame("pair is not a string".to_string()))?;

        let payload: TickerPayload = serde_json::from_value(frame[1].clone())?;
        let bid = price_at(&payload.bid, "b")?;
        let ask = price_at(&payload.ask, "a")?;

        Ok(Decoded::Ticker(TickerUpdate {
            pair: pair.to_string(),
            bid,
            ask,
        }))
    }
}

/// Extract the leading price from a `[price, wholeLotVolume, lotVolume]`
/// array. The venue sends prices as strings; numbers are tolerated.
fn price_at(values: &[serde_json::Value], field: &'static str) -> Result<Decimal, CodecError> {
    let raw = values.first().ok_or(CodecError::InvalidPrice {
        field,
        value: "<missing>".to_string(),
    })?;

    match raw {
        serde_json::Value::String(text) => {
            Decimal::from_str(text).map_err(|_| CodecError::InvalidPrice {
                field,
                value: text.clone(),
            })
        }
        serde_json::Value::Number(number) => {
            Decimal::from_str(&number.to_string()).map_err(|_| CodecError::InvalidPrice {
                field,
                value: number.to_string(),
            })
        }
        other => Err(CodecError::InvalidPrice {
            field,
            value: other.to_string(),
        }),
    }
}
