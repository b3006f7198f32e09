use serde_json::{Value, json};
use thiserror::Error;

use crate::schema::{CurrencyPair, FeedEnvelope, TradeEvent};
use crate::util;

/// Bitstamp WebSocket protocol (v2 public channels)
///
/// WS:
/// wss://ws.bitstamp.net
///
/// Notes:
/// - No auth
/// - One subscription per frame, one trade per message
/// - The pair is only present in the channel topic, not in the payload
/// - The server may ask clients to reconnect (`bts:request_reconnect`)
///   during maintenance; this is not an error.
pub const SUBSCRIBE_EVENT: &str = "bts:subscribe";
pub const TRADE_EVENT: &str = "trade";
pub const SUBSCRIPTION_SUCCEEDED_EVENT: &str = "bts:subscription_succeeded";
pub const REQUEST_RECONNECT_EVENT: &str = "bts:request_reconnect";
pub const ERROR_EVENT: &str = "bts:error";

/// A decoded inbound frame, reduced to what a watcher acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Executed trade, routed by the pair in the channel topic
    Trade {
        pair: CurrencyPair,
        trade: TradeEvent,
    },

    /// Subscribe acknowledgement for the given topic
    Subscribed(String),

    /// Server-initiated reconnect request
    ReconnectRequested,

    /// Server-side rejection (bad subscription, bad frame format)
    Rejected(String),

    /// Any other event kind; carries the event name for logging
    Ignored(String),
}

/// Reasons a single frame could not be decoded.
///
/// All of these are per-message: the frame is skipped and the
/// stream continues.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("invalid trade payload on {channel}: {source}")]
    InvalidTrade {
        channel: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("trade on unroutable channel {0:?}")]
    UnroutableChannel(String),
}

/// Builds the subscribe frame for a `{channel}_{pair}` topic.
///
/// Shape:
///     {"event": "bts:subscribe", "data": {"channel": "<topic>"}}
pub fn subscribe_message(topic: &str) -> Value {
    json!({
        "event": SUBSCRIBE_EVENT,
        "data": {
            "channel": topic
        }
    })
}

/// Parses a raw text frame into a [`FeedEvent`].
///
/// CONTRACT:
/// - Never panics
/// - Only `trade` frames have their payload decoded
/// - Unknown events are `Ignored`, not errors
pub fn parse_message(raw: &str) -> Result<FeedEvent, ParseError> {
    let envelope: FeedEnvelope = serde_json::from_str(raw).map_err(ParseError::Malformed)?;

    match envelope.event.as_str() {
        TRADE_EVENT => {
            // channel = live_trades_btcusd → btcusd
            let pair = util::pair_from_topic(&envelope.channel)
                .ok_or_else(|| ParseError::UnroutableChannel(envelope.channel.clone()))?;

            let trade = serde_json::from_value(envelope.data).map_err(|source| {
                ParseError::InvalidTrade {
                    channel: envelope.channel.clone(),
                    source,
                }
            })?;

            Ok(FeedEvent::Trade { pair, trade })
        }

        SUBSCRIPTION_SUCCEEDED_EVENT => Ok(FeedEvent::Subscribed(envelope.channel)),

        REQUEST_RECONNECT_EVENT => Ok(FeedEvent::ReconnectRequested),

        ERROR_EVENT => {
            let message = envelope
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified error")
                .to_string();
            Ok(FeedEvent::Rejected(message))
        }

        _ => Ok(FeedEvent::Ignored(envelope.event)),
    }
}
