use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised when a wire value does not map onto the typed schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("unknown currency pair: {0}")]
    UnknownPair(String),

    #[error("unknown trade type: {0}")]
    UnknownTradeType(u8),
}

// ------------------------------------------------------------
// Channels
// ------------------------------------------------------------
//
// Bitstamp public channels. The subscription topic is always
// `{channel}_{pair}`, e.g. `live_trades_btcusd`.
//
// Channel               Event(s)
// live_trades           trade
// live_orders           order_created / order_changed / order_deleted
// order_book            data
// detail_order_book     data
// diff_order_book       data
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    LiveTrades,
    LiveOrders,
    OrderBook,
    DetailOrderBook,
    DiffOrderBook,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::LiveTrades,
        Channel::LiveOrders,
        Channel::OrderBook,
        Channel::DetailOrderBook,
        Channel::DiffOrderBook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::LiveTrades => "live_trades",
            Channel::LiveOrders => "live_orders",
            Channel::OrderBook => "order_book",
            Channel::DetailOrderBook => "detail_order_book",
            Channel::DiffOrderBook => "diff_order_book",
        }
    }

    /// Subscription topic for this channel on `pair`.
    pub fn topic(&self, pair: CurrencyPair) -> String {
        format!("{}_{}", self.as_str(), pair.as_str())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownChannel(s.to_string()))
    }
}

// ------------------------------------------------------------
// Currency pairs
// ------------------------------------------------------------
//
// The wire form is the lowercase concatenation used by Bitstamp
// (`btcusd`). Pair symbols never contain `_`, which is what makes
// the pair recoverable from the end of a channel topic.
//
macro_rules! currency_pairs {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum CurrencyPair {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl CurrencyPair {
            pub const ALL: &'static [CurrencyPair] = &[$(CurrencyPair::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(CurrencyPair::$variant => $wire,)+
                }
            }
        }
    };
}

currency_pairs! {
    BtcUsd => "btcusd", BtcEur => "btceur", BtcGbp => "btcgbp", BtcPax => "btcpax",
    BtcUsdc => "btcusdc", GbpUsd => "gbpusd", GbpEur => "gbpeur", EurUsd => "eurusd",
    XrpUsd => "xrpusd", XrpEur => "xrpeur", XrpBtc => "xrpbtc", XrpGbp => "xrpgbp",
    XrpPax => "xrppax", LtcUsd => "ltcusd", LtcEur => "ltceur", LtcBtc => "ltcbtc",
    LtcGbp => "ltcgbp", EthUsd => "ethusd", EthEur => "etheur", EthBtc => "ethbtc",
    EthGbp => "ethgbp", EthPax => "ethpax", EthUsdc => "ethusdc", BchUsd => "bchusd",
    BchEur => "bcheur", BchBtc => "bchbtc", BchGbp => "bchgbp", PaxUsd => "paxusd",
    PaxEur => "paxeur", PaxGbp => "paxgbp", XlmBtc => "xlmbtc", XlmUsd => "xlmusd",
    XlmEur => "xlmeur", XlmGbp => "xlmgbp", LinkUsd => "linkusd", LinkEur => "linkeur",
    LinkGbp => "linkgbp", LinkBtc => "linkbtc", LinkEth => "linketh", OmgUsd => "omgusd",
    OmgEur => "omgeur", OmgGbp => "omggbp", OmgBtc => "omgbtc", UsdcUsd => "usdcusd",
    UsdcEur => "usdceur",
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyPair {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CurrencyPair::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownPair(s.to_string()))
    }
}

// ------------------------------------------------------------
// Watcher record
// ------------------------------------------------------------
//
// Persisted description of one subscription. The name is the
// control key; channel and pair are enough to rebuild the
// watcher after a restart.
//
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherRecord {
    pub name: String,
    pub channel: Channel,
    pub currency_pair: CurrencyPair,
}

impl WatcherRecord {
    pub fn new(name: impl Into<String>, channel: Channel, currency_pair: CurrencyPair) -> Self {
        Self {
            name: name.into(),
            channel,
            currency_pair,
        }
    }
}

// ------------------------------------------------------------
// Trade message
// ------------------------------------------------------------
//
// One executed trade from the `live_trades_*` channels.
//
// Sample payload:
//   {"id": 139255607, "buy_order_id": 1314580971991040,
//    "sell_order_id": 1314580969922560, "amount": 0.064,
//    "amount_str": "0.06400000", "price": 30859.03,
//    "price_str": "30859.03", "type": 0,
//    "timestamp": "1609777594", "microtimestamp": "1609777594772000"}
//
// Only the seven persisted fields are kept; `*_str` and
// `microtimestamp` are dropped during deserialization.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: u64,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
    pub amount: f64,
    pub price: f64,

    #[serde(rename = "type")]
    pub trade_type: TradeType,

    /// Seconds since Unix epoch.
    ///
    /// The live feed sends this as a string, older captures as a
    /// number; both are accepted.
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: i64,
}

/// Trade side as reported by Bitstamp: `0` = buy, `1` = sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TradeType {
    Buy,
    Sell,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "buy",
            TradeType::Sell => "sell",
        }
    }
}

impl TryFrom<u8> for TradeType {
    type Error = SchemaError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TradeType::Buy),
            1 => Ok(TradeType::Sell),
            other => Err(SchemaError::UnknownTradeType(other)),
        }
    }
}

impl From<TradeType> for u8 {
    fn from(value: TradeType) -> Self {
        match value {
            TradeType::Buy => 0,
            TradeType::Sell => 1,
        }
    }
}

fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ------------------------------------------------------------
// Inbound envelope
// ------------------------------------------------------------
//
// Every frame the feed sends has this outer shape. `data` is left
// untyped until `event` says what it contains.
//
#[derive(Debug, Clone, Deserialize)]
pub struct FeedEnvelope {
    pub event: String,

    #[serde(default)]
    pub channel: String,

    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trips_through_str() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
        assert_eq!(
            "tickers".parse::<Channel>(),
            Err(SchemaError::UnknownChannel("tickers".to_string()))
        );
    }

    #[test]
    fn test_pair_set_is_complete() {
        assert_eq!(CurrencyPair::ALL.len(), 45);
        assert_eq!("linketh".parse::<CurrencyPair>().unwrap(), CurrencyPair::LinkEth);
        assert!("dogeusd".parse::<CurrencyPair>().is_err());
        assert!(CurrencyPair::ALL.iter().all(|p| !p.as_str().contains('_')));
    }

    #[test]
    fn test_topic_format() {
        assert_eq!(Channel::LiveTrades.topic(CurrencyPair::BtcUsd), "live_trades_btcusd");
        assert_eq!(
            Channel::DiffOrderBook.topic(CurrencyPair::UsdcEur),
            "diff_order_book_usdceur"
        );
    }

    #[test]
    fn test_record_serializes_with_wire_names() {
        let record = WatcherRecord::new("btcusd-ab12c", Channel::LiveTrades, CurrencyPair::BtcUsd);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["channel"], "live_trades");
        assert_eq!(json["currency_pair"], "btcusd");
    }

    #[test]
    fn test_trade_from_live_payload() {
        let raw = r#"{"buy_order_id": 1314580971991040, "amount_str": "0.06400000",
            "timestamp": "1609777594", "microtimestamp": "1609777594772000",
            "id": 139255607, "amount": 0.064, "sell_order_id": 1314580969922560,
            "price_str": "30859.03", "type": 1, "price": 30859.03}"#;

        let trade: TradeEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(trade.id, 139255607);
        assert_eq!(trade.buy_order_id, 1314580971991040);
        assert_eq!(trade.sell_order_id, 1314580969922560);
        assert_eq!(trade.amount, 0.064);
        assert_eq!(trade.price, 30859.03);
        assert_eq!(trade.trade_type, TradeType::Sell);
        assert_eq!(trade.timestamp, 1609777594);
    }

    #[test]
    fn test_trade_numeric_timestamp() {
        let raw = r#"{"id":222,"buy_order_id":1,"sell_order_id":2,"amount":0.5,
            "price":1000.0,"type":0,"timestamp":1609831155}"#;
        let trade: TradeEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(trade.timestamp, 1609831155);
        assert_eq!(trade.trade_type, TradeType::Buy);
    }

    #[test]
    fn test_trade_rejects_unknown_type() {
        let raw = r#"{"id":1,"buy_order_id":1,"sell_order_id":2,"amount":0.5,
            "price":1.0,"type":7,"timestamp":1}"#;
        assert!(serde_json::from_str::<TradeEvent>(raw).is_err());
    }
}
