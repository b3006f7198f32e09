/// Utility helpers shared by the feed and collector layers.
///
/// This module contains:
/// - Topic / pair helpers for Bitstamp channel names
/// - Watcher name generation
///
/// IMPORTANT:
/// - No connection or registry logic should live here.
/// - Everything in this module is synchronous and side-effect free,
///   apart from the random suffix generator.
///

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::schema::CurrencyPair;

/// Length of the random part of generated watcher names.
pub const NAME_SUFFIX_LEN: usize = 5;

/// Recover the currency pair from a channel topic.
///
/// Examples:
/// - "live_trades_ethusd"       -> Some(EthUsd)
/// - "diff_order_book_btceur"   -> Some(BtcEur)
/// - "live_trades_"             -> None
///
/// Pair symbols never contain `_`, so the last segment is the pair
/// no matter how many underscores the channel kind itself has.
///
pub fn pair_from_topic(topic: &str) -> Option<CurrencyPair> {
    let (_, pair) = topic.rsplit_once('_')?;
    pair.parse().ok()
}

/// Build a candidate watcher name: `{pair}-{suffix}`.
///
/// The suffix is random lowercase alphanumeric, so two calls may
/// collide; the registry is the one that decides uniqueness.
///
pub fn generate_watcher_name(pair: CurrencyPair) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NAME_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();

    format!("{}-{}", pair.as_str(), suffix)
}
