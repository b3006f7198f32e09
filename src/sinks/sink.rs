use crate::schema::{CurrencyPair, TradeEvent};

/// TradeSink is the seam between a watcher and wherever trades end up.
///
/// A watcher hands every decoded trade to exactly one sink, in the
/// order the feed delivered them, and forgets it.
///
/// CONTRACT:
/// - `pair` is the routing key taken from the channel topic
/// - An `Err` is logged and counted by the caller; the watcher keeps
///   running and the trade is not retried
/// - Must not panic
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One sink instance is shared by every watcher
#[async_trait::async_trait]
pub trait TradeSink: Send + Sync {
    /// Short identifier for logs ("store", "console", "csv").
    fn name(&self) -> &'static str;

    async fn accept(&self, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()>;
}
