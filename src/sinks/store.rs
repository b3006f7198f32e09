use std::sync::Arc;

use crate::schema::{CurrencyPair, TradeEvent};
use crate::store::WatcherStore;

use super::sink::TradeSink;

/// Writes trades through the configured [`WatcherStore`].
pub struct StoreSink {
    store: Arc<dyn WatcherStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn WatcherStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl TradeSink for StoreSink {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn accept(&self, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()> {
        self.store.insert_trade(trade, pair).await
    }
}
