use chrono::{DateTime, Local};

use crate::schema::{CurrencyPair, TradeEvent};

use super::sink::TradeSink;

/// Prints each trade to stdout as a small block.
///
/// Meant for watching a pair by eye; nothing is stored.
pub struct ConsoleSink;

/// Renders the console block for one trade.
///
/// Timestamps are shown in local time; an out-of-range timestamp
/// falls back to the raw epoch value.
pub fn format_trade(trade: &TradeEvent, pair: CurrencyPair) -> String {
    let time = DateTime::from_timestamp(trade.timestamp, 0)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| trade.timestamp.to_string());

    format!(
        "Trade data ({pair})\n    id: {}\n    buy_order_id: {}\n    sell_order_id: {}\n    type: {}\n    amount: {}\n    price: {}\n    time: {}",
        trade.id,
        trade.buy_order_id,
        trade.sell_order_id,
        trade.trade_type.as_str(),
        trade.amount,
        trade.price,
        time,
    )
}

#[async_trait::async_trait]
impl TradeSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn accept(&self, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()> {
        println!("{}", format_trade(trade, pair));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TradeType;

    #[test]
    fn test_format_trade() {
        let trade = TradeEvent {
            id: 139255607,
            buy_order_id: 1,
            sell_order_id: 2,
            amount: 0.064,
            price: 30859.03,
            trade_type: TradeType::Buy,
            timestamp: 1609777594,
        };

        let block = format_trade(&trade, CurrencyPair::BtcUsd);
        assert!(block.starts_with("Trade data (btcusd)"));
        assert!(block.contains("    id: 139255607"));
        assert!(block.contains("    type: buy"));
        assert!(block.contains("    price: 30859.03"));
        assert!(block.contains("    time: 2021-01-0"));
    }
}
