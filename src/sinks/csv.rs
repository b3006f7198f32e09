use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::schema::{CurrencyPair, TradeEvent};

use super::sink::TradeSink;

pub const CSV_HEADER: &str = "trade_pair,id,buy_order_id,sell_order_id,amount,price,timestamp";

/// Appends trades to `<dir>/<pair>.csv`.
///
/// The header is written only when the file is created. Writes go
/// through one lock so rows from watchers on the same pair never
/// interleave.
pub struct CsvSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, pair: CurrencyPair) -> PathBuf {
        self.dir.join(format!("{}.csv", pair))
    }
}

pub fn csv_row(trade: &TradeEvent, pair: CurrencyPair) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        pair, trade.id, trade.buy_order_id, trade.sell_order_id, trade.amount, trade.price, trade.timestamp
    )
}

async fn append(path: &Path, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()> {
    let is_new = !tokio::fs::try_exists(path).await.unwrap_or(false);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;

    let mut out = String::new();
    if is_new {
        out.push_str(CSV_HEADER);
        out.push('\n');
    }
    out.push_str(&csv_row(trade, pair));
    out.push('\n');

    file.write_all(out.as_bytes())
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

#[async_trait::async_trait]
impl TradeSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn accept(&self, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        append(&self.path_for(pair), trade, pair).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TradeType;

    fn trade(id: u64) -> TradeEvent {
        TradeEvent {
            id,
            buy_order_id: 5,
            sell_order_id: 6,
            amount: 0.5,
            price: 1000.0,
            trade_type: TradeType::Buy,
            timestamp: 1609831155,
        }
    }

    #[test]
    fn test_csv_row() {
        assert_eq!(
            csv_row(&trade(222), CurrencyPair::EthUsd),
            "ethusd,222,5,6,0.5,1000,1609831155"
        );
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = std::env::temp_dir().join(format!(
            "csv-sink-{}",
            crate::util::generate_watcher_name(CurrencyPair::BtcUsd)
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let sink = CsvSink::new(&dir);
        sink.accept(&trade(1), CurrencyPair::EthUsd).await.unwrap();
        sink.accept(&trade(2), CurrencyPair::EthUsd).await.unwrap();

        let written = tokio::fs::read_to_string(sink.path_for(CurrencyPair::EthUsd))
            .await
            .unwrap();
        let lines: Vec<&str> = written.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("ethusd,1,"));
        assert!(lines[2].starts_with("ethusd,2,"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
