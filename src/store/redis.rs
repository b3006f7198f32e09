use std::collections::HashMap;

use anyhow::Context;
use log::{info, warn};
use ::redis::aio::MultiplexedConnection;

use crate::schema::{CurrencyPair, TradeEvent, WatcherRecord};

use super::WatcherStore;

/// Redis-backed store.
///
/// Layout:
/// - `<prefix>:watchers`        hash, field = watcher name, value = JSON record
/// - `<prefix>:trades:<pair>`   hash, field = trade id, value = JSON trade
///
/// Both are written with HSETNX, so a second write for the same key
/// is a no-op. For trades this means a trade id is stored once per
/// pair even when several watchers cover the same pair.
///
/// The multiplexed connection is cloned per call; clones share one
/// socket and pipeline concurrent commands.
pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> anyhow::Result<Self> {
        let client = ::redis::Client::open(url).with_context(|| format!("invalid redis url {}", url))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("connecting to redis at {}", url))?;

        info!("redis store ready (prefix {:?})", prefix);

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn watchers_key(&self) -> String {
        watchers_key(&self.prefix)
    }

    fn trades_key(&self, pair: CurrencyPair) -> String {
        trades_key(&self.prefix, pair)
    }
}

fn watchers_key(prefix: &str) -> String {
    format!("{}:watchers", prefix)
}

fn trades_key(prefix: &str, pair: CurrencyPair) -> String {
    format!("{}:trades:{}", prefix, pair)
}

#[async_trait::async_trait]
impl WatcherStore for RedisStore {
    async fn create_watcher_record(&self, record: &WatcherRecord) -> anyhow::Result<()> {
        let value = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        ::redis::cmd("HSETNX")
            .arg(self.watchers_key())
            .arg(&record.name)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("storing watcher record {}", record.name))
    }

    async fn delete_watcher_record(&self, name: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();

        ::redis::cmd("HDEL")
            .arg(self.watchers_key())
            .arg(name)
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("deleting watcher record {}", name))
    }

    async fn list_watcher_records(&self) -> anyhow::Result<Vec<WatcherRecord>> {
        let mut conn = self.conn.clone();

        let raw: HashMap<String, String> = ::redis::cmd("HGETALL")
            .arg(self.watchers_key())
            .query_async(&mut conn)
            .await
            .context("listing watcher records")?;

        let mut records: Vec<WatcherRecord> = raw
            .into_iter()
            .filter_map(|(name, value)| match serde_json::from_str(&value) {
                Ok(record) => Some(record),
                Err(e) => {
                    // Left in place for manual inspection.
                    warn!("skipping unreadable watcher record {}: {}", name, e);
                    None
                }
            })
            .collect();

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn insert_trade(&self, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()> {
        let value = serde_json::to_string(trade)?;
        let mut conn = self.conn.clone();

        ::redis::cmd("HSETNX")
            .arg(self.trades_key(pair))
            .arg(trade.id)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("storing trade {} for {}", trade.id, pair))
    }
}
