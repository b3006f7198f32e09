use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::anyhow;

use crate::schema::{CurrencyPair, TradeEvent, WatcherRecord};

use super::WatcherStore;

/// In-process store.
///
/// Records are kept ordered by name; trades are appended per pair in
/// arrival order. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: BTreeMap<String, WatcherRecord>,
    trades: HashMap<CurrencyPair, Vec<TradeEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str) -> Option<WatcherRecord> {
        self.inner.lock().ok()?.records.get(name).cloned()
    }

    /// Trades written for `pair`, oldest first.
    pub fn trades(&self, pair: CurrencyPair) -> Vec<TradeEvent> {
        self.inner
            .lock()
            .map(|inner| inner.trades.get(&pair).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> anyhow::Result<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(f(&mut inner))
    }
}

#[async_trait::async_trait]
impl WatcherStore for MemoryStore {
    async fn create_watcher_record(&self, record: &WatcherRecord) -> anyhow::Result<()> {
        self.with_inner(|inner| {
            inner
                .records
                .entry(record.name.clone())
                .or_insert_with(|| record.clone());
        })
    }

    async fn delete_watcher_record(&self, name: &str) -> anyhow::Result<()> {
        self.with_inner(|inner| {
            inner.records.remove(name);
        })
    }

    async fn list_watcher_records(&self) -> anyhow::Result<Vec<WatcherRecord>> {
        self.with_inner(|inner| inner.records.values().cloned().collect())
    }

    async fn insert_trade(&self, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()> {
        self.with_inner(|inner| {
            inner.trades.entry(pair).or_default().push(trade.clone());
        })
    }
}
