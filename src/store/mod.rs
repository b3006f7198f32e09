//! Persistence collaborators
//!
//! Watchers read and write two kinds of data:
//! - watcher records (name, channel, pair), used to resume after restart
//! - trades, routed per currency pair
//!
//! All backends implement [`WatcherStore`]. The rest of the crate only
//! sees `Arc<dyn WatcherStore>`.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use anyhow::Context;

use crate::config::{StorageConfig, StorageKind};
use crate::schema::{CurrencyPair, TradeEvent, WatcherRecord};

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Storage backend for watcher records and trades.
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One instance is shared by every watcher; implementations must
///   tolerate concurrent independent writers.
#[async_trait::async_trait]
pub trait WatcherStore: Send + Sync {
    /// Insert-if-absent. An existing record with the same name is kept.
    async fn create_watcher_record(&self, record: &WatcherRecord) -> anyhow::Result<()>;

    /// Removing an absent name is not an error.
    async fn delete_watcher_record(&self, name: &str) -> anyhow::Result<()>;

    async fn list_watcher_records(&self) -> anyhow::Result<Vec<WatcherRecord>>;

    /// Writes one trade to the destination for `pair`.
    async fn insert_trade(&self, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()>;
}

/// Builds the backend selected in the configuration.
pub async fn connect_store(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn WatcherStore>> {
    match cfg.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageKind::Redis => {
            let url = cfg
                .url
                .as_deref()
                .context("storage.url is required for redis storage")?;
            let store = RedisStore::connect(url, &cfg.key_prefix).await?;
            Ok(Arc::new(store))
        }
    }
}
