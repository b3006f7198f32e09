use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::schema::{Channel, CurrencyPair};

/// Bitstamp public WebSocket endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://ws.bitstamp.net";

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json`.
//
// It defines:
// - Feed endpoint and retry timings
// - Where watcher records and trades are persisted
// - Where trades are written (store / console / csv)
// - Seed subscriptions started on boot
// - Optional debug configuration
//
// Every section has defaults, so `{}` is a valid file.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub storage: StorageConfig,
    pub output: OutputConfig,

    /// Subscriptions that should exist after startup
    pub watchers: Vec<WatcherSeed>,

    pub debug: Option<DebugConfig>,
}

impl Config {
    pub fn debug_log(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.log.unwrap_or(false))
    }

    pub fn debug_raw(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.raw.unwrap_or(false))
    }

    pub fn metrics_interval(&self) -> Duration {
        let secs = self
            .debug
            .as_ref()
            .and_then(|d| d.metrics_interval_secs)
            .unwrap_or(60);
        Duration::from_secs(secs.max(1))
    }
}

// ------------------------------------------------------------
// Feed configuration
// ------------------------------------------------------------
//
// Notes:
// - `read_timeout_ms` bounds every receive; it is also the
//   longest a watcher goes without checking for a stop request.
// - `connect_timeout_ms` bounds the TCP + WebSocket handshake and
//   the subscribe send; running out counts as a network failure.
// - `reconnect_backoff_secs` is a fixed delay, not exponential.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
    pub read_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_backoff_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            read_timeout_ms: 1_000,
            connect_timeout_ms: 10_000,
            reconnect_backoff_secs: 10,
        }
    }
}

// ------------------------------------------------------------
// Storage configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-local, lost on exit
    #[default]
    Memory,

    /// Redis hashes under `key_prefix`
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,

    /// Connection URL, required for `redis`
    pub url: Option<String>,

    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            url: None,
            key_prefix: "bitstamp".to_string(),
        }
    }
}

// ------------------------------------------------------------
// Output configuration
// ------------------------------------------------------------
//
// Chooses the trade sink. Watcher records always go to the
// configured storage; only trades follow `kind`.
//
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Store,
    Console,
    Csv,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub kind: OutputKind,

    /// Directory for `<pair>.csv` files
    pub csv_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: OutputKind::Store,
            csv_dir: PathBuf::from("."),
        }
    }
}

/// A subscription to create at boot if no running watcher covers it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct WatcherSeed {
    pub channel: Channel,
    pub currency_pair: CurrencyPair,
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DebugConfig {
    /// Raises the default log filter to `debug`
    pub log: Option<bool>,

    /// Logs every inbound frame at `trace`
    pub raw: Option<bool>,

    /// Period of the `[METRICS]` line
    pub metrics_interval_secs: Option<u64>,
}

/// Reads a JSON configuration file from disk.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_json::from_str(&data)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}
