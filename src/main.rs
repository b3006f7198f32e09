// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use anyhow::Context;
use log::{error, info};
use rustls::crypto::{CryptoProvider, ring};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use bitstamp_trade_watcher::collector::{
    ControlPlane, FeedSettings, ShutdownCoordinator, WatcherContext, WatcherRegistry,
};
use bitstamp_trade_watcher::config::{Config, load_config};
use bitstamp_trade_watcher::metrics::METRICS;
use bitstamp_trade_watcher::sinks::build_sink;
use bitstamp_trade_watcher::store::connect_store;

const DEFAULT_CONFIG_PATH: &str = "config.json";

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration and logging
// - Connect the store and pick the trade sink
// - Resume persisted watchers, then start missing seed watchers
// - Stop every watcher on SIGINT / SIGTERM
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, once, before the first TLS connection.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config: Config = load_config(&config_path)?;

    init_logging(&config);
    info!("loaded configuration from {}", config_path);

    // --------------------------------------------------------
    // Collaborators shared by every watcher
    // --------------------------------------------------------
    let store = connect_store(&config.storage)
        .await
        .context("connecting watcher store")?;
    let sink = build_sink(&config.output, store.clone());
    info!(
        "feed {} | storage {:?} | output {}",
        config.feed.url,
        config.storage.kind,
        sink.name()
    );

    let context = WatcherContext {
        feed: FeedSettings::from_config(&config.feed, config.debug_raw()),
        sink,
        store,
    };

    let registry = WatcherRegistry::new(CancellationToken::new());
    let control = ControlPlane::new(registry.clone(), context);

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    let interval = config.metrics_interval();
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            info!("{}", METRICS.report());
        }
    });

    // --------------------------------------------------------
    // Resume what was running before, then fill in seeds
    // --------------------------------------------------------
    if let Err(e) = control.resume_persisted().await {
        error!("failed to resume persisted watchers: {:#}", e);
    }

    for seed in &config.watchers {
        match control.ensure_watcher(seed.channel, seed.currency_pair) {
            Ok(Some(name)) => info!("[{}] started from config seed", name),
            Ok(None) => {}
            Err(e) => error!(
                "seed {}_{} not started: {}",
                seed.channel, seed.currency_pair, e
            ),
        }
    }

    if registry.is_empty() {
        info!("no watchers running; add seeds under \"watchers\" in {}", config_path);
    }

    // --------------------------------------------------------
    // Run until asked to stop
    // --------------------------------------------------------
    let coordinator = ShutdownCoordinator::new(registry);
    let stopped = coordinator.run_until(termination_signal()).await;

    info!("exiting, {} watcher(s) stopped", stopped.len());
    info!("{}", METRICS.report());
    Ok(())
}

// ------------------------------------------------------------
// Logging
// ------------------------------------------------------------
//
// RUST_LOG wins when set; otherwise `debug.log` selects debug
// over info.
//
fn init_logging(config: &Config) {
    let default_level = if config.debug_log() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received Ctrl-C");
}
