//! Shared fixtures for integration tests: a scripted local feed
//! server, stores that fail on purpose, and polling helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use bitstamp_trade_watcher::collector::{FeedSettings, WatcherContext};
use bitstamp_trade_watcher::schema::{CurrencyPair, TradeEvent, WatcherRecord};
use bitstamp_trade_watcher::sinks::{StoreSink, TradeSink};
use bitstamp_trade_watcher::store::{MemoryStore, WatcherStore};

/// What the mock feed does with each connection.
#[derive(Debug, Clone)]
pub enum FeedScript {
    /// After the subscribe frame, send these frames and keep the
    /// connection open until the client leaves.
    Frames(Vec<String>),

    /// Close the connection right after the subscribe frame.
    CloseAfterSubscribe,

    /// Answer the WebSocket upgrade with this HTTP status.
    HttpStatus(u16),

    /// Accept TCP and never answer the upgrade.
    Silent,
}

/// Local WebSocket server standing in for the Bitstamp feed.
pub struct MockFeed {
    addr: SocketAddr,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockFeed {
    pub async fn start(script: FeedScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));

        let task = {
            let subscriptions = subscriptions.clone();
            let connections = connections.clone();
            let open = open.clone();

            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    open.fetch_add(1, Ordering::SeqCst);

                    let script = script.clone();
                    let subscriptions = subscriptions.clone();
                    let open = open.clone();
                    tokio::spawn(async move {
                        serve(stream, script, subscriptions).await;
                        open.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            addr,
            subscriptions,
            connections,
            open,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Channels named in subscribe frames, in arrival order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Connections currently held open by a client.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for MockFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, script: FeedScript, subscriptions: Arc<Mutex<Vec<String>>>) {
    match script {
        FeedScript::HttpStatus(status) => {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let response = format!(
                "HTTP/1.1 {} Feed Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            let _ = stream.write_all(response.as_bytes()).await;
            return;
        }
        FeedScript::Silent => {
            let mut buf = [0u8; 1024];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    return;
                }
            }
            return;
        }
        _ => {}
    }

    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    let Some(Ok(Message::Text(subscribe))) = ws.next().await else {
        return;
    };
    let frame: Value = serde_json::from_str(subscribe.as_str()).unwrap_or_default();
    if let Some(channel) = frame["data"]["channel"].as_str() {
        subscriptions.lock().unwrap().push(channel.to_string());
    }

    match script {
        FeedScript::CloseAfterSubscribe => {
            let _ = ws.close(None).await;
        }
        FeedScript::Frames(frames) => {
            for frame in frames {
                if ws.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            while let Some(Ok(_)) = ws.next().await {}
        }
        FeedScript::HttpStatus(_) | FeedScript::Silent => {}
    }
}

// ------------------------------------------------------------
// Frames
// ------------------------------------------------------------

pub fn trade_frame(pair: CurrencyPair, id: u64, price: f64) -> String {
    serde_json::json!({
        "event": "trade",
        "channel": format!("live_trades_{}", pair),
        "data": {
            "id": id,
            "buy_order_id": id + 1,
            "sell_order_id": id + 2,
            "amount": 0.5,
            "price": price,
            "type": 0,
            "timestamp": "1609831155",
            "microtimestamp": "1609831155000000"
        }
    })
    .to_string()
}

pub fn subscribed_frame(topic: &str) -> String {
    serde_json::json!({ "event": "bts:subscription_succeeded", "channel": topic, "data": {} })
        .to_string()
}

pub fn error_frame(message: &str) -> String {
    serde_json::json!({
        "event": "bts:error",
        "channel": "",
        "data": { "code": null, "message": message }
    })
    .to_string()
}

// ------------------------------------------------------------
// Stores
// ------------------------------------------------------------

/// Store whose every write fails; counts trade write attempts.
#[derive(Default)]
pub struct BrokenStore {
    pub trade_attempts: AtomicUsize,
}

#[async_trait::async_trait]
impl WatcherStore for BrokenStore {
    async fn create_watcher_record(&self, _record: &WatcherRecord) -> anyhow::Result<()> {
        anyhow::bail!("store offline")
    }

    async fn delete_watcher_record(&self, _name: &str) -> anyhow::Result<()> {
        anyhow::bail!("store offline")
    }

    async fn list_watcher_records(&self) -> anyhow::Result<Vec<WatcherRecord>> {
        anyhow::bail!("store offline")
    }

    async fn insert_trade(&self, _trade: &TradeEvent, _pair: CurrencyPair) -> anyhow::Result<()> {
        self.trade_attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("store offline")
    }
}

// ------------------------------------------------------------
// Sinks
// ------------------------------------------------------------

/// Sink that holds every trade until a permit is added, then writes
/// it through to `store`.
pub struct GatedSink {
    pub store: Arc<MemoryStore>,
    pub entered: AtomicUsize,
    pub gate: Semaphore,
}

impl GatedSink {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            entered: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait::async_trait]
impl TradeSink for GatedSink {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn accept(&self, trade: &TradeEvent, pair: CurrencyPair) -> anyhow::Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        self.store.insert_trade(trade, pair).await
    }
}

// ------------------------------------------------------------
// Context + polling
// ------------------------------------------------------------

pub fn feed_settings(url: &str) -> FeedSettings {
    FeedSettings {
        url: url.to_string(),
        read_timeout: Duration::from_millis(100),
        connect_timeout: Duration::from_millis(300),
        reconnect_backoff: Duration::from_millis(100),
        log_raw: false,
    }
}

/// Context writing trades and records to `store`.
pub fn context_with(url: &str, store: Arc<dyn WatcherStore>) -> WatcherContext {
    WatcherContext {
        feed: feed_settings(url),
        sink: Arc::new(StoreSink::new(store.clone())),
        store,
    }
}

pub fn memory_context(url: &str) -> (WatcherContext, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (context_with(url, store.clone()), store)
}

/// Polls `check` until it holds; panics after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(20)).await;
    }
}
