use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;
use crate::feed::{ConnectionSession, FeedEvent, FeedMessage, RecvError, protocol};
use crate::metrics::{self, METRICS};
use crate::schema::{Channel, CurrencyPair, WatcherRecord};
use crate::sinks::TradeSink;
use crate::store::WatcherStore;

use super::registry::WatcherRegistry;

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Endpoint and timing policy shared by every watcher.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub url: String,

    /// Upper bound of one receive; also the stop-check period.
    pub read_timeout: Duration,

    /// Upper bound of the handshake and of the subscribe send.
    pub connect_timeout: Duration,

    /// Fixed delay before every reconnect attempt.
    pub reconnect_backoff: Duration,

    /// Log every inbound frame at trace level.
    pub log_raw: bool,
}

impl FeedSettings {
    pub fn from_config(cfg: &FeedConfig, log_raw: bool) -> Self {
        Self {
            url: cfg.url.clone(),
            read_timeout: Duration::from_millis(cfg.read_timeout_ms.max(1)),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms.max(1)),
            reconnect_backoff: Duration::from_secs(cfg.reconnect_backoff_secs),
            log_raw,
        }
    }
}

/// Collaborators a watcher needs while running.
#[derive(Clone)]
pub struct WatcherContext {
    pub feed: FeedSettings,
    pub sink: Arc<dyn TradeSink>,
    pub store: Arc<dyn WatcherStore>,
}

// ------------------------------------------------------------
// Lifecycle
// ------------------------------------------------------------
//
//   Created → Connecting → Subscribed → Streaming ⇄ Reconnecting
//                                           ↓
//                               Stopping → Stopped(reason)
//
// Connecting / Subscribed / Streaming are the "active" states.
// A fatal error goes straight to Stopped(Failed).
//
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum WatcherState {
    Created,
    Connecting,
    Subscribed,
    Streaming,
    Reconnecting,
    Stopping,
    Stopped(StopReason),
}

impl WatcherState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            WatcherState::Connecting | WatcherState::Subscribed | WatcherState::Streaming
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WatcherState::Stopped(_))
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        match self {
            WatcherState::Stopped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Why a watcher reached `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit delete; the persisted record was removed.
    Removed,

    /// Global shutdown; the persisted record was kept.
    Shutdown,

    /// Non-retryable error; the persisted record was kept.
    Failed(String),
}

/// What a caller wants done with the record when stopping a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// Stop and delete the persisted record.
    Remove,

    /// Stop and keep the record so the next start resumes it.
    Shutdown,
}

/// Point-in-time view of one watcher, as returned by `list()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherSummary {
    pub name: String,
    pub channel: Channel,
    pub currency_pair: CurrencyPair,
    pub state: WatcherState,
    pub reconnects: u64,
}

// ------------------------------------------------------------
// Handle
// ------------------------------------------------------------

/// Shared control surface of a running watcher.
///
/// Cloning is cheap. The registry holds one clone; callers get
/// others from `register` / `find`.
#[derive(Clone)]
pub struct WatcherHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: u64,
    record: WatcherRecord,
    cancel: CancellationToken,
    stop_request: Mutex<Option<StopRequest>>,
    state: watch::Sender<WatcherState>,
    reconnects: AtomicU64,
}

impl WatcherHandle {
    pub(crate) fn new(record: WatcherRecord, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(WatcherState::Created);

        Self {
            inner: Arc::new(HandleInner {
                id: NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed),
                record,
                cancel,
                stop_request: Mutex::new(None),
                state,
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.record.name
    }

    pub fn channel(&self) -> Channel {
        self.inner.record.channel
    }

    pub fn currency_pair(&self) -> CurrencyPair {
        self.inner.record.currency_pair
    }

    pub fn record(&self) -> &WatcherRecord {
        &self.inner.record
    }

    pub fn state(&self) -> WatcherState {
        self.inner.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.borrow().is_active()
    }

    /// Number of reconnect attempts so far.
    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> WatcherSummary {
        WatcherSummary {
            name: self.name().to_string(),
            channel: self.channel(),
            currency_pair: self.currency_pair(),
            state: self.state(),
            reconnects: self.reconnects(),
        }
    }

    /// Asks the watcher to stop. Returns immediately; use [`join`] to
    /// wait for `Stopped`.
    ///
    /// The first request wins: a delete racing a shutdown keeps
    /// whichever arrived first.
    ///
    /// [`join`]: WatcherHandle::join
    pub fn stop(&self, request: StopRequest) {
        {
            let mut slot = self
                .inner
                .stop_request
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert(request);
        }

        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() || *state == WatcherState::Stopping {
                false
            } else {
                *state = WatcherState::Stopping;
                true
            }
        });

        self.inner.cancel.cancel();
    }

    /// Waits until the watcher has reached `Stopped`.
    pub async fn join(&self) -> StopReason {
        let mut rx = self.inner.state.subscribe();
        let reached = rx.wait_for(WatcherState::is_terminal).await;

        reached
            .ok()
            .and_then(|state| state.stop_reason().cloned())
            .unwrap_or_else(|| StopReason::Failed("state channel closed".to_string()))
    }

    fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Reason to report when the stop token fired. A token cancelled
    /// through the registry's root token carries no request and
    /// counts as shutdown.
    fn requested_stop(&self) -> StopReason {
        let request = *self
            .inner
            .stop_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match request {
            Some(StopRequest::Remove) => StopReason::Removed,
            Some(StopRequest::Shutdown) | None => StopReason::Shutdown,
        }
    }

    /// Moves to `next` unless a stop is already under way.
    fn transition(&self, next: WatcherState) {
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() || *state == WatcherState::Stopping || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn record_reconnect(&self) {
        self.inner.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, reason: StopReason) {
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = WatcherState::Stopped(reason);
                true
            }
        });
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("name", &self.name())
            .field("channel", &self.channel())
            .field("currency_pair", &self.currency_pair())
            .field("state", &self.state())
            .finish()
    }
}

// ------------------------------------------------------------
// Watcher
// ------------------------------------------------------------

/// One subscription to `{channel}_{pair}`, not yet running.
///
/// Hand it to `WatcherRegistry::register` to start it.
pub struct Watcher {
    record: WatcherRecord,
    context: WatcherContext,
}

/// How one streaming session ended.
enum StreamEnd {
    Cancelled,
    Lost(String),
    Fatal(String),
}

impl Watcher {
    pub fn new(
        name: impl Into<String>,
        channel: Channel,
        currency_pair: CurrencyPair,
        context: WatcherContext,
    ) -> Self {
        Self {
            record: WatcherRecord::new(name, channel, currency_pair),
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn record(&self) -> &WatcherRecord {
        &self.record
    }

    /// Spawns the watcher task.
    ///
    /// The exit guard is created before the task so that a task that
    /// never gets polled still leaves the registry.
    pub(crate) fn spawn(self, handle: WatcherHandle, registry: WatcherRegistry) {
        let tasks = registry.tasks().clone();
        let mut guard = ExitGuard {
            handle: handle.clone(),
            registry,
            reason: None,
        };

        tasks.spawn(async move {
            let reason = self.run(&handle).await;
            guard.reason = Some(reason);
        });
    }

    async fn run(&self, handle: &WatcherHandle) -> StopReason {
        let reason = self.run_until_stopped(handle).await;

        if reason == StopReason::Removed {
            if let Err(e) = self.context.store.delete_watcher_record(self.name()).await {
                warn!("[{}] failed to delete watcher record: {:#}", self.name(), e);
            }
        }

        reason
    }

    async fn run_until_stopped(&self, handle: &WatcherHandle) -> StopReason {
        let cancel = handle.cancel_token();
        let topic = self.record.channel.topic(self.record.currency_pair);

        // Consecutive transient failures; only the first one of a
        // streak is logged at warn.
        let mut failures: u32 = 0;

        if let Err(e) = self.context.store.create_watcher_record(&self.record).await {
            warn!("[{}] failed to persist watcher record: {:#}", self.name(), e);
        }

        loop {
            if cancel.is_cancelled() {
                return handle.requested_stop();
            }

            handle.transition(WatcherState::Connecting);

            let opened = tokio::select! {
                _ = cancel.cancelled() => return handle.requested_stop(),
                opened = ConnectionSession::open(
                    &self.context.feed.url,
                    self.context.feed.connect_timeout,
                ) => opened,
            };

            let mut session = match opened {
                Ok(session) => session,
                Err(e) if e.is_transient() => {
                    self.note_transient(&mut failures, &e.to_string());
                    if !self.backoff(handle, &cancel).await {
                        return handle.requested_stop();
                    }
                    continue;
                }
                Err(e) => return StopReason::Failed(e.to_string()),
            };

            if let Err(e) = session.subscribe(&topic, self.context.feed.connect_timeout).await {
                metrics::incr(&METRICS.subscription_errors);
                session.close().await;

                if !e.is_transient() {
                    return StopReason::Failed(format!("subscribe to {}: {}", topic, e));
                }
                self.note_transient(&mut failures, &e.to_string());
                if !self.backoff(handle, &cancel).await {
                    return handle.requested_stop();
                }
                continue;
            }

            metrics::incr(&METRICS.subscriptions_sent);
            handle.transition(WatcherState::Subscribed);
            info!("[{}] subscribed to {}", self.name(), topic);

            let end = self.stream(&mut session, handle, &cancel, &mut failures).await;
            session.close().await;

            match end {
                StreamEnd::Cancelled => return handle.requested_stop(),
                StreamEnd::Fatal(reason) => return StopReason::Failed(reason),
                StreamEnd::Lost(reason) => {
                    self.note_transient(&mut failures, &reason);
                    if !self.backoff(handle, &cancel).await {
                        return handle.requested_stop();
                    }
                }
            }
        }
    }

    /// Receive loop for one open session.
    ///
    /// Every iteration is one bounded read. A read timeout is only the
    /// chance to notice a stop; the stop token is also raced against
    /// the read so a stop does not wait out the timeout.
    async fn stream(
        &self,
        session: &mut ConnectionSession,
        handle: &WatcherHandle,
        cancel: &CancellationToken,
        failures: &mut u32,
    ) -> StreamEnd {
        handle.transition(WatcherState::Streaming);

        loop {
            // A pending stop wins over frames already buffered.
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                received = session.receive(self.context.feed.read_timeout) => received,
            };

            match received {
                Ok(FeedMessage::Text(text)) => {
                    *failures = 0;
                    if let Some(end) = self.dispatch(&text).await {
                        return end;
                    }
                }
                Ok(FeedMessage::Control) => {}
                Err(RecvError::Timeout(_)) => {}
                Err(e) if e.is_transient() => return StreamEnd::Lost(e.to_string()),
                Err(e) => return StreamEnd::Fatal(e.to_string()),
            }
        }
    }

    /// Acts on one text frame. `Some` ends the session.
    async fn dispatch(&self, text: &str) -> Option<StreamEnd> {
        if self.context.feed.log_raw {
            trace!("[{}] RAW {}", self.name(), text);
        }

        match protocol::parse_message(text) {
            Ok(FeedEvent::Trade { pair, trade }) => {
                metrics::incr(&METRICS.trades_received);

                match self.context.sink.accept(&trade, pair).await {
                    Ok(()) => metrics::incr(&METRICS.trades_persisted),
                    Err(e) => {
                        metrics::incr(&METRICS.persist_errors);
                        warn!(
                            "[{}] {} sink dropped trade {} for {}: {:#}",
                            self.name(),
                            self.context.sink.name(),
                            trade.id,
                            pair,
                            e
                        );
                    }
                }
                None
            }

            Ok(FeedEvent::Subscribed(topic)) => {
                debug!("[{}] subscription to {} confirmed", self.name(), topic);
                None
            }

            Ok(FeedEvent::ReconnectRequested) => {
                info!("[{}] server requested reconnect", self.name());
                Some(StreamEnd::Lost("server requested reconnect".to_string()))
            }

            Ok(FeedEvent::Rejected(message)) => {
                Some(StreamEnd::Fatal(format!("feed rejected subscription: {}", message)))
            }

            Ok(FeedEvent::Ignored(event)) => {
                trace!("[{}] ignoring {} event", self.name(), event);
                None
            }

            Err(e) => {
                metrics::incr(&METRICS.parse_errors);
                warn!("[{}] skipping frame: {}", self.name(), e);
                None
            }
        }
    }

    fn note_transient(&self, failures: &mut u32, reason: &str) {
        if *failures == 0 {
            warn!(
                "[{}] feed connection down ({}), retrying every {:?} until it is back",
                self.name(),
                reason,
                self.context.feed.reconnect_backoff
            );
        } else {
            debug!("[{}] still down after {} attempt(s): {}", self.name(), failures, reason);
        }
        *failures = failures.saturating_add(1);
    }

    /// Sleeps for the reconnect backoff. Returns `false` if a stop
    /// arrived first.
    async fn backoff(&self, handle: &WatcherHandle, cancel: &CancellationToken) -> bool {
        handle.transition(WatcherState::Reconnecting);
        handle.record_reconnect();
        metrics::incr(&METRICS.ws_reconnects);

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(self.context.feed.reconnect_backoff) => true,
        }
    }
}

/// Runs on every exit path of a watcher task, including a panic in
/// a sink: leaves the registry, then publishes `Stopped`.
struct ExitGuard {
    handle: WatcherHandle,
    registry: WatcherRegistry,
    reason: Option<StopReason>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let reason = self
            .reason
            .take()
            .unwrap_or_else(|| StopReason::Failed("watcher task ended abnormally".to_string()));

        self.registry.release(&self.handle);
        metrics::decr(&METRICS.watchers_active);

        match &reason {
            StopReason::Removed => info!("[{}] stopped and removed", self.handle.name()),
            StopReason::Shutdown => info!("[{}] stopped for shutdown", self.handle.name()),
            StopReason::Failed(cause) => {
                metrics::incr(&METRICS.fatal_stops);
                error!("[{}] stopped after fatal error: {}", self.handle.name(), cause);
            }
        }

        self.handle.finish(reason);
    }
}
