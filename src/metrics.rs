use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

/// Global runtime metrics for the watcher process.
///
/// Purpose:
/// - Track running watchers and open feed connections
/// - Track throughput (received / persisted trades)
/// - Track failures by kind (parse, persist, reconnect, fatal)
///
/// Design:
/// - Lock-free (Atomics)
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Lifecycle
    pub watchers_active: AtomicUsize,
    pub fatal_stops: AtomicUsize,

    // WebSocket level
    pub ws_connections_active: AtomicUsize,
    pub ws_reconnects: AtomicUsize,

    pub subscriptions_sent: AtomicUsize,
    pub subscription_errors: AtomicUsize,

    // Throughput
    pub trades_received: AtomicUsize,
    pub trades_persisted: AtomicUsize,

    pub parse_errors: AtomicUsize,
    pub persist_errors: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line counter dump for the periodic reporter.
    pub fn report(&self) -> String {
        format!(
            "[METRICS] watchers={} ws={} recv={} persisted={} parse_err={} persist_err={} reconnects={} fatal={} sub_send={} sub_send_err={}",
            self.watchers_active.load(Ordering::Relaxed),
            self.ws_connections_active.load(Ordering::Relaxed),
            self.trades_received.load(Ordering::Relaxed),
            self.trades_persisted.load(Ordering::Relaxed),
            self.parse_errors.load(Ordering::Relaxed),
            self.persist_errors.load(Ordering::Relaxed),
            self.ws_reconnects.load(Ordering::Relaxed),
            self.fatal_stops.load(Ordering::Relaxed),
            self.subscriptions_sent.load(Ordering::Relaxed),
            self.subscription_errors.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Shorthand for a relaxed increment.
pub fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Shorthand for a relaxed decrement.
pub fn decr(counter: &AtomicUsize) {
    counter.fetch_sub(1, Ordering::Relaxed);
}
