use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::info;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::metrics::{self, METRICS};

use super::watcher::{StopRequest, Watcher, WatcherHandle, WatcherSummary};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("watcher {0:?} is already registered")]
    Duplicate(String),

    #[error("registry is closed for shutdown")]
    Closed,
}

/// Process-wide table of running watchers, keyed by name.
///
/// DESIGN:
/// - One mutex around a HashMap; no await happens under it
/// - Every watcher gets a child of the root shutdown token
/// - Watchers remove themselves on exit (`release`); nothing else
///   removes an entry, so a name maps to at most one live task
/// - Every watcher task is spawned on one `TaskTracker`
///
/// THREAD SAFETY:
/// - Cloning shares the same table
/// - Safe to call from any task or thread
#[derive(Clone)]
pub struct WatcherRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

#[derive(Default)]
struct RegistryInner {
    watchers: HashMap<String, WatcherHandle>,
    closed: bool,
}

impl WatcherRegistry {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    /// Root token every watcher's stop token derives from.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Inserts the watcher under its name and starts its task.
    ///
    /// Check and insert happen under one lock, so two concurrent
    /// registrations of the same name cannot both succeed.
    pub fn register(&self, watcher: Watcher) -> Result<WatcherHandle, RegisterError> {
        let handle = {
            let mut inner = self.lock();

            if inner.closed || self.shutdown.is_cancelled() {
                return Err(RegisterError::Closed);
            }
            if inner.watchers.contains_key(watcher.name()) {
                return Err(RegisterError::Duplicate(watcher.name().to_string()));
            }

            let handle = WatcherHandle::new(watcher.record().clone(), self.shutdown.child_token());
            inner.watchers.insert(handle.name().to_string(), handle.clone());
            handle
        };

        metrics::incr(&METRICS.watchers_active);
        info!(
            "[{}] registered for {}_{}",
            handle.name(),
            handle.channel(),
            handle.currency_pair()
        );

        watcher.spawn(handle.clone(), self.clone());
        Ok(handle)
    }

    /// Stops the named watcher, keeping its persisted record. Unknown
    /// names are ignored.
    ///
    /// The entry stays until the watcher has exited, so the name
    /// cannot be registered again while the old instance still runs.
    pub fn unregister(&self, name: &str) -> Option<WatcherHandle> {
        let handle = self.find(name)?;
        handle.stop(StopRequest::Shutdown);
        Some(handle)
    }

    /// Removes `handle` if the entry under its name is still that
    /// same watcher.
    pub(crate) fn release(&self, handle: &WatcherHandle) {
        let mut inner = self.lock();
        let same = inner
            .watchers
            .get(handle.name())
            .is_some_and(|current| current.id() == handle.id());

        if same {
            inner.watchers.remove(handle.name());
        }
    }

    pub fn find(&self, name: &str) -> Option<WatcherHandle> {
        self.lock().watchers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().watchers.contains_key(name)
    }

    /// Snapshot of every registered watcher, sorted by name.
    pub fn list(&self) -> Vec<WatcherSummary> {
        let handles: Vec<WatcherHandle> = self.lock().watchers.values().cloned().collect();

        let mut summaries: Vec<WatcherSummary> = handles.iter().map(WatcherHandle::summary).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub fn len(&self) -> usize {
        self.lock().watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().watchers.is_empty()
    }

    /// Refuses further registrations and returns every watcher still
    /// registered.
    pub(crate) fn close(&self) -> Vec<WatcherHandle> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.watchers.values().cloned().collect()
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Waits until every watcher task this registry spawned has
    /// finished. Only meaningful once the registry is closed.
    pub(crate) async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WatcherRegistry {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
