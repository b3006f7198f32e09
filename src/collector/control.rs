use log::{debug, info, warn};

use crate::schema::{Channel, CurrencyPair};
use crate::util::generate_watcher_name;

use super::registry::{RegisterError, WatcherRegistry};
use super::watcher::{StopReason, StopRequest, Watcher, WatcherContext, WatcherHandle, WatcherSummary};

/// Generated-name attempts before giving up on a pair.
const MAX_NAME_ATTEMPTS: usize = 16;

/// Programmatic create / delete / list over the registry.
///
/// This is the only place new watchers are named and built; every
/// watcher it starts shares one `WatcherContext`.
#[derive(Clone)]
pub struct ControlPlane {
    registry: WatcherRegistry,
    context: WatcherContext,
}

impl ControlPlane {
    pub fn new(registry: WatcherRegistry, context: WatcherContext) -> Self {
        Self { registry, context }
    }

    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    /// Starts a watcher under a fresh `{pair}-{suffix}` name and
    /// returns the name.
    pub fn create_watcher(
        &self,
        channel: Channel,
        currency_pair: CurrencyPair,
    ) -> Result<String, RegisterError> {
        let mut last = String::new();

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = generate_watcher_name(currency_pair);

            match self.start_watcher(&name, channel, currency_pair) {
                Ok(handle) => return Ok(handle.name().to_string()),
                Err(RegisterError::Duplicate(taken)) => {
                    debug!("name {} taken, drawing another", taken);
                    last = taken;
                }
                Err(e) => return Err(e),
            }
        }

        Err(RegisterError::Duplicate(last))
    }

    /// Starts a watcher under an exact name.
    pub fn start_watcher(
        &self,
        name: &str,
        channel: Channel,
        currency_pair: CurrencyPair,
    ) -> Result<WatcherHandle, RegisterError> {
        let watcher = Watcher::new(name, channel, currency_pair, self.context.clone());
        self.registry.register(watcher)
    }

    /// Stops the named watcher and deletes its record, waiting until
    /// it has stopped.
    ///
    /// The record is gone afterwards whatever the watcher's own exit
    /// reason was, e.g. a fatal error that landed just before the stop.
    /// A name with no running watcher only has its record dropped (a
    /// watcher that failed keeps one); `None` is returned.
    pub async fn delete_watcher(&self, name: &str) -> Option<StopReason> {
        let Some(handle) = self.registry.find(name) else {
            debug!("[{}] delete: no running watcher", name);
            self.forget_record(name).await;
            return None;
        };

        handle.stop(StopRequest::Remove);
        let reason = handle.join().await;

        if reason != StopReason::Removed {
            debug!("[{}] stopped as {:?} before the delete landed", name, reason);
            self.forget_record(name).await;
        }
        Some(reason)
    }

    async fn forget_record(&self, name: &str) {
        if let Err(e) = self.context.store.delete_watcher_record(name).await {
            warn!("[{}] failed to delete watcher record: {:#}", name, e);
        }
    }

    pub fn list_watchers(&self) -> Vec<WatcherSummary> {
        self.registry.list()
    }

    /// Starts a watcher for `channel`/`currency_pair` unless one is
    /// already registered. Returns the new name, if any.
    pub fn ensure_watcher(
        &self,
        channel: Channel,
        currency_pair: CurrencyPair,
    ) -> Result<Option<String>, RegisterError> {
        let covered = self
            .registry
            .list()
            .iter()
            .any(|w| w.channel == channel && w.currency_pair == currency_pair);

        if covered {
            return Ok(None);
        }
        self.create_watcher(channel, currency_pair).map(Some)
    }

    /// Restarts every watcher found in the store under its stored
    /// name. Names already running are skipped.
    pub async fn resume_persisted(&self) -> anyhow::Result<usize> {
        let records = self.context.store.list_watcher_records().await?;
        let mut started = 0;

        for record in records {
            match self.start_watcher(&record.name, record.channel, record.currency_pair) {
                Ok(_) => started += 1,
                Err(RegisterError::Duplicate(name)) => {
                    debug!("[{}] already running, not resuming", name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if started > 0 {
            info!("resumed {} persisted watcher(s)", started);
        }
        Ok(started)
    }
}
