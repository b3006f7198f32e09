use std::future::Future;

use futures_util::future::join_all;
use log::info;

use super::registry::WatcherRegistry;
use super::watcher::{StopReason, StopRequest};

/// Stops every watcher on a termination request.
///
/// CONTRACT:
/// - The registry refuses new watchers from the moment shutdown starts
/// - Persisted watcher records are kept
/// - Returns only after every watcher has reached `Stopped` and every
///   watcher task has exited, including ones already unregistered
pub struct ShutdownCoordinator {
    registry: WatcherRegistry,
}

impl ShutdownCoordinator {
    pub fn new(registry: WatcherRegistry) -> Self {
        Self { registry }
    }

    /// Waits for `signal`, then shuts down.
    pub async fn run_until<F>(&self, signal: F) -> Vec<(String, StopReason)>
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown().await
    }

    pub async fn shutdown(&self) -> Vec<(String, StopReason)> {
        let handles = self.registry.close();
        info!("shutting down {} watcher(s)", handles.len());

        for handle in &handles {
            handle.stop(StopRequest::Shutdown);
        }
        self.registry.shutdown_token().cancel();

        let reasons = join_all(handles.iter().map(|handle| handle.join())).await;
        self.registry.wait_idle().await;

        let stopped: Vec<(String, StopReason)> = handles
            .iter()
            .map(|handle| handle.name().to_string())
            .zip(reasons)
            .collect();

        info!("shutdown complete, {} watcher(s) stopped", stopped.len());
        stopped
    }
}
