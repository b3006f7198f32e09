/// Collector module
///
/// This module groups all logic responsible for:
/// - Running one watcher task per subscription
/// - Tracking running watchers by name
/// - Creating, deleting and listing watchers
/// - Stopping everything on shutdown
///
/// The collector layer sits between:
/// - The feed layer (connection + Bitstamp frames)
/// - Sinks and stores (where trades and watcher records go)
///
/// Design notes:
/// - Bitstamp frame formats MUST NOT leak in here; use `feed::protocol`
/// - Retry policy lives in `watcher`; everything else stays thin
pub mod control;
pub mod registry;
pub mod shutdown;
pub mod watcher;

pub use control::ControlPlane;
pub use registry::{RegisterError, WatcherRegistry};
pub use shutdown::ShutdownCoordinator;
pub use watcher::{
    FeedSettings, StopReason, StopRequest, Watcher, WatcherContext, WatcherHandle, WatcherState,
    WatcherSummary,
};
