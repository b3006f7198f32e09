//! Trade sinks and sink factory
//!
//! This module provides:
//! - The `TradeSink` trait watchers write through
//! - One implementation per output destination
//! - A factory resolving the configured output
//!
//! Watchers never know which destination they feed.

pub mod console;
pub mod csv;
pub mod sink;
pub mod store;

use std::sync::Arc;

use crate::config::{OutputConfig, OutputKind};
use crate::store::WatcherStore;

pub use console::ConsoleSink;
pub use csv::CsvSink;
pub use sink::TradeSink;
pub use store::StoreSink;

/// Returns the sink selected by `output`.
///
/// `store` is only used by the `store` output; console and csv
/// outputs still keep watcher records in it.
pub fn build_sink(output: &OutputConfig, store: Arc<dyn WatcherStore>) -> Arc<dyn TradeSink> {
    match output.kind {
        OutputKind::Store => Arc::new(StoreSink::new(store)),
        OutputKind::Console => Arc::new(ConsoleSink),
        OutputKind::Csv => Arc::new(CsvSink::new(output.csv_dir.clone())),
    }
}
