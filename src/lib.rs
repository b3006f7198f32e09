// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - schema:    Channels, currency pairs, trades and watcher records
// - util:      Shared helpers (topic parsing, watcher names)
// - metrics:   Process-wide counters
// - feed:      Bitstamp WebSocket session and frame decoding
// - store:     Watcher record / trade persistence backends
// - sinks:     Where received trades are written
// - collector: Watcher lifecycle, registry, control plane, shutdown
//
pub mod collector;
pub mod config;
pub mod feed;
pub mod metrics;
pub mod schema;
pub mod sinks;
pub mod store;
pub mod util;
