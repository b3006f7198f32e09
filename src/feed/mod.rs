//! Upstream feed layer
//!
//! This module provides:
//! - `protocol`: Bitstamp frame formats (subscribe frame, inbound decoding)
//! - `session`: one WebSocket connection with bounded reads
//!
//! Nothing here knows about watchers, retries or persistence. The
//! collector layer decides what a given error means for a watcher.

pub mod protocol;
pub mod session;

pub use protocol::{FeedEvent, ParseError};
pub use session::{ConnectError, ConnectionSession, FeedMessage, RecvError};
