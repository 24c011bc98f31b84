//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `StreamState`: the per-stream state machine (start, fetch, parse, pace, done)
//! - `StreamKind`: post list stream or comment stream
//! - `CrawlCursor`: page position, dedup set and item counter of one stream

mod cursor;
mod stream_state;

// Re-export main types
pub use cursor::CrawlCursor;
pub use stream_state::{StreamKind, StreamState};
