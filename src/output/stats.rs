//! Crawl statistics
//!
//! Counters gathered by the controller while it runs, and a plain-text
//! printer for the end-of-crawl summary.

use std::time::Duration;

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStats {
    /// Resources (user ids) crawled
    pub resources: u64,

    /// Streams run to completion (post lists plus comment threads)
    pub streams: u64,

    /// Pages fetched and parsed successfully
    pub pages_fetched: u64,

    /// Fetch attempts that failed and were retried
    pub fetch_failures: u64,

    /// Failed fetches blamed on the egress point
    pub egress_invalidations: u64,

    /// Streams that ended on a page with no items
    pub empty_pages: u64,

    /// Records handed to the sink
    pub items_written: u64,

    /// Items skipped because their id was already delivered
    pub duplicates_skipped: u64,

    /// Items that could not be parsed
    pub parse_errors: u64,

    /// Identity changes (failures and cadence)
    pub identity_rotations: u64,

    /// Long pauses taken (global schedule and failure backoff)
    pub long_waits: u64,

    /// Total time spent sleeping between requests
    pub time_waited: Duration,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of fetch attempts that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        let attempts = self.pages_fetched + self.fetch_failures;
        if attempts == 0 {
            return 0.0;
        }
        (self.pages_fetched as f64 / attempts as f64) * 100.0
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStats) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Resources crawled: {}", stats.resources);
    println!("  Streams completed: {}", stats.streams);
    println!("  Records written: {}", stats.items_written);
    println!();

    println!("Pages:");
    println!("  Fetched: {}", stats.pages_fetched);
    println!("  Failed attempts: {}", stats.fetch_failures);
    println!("  Empty (stream end): {}", stats.empty_pages);
    println!();

    println!("Items:");
    println!("  Duplicates skipped: {}", stats.duplicates_skipped);
    println!("  Parse errors: {}", stats.parse_errors);
    println!();

    println!("Pacing:");
    println!("  Egress invalidations: {}", stats.egress_invalidations);
    println!("  Identity rotations: {}", stats.identity_rotations);
    println!("  Long waits: {}", stats.long_waits);
    println!("  Time waited: {}s", stats.time_waited.as_secs());
    println!();

    println!(
        "Success Rate: {:.1}% ({} / {} fetch attempts)",
        stats.success_rate(),
        stats.pages_fetched,
        stats.pages_fetched + stats.fetch_failures
    );
}
