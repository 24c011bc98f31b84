//! Output module for persisting crawled records
//!
//! This module handles:
//! - The `Sink` interface the controller writes batches through
//! - CSV files per resource and per post (`CsvSink`)
//! - A SQLite database with one run per crawl (`SqliteSink`)
//! - Crawl statistics and their printed summary

mod csv_sink;
mod schema;
mod sqlite_sink;
pub mod stats;
mod traits;

pub use csv_sink::CsvSink;
pub use sqlite_sink::SqliteSink;
pub use stats::{print_statistics, CrawlStats};
pub use traits::{
    MultiSink, ParentRef, RawItem, Record, RecordBatch, RunStatus, Sink, SinkError, SinkResult,
};

use crate::config::{OutputConfig, WriteMode};
use std::path::Path;

/// Builds the sinks enabled by `write-mode`
///
/// # Arguments
///
/// * `config` - Output configuration
/// * `config_hash` - Hash of the configuration file, recorded with SQLite runs
pub fn build_sinks(config: &OutputConfig, config_hash: &str) -> SinkResult<MultiSink> {
    let mut sinks = MultiSink::new();
    for mode in &config.write_mode {
        match mode {
            WriteMode::Csv => sinks.push(CsvSink::new(&config.directory)),
            WriteMode::Sqlite => {
                sinks.push(SqliteSink::new(Path::new(&config.database_path), config_hash)?)
            }
        }
    }
    Ok(sinks)
}
