//! Sink trait and record types
//!
//! This module defines the interface between the crawl controller and the
//! persistence backends, plus the records that flow across it.

use crate::state::StreamKind;
use thiserror::Error;

/// Errors that can occur while persisting records
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write output: {0}")]
    Write(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// How a crawl run ended (or that it has not yet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One item as extracted from a page: its id and an ordered field map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl RawItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field, keeping insertion order
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The post a comment stream belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub post_id: String,
    pub post_number: u64,
}

/// A numbered item ready for persistence
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: StreamKind,

    /// Top-level resource (user id) the item was crawled under
    pub resource_id: String,

    /// Set for comments
    pub parent: Option<ParentRef>,

    /// Position in the stream, starting at 1
    pub number: u64,

    /// Page the item was found on
    pub page: u32,

    pub item: RawItem,
}

impl Record {
    /// Human-facing number: `"7"` for posts, `"<post number>-<n>"` for comments
    pub fn label(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}-{}", parent.post_number, self.number),
            None => self.number.to_string(),
        }
    }
}

/// All records delivered from one successful page of one stream
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub kind: StreamKind,
    pub resource_id: String,
    pub parent: Option<ParentRef>,
    pub page: u32,
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Persistence backend for crawled records
///
/// The controller calls `start_stream` when a stream begins, `write` at most
/// once per (stream, page) and in page order, then `finish` once when the
/// crawl ends, whether it completed or not.
pub trait Sink {
    /// Prepares for a new stream; a rerun stream replaces earlier output
    fn start_stream(
        &mut self,
        _kind: StreamKind,
        _resource_id: &str,
        _parent: Option<&ParentRef>,
    ) -> SinkResult<()> {
        Ok(())
    }

    /// Persists one page worth of records
    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()>;

    /// Flushes buffered output and records how the run ended
    fn finish(&mut self, status: RunStatus) -> SinkResult<()>;
}

/// Fans every batch out to several sinks
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn Sink + Send>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: impl Sink + Send + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Sink for MultiSink {
    fn start_stream(
        &mut self,
        kind: StreamKind,
        resource_id: &str,
        parent: Option<&ParentRef>,
    ) -> SinkResult<()> {
        for sink in &mut self.sinks {
            sink.start_stream(kind, resource_id, parent)?;
        }
        Ok(())
    }

    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        for sink in &mut self.sinks {
            sink.write(batch)?;
        }
        Ok(())
    }

    /// Finishes every sink, even when an earlier one fails
    fn finish(&mut self, status: RunStatus) -> SinkResult<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.finish(status) {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
