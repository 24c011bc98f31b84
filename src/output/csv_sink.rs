//! CSV output
//!
//! Layout under the output directory:
//!
//! ```text
//! <directory>/<resource id>/<resource id>.csv        posts
//! <directory>/<resource id>/comments_<post id>.csv   comments of one post
//! ```
//!
//! Files are opened in append mode per batch; a header row is written when a
//! file is created. A post's comment file is removed when its comment stream
//! starts, so a rerun thread replaces the old rows. Files start with a UTF-8 byte order mark so spreadsheet
//! tools pick the right encoding.

use crate::output::traits::{
    ParentRef, Record, RecordBatch, RunStatus, Sink, SinkError, SinkResult,
};
use crate::state::StreamKind;
use csv::WriterBuilder;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Writes posts and comments as CSV files, one directory per resource
#[derive(Debug)]
pub struct CsvSink {
    root: PathBuf,
}

impl CsvSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the file a batch is appended to
    pub fn batch_path(&self, batch: &RecordBatch) -> SinkResult<PathBuf> {
        self.stream_path(batch.kind, &batch.resource_id, batch.parent.as_ref())
    }

    fn stream_path(
        &self,
        kind: StreamKind,
        resource_id: &str,
        parent: Option<&ParentRef>,
    ) -> SinkResult<PathBuf> {
        let dir = self.root.join(resource_id);
        let file = match kind {
            StreamKind::Posts => format!("{}.csv", resource_id),
            StreamKind::Comments => {
                let parent = parent.ok_or_else(|| {
                    SinkError::Write(format!(
                        "comment batch for {} has no parent post",
                        resource_id
                    ))
                })?;
                format!("comments_{}.csv", parent.post_id)
            }
        };
        Ok(dir.join(file))
    }

    fn header(kind: StreamKind, first: &Record) -> Vec<String> {
        let mut header: Vec<String> = match kind {
            StreamKind::Posts => vec!["id".into(), "number".into(), "page".into()],
            StreamKind::Comments => vec![
                "id".into(),
                "post_id".into(),
                "post_number".into(),
                "number".into(),
                "label".into(),
                "page".into(),
            ],
        };
        header.extend(first.item.fields.iter().map(|(name, _)| name.clone()));
        header
    }

    fn row(record: &Record) -> Vec<String> {
        let mut row = vec![record.item.id.clone()];
        if let Some(parent) = &record.parent {
            row.push(parent.post_id.clone());
            row.push(parent.post_number.to_string());
            row.push(record.number.to_string());
            row.push(record.label());
        } else {
            row.push(record.number.to_string());
        }
        row.push(record.page.to_string());
        row.extend(record.item.fields.iter().map(|(_, value)| value.clone()));
        row
    }
}

fn ensure_parent_dir(path: &Path) -> SinkResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

impl Sink for CsvSink {
    fn start_stream(
        &mut self,
        kind: StreamKind,
        resource_id: &str,
        parent: Option<&ParentRef>,
    ) -> SinkResult<()> {
        if kind != StreamKind::Comments {
            return Ok(());
        }

        let path = self.stream_path(kind, resource_id, parent)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed previous comment file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        let Some(first) = batch.records.first() else {
            return Ok(());
        };

        let path = self.batch_path(batch)?;
        ensure_parent_dir(&path)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;
        if is_new {
            file.write_all(UTF8_BOM)?;
        }

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(Self::header(batch.kind, first))?;
        }
        for record in &batch.records {
            writer.write_record(Self::row(record))?;
        }
        writer.flush()?;

        debug!(
            path = %path.display(),
            records = batch.len(),
            page = batch.page,
            "Wrote CSV batch"
        );
        Ok(())
    }

    fn finish(&mut self, _status: RunStatus) -> SinkResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::traits::RawItem;
    use tempfile::TempDir;

    fn post(number: u64, page: u32) -> Record {
        Record {
            kind: StreamKind::Posts,
            resource_id: "2803301701".to_string(),
            parent: None,
            number,
            page,
            item: RawItem::new(format!("P{}", number))
                .with_field("content", format!("post {}", number))
                .with_field("likes", "4"),
        }
    }

    fn posts_batch(page: u32, numbers: &[u64]) -> RecordBatch {
        RecordBatch {
            kind: StreamKind::Posts,
            resource_id: "2803301701".to_string(),
            parent: None,
            page,
            records: numbers.iter().map(|n| post(*n, page)).collect(),
        }
    }

    #[test]
    fn test_posts_file_has_single_header() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::new(dir.path());

        sink.write(&posts_batch(1, &[1, 2])).unwrap();
        sink.write(&posts_batch(2, &[3])).unwrap();
        sink.finish(RunStatus::Completed).unwrap();

        let path = dir.path().join("2803301701").join("2803301701.csv");
        let content = fs::read_to_string(path).unwrap();
        let content = content.trim_start_matches('\u{feff}');
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "id,number,page,content,likes");
        assert_eq!(lines[1], "P1,1,1,post 1,4");
        assert_eq!(lines[3], "P3,3,2,post 3,4");
    }

    fn comment_parent() -> ParentRef {
        ParentRef {
            post_id: "PoUl5taJ0".to_string(),
            post_number: 2,
        }
    }

    fn comments_batch(page: u32, numbers: &[u64]) -> RecordBatch {
        let parent = comment_parent();
        let records = numbers
            .iter()
            .map(|n| Record {
                kind: StreamKind::Comments,
                resource_id: "2803301701".to_string(),
                parent: Some(parent.clone()),
                number: *n,
                page,
                item: RawItem::new(format!("C_{}", n)).with_field("content", "nice, really"),
            })
            .collect();
        RecordBatch {
            kind: StreamKind::Comments,
            resource_id: "2803301701".to_string(),
            parent: Some(parent),
            page,
            records,
        }
    }

    #[test]
    fn test_comments_go_to_per_post_file() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::new(dir.path());

        sink.write(&comments_batch(1, &[1])).unwrap();

        let path = dir
            .path()
            .join("2803301701")
            .join("comments_PoUl5taJ0.csv");
        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with('\u{feff}'));
        assert!(content.contains("id,post_id,post_number,number,label,page,content"));
        assert!(content.contains("C_1,PoUl5taJ0,2,1,2-1,1,\"nice, really\""));
    }

    #[test]
    fn test_recrawled_post_replaces_comment_file() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::new(dir.path());
        let parent = comment_parent();

        for _ in 0..2 {
            sink.start_stream(StreamKind::Comments, "2803301701", Some(&parent))
                .unwrap();
            sink.write(&comments_batch(1, &[1, 2])).unwrap();
            sink.write(&comments_batch(2, &[3])).unwrap();
        }

        let path = dir
            .path()
            .join("2803301701")
            .join("comments_PoUl5taJ0.csv");
        let content = fs::read_to_string(path).unwrap();
        let content = content.trim_start_matches('\u{feff}');
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("id,post_id"));
        let labels: Vec<&str> = lines[1..]
            .iter()
            .map(|line| line.split(',').nth(4).unwrap())
            .collect();
        assert_eq!(labels, vec!["2-1", "2-2", "2-3"]);
        assert!(!content.contains('\u{feff}'));
    }

    #[test]
    fn test_posts_stream_start_keeps_file() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::new(dir.path());

        sink.write(&posts_batch(1, &[1])).unwrap();
        sink.start_stream(StreamKind::Posts, "2803301701", None).unwrap();

        let path = dir.path().join("2803301701").join("2803301701.csv");
        assert!(path.exists());
    }

    #[test]
    fn test_comment_batch_without_parent_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::new(dir.path());

        let mut batch = posts_batch(1, &[1]);
        batch.kind = StreamKind::Comments;
        assert!(matches!(sink.write(&batch), Err(SinkError::Write(_))));
    }

    #[test]
    fn test_empty_batch_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::new(dir.path());
        sink.write(&posts_batch(1, &[])).unwrap();
        assert!(!dir.path().join("2803301701").exists());
    }
}
