//! SQLite output
//!
//! Every crawl opens a row in `runs` carrying the configuration hash, so
//! stored records can be traced back to the settings that produced them.

use crate::output::schema::initialize_schema;
use crate::output::traits::{RecordBatch, RunStatus, Sink, SinkResult};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Persists records to a SQLite database
pub struct SqliteSink {
    conn: Connection,
    run_id: i64,
    finished: bool,
}

impl SqliteSink {
    /// Opens (or creates) the database and starts a new run
    pub fn new(path: &Path, config_hash: &str) -> SinkResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        Self::with_connection(conn, config_hash)
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory(config_hash: &str) -> SinkResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn, config_hash)
    }

    fn with_connection(conn: Connection, config_hash: &str) -> SinkResult<Self> {
        initialize_schema(&conn)?;

        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                Utc::now().to_rfc3339(),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        let run_id = conn.last_insert_rowid();
        info!(run_id, "Started SQLite run");

        Ok(Self {
            conn,
            run_id,
            finished: false,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Number of records stored for this run
    pub fn count_records(&self) -> SinkResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE run_id = ?1",
            params![self.run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn run_status(&self) -> SinkResult<Option<RunStatus>> {
        let status: String = self.conn.query_row(
            "SELECT status FROM runs WHERE id = ?1",
            params![self.run_id],
            |row| row.get(0),
        )?;
        Ok(RunStatus::from_db_string(&status))
    }
}

impl Sink for SqliteSink {
    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        {
            let mut insert_record = tx.prepare(
                "INSERT INTO records
                    (run_id, kind, resource_id, item_id, parent_id, parent_number,
                     number, label, page, crawled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut insert_field = tx.prepare(
                "INSERT INTO record_fields (record_id, position, name, value)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;

            for record in &batch.records {
                let parent_id = record.parent.as_ref().map(|p| p.post_id.as_str());
                let parent_number = record.parent.as_ref().map(|p| p.post_number as i64);

                insert_record.execute(params![
                    self.run_id,
                    record.kind.as_str(),
                    record.resource_id,
                    record.item.id,
                    parent_id,
                    parent_number,
                    record.number as i64,
                    record.label(),
                    record.page,
                    now,
                ])?;
                let record_id = tx.last_insert_rowid();

                for (position, (name, value)) in record.item.fields.iter().enumerate() {
                    insert_field.execute(params![record_id, position as i64, name, value])?;
                }
            }
        }

        tx.commit()?;
        debug!(
            kind = %batch.kind,
            resource = %batch.resource_id,
            page = batch.page,
            records = batch.len(),
            "Stored batch"
        );
        Ok(())
    }

    fn finish(&mut self, status: RunStatus) -> SinkResult<()> {
        if self.finished {
            return Ok(());
        }

        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![
                status.to_db_string(),
                Utc::now().to_rfc3339(),
                self.run_id
            ],
        )?;
        self.finished = true;
        info!(run_id = self.run_id, status = status.to_db_string(), "Closed SQLite run");
        Ok(())
    }
}
