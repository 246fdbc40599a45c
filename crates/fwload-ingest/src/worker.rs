//! Per-file ingest pipeline
//!
//! One job loads one data file: resolve the schema for its model, make sure
//! the target table exists, then stream decoded rows into fixed-size batches
//! and commit each batch in its own transaction.
//!
//! Cancellation is cooperative. The token is checked before the store is
//! first touched and once per row boundary; a transaction that has begun
//! always runs to commit or rollback.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use fwload_common::Row;

use crate::decoder::RowScanner;
use crate::error::IngestError;
use crate::schema::SchemaResolver;
use crate::store::TableStore;

/// Model name of a data file: its base name up to the first underscore.
///
/// `people_2024.txt` belongs to `people`; a base name without an underscore
/// is used whole.
pub fn model_name(path: &Path) -> String {
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    match base.split_once('_') {
        Some((model, _)) => model.to_string(),
        None => base.into_owned(),
    }
}

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    TableEnsured,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Created => "created",
            JobState::TableEnsured => "table_ensured",
            JobState::Streaming => "streaming",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub path: PathBuf,
    pub model: String,
    pub state: JobState,
    /// Rows in flushes that committed
    pub rows_committed: usize,
    /// Size of every committed flush, in order
    pub flushes: Vec<usize>,
    /// Cause of a failed or cancelled job
    pub error: Option<String>,
}

impl JobReport {
    fn new(path: &Path, model: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            model: model.to_string(),
            state: JobState::Created,
            rows_committed: 0,
            flushes: Vec::new(),
            error: None,
        }
    }

    fn record_flush(&mut self, rows: usize) {
        self.flushes.push(rows);
        self.rows_committed += rows;
    }
}

/// Runs ingest jobs against shared collaborators
pub struct IngestWorker {
    resolver: Arc<SchemaResolver>,
    store: Arc<dyn TableStore>,
    buffer_size: usize,
    cancel: CancellationToken,
}

impl IngestWorker {
    /// `buffer_size` is clamped to at least one row
    pub fn new(
        resolver: Arc<SchemaResolver>,
        store: Arc<dyn TableStore>,
        buffer_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            store,
            buffer_size: buffer_size.max(1),
            cancel,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Load one file. Never panics or returns early; every outcome is reported.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn run_job(&self, path: &Path) -> JobReport {
        let model = model_name(path);
        let mut report = JobReport::new(path, &model);

        match self.ingest(path, &model, &mut report).await {
            Ok(()) => {
                report.state = JobState::Completed;
                info!(
                    model = %report.model,
                    rows_committed = report.rows_committed,
                    flushes = report.flushes.len(),
                    "Job completed"
                );
            },
            Err(err) if err.is_cancelled() => {
                report.state = JobState::Cancelled;
                report.error = Some(err.to_string());
                warn!(
                    path = %path.display(),
                    rows_committed = report.rows_committed,
                    error = %err,
                    "Job cancelled"
                );
            },
            Err(err) => {
                report.state = JobState::Failed;
                report.error = Some(err.to_string());
                error!(
                    path = %path.display(),
                    rows_committed = report.rows_committed,
                    error = %err,
                    "Job failed"
                );
            },
        }

        report
    }

    async fn ingest(
        &self,
        path: &Path,
        model: &str,
        report: &mut JobReport,
    ) -> Result<(), IngestError> {
        let schema = self.resolver.resolve(model).await?;

        self.checkpoint("before the job started")?;
        self.store.ensure_table(model, &schema).await?;
        report.state = JobState::TableEnsured;

        let mut scanner = RowScanner::open(path, Arc::clone(&schema))
            .await
            .map_err(|source| IngestError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        report.state = JobState::Streaming;

        let mut buffer: Vec<Row> = Vec::with_capacity(self.buffer_size);
        loop {
            self.checkpoint("between rows")?;

            let Some(row) = scanner.next_row().await else {
                break;
            };
            buffer.push(row?);

            if buffer.len() >= self.buffer_size {
                self.flush(model, &mut buffer, report).await?;
            }
        }

        self.flush(model, &mut buffer, report).await?;
        debug!(lines = scanner.lines_read(), "Reached end of file");
        Ok(())
    }

    /// Commit `buffer` as one transaction and clear it on success
    async fn flush(
        &self,
        table: &str,
        buffer: &mut Vec<Row>,
        report: &mut JobReport,
    ) -> Result<(), IngestError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let mut tx = self.store.begin().await?;

        let written = match tx.insert_batch(table, buffer).await {
            Ok(()) => tx.commit().await,
            Err(err) => Err(err),
        };

        if let Err(err) = written {
            if let Err(rollback) = tx.rollback().await {
                warn!(table, error = %rollback, "Rollback failed after batch error");
            }
            return Err(err.into());
        }

        debug!(table, rows = buffer.len(), "Batch committed");
        report.record_flush(buffer.len());
        buffer.clear();
        Ok(())
    }

    fn checkpoint(&self, stage: &'static str) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled { stage });
        }
        Ok(())
    }
}

impl std::fmt::Debug for IngestWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestWorker")
            .field("resolver", &self.resolver)
            .field("buffer_size", &self.buffer_size)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::StaticSpecSource;
    use crate::store::MemoryTableStore;
    use fwload_common::Value;
    use std::io::Write;
    use tempfile::TempDir;

    const PEOPLE: &str =
        "column_name,size,datatype\nname,10,TEXT\nactive,1,BOOLEAN\ncount,3,INTEGER\n";

    fn resolver() -> Arc<SchemaResolver> {
        let source = StaticSpecSource::new().with_spec("people", PEOPLE);
        Arc::new(SchemaResolver::new(Arc::new(source)))
    }

    fn write_file(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    fn numbered_lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{:<10}1{:>3}", format!("p{}", i), i)).collect()
    }

    fn worker(store: &MemoryTableStore, buffer: usize, cancel: CancellationToken) -> IngestWorker {
        IngestWorker::new(resolver(), Arc::new(store.clone()), buffer, cancel)
    }

    #[test]
    fn test_model_name() {
        assert_eq!(model_name(Path::new("/data/people_2024_01.txt")), "people");
        assert_eq!(model_name(Path::new("people.txt")), "people.txt");
        assert_eq!(model_name(Path::new("_odd.txt")), "");
    }

    #[tokio::test]
    async fn test_batches_fill_then_partial_flush() {
        let dir = TempDir::new().unwrap();
        let lines = numbered_lines(7);
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let path = write_file(&dir, "people_a.txt", &refs);

        let store = MemoryTableStore::new();
        let report = worker(&store, 3, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.state, JobState::Completed);
        assert_eq!(report.flushes, vec![3, 3, 1]);
        assert_eq!(report.rows_committed, 7);
        assert_eq!(store.flush_sizes("people"), vec![3, 3, 1]);

        let rows = store.rows("people");
        assert_eq!(rows[0].get("name"), Some(&Value::from("p0")));
        assert_eq!(rows[6].get("count"), Some(&Value::from(6_i64)));
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_flush() {
        let dir = TempDir::new().unwrap();
        let lines = numbered_lines(4);
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let path = write_file(&dir, "people_a.txt", &refs);

        let store = MemoryTableStore::new();
        let report = worker(&store, 2, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.flushes, vec![2, 2]);
        assert_eq!(store.begins(), 2);
    }

    #[tokio::test]
    async fn test_empty_file_creates_table_only() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "people_empty.txt", &[]);

        let store = MemoryTableStore::new();
        let report = worker(&store, 5, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.state, JobState::Completed);
        assert!(store.has_table("people"));
        assert_eq!(store.begins(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_store() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "people_a.txt", &["Hello     1123"]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = MemoryTableStore::new();
        let report = worker(&store, 1, cancel).run_job(&path).await;

        assert_eq!(report.state, JobState::Cancelled);
        assert_eq!(report.rows_committed, 0);
        assert_eq!(store.create_calls(), 0);
        assert_eq!(store.begins(), 0);
    }

    #[tokio::test]
    async fn test_cancel_between_flushes_keeps_first() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "people_a.txt", &["first     1  1", "second    0  2"]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let store = MemoryTableStore::builder()
            .on_commit(move |_| trigger.cancel())
            .build();

        let report = worker(&store, 1, cancel).run_job(&path).await;

        assert_eq!(report.state, JobState::Cancelled);
        assert_eq!(report.rows_committed, 1);
        assert_eq!(store.rows("people").len(), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_insert_failure_rolls_back() {
        let dir = TempDir::new().unwrap();
        let lines = numbered_lines(5);
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let path = write_file(&dir, "people_a.txt", &refs);

        let store = MemoryTableStore::builder().fail_insert_on(2).build();
        let report = worker(&store, 2, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.state, JobState::Failed);
        assert_eq!(report.flushes, vec![2]);
        assert_eq!(store.rollbacks(), 1);
        assert_eq!(store.rows("people").len(), 2);
        assert!(report.error.unwrap().contains("insert #2"));
    }

    #[tokio::test]
    async fn test_commit_failure_reports_failed() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "people_a.txt", &["Hello     1123"]);

        let store = MemoryTableStore::builder().fail_commit_on(1).build();
        let report = worker(&store, 10, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.state, JobState::Failed);
        assert_eq!(report.rows_committed, 0);
        assert!(store.rows("people").is_empty());
    }

    #[tokio::test]
    async fn test_decode_error_keeps_committed_batches() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "people_a.txt",
            &["one       1  1", "two       1  2", "three     x  3", "four      1  4"],
        );

        let store = MemoryTableStore::new();
        let report = worker(&store, 2, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.state, JobState::Failed);
        assert_eq!(report.rows_committed, 2);
        assert_eq!(store.rows("people").len(), 2);
        assert!(report.error.unwrap().contains("Line 3"));
    }

    #[tokio::test]
    async fn test_missing_spec_fails_without_store() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "pets_a.txt", &["x"]);

        let store = MemoryTableStore::new();
        let report = worker(&store, 1, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.state, JobState::Failed);
        assert_eq!(report.model, "pets");
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_after_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people_gone.txt");

        let store = MemoryTableStore::new();
        let report = worker(&store, 1, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.state, JobState::Failed);
        assert!(store.has_table("people"));
        assert!(report.error.unwrap().contains("people_gone.txt"));
    }

    #[tokio::test]
    async fn test_create_failure_reports_failed() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "people_a.txt", &["Hello     1123"]);

        let store = MemoryTableStore::builder().fail_create("people").build();
        let report = worker(&store, 1, CancellationToken::new())
            .run_job(&path)
            .await;

        assert_eq!(report.state, JobState::Failed);
        assert_eq!(store.begins(), 0);
    }
}
