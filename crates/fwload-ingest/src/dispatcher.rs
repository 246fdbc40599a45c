//! Worker pool fed by an ordered job queue
//!
//! The queue holds a single path, so submission advances only as fast as
//! workers take jobs. Once cancellation is requested no further paths are
//! submitted; jobs already handed out observe the token themselves.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::worker::{IngestWorker, JobReport, JobState};

/// Paths buffered between submission and the workers
pub const QUEUE_CAPACITY: usize = 1;

/// List regular files in `dir` whose name ends with `suffix`, sorted by name
pub async fn enumerate_jobs(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, DispatchError> {
    let read_dir_error = |source| DispatchError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_dir_error)?;
    let mut jobs = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
        let file_type = entry.file_type().await.map_err(read_dir_error)?;
        if !file_type.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            jobs.push(entry.path());
        }
    }

    jobs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(jobs)
}

/// Totals for one dispatch run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub rows_committed: usize,
    /// One report per submitted job, ordered by path
    pub reports: Vec<JobReport>,
}

impl DispatchSummary {
    fn record(&mut self, report: JobReport) {
        match report.state {
            JobState::Completed => self.completed += 1,
            JobState::Cancelled => self.cancelled += 1,
            _ => self.failed += 1,
        }
        self.rows_committed += report.rows_committed;
        self.reports.push(report);
    }

    /// True when every submitted job completed
    pub fn all_completed(&self) -> bool {
        self.completed == self.submitted
    }
}

/// Runs a fixed pool of workers over a list of data files
pub struct JobDispatcher {
    worker: Arc<IngestWorker>,
    workers: usize,
    cancel: CancellationToken,
}

impl JobDispatcher {
    /// `workers` is clamped to at least one
    pub fn new(worker: IngestWorker, workers: usize, cancel: CancellationToken) -> Self {
        Self {
            worker: Arc::new(worker),
            workers: workers.max(1),
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enumerate `dir` and dispatch every matching file
    pub async fn run_dir(&self, dir: &Path, suffix: &str) -> Result<DispatchSummary, DispatchError> {
        let jobs = enumerate_jobs(dir, suffix).await?;
        info!(dir = %dir.display(), jobs = jobs.len(), "Enumerated data files");
        self.dispatch(jobs).await
    }

    /// Submit `jobs` in order and wait until every worker has drained the queue
    pub async fn dispatch(&self, jobs: Vec<PathBuf>) -> Result<DispatchSummary, DispatchError> {
        let (tx, rx) = mpsc::channel::<PathBuf>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let handles: Vec<_> = (0..self.workers)
            .map(|id| {
                let worker = Arc::clone(&self.worker);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    let mut reports = Vec::new();
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(path) = next else {
                            break;
                        };
                        reports.push(worker.run_job(&path).await);
                    }
                    debug!(worker = id, jobs = reports.len(), "Worker exiting");
                    reports
                })
            })
            .collect();

        let total = jobs.len();
        let mut submitted = 0;
        for path in jobs {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(
                        submitted,
                        skipped = total - submitted,
                        "Cancellation requested, no further jobs will be submitted"
                    );
                    break;
                },
                sent = tx.send(path) => {
                    if sent.is_err() {
                        break;
                    }
                    submitted += 1;
                },
            }
        }
        drop(tx);

        let mut summary = DispatchSummary {
            submitted,
            ..DispatchSummary::default()
        };
        for handle in join_all(handles).await {
            for report in handle? {
                summary.record(report);
            }
        }
        summary.reports.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            submitted = summary.submitted,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            rows_committed = summary.rows_committed,
            "Dispatch finished"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("worker", &self.worker)
            .field("workers", &self.workers)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{SchemaResolver, StaticSpecSource};
    use crate::store::MemoryTableStore;
    use fwload_common::Value;
    use tempfile::TempDir;

    const PEOPLE: &str = "column_name,size,datatype\nname,5,TEXT\ncount,2,INTEGER\n";

    fn dispatcher(store: &MemoryTableStore, workers: usize, cancel: CancellationToken) -> JobDispatcher {
        let source = StaticSpecSource::new().with_spec("people", PEOPLE);
        let resolver = Arc::new(SchemaResolver::new(Arc::new(source)));
        let worker = IngestWorker::new(resolver, Arc::new(store.clone()), 2, cancel.clone());
        JobDispatcher::new(worker, workers, cancel)
    }

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_enumerate_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "people_b.txt", "");
        write(&dir, "people_a.txt", "");
        write(&dir, "notes.md", "");
        std::fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let jobs = enumerate_jobs(dir.path(), ".txt").await.unwrap();
        let names: Vec<_> = jobs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["people_a.txt", "people_b.txt"]);
    }

    #[tokio::test]
    async fn test_enumerate_missing_dir_is_error() {
        let dir = TempDir::new().unwrap();
        let err = enumerate_jobs(&dir.path().join("absent"), ".txt")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ReadDir { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatch_runs_every_job() {
        let dir = TempDir::new().unwrap();
        for i in 0..6 {
            write(&dir, &format!("people_{}.txt", i), "alice 1\nbob   2\ncarol 3\n");
        }
        write(&dir, "pets_0.txt", "rex   1\n");

        let store = MemoryTableStore::new();
        let summary = dispatcher(&store, 3, CancellationToken::new())
            .run_dir(dir.path(), ".txt")
            .await
            .unwrap();

        assert_eq!(summary.submitted, 7);
        assert_eq!(summary.completed, 6);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.rows_committed, 18);
        assert_eq!(store.rows("people").len(), 18);
        assert!(!summary.all_completed());

        let paths: Vec<_> = summary.reports.iter().map(|r| r.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[tokio::test]
    async fn test_single_worker_keeps_file_order() {
        let dir = TempDir::new().unwrap();
        write(&dir, "people_1.txt", "one   1\n");
        write(&dir, "people_2.txt", "two   2\n");
        write(&dir, "people_3.txt", "three 3\n");

        let store = MemoryTableStore::new();
        dispatcher(&store, 1, CancellationToken::new())
            .run_dir(dir.path(), ".txt")
            .await
            .unwrap();

        let names: Vec<_> = store
            .rows("people")
            .iter()
            .map(|row| row.get("name").cloned().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![Value::from("one"), Value::from("two"), Value::from("three")]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_submits_nothing() {
        let dir = TempDir::new().unwrap();
        write(&dir, "people_1.txt", "one   1\n");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = MemoryTableStore::new();
        let summary = dispatcher(&store, 2, cancel)
            .run_dir(dir.path(), ".txt")
            .await
            .unwrap();

        assert_eq!(summary.submitted, 0);
        assert!(summary.reports.is_empty());
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_job_list() {
        let store = MemoryTableStore::new();
        let summary = dispatcher(&store, 4, CancellationToken::new())
            .dispatch(Vec::new())
            .await
            .unwrap();
        assert_eq!(summary.submitted, 0);
        assert!(summary.all_completed());
    }

    #[test]
    fn test_workers_clamped() {
        let store = MemoryTableStore::new();
        let d = dispatcher(&store, 0, CancellationToken::new());
        assert_eq!(d.workers(), 1);
    }
}
