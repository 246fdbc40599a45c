//! fwload Ingest Library
//!
//! Concurrent bulk loading of fixed-width text files into PostgreSQL.
//!
//! # Pipeline
//!
//! - **Schema**: per-model column specs, loaded once and cached
//! - **Decoder**: fixed-width lines to typed rows, widths in code points
//! - **Store**: `CREATE TABLE IF NOT EXISTS` plus batched multi-row inserts
//! - **Worker**: one file per job, one transaction per batch
//! - **Dispatcher**: a fixed worker pool draining an ordered job queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fwload_ingest::{
//!     DirectorySpecSource, IngestWorker, JobDispatcher, MemoryTableStore, SchemaResolver,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let resolver = Arc::new(SchemaResolver::new(Arc::new(
//!         DirectorySpecSource::new("./specs", "csv"),
//!     )));
//!     let worker = IngestWorker::new(resolver, Arc::new(MemoryTableStore::new()), 50, cancel.clone());
//!     let summary = JobDispatcher::new(worker, 4, cancel)
//!         .run_dir(std::path::Path::new("./data"), ".txt")
//!         .await?;
//!     println!("{} rows committed", summary.rows_committed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod schema;
pub mod store;
pub mod worker;

pub use config::{DatabaseConfig, IngestConfig};
pub use decoder::{decode_line, RowScanner};
pub use dispatcher::{enumerate_jobs, DispatchSummary, JobDispatcher};
pub use error::{DispatchError, IngestError, StoreError};
pub use schema::{DirectorySpecSource, SchemaResolver, SpecSource, StaticSpecSource};
pub use store::{MemoryTableStore, PgTableStore, StoreTransaction, TableStore};
pub use worker::{model_name, IngestWorker, JobReport, JobState};
