//! Error types for the ingestion pipeline

use std::path::PathBuf;
use thiserror::Error;

use fwload_common::{DecodeError, SpecError};

/// Failure talking to the relational store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to store: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Failed to create table '{table}': {source}")]
    CreateTable {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("Failed to insert {rows} rows into '{table}': {source}")]
    Insert {
        table: String,
        rows: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("Failed to roll back transaction: {0}")]
    Rollback(#[source] sqlx::Error),

    #[error("Row {index} of batch for '{table}' does not match the column set of the first row")]
    ColumnMismatch { table: String, index: usize },

    #[error("Cannot insert rows without columns into '{table}'")]
    NoColumns { table: String },

    #[error("Batch for '{table}' needs {parameters} bind parameters, limit is {limit}")]
    TooManyParameters {
        table: String,
        parameters: usize,
        limit: usize,
    },

    #[error("Transaction already finished")]
    TransactionClosed,

    /// Raised by the in-memory store when a failure has been scripted
    #[error("Injected store failure: {0}")]
    Injected(String),
}

/// Why a single ingest job stopped early
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to open data file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cancelled {stage}")]
    Cancelled { stage: &'static str },
}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled { .. })
    }
}

/// Failures that stop the whole dispatch run
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to read input directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
