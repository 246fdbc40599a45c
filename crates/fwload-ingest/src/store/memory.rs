//! In-memory table store
//!
//! Keeps committed rows per table, records every statement and flush, and can
//! be scripted to fail a given insert or commit. Used by the test suites and
//! by `fwload --dry-run`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fwload_common::{Row, Schema};

use super::{create_table_sql, InsertPlan, StoreTransaction, TableStore};
use crate::error::StoreError;

type CommitHook = Box<dyn Fn(usize) + Send + Sync>;

/// A committed flush: target table and number of rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    pub table: String,
    pub rows: usize,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, (Schema, Vec<Row>)>,
    statements: Vec<String>,
    flushes: Vec<Flush>,
    create_calls: usize,
    begins: usize,
    inserts: usize,
    commits: usize,
    rollbacks: usize,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    fail_create: Option<String>,
    fail_insert_on: Option<usize>,
    fail_commit_on: Option<usize>,
    on_commit: Option<CommitHook>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Table store that lives entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryTableStore {
    inner: Arc<Inner>,
}

/// Configures failure injection before the store is shared
#[derive(Default)]
pub struct MemoryTableStoreBuilder {
    inner: Inner,
}

impl MemoryTableStoreBuilder {
    /// Fail `ensure_table` for this table name
    pub fn fail_create(mut self, table: impl Into<String>) -> Self {
        self.inner.fail_create = Some(table.into());
        self
    }

    /// Fail the n-th `insert_batch` call (1-based, counted store-wide)
    pub fn fail_insert_on(mut self, n: usize) -> Self {
        self.inner.fail_insert_on = Some(n);
        self
    }

    /// Fail the n-th `commit` call (1-based, counted store-wide)
    pub fn fail_commit_on(mut self, n: usize) -> Self {
        self.inner.fail_commit_on = Some(n);
        self
    }

    /// Run `hook` with the running commit count after every successful commit
    pub fn on_commit(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.inner.on_commit = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> MemoryTableStore {
        MemoryTableStore {
            inner: Arc::new(self.inner),
        }
    }
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MemoryTableStoreBuilder {
        MemoryTableStoreBuilder::default()
    }

    /// Committed rows of `table`, in commit order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .state()
            .tables
            .get(table)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.inner.state().tables.contains_key(table)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.state().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every committed flush across all tables
    pub fn flushes(&self) -> Vec<Flush> {
        self.inner.state().flushes.clone()
    }

    /// Committed flush sizes for one table, in order
    pub fn flush_sizes(&self, table: &str) -> Vec<usize> {
        self.inner
            .state()
            .flushes
            .iter()
            .filter(|f| f.table == table)
            .map(|f| f.rows)
            .collect()
    }

    /// SQL text of every statement issued, committed or not
    pub fn statements(&self) -> Vec<String> {
        self.inner.state().statements.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.inner.state().create_calls
    }

    pub fn begins(&self) -> usize {
        self.inner.state().begins
    }

    pub fn commits(&self) -> usize {
        self.inner.state().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.state().rollbacks
    }
}

impl std::fmt::Debug for MemoryTableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("MemoryTableStore")
            .field("tables", &state.tables.len())
            .field("commits", &state.commits)
            .field("rollbacks", &state.rollbacks)
            .finish()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn ensure_table(&self, table: &str, schema: &Schema) -> Result<(), StoreError> {
        let mut state = self.inner.state();
        state.create_calls += 1;
        state.statements.push(create_table_sql(table, schema));

        if self.inner.fail_create.as_deref() == Some(table) {
            return Err(StoreError::Injected(format!("create table '{}'", table)));
        }

        state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| (schema.clone(), Vec::new()));
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.inner.state().begins += 1;
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            pending: Vec::new(),
            open: true,
        }))
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    pending: Vec<(String, Vec<Row>)>,
    open: bool,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_batch(&mut self, table: &str, rows: &[Row]) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::TransactionClosed);
        }
        let Some(plan) = InsertPlan::build(table, rows)? else {
            return Ok(());
        };

        let mut state = self.inner.state();
        state.inserts += 1;
        state.statements.push(plan.sql);

        if self.inner.fail_insert_on == Some(state.inserts) {
            return Err(StoreError::Injected(format!("insert #{}", state.inserts)));
        }
        if !state.tables.contains_key(table) {
            return Err(StoreError::Injected(format!("relation '{}' does not exist", table)));
        }

        self.pending.push((table.to_string(), rows.to_vec()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::TransactionClosed);
        }
        self.open = false;

        let commits = {
            let mut state = self.inner.state();
            state.commits += 1;
            if self.inner.fail_commit_on == Some(state.commits) {
                self.pending.clear();
                return Err(StoreError::Injected(format!("commit #{}", state.commits)));
            }

            for (table, rows) in self.pending.drain(..) {
                state.flushes.push(Flush {
                    table: table.clone(),
                    rows: rows.len(),
                });
                if let Some((_, stored)) = state.tables.get_mut(&table) {
                    stored.extend(rows);
                }
            }
            state.commits
        };

        if let Some(hook) = &self.inner.on_commit {
            hook(commits);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if self.open {
            self.open = false;
            self.pending.clear();
            self.inner.state().rollbacks += 1;
        }
        Ok(())
    }
}
