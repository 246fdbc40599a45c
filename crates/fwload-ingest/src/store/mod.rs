//! Table store abstraction
//!
//! Two statement shapes ever reach the database: `CREATE TABLE IF NOT EXISTS`
//! and a positional multi-row `INSERT`. Both are built here so that the
//! PostgreSQL store and the in-memory store agree on validation.
//!
//! Transaction boundaries belong to the caller: [`StoreTransaction::insert_batch`]
//! never commits or rolls back on its own.

use async_trait::async_trait;

use fwload_common::{ColumnKind, ColumnSpec, Row, Schema};

use crate::error::StoreError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryTableStore;
pub use postgres::PgTableStore;

/// PostgreSQL caps a statement at 65535 bind parameters
pub const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;

/// Text columns narrower than this get `VARCHAR(n)`, wider ones `TEXT`
pub const VARCHAR_LIMIT: usize = 256;

/// Creates tables and opens transactions
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create `table` for `schema` if it does not exist yet
    async fn ensure_table(&self, table: &str, schema: &Schema) -> Result<(), StoreError>;

    /// Start a transaction for one batch flush
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// An open transaction. Dropping it without `commit` discards its work.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert `rows` with a single statement; empty input is a no-op
    async fn insert_batch(&mut self, table: &str, rows: &[Row]) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Roll back; a transaction that already finished rolls back to nothing
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

// ============================================================================
// SQL Generation
// ============================================================================

/// Double-quote an identifier, doubling any embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Store column type for a spec column
pub fn column_type(column: &ColumnSpec) -> String {
    match column.kind {
        ColumnKind::Integer => format!("NUMERIC({})", column.size),
        ColumnKind::Boolean => "BOOLEAN".to_string(),
        ColumnKind::Text if column.size < VARCHAR_LIMIT => format!("VARCHAR({})", column.size),
        ColumnKind::Text | ColumnKind::Unrecognized(_) => "TEXT".to_string(),
    }
}

pub fn create_table_sql(table: &str, schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), column_type(c)))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        columns.join(", ")
    )
}

/// A validated multi-row INSERT.
///
/// Columns come from the first row; every row contributes one tuple in that
/// column order, with placeholders numbered `$1..$n` across the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    pub sql: String,
    pub columns: Vec<String>,
    pub parameters: usize,
}

impl InsertPlan {
    /// Build the statement for `rows`, or `None` when there is nothing to insert
    pub fn build(table: &str, rows: &[Row]) -> Result<Option<Self>, StoreError> {
        let Some(first) = rows.first() else {
            return Ok(None);
        };

        if let Some(index) = rows.iter().position(|row| !row.same_columns(first)) {
            return Err(StoreError::ColumnMismatch {
                table: table.to_string(),
                index,
            });
        }

        let columns: Vec<String> = first.columns().map(str::to_string).collect();
        if columns.is_empty() {
            return Err(StoreError::NoColumns {
                table: table.to_string(),
            });
        }

        let parameters = columns.len() * rows.len();
        if parameters > MAX_BIND_PARAMETERS {
            return Err(StoreError::TooManyParameters {
                table: table.to_string(),
                parameters,
                limit: MAX_BIND_PARAMETERS,
            });
        }

        let tuples: Vec<String> = (0..rows.len())
            .map(|r| {
                let start = r * columns.len() + 1;
                let holders: Vec<String> = (start..start + columns.len())
                    .map(|p| format!("${}", p))
                    .collect();
                format!("({})", holders.join(", "))
            })
            .collect();

        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table),
            column_list.join(", "),
            tuples.join(", ")
        );

        Ok(Some(Self {
            sql,
            columns,
            parameters,
        }))
    }
}
