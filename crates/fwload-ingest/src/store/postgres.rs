//! PostgreSQL table store backed by an sqlx pool

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use fwload_common::{Row, Schema, Value};

use super::{create_table_sql, InsertPlan, StoreTransaction, TableStore};
use crate::config::DatabaseConfig;
use crate::error::StoreError;

/// Store that writes into PostgreSQL.
///
/// The pool is the only throttle on store work: with four connections at most
/// four workers talk to the database at once.
#[derive(Debug, Clone)]
pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration and verify that it can connect
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = config.connect_options().map_err(StoreError::Connect)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        info!(
            max_connections = config.max_connections,
            "Database connection pool established"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn ensure_table(&self, table: &str, schema: &Schema) -> Result<(), StoreError> {
        let sql = create_table_sql(table, schema);
        debug!(table, %sql, "Ensuring table");

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::CreateTable {
                table: table.to_string(),
                source,
            })?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(StoreError::Begin)?;
        Ok(Box::new(PgStoreTransaction { tx: Some(tx) }))
    }
}

struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: Option<&Value>,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Some(Value::Integer(v)) => query.bind(*v),
        Some(Value::Boolean(v)) => query.bind(*v),
        Some(Value::Text(v)) => query.bind(v.clone()),
        None => query.bind(Option::<String>::None),
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn insert_batch(&mut self, table: &str, rows: &[Row]) -> Result<(), StoreError> {
        let Some(plan) = InsertPlan::build(table, rows)? else {
            return Ok(());
        };
        let tx = self.tx.as_mut().ok_or(StoreError::TransactionClosed)?;

        let mut query = sqlx::query(&plan.sql);
        for row in rows {
            for column in &plan.columns {
                query = bind_value(query, row.get(column));
            }
        }

        query
            .execute(&mut **tx)
            .await
            .map_err(|source| StoreError::Insert {
                table: table.to_string(),
                rows: rows.len(),
                source,
            })?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await.map_err(StoreError::Commit)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(StoreError::Rollback),
            None => Ok(()),
        }
    }
}
