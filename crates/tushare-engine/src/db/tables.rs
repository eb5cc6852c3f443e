//! Backend for dynamic data tables.
//!
//! The schema manager renders every statement itself; a backend only
//! answers existence checks and executes statements.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

use crate::config::Dialect;
use crate::db::DbPool;
use crate::engine::result_set::ColumnType;
use crate::error::EngineResult;

/// A value bound into an insert statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL typed for the target column
    Null(ColumnType),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

/// One rendered multi-row insert and its bind values in order.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub sql: String,
    pub values: Vec<SqlValue>,
    pub rows: usize,
}

/// Executes dynamic-table DDL and DML.
#[async_trait]
pub trait TableBackend: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn table_exists(&self, table: &str) -> EngineResult<bool>;

    /// Columns of `table` with their stored types; empty if it does not exist.
    async fn table_columns(&self, table: &str) -> EngineResult<Vec<(String, ColumnType)>>;

    /// Execute statements in order, stopping at the first failure.
    async fn execute_batch(&self, statements: &[String]) -> EngineResult<()>;

    /// Execute all batches in one transaction, returning rows inserted.
    async fn insert_batches(&self, batches: &[InsertBatch]) -> EngineResult<u64>;
}

/// PostgreSQL table backend.
#[derive(Clone)]
pub struct PgTableBackend {
    pool: DbPool,
}

impl PgTableBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TableBackend for PgTableBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgresql
    }

    async fn table_exists(&self, table: &str) -> EngineResult<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema()
                AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    async fn table_columns(&self, table: &str) -> EngineResult<Vec<(String, ColumnType)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
            AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type)| (name, ColumnType::from_sql_type(&data_type)))
            .collect())
    }

    async fn execute_batch(&self, statements: &[String]) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_batches(&self, batches: &[InsertBatch]) -> EngineResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for batch in batches {
            let mut query = sqlx::query(&batch.sql);
            for value in &batch.values {
                query = bind_value(query, value);
            }
            inserted += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null(ty) => match ty {
            ColumnType::Int16 | ColumnType::Int32 | ColumnType::Int64 => query.bind(None::<i64>),
            ColumnType::Float32 | ColumnType::Float64 => query.bind(None::<f64>),
            ColumnType::Boolean => query.bind(None::<bool>),
            ColumnType::Timestamp => query.bind(None::<NaiveDateTime>),
            ColumnType::String | ColumnType::Opaque => query.bind(None::<String>),
        },
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Timestamp(ts) => query.bind(*ts),
    }
}
