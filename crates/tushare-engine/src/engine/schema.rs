//! Dynamic data tables.
//!
//! Each target table is created once, on first write, from the shape of
//! the result set being written. Table names are validated and rejected
//! before any DDL is issued; column names are sanitised.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::result_set::{display_value, ColumnType, ResultSet};
use crate::config::Dialect;
use crate::db::{InsertBatch, SqlValue, TableBackend};
use crate::error::{EngineError, EngineResult};

/// Columns every data table starts with.
pub const SYSTEM_COLUMNS: [&str; 6] = [
    "data_id",
    "task_id",
    "config_id",
    "api_code",
    "download_date",
    "create_time",
];

/// Columns written by the engine on every insert, ahead of data columns.
const LINKAGE_COLUMNS: [&str; 4] = ["task_id", "config_id", "api_code", "download_date"];

/// PostgreSQL caps bind parameters per statement at 65535.
const MAX_BIND_PARAMS: usize = 65_535;

/// Longest identifier PostgreSQL stores without truncating it.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Reject table names outside `[A-Za-z_][A-Za-z0-9_]*` or longer than
/// [`MAX_IDENTIFIER_LEN`].
pub fn validate_table_name(name: &str) -> EngineResult<()> {
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(EngineError::InvalidIdentifier(format!(
            "{} (longer than {} characters)",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidIdentifier(name.to_string()))
    }
}

/// Rewrite a field name into a safe column name of at most
/// [`MAX_IDENTIFIER_LEN`] characters.
pub fn sanitize_column(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let mut column = match safe.chars().next() {
        None => "col_".to_string(),
        Some(c) if c.is_ascii_digit() => format!("col_{}", safe),
        Some(_) => safe,
    };
    // ASCII only, so byte truncation is safe.
    column.truncate(MAX_IDENTIFIER_LEN);
    column
}

/// A result field and the column it is stored in.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub field: String,
    pub column: String,
    pub ty: ColumnType,
}

/// Map every field of `sample` to a column.
///
/// Fields whose sanitised name collides with a system column or with an
/// earlier field are dropped.
pub fn column_mappings(sample: &ResultSet) -> Vec<ColumnMapping> {
    let mut taken: HashSet<String> = SYSTEM_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut mappings = Vec::new();
    for field in sample.columns() {
        let column = sanitize_column(field);
        if !taken.insert(column.to_ascii_lowercase()) {
            tracing::warn!(field = %field, column = %column, "Dropping field: column name already taken");
            continue;
        }
        mappings.push(ColumnMapping {
            field: field.clone(),
            column,
            ty: sample.column_type(field),
        });
    }
    mappings
}

fn index_suffix(table: &str) -> &str {
    // Table names are ASCII once validated.
    &table[table.len().saturating_sub(20)..]
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render the statements creating `table`.
///
/// PostgreSQL gets one statement each for the table, its five indexes and
/// its comments; MySQL gets a single statement.
pub fn create_table_statements(
    dialect: Dialect,
    table: &str,
    api_code: &str,
    mappings: &[ColumnMapping],
) -> EngineResult<Vec<String>> {
    validate_table_name(table)?;
    let quoted = dialect.quote(table);
    let suffix = index_suffix(table);
    let table_comment = quote_literal(&format!("Tushare data table ({})", api_code));

    let mut columns = vec![
        match dialect {
            Dialect::Postgresql => "data_id BIGSERIAL NOT NULL PRIMARY KEY".to_string(),
            Dialect::Mysql => "data_id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY".to_string(),
        },
        "task_id BIGINT NOT NULL".to_string(),
        "config_id BIGINT NOT NULL".to_string(),
        "api_code VARCHAR(100) NOT NULL".to_string(),
        "download_date VARCHAR(20)".to_string(),
        format!(
            "create_time {} DEFAULT CURRENT_TIMESTAMP",
            ColumnType::Timestamp.sql_type(dialect)
        ),
    ];
    columns.extend(
        mappings
            .iter()
            .map(|m| format!("{} {}", dialect.quote(&m.column), m.ty.sql_type(dialect))),
    );

    let indexes = [
        ("tid", "task_id"),
        ("cid", "config_id"),
        ("ac", "api_code"),
        ("dd", "download_date"),
        ("ct", "create_time"),
    ];

    let statements = match dialect {
        Dialect::Postgresql => {
            let mut statements = vec![format!(
                "CREATE TABLE {} (\n    {}\n)",
                quoted,
                columns.join(",\n    ")
            )];
            statements.extend(indexes.iter().map(|(tag, column)| {
                format!("CREATE INDEX idx_{}_{} ON {}({})", tag, suffix, quoted, column)
            }));
            statements.push(format!("COMMENT ON TABLE {} IS {}", quoted, table_comment));
            let system_comments = [
                ("data_id", "Data ID"),
                ("task_id", "Task ID"),
                ("config_id", "API config ID"),
                ("api_code", "API code"),
                ("download_date", "Download date (YYYYMMDD)"),
                ("create_time", "Created at"),
            ];
            statements.extend(system_comments.iter().map(|(column, text)| {
                format!("COMMENT ON COLUMN {}.{} IS {}", quoted, column, quote_literal(text))
            }));
            statements.extend(mappings.iter().map(|m| {
                format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    quoted,
                    dialect.quote(&m.column),
                    quote_literal(&m.field)
                )
            }));
            statements
        }
        Dialect::Mysql => {
            columns.extend(
                indexes
                    .iter()
                    .map(|(tag, column)| format!("INDEX idx_{}_{} ({})", tag, suffix, column)),
            );
            vec![format!(
                "CREATE TABLE {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COMMENT={}",
                quoted,
                columns.join(",\n    "),
                table_comment
            )]
        }
    };

    Ok(statements)
}

/// Values stamped onto every stored row.
#[derive(Debug, Clone, Copy)]
pub struct RowLinkage<'a> {
    pub task_id: i64,
    pub config_id: i64,
    pub api_code: &'a str,
    pub download_date: &'a str,
}

/// Convert a JSON value for a column of type `ty`.
///
/// Nulls, non-finite floats and values that cannot be read as the column
/// type become SQL NULL. Text columns take nested JSON as its JSON text.
pub fn to_sql_value(value: &Value, ty: ColumnType) -> SqlValue {
    let null = SqlValue::Null(ty);
    match (value, ty) {
        (Value::Null, _) => null,
        (Value::Array(_) | Value::Object(_), ColumnType::String | ColumnType::Opaque) => {
            SqlValue::Text(value.to_string())
        }
        (_, ColumnType::String | ColumnType::Opaque) => SqlValue::Text(display_value(value)),
        (Value::Bool(b), ColumnType::Boolean) => SqlValue::Bool(*b),
        (Value::Bool(b), t) if t.is_integer() => SqlValue::Int(i64::from(*b)),
        (Value::Number(n), t) if t.is_integer() => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => finite(n.as_f64(), ty),
        },
        (Value::Number(n), t) if t.is_float() => finite(n.as_f64(), ty),
        (Value::Number(n), ColumnType::Boolean) => match n.as_i64() {
            Some(0) => SqlValue::Bool(false),
            Some(1) => SqlValue::Bool(true),
            _ => null,
        },
        (Value::String(s), t) if t.is_integer() => {
            s.trim().parse::<i64>().map(SqlValue::Int).unwrap_or(null)
        }
        (Value::String(s), t) if t.is_float() => finite(s.trim().parse::<f64>().ok(), ty),
        (Value::String(s), ColumnType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => SqlValue::Bool(true),
            "false" | "0" => SqlValue::Bool(false),
            _ => null,
        },
        (Value::String(s), ColumnType::Timestamp) => {
            parse_timestamp(s).map(SqlValue::Timestamp).unwrap_or(null)
        }
        _ => null,
    }
}

fn finite(value: Option<f64>, ty: ColumnType) -> SqlValue {
    match value {
        Some(f) if f.is_finite() => SqlValue::Float(f),
        _ => SqlValue::Null(ty),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y%m%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    for format in ["%Y%m%d", "%Y-%m-%d"] {
        if let Ok(day) = NaiveDate::parse_from_str(s, format) {
            return day.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Render chunked multi-row inserts for `rows`.
pub fn insert_batches(
    dialect: Dialect,
    table: &str,
    mappings: &[ColumnMapping],
    rows: &ResultSet,
    linkage: RowLinkage<'_>,
    chunk_size: usize,
) -> EngineResult<Vec<InsertBatch>> {
    validate_table_name(table)?;
    let width = LINKAGE_COLUMNS.len() + mappings.len();
    let per_batch = chunk_size.min(MAX_BIND_PARAMS / width).max(1);

    let column_list = LINKAGE_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(mappings.iter().map(|m| dialect.quote(&m.column)))
        .collect::<Vec<_>>()
        .join(", ");
    let head = format!("INSERT INTO {} ({}) VALUES ", dialect.quote(table), column_list);

    let batches = rows
        .rows()
        .chunks(per_batch)
        .map(|chunk| {
            let mut values = Vec::with_capacity(chunk.len() * width);
            let mut tuples = Vec::with_capacity(chunk.len());
            for row in chunk {
                let start = values.len();
                values.push(SqlValue::Int(linkage.task_id));
                values.push(SqlValue::Int(linkage.config_id));
                values.push(SqlValue::Text(linkage.api_code.to_string()));
                values.push(SqlValue::Text(linkage.download_date.to_string()));
                for m in mappings {
                    values.push(to_sql_value(row.get(&m.field).unwrap_or(&Value::Null), m.ty));
                }
                let placeholders: Vec<String> = (start + 1..=values.len())
                    .map(|i| dialect.placeholder(i))
                    .collect();
                tuples.push(format!("({})", placeholders.join(", ")));
            }
            InsertBatch {
                sql: format!("{}{}", head, tuples.join(", ")),
                values,
                rows: chunk.len(),
            }
        })
        .collect();

    Ok(batches)
}

/// Column name and type of an existing table, keyed by lowercase name.
type TableColumns = HashMap<String, (String, ColumnType)>;

fn table_columns_from(columns: impl IntoIterator<Item = (String, ColumnType)>) -> TableColumns {
    columns
        .into_iter()
        .map(|(name, ty)| (name.to_ascii_lowercase(), (name, ty)))
        .collect()
}

/// Creates data tables on demand and appends rows to them.
///
/// Shared by every run in the process: a table seen once is never
/// checked again, and its column types are remembered so inserts bind
/// values as the table stores them.
pub struct SchemaManager {
    known: RwLock<HashMap<String, TableColumns>>,
    create_lock: Mutex<()>,
    chunk_size: usize,
}

impl SchemaManager {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            known: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Make sure `table` exists, creating it from `sample` if needed.
    ///
    /// Returns `true` if the table was created by this call.
    pub async fn ensure_table_exists(
        &self,
        backend: &dyn TableBackend,
        table: &str,
        api_code: &str,
        sample: &ResultSet,
    ) -> EngineResult<bool> {
        validate_table_name(table)?;
        if self.known.read().await.contains_key(table) {
            return Ok(false);
        }

        let _guard = self.create_lock.lock().await;
        if self.known.read().await.contains_key(table) {
            return Ok(false);
        }

        if backend.table_exists(table).await? {
            let columns = table_columns_from(backend.table_columns(table).await?);
            self.known.write().await.insert(table.to_string(), columns);
            return Ok(false);
        }

        if sample.is_empty() {
            return Err(EngineError::Validation(format!(
                "cannot create table {}: no rows to infer columns from",
                table
            )));
        }

        let mappings = column_mappings(sample);
        let statements = create_table_statements(backend.dialect(), table, api_code, &mappings)?;
        backend.execute_batch(&statements).await?;
        let columns = table_columns_from(mappings.iter().map(|m| (m.column.clone(), m.ty)));
        self.known.write().await.insert(table.to_string(), columns);

        tracing::info!(table = %table, api_code = %api_code, columns = mappings.len(), "Created data table");
        Ok(true)
    }

    /// Append `rows` to `table` in one transaction.
    ///
    /// Fields are bound with the types of the table's columns; fields the
    /// table has no column for are dropped.
    pub async fn bulk_insert(
        &self,
        backend: &dyn TableBackend,
        table: &str,
        rows: &ResultSet,
        linkage: RowLinkage<'_>,
    ) -> EngineResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = self.table_columns(backend, table).await?;
        let mappings = bind_to_table(table, column_mappings(rows), &columns);
        let batches = insert_batches(backend.dialect(), table, &mappings, rows, linkage, self.chunk_size)?;
        let inserted = backend.insert_batches(&batches).await?;
        tracing::debug!(table = %table, records = inserted, batches = batches.len(), "Rows inserted");
        Ok(inserted)
    }

    async fn table_columns(&self, backend: &dyn TableBackend, table: &str) -> EngineResult<TableColumns> {
        validate_table_name(table)?;
        if let Some(columns) = self.known.read().await.get(table) {
            return Ok(columns.clone());
        }
        let columns = table_columns_from(backend.table_columns(table).await?);
        if columns.is_empty() {
            return Err(EngineError::Validation(format!("table {} does not exist", table)));
        }
        self.known.write().await.insert(table.to_string(), columns.clone());
        Ok(columns)
    }
}

/// Retarget `mappings` at the columns `table` actually has.
fn bind_to_table(table: &str, mappings: Vec<ColumnMapping>, columns: &TableColumns) -> Vec<ColumnMapping> {
    mappings
        .into_iter()
        .filter_map(|m| match columns.get(&m.column.to_ascii_lowercase()) {
            Some((column, ty)) => Some(ColumnMapping {
                field: m.field,
                column: column.clone(),
                ty: *ty,
            }),
            None => {
                tracing::warn!(table = %table, field = %m.field, "Dropping field: table has no such column");
                None
            }
        })
        .collect()
}
