//! Tabular results returned by the provider.
//!
//! A [`ResultSet`] is an ordered list of rows, each an ordered map from
//! field name to JSON scalar, plus the column order and any column types
//! the producer declared. Undeclared column types are inferred from the
//! values on demand.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Dialect;

/// One result row.
pub type Row = Map<String, Value>;

/// Relational type of one result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Boolean,
    Timestamp,
    String,
    /// Mixed or nested values stored as text
    Opaque,
}

impl ColumnType {
    /// Column type in the given dialect.
    pub fn sql_type(&self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (ColumnType::Int16, _) => "SMALLINT",
            (ColumnType::Int32, Dialect::Postgresql) => "INTEGER",
            (ColumnType::Int32, Dialect::Mysql) => "INT",
            (ColumnType::Int64, _) => "BIGINT",
            (ColumnType::Float32, Dialect::Postgresql) => "REAL",
            (ColumnType::Float32, Dialect::Mysql) => "FLOAT",
            (ColumnType::Float64, Dialect::Postgresql) => "DOUBLE PRECISION",
            (ColumnType::Float64, Dialect::Mysql) => "DOUBLE",
            (ColumnType::Boolean, Dialect::Postgresql) => "BOOLEAN",
            (ColumnType::Boolean, Dialect::Mysql) => "TINYINT(1)",
            (ColumnType::Timestamp, Dialect::Postgresql) => "TIMESTAMP(0)",
            (ColumnType::Timestamp, Dialect::Mysql) => "DATETIME",
            (ColumnType::String, _) => "VARCHAR(500)",
            (ColumnType::Opaque, _) => "TEXT",
        }
    }

    /// Read back a catalog type name such as `information_schema.columns.data_type`.
    pub fn from_sql_type(name: &str) -> ColumnType {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "smallint" | "int2" | "tinyint" => ColumnType::Int16,
            "integer" | "int" | "int4" | "mediumint" => ColumnType::Int32,
            "bigint" | "int8" => ColumnType::Int64,
            "real" | "float4" | "float" => ColumnType::Float32,
            "double precision" | "double" | "float8" | "numeric" | "decimal" => ColumnType::Float64,
            "boolean" | "bool" => ColumnType::Boolean,
            "datetime" => ColumnType::Timestamp,
            "character varying" | "varchar" | "character" | "char" => ColumnType::String,
            n if n.starts_with("timestamp") => ColumnType::Timestamp,
            _ => ColumnType::Opaque,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ColumnType::Int16 | ColumnType::Int32 | ColumnType::Int64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ColumnType::Float32 | ColumnType::Float64)
    }

    /// Infer a column type from its values.
    ///
    /// Nulls are ignored. Integers widen to float when mixed with floats;
    /// an all-null column is a string column; any other mix is opaque.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
        let mut seen: Option<ColumnType> = None;
        for value in values {
            let ty = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnType::Boolean,
                Value::Number(n) if n.is_i64() => ColumnType::Int64,
                Value::Number(_) => ColumnType::Float64,
                Value::String(_) => ColumnType::String,
                Value::Array(_) | Value::Object(_) => return ColumnType::Opaque,
            };
            seen = Some(match (seen, ty) {
                (None, ty) => ty,
                (Some(a), b) if a == b => a,
                (Some(ColumnType::Int64), ColumnType::Float64)
                | (Some(ColumnType::Float64), ColumnType::Int64) => ColumnType::Float64,
                _ => return ColumnType::Opaque,
            });
        }
        seen.unwrap_or(ColumnType::String)
    }
}

/// An ordered, tabular result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Row>,
    declared: HashMap<String, ColumnType>,
}

impl ResultSet {
    /// Build from rows; the column order is the order in which fields
    /// first appear.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut known = HashSet::new();
        for row in &rows {
            for key in row.keys() {
                if known.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }
        Self {
            columns,
            rows,
            declared: HashMap::new(),
        }
    }

    /// Build from a field list and positional items, as the provider
    /// returns them. Short items are padded with nulls; extra values are
    /// dropped.
    pub fn from_table(fields: Vec<String>, items: Vec<Vec<Value>>) -> Self {
        let rows = items
            .into_iter()
            .map(|item| {
                let mut values = item.into_iter();
                fields
                    .iter()
                    .map(|f| (f.clone(), values.next().unwrap_or(Value::Null)))
                    .collect::<Row>()
            })
            .collect();
        Self {
            columns: fields,
            rows,
            declared: HashMap::new(),
        }
    }

    /// Declare a column type, overriding inference.
    pub fn with_declared_type(mut self, column: &str, ty: ColumnType) -> Self {
        self.declared.insert(column.to_string(), ty);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Declared type of a column, or the type inferred from its values.
    pub fn column_type(&self, column: &str) -> ColumnType {
        match self.declared.get(column) {
            Some(ty) => *ty,
            None => ColumnType::infer(self.rows.iter().filter_map(|r| r.get(column))),
        }
    }

    /// Keep only the listed fields that exist, in the listed order.
    ///
    /// When none of the fields exist the result is returned unchanged.
    pub fn project(self, fields: &[String]) -> ResultSet {
        let keep: Vec<String> = fields
            .iter()
            .filter(|f| self.columns.contains(f))
            .cloned()
            .collect();
        if keep.is_empty() {
            return self;
        }
        let rows = self
            .rows
            .into_iter()
            .map(|mut row| {
                keep.iter()
                    .map(|f| (f.clone(), row.remove(f).unwrap_or(Value::Null)))
                    .collect::<Row>()
            })
            .collect();
        let declared = self
            .declared
            .into_iter()
            .filter(|(k, _)| keep.contains(k))
            .collect();
        ResultSet {
            columns: keep,
            rows,
            declared,
        }
    }

    /// Concatenate result sets and drop duplicate rows.
    ///
    /// Rows are equal when every column of the merged set holds the same
    /// value, a missing field counting as null. The first occurrence wins.
    pub fn merge(sets: Vec<ResultSet>) -> ResultSet {
        let mut columns: Vec<String> = Vec::new();
        let mut declared = HashMap::new();
        for set in &sets {
            for column in &set.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
            for (k, v) in &set.declared {
                declared.entry(k.clone()).or_insert(*v);
            }
        }

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for set in sets {
            for row in set.rows {
                let full: Row = columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect();
                if seen.insert(row_key(&full)) {
                    rows.push(full);
                }
            }
        }

        ResultSet {
            columns,
            rows,
            declared,
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Canonical identity of a row: its values in column order.
fn row_key(row: &Row) -> String {
    let values: Vec<&Value> = row.values().collect();
    serde_json::to_string(&values).unwrap_or_default()
}

/// Render a scalar the way it appears in a CSV cell or a log line.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    #[test]
    fn test_from_table_zips_fields() {
        let set = ResultSet::from_table(
            vec!["ts_code".into(), "close".into()],
            vec![vec![json!("000001.SZ"), json!(10.5)], vec![json!("600000.SH")]],
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows()[0]["close"], json!(10.5));
        assert_eq!(set.rows()[1]["close"], Value::Null);
        assert_eq!(set.columns(), &["ts_code".to_string(), "close".to_string()]);
    }

    #[test]
    fn test_infer_column_types() {
        assert_eq!(ColumnType::infer([&json!(1), &json!(2)]), ColumnType::Int64);
        assert_eq!(ColumnType::infer([&json!(1), &json!(2.5)]), ColumnType::Float64);
        assert_eq!(ColumnType::infer([&json!(true), &Value::Null]), ColumnType::Boolean);
        assert_eq!(ColumnType::infer([&json!("a")]), ColumnType::String);
        assert_eq!(ColumnType::infer([&Value::Null]), ColumnType::String);
        assert_eq!(ColumnType::infer([&json!("a"), &json!(1)]), ColumnType::Opaque);
        assert_eq!(ColumnType::infer([&json!({"k": 1})]), ColumnType::Opaque);
    }

    #[test]
    fn test_declared_type_wins() {
        let set = ResultSet::from_rows(vec![row(json!({"vol": 1}))])
            .with_declared_type("vol", ColumnType::Float32);
        assert_eq!(set.column_type("vol"), ColumnType::Float32);
    }

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(ColumnType::Float64.sql_type(Dialect::Postgresql), "DOUBLE PRECISION");
        assert_eq!(ColumnType::Float64.sql_type(Dialect::Mysql), "DOUBLE");
        assert_eq!(ColumnType::Boolean.sql_type(Dialect::Mysql), "TINYINT(1)");
        assert_eq!(ColumnType::Timestamp.sql_type(Dialect::Postgresql), "TIMESTAMP(0)");
        assert_eq!(ColumnType::String.sql_type(Dialect::Mysql), "VARCHAR(500)");
        assert_eq!(ColumnType::Opaque.sql_type(Dialect::Postgresql), "TEXT");
    }

    #[test]
    fn test_project_keeps_listed_order() {
        let set = ResultSet::from_rows(vec![row(json!({"a": 1, "b": 2, "c": 3}))]);
        let projected = set.project(&["c".to_string(), "a".to_string(), "zz".to_string()]);
        assert_eq!(projected.columns(), &["c".to_string(), "a".to_string()]);
        let keys: Vec<_> = projected.rows()[0].keys().cloned().collect();
        assert_eq!(keys, vec!["c", "a"]);
    }

    #[test]
    fn test_project_with_no_matches_is_noop() {
        let set = ResultSet::from_rows(vec![row(json!({"a": 1}))]);
        let projected = set.clone().project(&["zz".to_string()]);
        assert_eq!(projected, set);
    }

    #[test]
    fn test_merge_deduplicates_full_rows() {
        let x = ResultSet::from_rows(vec![
            row(json!({"code": "X", "v": 1})),
            row(json!({"code": "Y", "v": 2})),
        ]);
        let y = ResultSet::from_rows(vec![
            row(json!({"v": 1, "code": "X"})),
            row(json!({"code": "Z", "v": 3})),
        ]);
        let merged = ResultSet::merge(vec![x, y]);
        assert_eq!(merged.len(), 3);
        let codes: Vec<_> = merged.rows().iter().map(|r| r["code"].clone()).collect();
        assert_eq!(codes, vec![json!("X"), json!("Y"), json!("Z")]);
    }

    #[test]
    fn test_merge_fills_missing_columns() {
        let x = ResultSet::from_rows(vec![row(json!({"a": 1}))]);
        let y = ResultSet::from_rows(vec![row(json!({"b": 2}))]);
        let merged = ResultSet::merge(vec![x, y]);
        assert_eq!(merged.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(merged.rows()[1]["a"], Value::Null);
    }

    #[test]
    fn test_catalog_types_map_back() {
        for ty in [
            ColumnType::Int16,
            ColumnType::Int32,
            ColumnType::Int64,
            ColumnType::Float32,
            ColumnType::Float64,
            ColumnType::Boolean,
            ColumnType::Opaque,
        ] {
            assert_eq!(ColumnType::from_sql_type(&ty.sql_type(Dialect::Postgresql).to_lowercase()), ty);
        }
        assert_eq!(ColumnType::from_sql_type("character varying"), ColumnType::String);
        assert_eq!(ColumnType::from_sql_type("timestamp without time zone"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_sql_type("jsonb"), ColumnType::Opaque);
    }
}
