//! API configuration model.
//!
//! One row describes one provider endpoint: its code, default call
//! parameters and an optional field projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

use super::flag_is_ok;
use crate::error::{EngineError, EngineResult};

/// Provider endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiConfig {
    /// Configuration ID
    pub config_id: i64,

    /// Display name
    pub api_name: String,

    /// Provider code (e.g. "stock_basic", "daily", "pro_bar")
    pub api_code: String,

    #[sqlx(default)]
    pub api_desc: Option<String>,

    /// Default call parameters (JSON object text)
    #[sqlx(default)]
    pub api_params: Option<String>,

    /// Field projection (JSON array text)
    #[sqlx(default)]
    pub data_fields: Option<String>,

    /// '0' enabled, '1' disabled
    #[sqlx(default)]
    pub status: Option<String>,

    #[sqlx(default)]
    pub create_time: Option<DateTime<Utc>>,
}

impl ApiConfig {
    pub fn is_enabled(&self) -> bool {
        flag_is_ok(self.status.as_deref())
    }

    /// Parse the default call parameters.
    ///
    /// An empty column yields an empty map; anything that is not a JSON
    /// object is a validation error.
    pub fn default_params(&self) -> EngineResult<Map<String, Value>> {
        parse_object(self.api_params.as_deref(), "api_params", &self.api_code)
    }

    /// Parse the field projection, if one is configured.
    ///
    /// Returns `None` for an empty column, malformed JSON or a non-array
    /// value; non-string entries are ignored.
    pub fn projection(&self) -> Option<Vec<String>> {
        let raw = self.data_fields.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => {
                tracing::warn!(api_code = %self.api_code, "data_fields is not a JSON array, ignoring");
                None
            }
        }
    }
}

/// Parse an optional JSON-object text column.
pub(crate) fn parse_object(
    raw: Option<&str>,
    column: &str,
    owner: &str,
) -> EngineResult<Map<String, Value>> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Map::new()),
        Some(raw) => raw,
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(EngineError::Validation(format!(
            "{} of {} must be a JSON object, got {}",
            column, owner, other
        ))),
        Err(e) => Err(EngineError::Validation(format!(
            "{} of {} is not valid JSON: {}",
            column, owner, e
        ))),
    }
}
