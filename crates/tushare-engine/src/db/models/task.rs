//! Download task model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

use super::api_config::parse_object;
use crate::error::EngineResult;

/// A scheduled download: one API configuration or one workflow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DownloadTask {
    /// Task ID
    pub task_id: i64,

    /// Task name
    pub task_name: String,

    /// API configuration used on the single-API path
    #[sqlx(default)]
    pub config_id: Option<i64>,

    /// Workflow to run instead of a single API
    #[sqlx(default)]
    pub workflow_id: Option<i64>,

    #[sqlx(default)]
    pub cron_expression: Option<String>,

    /// Fixed range start (YYYYMMDD), informational
    #[sqlx(default)]
    pub start_date: Option<String>,

    /// Fixed range end (YYYYMMDD), informational
    #[sqlx(default)]
    pub end_date: Option<String>,

    /// Override parameters (JSON object text); these win over everything
    #[sqlx(default)]
    pub task_params: Option<String>,

    /// Output directory
    #[sqlx(default)]
    pub save_path: Option<String>,

    /// Output format: csv, excel or json
    #[sqlx(default)]
    pub save_format: Option<String>,

    /// '1' persists rows to a data table
    #[sqlx(default)]
    pub save_to_db: Option<String>,

    /// Target data table
    #[sqlx(default)]
    pub data_table_name: Option<String>,

    #[sqlx(default)]
    pub status: Option<String>,

    #[sqlx(default)]
    pub last_run_time: Option<DateTime<Utc>>,

    #[sqlx(default)]
    pub run_count: Option<i32>,

    #[sqlx(default)]
    pub success_count: Option<i32>,

    #[sqlx(default)]
    pub fail_count: Option<i32>,
}

impl DownloadTask {
    pub fn saves_to_db(&self) -> bool {
        self.save_to_db.as_deref().map(str::trim) == Some("1")
    }

    /// Parse the task-level override parameters.
    pub fn override_params(&self) -> EngineResult<Map<String, Value>> {
        parse_object(self.task_params.as_deref(), "task_params", &self.task_name)
    }

    /// Non-blank output directory.
    pub fn output_dir(&self) -> Option<&str> {
        non_blank(self.save_path.as_deref())
    }

    /// Non-blank target table name.
    pub fn table_name(&self) -> Option<&str> {
        non_blank(self.data_table_name.as_deref())
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> DownloadTask {
        DownloadTask {
            task_id: 7,
            task_name: "daily quotes".to_string(),
            config_id: Some(1),
            workflow_id: None,
            cron_expression: None,
            start_date: None,
            end_date: None,
            task_params: None,
            save_path: Some("  ".to_string()),
            save_format: None,
            save_to_db: Some("0".to_string()),
            data_table_name: Some(" my_table ".to_string()),
            status: Some("0".to_string()),
            last_run_time: None,
            run_count: Some(0),
            success_count: Some(0),
            fail_count: Some(0),
        }
    }

    #[test]
    fn test_destinations() {
        let t = task();
        assert!(!t.saves_to_db());
        assert_eq!(t.output_dir(), None);
        assert_eq!(t.table_name(), Some("my_table"));
    }

    #[test]
    fn test_override_params() {
        let mut t = task();
        t.task_params = Some(r#"{"ts_code": "600000.SH"}"#.to_string());
        let params = t.override_params().unwrap();
        assert_eq!(params["ts_code"], "600000.SH");

        t.task_params = Some("not json".to_string());
        assert!(t.override_params().is_err());
    }
}
