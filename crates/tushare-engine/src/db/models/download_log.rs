//! Download log model.
//!
//! Logs are append-only: the engine inserts them and never updates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{STATUS_FAILED, STATUS_OK};

/// A stored execution record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DownloadLog {
    pub log_id: i64,
    pub task_id: i64,
    pub task_name: String,
    pub config_id: i64,
    pub api_name: String,
    #[sqlx(default)]
    pub download_date: Option<String>,
    #[sqlx(default)]
    pub record_count: Option<i32>,
    #[sqlx(default)]
    pub file_path: Option<String>,
    #[sqlx(default)]
    pub status: Option<String>,
    #[sqlx(default)]
    pub error_message: Option<String>,
    #[sqlx(default)]
    pub summary: Option<serde_json::Value>,
    /// Whole seconds
    #[sqlx(default)]
    pub duration: Option<i32>,
    #[sqlx(default)]
    pub create_time: Option<DateTime<Utc>>,
}

/// A log record about to be inserted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewDownloadLog {
    pub task_id: i64,
    pub task_name: String,
    pub config_id: i64,
    pub api_name: String,
    pub download_date: String,
    pub record_count: i32,
    pub file_path: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub summary: Option<serde_json::Value>,
    pub duration: i32,
    pub create_time: DateTime<Utc>,
}

impl NewDownloadLog {
    pub fn succeeded(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn status_flag(ok: bool) -> String {
        if ok { STATUS_OK } else { STATUS_FAILED }.to_string()
    }
}
