//! Per-run execution context.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};

use super::output::SaveFormat;
use super::schema::SchemaManager;
use crate::db::models::{ApiConfig, DownloadTask, NewDownloadLog};
use crate::db::{Store, TableBackend};
use crate::error::EngineResult;
use crate::provider::Provider;

/// Task values captured when a run starts.
///
/// The run never goes back to the task row, so these are also what a
/// terminal failure log is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: i64,
    pub task_name: String,
    /// 0 for workflow tasks without a configuration
    pub config_id: i64,
    pub workflow_id: Option<i64>,
    pub save_to_db: bool,
    pub save_path: Option<PathBuf>,
    pub save_format: SaveFormat,
    pub data_table_name: Option<String>,
    /// Task-level overrides; these win over step and configuration values
    pub overrides: Map<String, Value>,
}

impl TaskSnapshot {
    pub fn from_task(task: &DownloadTask) -> EngineResult<Self> {
        Ok(Self {
            task_id: task.task_id,
            task_name: task.task_name.clone(),
            config_id: task.config_id.unwrap_or(0),
            workflow_id: task.workflow_id,
            save_to_db: task.saves_to_db(),
            save_path: task.output_dir().map(PathBuf::from),
            save_format: SaveFormat::parse(task.save_format.as_deref()),
            data_table_name: task.table_name().map(str::to_string),
            overrides: task.override_params()?,
        })
    }
}

/// Everything one run needs, owned by that run.
#[derive(Clone)]
pub struct RunContext {
    pub task: TaskSnapshot,
    /// Logical date stamped on logs, rows and file names (YYYYMMDD)
    pub download_date: String,
    /// Base day for date expressions
    pub today: NaiveDate,
    pub store: Arc<dyn Store>,
    pub tables: Arc<dyn TableBackend>,
    pub schema: Arc<SchemaManager>,
    pub provider: Arc<dyn Provider>,
}

impl RunContext {
    /// A success log for `config` with nothing recorded yet.
    pub fn new_log(&self, name: String, config: &ApiConfig) -> NewDownloadLog {
        NewDownloadLog {
            task_id: self.task.task_id,
            task_name: name,
            config_id: config.config_id,
            api_name: config.api_name.clone(),
            download_date: self.download_date.clone(),
            record_count: 0,
            file_path: None,
            status: NewDownloadLog::status_flag(true),
            error_message: None,
            summary: None,
            duration: 0,
            create_time: Utc::now(),
        }
    }

    /// Log name for a workflow step, or for a fan-out call within it.
    pub fn step_log_name(&self, step: &str, combo: Option<usize>) -> String {
        match combo {
            Some(index) => format!("{}[{}][combo{}]", self.task.task_name, step, index),
            None => format!("{}[{}]", self.task.task_name, step),
        }
    }
}

/// Whole seconds, as stored on logs.
pub fn whole_seconds(elapsed: Duration) -> i32 {
    i32::try_from(elapsed.as_secs()).unwrap_or(i32::MAX)
}
