//! Persistence boundary for bookkeeping records.
//!
//! The engine reads tasks, API configurations and workflows, appends
//! download logs and counts runs. Everything else about these records is
//! owned by the admin service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{ApiConfig, DownloadTask, NewDownloadLog, WorkflowConfig, WorkflowStep};
use crate::db::queries;
use crate::db::DbPool;
use crate::error::EngineResult;

/// Bookkeeping operations the engine depends on.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_task(&self, task_id: i64) -> EngineResult<Option<DownloadTask>>;

    async fn get_api_config(&self, config_id: i64) -> EngineResult<Option<ApiConfig>>;

    async fn get_workflow(&self, workflow_id: i64) -> EngineResult<Option<WorkflowConfig>>;

    /// Steps of a workflow, ascending by `step_order`.
    async fn list_workflow_steps(&self, workflow_id: i64) -> EngineResult<Vec<WorkflowStep>>;

    /// Append a download log. Each insert is its own commit.
    async fn insert_log(&self, log: &NewDownloadLog) -> EngineResult<i64>;

    /// Count one finished run against the task.
    async fn record_run(&self, task_id: i64, succeeded: bool, at: DateTime<Utc>) -> EngineResult<()>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_task(&self, task_id: i64) -> EngineResult<Option<DownloadTask>> {
        queries::task::get_task_by_id(&self.pool, task_id).await
    }

    async fn get_api_config(&self, config_id: i64) -> EngineResult<Option<ApiConfig>> {
        queries::api_config::get_api_config_by_id(&self.pool, config_id).await
    }

    async fn get_workflow(&self, workflow_id: i64) -> EngineResult<Option<WorkflowConfig>> {
        queries::workflow::get_workflow_by_id(&self.pool, workflow_id).await
    }

    async fn list_workflow_steps(&self, workflow_id: i64) -> EngineResult<Vec<WorkflowStep>> {
        queries::workflow::list_steps_by_workflow_id(&self.pool, workflow_id).await
    }

    async fn insert_log(&self, log: &NewDownloadLog) -> EngineResult<i64> {
        queries::download_log::insert_download_log(&self.pool, log).await
    }

    async fn record_run(&self, task_id: i64, succeeded: bool, at: DateTime<Utc>) -> EngineResult<()> {
        let updated = queries::task::record_task_run(&self.pool, task_id, succeeded, at).await?;
        if updated == 0 {
            tracing::warn!(task_id, "Run counters not updated: task row is gone");
        }
        Ok(())
    }
}
