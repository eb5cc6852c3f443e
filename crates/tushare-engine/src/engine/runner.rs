//! Task runs.
//!
//! A run loads its task, executes either the referenced workflow or the
//! single configured API, and always counts itself against the task.
//! Anything the run raises is turned into a terminal failure log built
//! from values captured before execution started.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::context::{whole_seconds, RunContext, TaskSnapshot};
use super::date_expr::DATE_FORMAT;
use super::executor::{execute_one, CallScope};
use super::orchestrator::WorkflowOrchestrator;
use super::params;
use super::schema::SchemaManager;
use crate::config::EngineConfig;
use crate::db::models::{DownloadTask, NewDownloadLog};
use crate::db::{Store, TableBackend};
use crate::error::{EngineError, EngineResult};
use crate::provider::ProviderFactory;

const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// How a run ended.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub task_id: i64,
    pub succeeded: bool,
    /// Truncated failure report, when the run raised
    pub error: Option<String>,
    /// Whole seconds
    pub duration: i32,
}

/// Values a terminal failure log is built from.
#[derive(Debug, Clone)]
struct Captured {
    task_id: i64,
    task_name: String,
    config_id: i64,
    api_name: String,
    download_date: String,
}

impl Captured {
    fn from_task(task: &DownloadTask, download_date: &str) -> Self {
        Self {
            task_id: task.task_id,
            task_name: task.task_name.clone(),
            config_id: task.config_id.unwrap_or(0),
            api_name: task.task_name.clone(),
            download_date: download_date.to_string(),
        }
    }

    fn failure_log(&self, error: String, duration: i32) -> NewDownloadLog {
        NewDownloadLog {
            task_id: self.task_id,
            task_name: self.task_name.clone(),
            config_id: self.config_id,
            api_name: self.api_name.clone(),
            download_date: self.download_date.clone(),
            record_count: 0,
            file_path: None,
            status: NewDownloadLog::status_flag(false),
            error_message: Some(error),
            summary: None,
            duration,
            create_time: Utc::now(),
        }
    }
}

/// Runs tasks against one store and table backend.
pub struct TaskRunner {
    store: Arc<dyn Store>,
    tables: Arc<dyn TableBackend>,
    schema: Arc<SchemaManager>,
    providers: Arc<dyn ProviderFactory>,
    config: EngineConfig,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn Store>,
        tables: Arc<dyn TableBackend>,
        schema: Arc<SchemaManager>,
        providers: Arc<dyn ProviderFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            tables,
            schema,
            providers,
            config,
        }
    }

    /// Run `task_id` for `download_date` (today when absent).
    ///
    /// Returns an error only when the task cannot be loaded; every other
    /// failure is reported on the returned [`RunReport`].
    pub async fn run(&self, task_id: i64, download_date: Option<String>) -> EngineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("task_run", %run_id, task_id);
        self.run_inner(run_id, task_id, download_date).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, task_id: i64, download_date: Option<String>) -> EngineResult<RunReport> {
        let started = Instant::now();
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("task {}", task_id)))?;

        let today = Local::now().date_naive();
        let download_date = download_date.unwrap_or_else(|| today.format(DATE_FORMAT).to_string());
        let mut captured = Captured::from_task(&task, &download_date);
        tracing::info!(task = %task.task_name, download_date = %download_date, "Task run started");

        let result = self.execute(&task, download_date, today, &mut captured).await;
        let duration = whole_seconds(started.elapsed());

        let (succeeded, error) = match result {
            Ok(succeeded) => (succeeded, None),
            Err(e) => {
                let report = truncate_report(&format!("{:?}", anyhow::Error::from(e)), self.config.error_message_limit);
                tracing::error!(task = %captured.task_name, error = %report, "Task run failed");
                let log = captured.failure_log(report.clone(), duration);
                if let Err(log_err) = self.store.insert_log(&log).await {
                    tracing::error!(error = %log_err, "Failed to write terminal failure log");
                }
                (false, Some(report))
            }
        };

        if let Err(e) = self.store.record_run(task_id, succeeded, Utc::now()).await {
            tracing::error!(error = %e, "Failed to update run counters");
        }

        tracing::info!(task = %captured.task_name, succeeded, duration, "Task run finished");
        Ok(RunReport {
            run_id,
            task_id,
            succeeded,
            error,
            duration,
        })
    }

    async fn execute(
        &self,
        task: &DownloadTask,
        download_date: String,
        today: chrono::NaiveDate,
        captured: &mut Captured,
    ) -> EngineResult<bool> {
        let snapshot = TaskSnapshot::from_task(task)?;
        let provider = self.providers.open().await?;
        let ctx = RunContext {
            task: snapshot,
            download_date,
            today,
            store: self.store.clone(),
            tables: self.tables.clone(),
            schema: self.schema.clone(),
            provider,
        };

        match ctx.task.workflow_id {
            Some(workflow_id) => {
                captured.api_name = format!("workflow {}", workflow_id);
                WorkflowOrchestrator::new(&ctx).run(workflow_id).await?;
                Ok(true)
            }
            None => self.run_single(&ctx, task, captured).await,
        }
    }

    /// The single-API path: one call with configuration defaults and task
    /// overrides.
    async fn run_single(&self, ctx: &RunContext, task: &DownloadTask, captured: &mut Captured) -> EngineResult<bool> {
        let config_id = task
            .config_id
            .ok_or_else(|| EngineError::Validation(format!("task {} has neither workflow nor API configuration", task.task_id)))?;
        let config = ctx
            .store
            .get_api_config(config_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("API configuration {}", config_id)))?;
        captured.api_name = config.api_name.clone();

        if !config.is_enabled() {
            tracing::warn!(api_code = %config.api_code, "API configuration disabled, nothing to run");
            return Ok(true);
        }

        let mut merged = config.default_params()?;
        merged.extend(ctx.task.overrides.clone());
        let call_params = params::resolve_literals(merged, ctx.today);

        let outcome = execute_one(ctx, &config, &call_params, &CallScope::single(&ctx.task.task_name)).await?;
        Ok(outcome.logged_ok())
    }
}

/// Cap a failure report at `limit` characters, marking the cut.
pub fn truncate_report(report: &str, limit: usize) -> String {
    if report.chars().count() <= limit {
        return report.to_string();
    }
    let mut truncated: String = report.chars().take(limit).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
