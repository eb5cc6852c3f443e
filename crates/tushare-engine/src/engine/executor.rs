//! Single provider call execution.
//!
//! One invocation calls the provider, projects the result, persists it to
//! the target table and/or an output file, and writes exactly one
//! download log. Provider, database and file failures are each caught
//! and recorded; none of them aborts the caller.

use std::time::Instant;

use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value};

use super::context::{whole_seconds, RunContext};
use super::output;
use super::result_set::ResultSet;
use super::schema::RowLinkage;
use crate::config::EngineConfig;
use crate::db::models::ApiConfig;
use crate::error::EngineResult;

/// Outcome of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Rows were returned.
    Success,
    /// The call succeeded with no rows.
    Empty,
    /// The provider call failed.
    Failed,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Success => write!(f, "success"),
            CallStatus::Empty => write!(f, "empty"),
            CallStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Where a call sits in the run.
#[derive(Debug, Clone)]
pub struct CallScope<'a> {
    /// Name written to the download log
    pub log_name: String,
    /// Step name, for workflow calls
    pub step: Option<&'a str>,
    /// Step order, used in output file names
    pub step_order: Option<i32>,
    /// 1-based fan-out combination index
    pub combo: Option<usize>,
    /// Per-step table override
    pub table: Option<&'a str>,
}

impl<'a> CallScope<'a> {
    /// Scope of a single-API task run.
    pub fn single(task_name: &str) -> Self {
        Self {
            log_name: task_name.to_string(),
            step: None,
            step_order: None,
            combo: None,
            table: None,
        }
    }
}

/// Result of one call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub status: CallStatus,
    /// Rows returned by the provider, before projection
    pub record_count: usize,
    /// The projected rows, when any were returned
    pub results: Option<ResultSet>,
    pub file_path: Option<String>,
    /// Provider, database or file errors recorded on the log
    pub errors: Vec<String>,
    /// Whole seconds
    pub duration: i32,
}

impl CallOutcome {
    /// True when the download log was written with success status.
    pub fn logged_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Perform one provider call and record it.
///
/// Only a failure to write the download log itself is returned as an
/// error.
pub async fn execute_one(
    ctx: &RunContext,
    config: &ApiConfig,
    params: &Map<String, Value>,
    scope: &CallScope<'_>,
) -> EngineResult<CallOutcome> {
    let started = Instant::now();
    let label = scope.step.unwrap_or(&ctx.task.task_name);
    let mut log = ctx.new_log(scope.log_name.clone(), config);

    let fetched = match ctx.provider.call(&config.api_code, params).await {
        Ok(set) => set,
        Err(e) => {
            let detail = format!(
                "{} provider call failed: {}\nparams: {}\napi_code: {}\napi_name: {}",
                label,
                e,
                Value::Object(params.clone()),
                config.api_code,
                config.api_name
            );
            tracing::error!(
                step = %label,
                combo = ?scope.combo,
                api_code = %config.api_code,
                error = %e,
                "Provider call failed"
            );
            log.status = crate::db::models::STATUS_FAILED.to_string();
            log.error_message = Some(detail.clone());
            log.duration = whole_seconds(started.elapsed());
            ctx.store.insert_log(&log).await?;
            return Ok(CallOutcome {
                status: CallStatus::Failed,
                record_count: 0,
                results: None,
                file_path: None,
                errors: vec![detail],
                duration: log.duration,
            });
        }
    };

    if fetched.is_empty() {
        tracing::warn!(step = %label, combo = ?scope.combo, api_code = %config.api_code, "Provider returned no rows");
        log.duration = whole_seconds(started.elapsed());
        ctx.store.insert_log(&log).await?;
        return Ok(CallOutcome {
            status: CallStatus::Empty,
            record_count: 0,
            results: None,
            file_path: None,
            errors: Vec::new(),
            duration: log.duration,
        });
    }

    let record_count = fetched.len();
    let rows = match config.projection() {
        Some(fields) => fetched.project(&fields),
        None => fetched,
    };
    let mut errors = Vec::new();

    if ctx.task.save_to_db {
        let table = scope
            .table
            .or(ctx.task.data_table_name.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| EngineConfig::default_table_name(&config.api_code));
        match persist(ctx, config, &table, &rows).await {
            Ok(inserted) => {
                tracing::info!(step = %label, combo = ?scope.combo, table = %table, records = inserted, "Saved rows to table");
            }
            Err(e) => {
                tracing::error!(step = %label, combo = ?scope.combo, table = %table, error = %e, "Failed to save rows to table");
                errors.push(format!("{} failed to save to table {}: {}", label, table, e));
            }
        }
    }

    let mut file_path = None;
    if let Some(dir) = ctx.task.save_path.as_deref() {
        let stem = output::file_stem(
            &config.api_code,
            scope.step_order,
            &ctx.download_date,
            Local::now(),
            scope.combo,
        );
        match output::write_file(dir, &stem, ctx.task.save_format, &rows).await {
            Ok(path) => {
                tracing::info!(step = %label, path = %path.display(), "Saved rows to file");
                file_path = Some(path.display().to_string());
            }
            Err(e) => {
                tracing::error!(step = %label, dir = %dir.display(), error = %e, "Failed to save rows to file");
                errors.push(format!("{} failed to save to file: {}", label, e));
            }
        }
    }

    log.record_count = i32::try_from(record_count).unwrap_or(i32::MAX);
    log.file_path = file_path.clone();
    if !errors.is_empty() {
        log.status = crate::db::models::STATUS_FAILED.to_string();
        log.error_message = Some(errors.join("\n"));
    }
    log.duration = whole_seconds(started.elapsed());
    ctx.store.insert_log(&log).await?;

    Ok(CallOutcome {
        status: CallStatus::Success,
        record_count,
        results: Some(rows),
        file_path,
        errors,
        duration: log.duration,
    })
}

async fn persist(ctx: &RunContext, config: &ApiConfig, table: &str, rows: &ResultSet) -> EngineResult<u64> {
    ctx.schema
        .ensure_table_exists(ctx.tables.as_ref(), table, &config.api_code, rows)
        .await?;
    let linkage = RowLinkage {
        task_id: ctx.task.task_id,
        config_id: config.config_id,
        api_code: &config.api_code,
        download_date: &ctx.download_date,
    };
    ctx.schema
        .bulk_insert(ctx.tables.as_ref(), table, rows, linkage)
        .await
}
