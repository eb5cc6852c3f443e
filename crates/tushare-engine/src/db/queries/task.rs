//! Download task queries.

use chrono::{DateTime, Utc};

use crate::db::models::DownloadTask;
use crate::db::DbPool;
use crate::error::EngineResult;

/// Get a download task by ID.
pub async fn get_task_by_id(pool: &DbPool, task_id: i64) -> EngineResult<Option<DownloadTask>> {
    let task = sqlx::query_as::<_, DownloadTask>(
        r#"
        SELECT task_id, task_name, config_id, workflow_id, cron_expression,
               start_date, end_date, task_params, save_path, save_format,
               save_to_db, data_table_name, status, last_run_time,
               run_count, success_count, fail_count
        FROM tushare_download_task
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Count one run against a task.
///
/// Increments are done in SQL so the update never depends on a stale copy
/// of the task row.
pub async fn record_task_run(
    pool: &DbPool,
    task_id: i64,
    succeeded: bool,
    at: DateTime<Utc>,
) -> EngineResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE tushare_download_task
        SET run_count = COALESCE(run_count, 0) + 1,
            success_count = COALESCE(success_count, 0) + CASE WHEN $2 THEN 1 ELSE 0 END,
            fail_count = COALESCE(fail_count, 0) + CASE WHEN $2 THEN 0 ELSE 1 END,
            last_run_time = $3,
            update_time = $3
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .bind(succeeded)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
