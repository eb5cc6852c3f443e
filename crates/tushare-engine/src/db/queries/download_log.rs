//! Download log queries.

use crate::db::models::NewDownloadLog;
use crate::db::DbPool;
use crate::error::EngineResult;

/// Insert a download log, returning its ID.
pub async fn insert_download_log(pool: &DbPool, log: &NewDownloadLog) -> EngineResult<i64> {
    let result: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO tushare_download_log (
            task_id, task_name, config_id, api_name, download_date, record_count,
            file_path, status, error_message, summary, duration, create_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING log_id
        "#,
    )
    .bind(log.task_id)
    .bind(&log.task_name)
    .bind(log.config_id)
    .bind(&log.api_name)
    .bind(&log.download_date)
    .bind(log.record_count)
    .bind(&log.file_path)
    .bind(&log.status)
    .bind(&log.error_message)
    .bind(&log.summary)
    .bind(log.duration)
    .bind(log.create_time)
    .fetch_one(pool)
    .await?;

    Ok(result.0)
}
