//! API configuration queries.

use crate::db::models::ApiConfig;
use crate::db::DbPool;
use crate::error::EngineResult;

/// Get an API configuration by ID.
pub async fn get_api_config_by_id(pool: &DbPool, config_id: i64) -> EngineResult<Option<ApiConfig>> {
    let config = sqlx::query_as::<_, ApiConfig>(
        r#"
        SELECT config_id, api_name, api_code, api_desc, api_params, data_fields, status, create_time
        FROM tushare_api_config
        WHERE config_id = $1
        "#,
    )
    .bind(config_id)
    .fetch_optional(pool)
    .await?;

    Ok(config)
}
