//! Workflow queries.

use crate::db::models::{WorkflowConfig, WorkflowStep};
use crate::db::DbPool;
use crate::error::EngineResult;

/// Get a workflow by ID.
pub async fn get_workflow_by_id(pool: &DbPool, workflow_id: i64) -> EngineResult<Option<WorkflowConfig>> {
    let workflow = sqlx::query_as::<_, WorkflowConfig>(
        r#"
        SELECT workflow_id, workflow_name, workflow_desc, status, create_time
        FROM tushare_workflow_config
        WHERE workflow_id = $1
        "#,
    )
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;

    Ok(workflow)
}

/// List the steps of a workflow in execution order.
pub async fn list_steps_by_workflow_id(pool: &DbPool, workflow_id: i64) -> EngineResult<Vec<WorkflowStep>> {
    let steps = sqlx::query_as::<_, WorkflowStep>(
        r#"
        SELECT step_id, workflow_id, step_order, step_name, config_id, step_params,
               condition_expr, loop_mode, data_table_name, node_type, status
        FROM tushare_workflow_step
        WHERE workflow_id = $1
        ORDER BY step_order ASC, step_id ASC
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(steps)
}
