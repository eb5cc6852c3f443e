//! Workflow and workflow step models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

use super::flag_is_ok;
use super::task::non_blank;

/// A named, ordered chain of steps.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowConfig {
    pub workflow_id: i64,

    pub workflow_name: String,

    #[sqlx(default)]
    pub workflow_desc: Option<String>,

    /// '0' enabled, '1' disabled
    #[sqlx(default)]
    pub status: Option<String>,

    #[sqlx(default)]
    pub create_time: Option<DateTime<Utc>>,
}

impl WorkflowConfig {
    pub fn is_enabled(&self) -> bool {
        flag_is_ok(self.status.as_deref())
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowStep {
    pub step_id: i64,

    pub workflow_id: i64,

    /// Execution order, ascending
    pub step_order: i32,

    /// Unique within the workflow; key for cross-step references
    pub step_name: String,

    /// API configuration called by this step (absent on start/end nodes)
    #[sqlx(default)]
    pub config_id: Option<i64>,

    /// Parameter overrides and resolver directives (JSON object text)
    #[sqlx(default)]
    pub step_params: Option<String>,

    /// Optional `{field, operator, value}` condition (JSON object text)
    #[sqlx(default)]
    pub condition_expr: Option<String>,

    /// '1' enables fan-out
    #[sqlx(default)]
    pub loop_mode: Option<String>,

    /// Per-step target table override
    #[sqlx(default)]
    pub data_table_name: Option<String>,

    /// start, end or task
    #[sqlx(default)]
    pub node_type: Option<String>,

    /// '0' enabled, '1' disabled
    #[sqlx(default)]
    pub status: Option<String>,
}

impl WorkflowStep {
    pub fn is_enabled(&self) -> bool {
        flag_is_ok(self.status.as_deref())
    }

    /// Start and end nodes carry no API call.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.node_type.as_deref().map(str::trim),
            Some("start") | Some("end")
        )
    }

    pub fn fan_out(&self) -> bool {
        self.loop_mode.as_deref().map(str::trim) == Some("1")
    }

    pub fn table_name(&self) -> Option<&str> {
        non_blank(self.data_table_name.as_deref())
    }

    /// Parse the step parameters.
    ///
    /// Malformed or non-object JSON degrades to an empty map with an error
    /// log so one bad step definition never aborts the workflow.
    pub fn params(&self) -> Map<String, Value> {
        let raw = match non_blank(self.step_params.as_deref()) {
            Some(raw) => raw,
            None => return Map::new(),
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                tracing::warn!(step = %self.step_name, "step_params is not a JSON object, using no parameters");
                Map::new()
            }
            Err(e) => {
                let preview: String = raw.chars().take(100).collect();
                tracing::error!(step = %self.step_name, error = %e, content = %preview, "Failed to parse step_params");
                Map::new()
            }
        }
    }
}
