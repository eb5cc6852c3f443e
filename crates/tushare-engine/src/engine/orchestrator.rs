//! Workflow orchestration.
//!
//! Runs the steps of one workflow in ascending order, strictly
//! sequentially. For each step the orchestrator:
//! - loads and gates its API configuration
//! - merges configuration defaults, step parameters and task overrides
//! - checks the optional condition against earlier results
//! - executes once, or once per combination in fan-out mode
//! - registers non-empty results for later steps
//!
//! No step failure is fatal: failed calls are logged by the executor and
//! the loop moves on.

use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::combinations::{self, CombinationPlan};
use super::condition::{Condition, Evaluation};
use super::context::{whole_seconds, RunContext};
use super::executor::{execute_one, CallOutcome, CallScope, CallStatus};
use super::params;
use super::previous::PreviousResults;
use super::result_set::ResultSet;
use crate::db::models::{ApiConfig, WorkflowStep, STATUS_FAILED};
use crate::error::{EngineError, EngineResult};

/// Per-combination outcomes kept in a fan-out summary.
const MAX_EXECUTION_DETAILS: usize = 10;

/// Counters for one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowStats {
    /// Steps that made at least one provider call
    pub executed: usize,
    /// Steps skipped by status, configuration, condition or missing values
    pub skipped: usize,
    /// Provider calls made
    pub calls: usize,
    /// Calls that failed at the provider
    pub failed_calls: usize,
    /// Rows fetched across all calls
    pub records: usize,
}

/// Aggregate of one fan-out step.
#[derive(Debug, Clone, Default)]
struct FanOutTally {
    success_count: usize,
    fail_count: usize,
    skip_count: usize,
    total_records: usize,
    execution_details: Vec<Value>,
}

impl FanOutTally {
    fn record(&mut self, combo: usize, params: &Map<String, Value>, outcome: &CallOutcome) {
        match outcome.status {
            CallStatus::Success | CallStatus::Empty => self.success_count += 1,
            CallStatus::Failed => self.fail_count += 1,
        }
        self.total_records += outcome.record_count;
        if self.execution_details.len() < MAX_EXECUTION_DETAILS {
            let mut detail = json!({
                "combination": combo,
                "params": params,
                "status": outcome.status,
                "record_count": outcome.record_count,
            });
            if let Some(error) = outcome.errors.first() {
                detail["error"] = Value::String(error.clone());
            }
            self.execution_details.push(detail);
        }
    }
}

/// Executes workflows for one run.
pub struct WorkflowOrchestrator<'a> {
    ctx: &'a RunContext,
    previous: PreviousResults,
    stats: WorkflowStats,
}

impl<'a> WorkflowOrchestrator<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self {
            ctx,
            previous: PreviousResults::new(),
            stats: WorkflowStats::default(),
        }
    }

    /// Results registered so far.
    pub fn previous(&self) -> &PreviousResults {
        &self.previous
    }

    /// Run every step of `workflow_id`.
    ///
    /// A missing workflow is an error; a disabled one is skipped.
    pub async fn run(mut self, workflow_id: i64) -> EngineResult<WorkflowStats> {
        let ctx = self.ctx;
        let workflow = ctx
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow {}", workflow_id)))?;

        if !workflow.is_enabled() {
            tracing::warn!(workflow_id, workflow = %workflow.workflow_name, "Workflow is disabled, nothing to run");
            return Ok(self.stats);
        }

        let steps = ctx.store.list_workflow_steps(workflow_id).await?;
        tracing::info!(
            workflow_id,
            workflow = %workflow.workflow_name,
            steps = steps.len(),
            "Starting workflow"
        );

        for step in &steps {
            self.run_step(step).await?;
        }

        tracing::info!(
            workflow_id,
            executed = self.stats.executed,
            skipped = self.stats.skipped,
            calls = self.stats.calls,
            failed_calls = self.stats.failed_calls,
            records = self.stats.records,
            "Workflow finished"
        );
        Ok(self.stats)
    }

    async fn run_step(&mut self, step: &WorkflowStep) -> EngineResult<()> {
        if !step.is_enabled() || step.is_structural() {
            tracing::debug!(step = %step.step_name, node_type = ?step.node_type, "Step passed over");
            return Ok(());
        }

        let Some(config) = self.load_config(step).await? else {
            self.stats.skipped += 1;
            return Ok(());
        };

        let merged = match self.merge_params(step, &config) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::error!(step = %step.step_name, api_code = %config.api_code, error = %e, "Step skipped: bad configuration parameters");
                self.stats.skipped += 1;
                return Ok(());
            }
        };

        if let Some(condition) = Condition::parse(step.condition_expr.as_deref()) {
            match condition.evaluate(&self.previous) {
                Evaluation::NotSatisfied { actual } => {
                    tracing::info!(
                        step = %step.step_name,
                        field = ?condition.field,
                        expected = ?condition.value,
                        actual = %actual,
                        "Step skipped: condition not satisfied"
                    );
                    self.stats.skipped += 1;
                    return Ok(());
                }
                Evaluation::Unchecked(reason) => {
                    tracing::warn!(step = %step.step_name, reason, "Condition not checked, running step");
                }
                Evaluation::Satisfied => {}
            }
        }

        let resolved = params::resolve_step_params(&merged, step.fan_out(), self.ctx.today);
        let plan = combinations::generate(&resolved, step.fan_out(), &self.previous, self.ctx.today);
        if plan.is_empty() {
            tracing::warn!(step = %step.step_name, "Step skipped: no parameter combinations");
            self.stats.skipped += 1;
            return Ok(());
        }

        let results = if step.fan_out() || resolved.has_loop() {
            self.fan_out(step, &config, plan).await?
        } else {
            self.single(step, &config, plan).await?
        };
        self.stats.executed += 1;

        match results {
            Some(set) if !set.is_empty() => {
                tracing::debug!(step = %step.step_name, records = set.len(), "Registered step results");
                self.previous.register(&step.step_name, set);
            }
            _ => {
                tracing::debug!(step = %step.step_name, "Step produced no results to register");
            }
        }
        Ok(())
    }

    async fn load_config(&self, step: &WorkflowStep) -> EngineResult<Option<ApiConfig>> {
        let Some(config_id) = step.config_id else {
            tracing::warn!(step = %step.step_name, "Step skipped: no API configuration");
            return Ok(None);
        };
        match self.ctx.store.get_api_config(config_id).await? {
            None => {
                tracing::warn!(step = %step.step_name, config_id, "Step skipped: API configuration not found");
                Ok(None)
            }
            Some(config) if !config.is_enabled() => {
                tracing::warn!(step = %step.step_name, api_code = %config.api_code, "Step skipped: API configuration disabled");
                Ok(None)
            }
            Some(config) => Ok(Some(config)),
        }
    }

    /// Configuration defaults, then step parameters, then task overrides.
    fn merge_params(&self, step: &WorkflowStep, config: &ApiConfig) -> EngineResult<Map<String, Value>> {
        let mut merged = config.default_params()?;
        merged.extend(step.params());
        merged.extend(self.ctx.task.overrides.clone());
        Ok(merged)
    }

    async fn single(
        &mut self,
        step: &WorkflowStep,
        config: &ApiConfig,
        plan: CombinationPlan,
    ) -> EngineResult<Option<ResultSet>> {
        let params = plan.combinations.into_iter().next().unwrap_or_default();
        let scope = CallScope {
            log_name: self.ctx.step_log_name(&step.step_name, None),
            step: Some(step.step_name.as_str()),
            step_order: Some(step.step_order),
            combo: None,
            table: step.table_name(),
        };
        let outcome = execute_one(self.ctx, config, &params, &scope).await?;
        self.count(&outcome);
        Ok(outcome.results)
    }

    async fn fan_out(
        &mut self,
        step: &WorkflowStep,
        config: &ApiConfig,
        plan: CombinationPlan,
    ) -> EngineResult<Option<ResultSet>> {
        let started = Instant::now();
        let total = plan.len();
        tracing::info!(step = %step.step_name, combinations = total, "Fanning out step");

        let loop_params: Map<String, Value> = plan
            .loop_sets()
            .map(|set| {
                (
                    set.name.clone(),
                    json!({
                        "type": set.directive.kind(),
                        "source": set.directive.source(),
                        "value_count": set.values.len(),
                    }),
                )
            })
            .collect();

        let mut tally = FanOutTally::default();
        let mut collected = Vec::new();
        for (index, params) in plan.combinations.iter().enumerate() {
            let combo = index + 1;
            let scope = CallScope {
                log_name: self.ctx.step_log_name(&step.step_name, Some(combo)),
                step: Some(step.step_name.as_str()),
                step_order: Some(step.step_order),
                combo: Some(combo),
                table: step.table_name(),
            };
            let outcome = execute_one(self.ctx, config, params, &scope).await?;
            self.count(&outcome);
            tally.record(combo, params, &outcome);
            if let Some(set) = outcome.results {
                if !set.is_empty() {
                    collected.push(set);
                }
            }
        }

        let mut summary = json!({
            "type": "loop_summary",
            "total_combinations": total,
            "success_count": tally.success_count,
            "fail_count": tally.fail_count,
            "skip_count": tally.skip_count,
            "total_records": tally.total_records,
            "loop_params": loop_params,
            "execution_details": tally.execution_details,
        });
        if tally.total_records == 0 {
            summary["warning"] = Value::String("no data fetched by any combination".to_string());
        }

        let mut log = self
            .ctx
            .new_log(format!("{}[{}][fan-out summary]", self.ctx.task.task_name, step.step_name), config);
        log.record_count = i32::try_from(tally.total_records).unwrap_or(i32::MAX);
        if tally.fail_count > 0 {
            log.status = STATUS_FAILED.to_string();
            log.error_message = Some(format!(
                "{} of {} combinations failed",
                tally.fail_count, total
            ));
        }
        log.summary = Some(summary);
        log.duration = whole_seconds(started.elapsed());
        self.ctx.store.insert_log(&log).await?;

        tracing::info!(
            step = %step.step_name,
            total,
            success = tally.success_count,
            failed = tally.fail_count,
            records = tally.total_records,
            "Fan-out finished"
        );

        if collected.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResultSet::merge(collected)))
    }

    fn count(&mut self, outcome: &CallOutcome) {
        self.stats.calls += 1;
        self.stats.records += outcome.record_count;
        if outcome.status == CallStatus::Failed {
            self.stats.failed_calls += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::STATUS_OK;
    use crate::testing::{api_config, context, step, workflow, MemoryStore, MockProvider, TestEnv};
    use serde_json::json;

    fn env_with(provider: MockProvider, store: MemoryStore) -> TestEnv {
        TestEnv::with_store(provider, store)
    }

    #[tokio::test]
    async fn test_fan_out_over_previous_step() {
        let provider = MockProvider::new()
            .respond("stock_basic", json!([{"code": "X"}, {"code": "Y"}]))
            .respond_when("daily", json!({"ts_code": "X"}), json!([{"ts_code": "X", "close": 1.0}]))
            .respond_when("daily", json!({"ts_code": "Y"}), json!([{"ts_code": "Y", "close": 2.0}]));
        let store = MemoryStore::new()
            .with_config(api_config(1, "stock_basic"))
            .with_config(api_config(2, "daily"))
            .with_workflow(workflow(10))
            .with_step(step(10, 1, "A", 1, None))
            .with_step(step(10, 2, "B", 2, Some(r#"{"ts_code": "${A.code}"}"#)).fan_out_mode());
        let env = env_with(provider, store);
        let ctx = context(&env, |_| {});

        let mut orchestrator = WorkflowOrchestrator::new(&ctx);
        orchestrator.run_step(&env.store.steps()[0]).await.unwrap();
        orchestrator.run_step(&env.store.steps()[1]).await.unwrap();

        let daily_calls: Vec<_> = env
            .provider
            .calls()
            .into_iter()
            .filter(|(code, _)| code == "daily")
            .collect();
        assert_eq!(daily_calls.len(), 2);
        assert_eq!(daily_calls[0].1["ts_code"], json!("X"));
        assert_eq!(daily_calls[1].1["ts_code"], json!("Y"));

        let merged = orchestrator.previous().step("B").unwrap();
        assert_eq!(merged.len(), 2);

        let names: Vec<_> = env.store.logs().into_iter().map(|l| l.task_name).collect();
        assert_eq!(names, vec!["t[A]", "t[B][combo1]", "t[B][combo2]", "t[B][fan-out summary]"]);
    }

    #[tokio::test]
    async fn test_condition_not_satisfied_skips_silently() {
        let provider = MockProvider::new()
            .respond("stock_basic", json!([{"status": "1"}]))
            .respond("daily", json!([{"close": 1.0}]));
        let mut gated = step(10, 2, "B", 2, None);
        gated.condition_expr = Some(r#"{"field": "A.status", "operator": "eq", "value": "0"}"#.to_string());
        let store = MemoryStore::new()
            .with_config(api_config(1, "stock_basic"))
            .with_config(api_config(2, "daily"))
            .with_workflow(workflow(10))
            .with_step(step(10, 1, "A", 1, None))
            .with_step(gated);
        let env = env_with(provider, store);
        let ctx = context(&env, |_| {});

        let stats = WorkflowOrchestrator::new(&ctx).run(10).await.unwrap();
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.skipped, 1);
        assert!(env.provider.calls().iter().all(|(code, _)| code != "daily"));
        assert_eq!(env.store.logs().len(), 1);
    }

    #[tokio::test]
    async fn test_one_failed_combination_of_three() {
        let provider = MockProvider::new()
            .respond("trade_cal", json!([{"d": "20240101"}, {"d": "20240102"}, {"d": "20240103"}]))
            .fail_when("daily", json!({"trade_date": "20240102"}), "server busy")
            .respond("daily", json!([{"close": 1.0}]));
        let store = MemoryStore::new()
            .with_config(api_config(1, "trade_cal"))
            .with_config(api_config(2, "daily"))
            .with_workflow(workflow(10))
            .with_step(step(10, 1, "cal", 1, None))
            .with_step(step(
                10,
                2,
                "bars",
                2,
                Some(r#"{"trade_date": {"type": "loop", "source": "cal.d"}}"#),
            ));
        let env = env_with(provider, store);
        let ctx = context(&env, |_| {});

        let stats = WorkflowOrchestrator::new(&ctx).run(10).await.unwrap();
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(env.provider.calls().len(), 4);

        let logs = env.store.logs();
        let summary_log = logs.last().unwrap();
        assert_eq!(summary_log.task_name, "t[bars][fan-out summary]");
        assert_eq!(summary_log.status, STATUS_FAILED);
        let summary = summary_log.summary.as_ref().unwrap();
        assert_eq!(summary["type"], json!("loop_summary"));
        assert_eq!(summary["total_combinations"], json!(3));
        assert_eq!(summary["success_count"], json!(2));
        assert_eq!(summary["fail_count"], json!(1));
        assert_eq!(summary["loop_params"]["trade_date"]["value_count"], json!(3));
        assert_eq!(summary["execution_details"].as_array().unwrap().len(), 3);

        let failed: Vec<_> = logs.iter().filter(|l| l.status == STATUS_FAILED).collect();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].task_name, "t[bars][combo2]");
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_later_steps() {
        let provider = MockProvider::new()
            .fail("stock_basic", "timeout")
            .respond("daily", json!([{"close": 1.0}]));
        let store = MemoryStore::new()
            .with_config(api_config(1, "stock_basic"))
            .with_config(api_config(2, "daily"))
            .with_workflow(workflow(10))
            .with_step(step(10, 1, "A", 1, None))
            .with_step(step(10, 2, "B", 2, Some(r#"{"trade_date": "20240102"}"#)));
        let env = env_with(provider, store);
        let ctx = context(&env, |_| {});

        let stats = WorkflowOrchestrator::new(&ctx).run(10).await.unwrap();
        assert_eq!(stats.executed, 2);
        let logs = env.store.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].task_name, "t[A]");
        assert_eq!(logs[0].status, STATUS_FAILED);
        assert_eq!(logs[1].status, STATUS_OK);
    }

    #[tokio::test]
    async fn test_gated_steps_are_passed_over() {
        let mut disabled = step(10, 2, "off", 2, None);
        disabled.status = Some("1".to_string());
        let mut start = step(10, 0, "start", 1, None);
        start.node_type = Some("start".to_string());
        let mut disabled_config = api_config(3, "moneyflow");
        disabled_config.status = Some("1".to_string());
        let store = MemoryStore::new()
            .with_config(api_config(1, "stock_basic"))
            .with_config(disabled_config)
            .with_workflow(workflow(10))
            .with_step(start)
            .with_step(disabled)
            .with_step(step(10, 3, "no_config", 99, None))
            .with_step(step(10, 4, "disabled_config", 3, None));
        let env = env_with(MockProvider::new(), store);
        let ctx = context(&env, |_| {});

        let stats = WorkflowOrchestrator::new(&ctx).run(10).await.unwrap();
        assert_eq!(stats.executed, 0);
        assert_eq!(stats.skipped, 2);
        assert!(env.provider.calls().is_empty());
        assert!(env.store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_missing_variable_skips_step() {
        let store = MemoryStore::new()
            .with_config(api_config(2, "daily"))
            .with_workflow(workflow(10))
            .with_step(step(10, 1, "B", 2, Some(r#"{"ts_code": "${A.code}"}"#)));
        let env = env_with(MockProvider::new(), store);
        let ctx = context(&env, |_| {});

        let stats = WorkflowOrchestrator::new(&ctx).run(10).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(env.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_task_overrides_win() {
        let mut config = api_config(1, "daily");
        config.api_params = Some(r#"{"trade_date": "20200101", "limit": 10}"#.to_string());
        let store = MemoryStore::new()
            .with_config(config)
            .with_workflow(workflow(10))
            .with_step(step(10, 1, "A", 1, Some(r#"{"trade_date": "20210101", "limit": 20}"#)));
        let env = env_with(MockProvider::new().respond("daily", json!([{"close": 1.0}])), store);
        let ctx = context(&env, |t| {
            t.overrides = json!({"trade_date": "20240520"}).as_object().unwrap().clone();
        });

        WorkflowOrchestrator::new(&ctx).run(10).await.unwrap();
        let calls = env.provider.calls();
        assert_eq!(calls[0].1["trade_date"], json!("20240520"));
        assert_eq!(calls[0].1["limit"], json!(20));
    }

    #[tokio::test]
    async fn test_missing_workflow_is_an_error() {
        let env = env_with(MockProvider::new(), MemoryStore::new());
        let ctx = context(&env, |_| {});
        let err = WorkflowOrchestrator::new(&ctx).run(42).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fan_out_without_data_warns_in_summary() {
        let store = MemoryStore::new()
            .with_config(api_config(2, "daily"))
            .with_workflow(workflow(10))
            .with_step(step(10, 1, "B", 2, Some(r#"{"trade_date": "today"}"#)).fan_out_mode());
        let env = env_with(MockProvider::new().respond("daily", json!([])), store);
        let ctx = context(&env, |_| {});

        WorkflowOrchestrator::new(&ctx).run(10).await.unwrap();
        let logs = env.store.logs();
        assert_eq!(logs.len(), 2);
        let summary = logs[1].summary.as_ref().unwrap();
        assert!(summary.get("warning").is_some());
        assert_eq!(logs[1].status, STATUS_OK);
        assert_eq!(env.provider.calls()[0].1["trade_date"], json!("20240520"));
    }

    #[tokio::test]
    async fn test_fan_out_step_without_params_is_skipped() {
        let store = MemoryStore::new()
            .with_config(api_config(2, "daily"))
            .with_workflow(workflow(10))
            .with_step(step(10, 1, "B", 2, None).fan_out_mode());
        let env = env_with(MockProvider::new().respond("daily", json!([{"close": 1.0}])), store);
        let ctx = context(&env, |_| {});

        let stats = WorkflowOrchestrator::new(&ctx).run(10).await.unwrap();
        assert_eq!(stats.executed, 0);
        assert_eq!(stats.skipped, 1);
        assert!(env.provider.calls().is_empty());
        assert!(env.store.logs().is_empty());
    }
}
