//! Test doubles for the provider, store and table backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::config::{Dialect, EngineConfig};
use crate::db::models::{ApiConfig, DownloadTask, NewDownloadLog, WorkflowConfig, WorkflowStep};
use crate::db::{InsertBatch, Store, TableBackend};
use crate::engine::context::{RunContext, TaskSnapshot};
use crate::engine::output::SaveFormat;
use crate::engine::result_set::{ColumnType, ResultSet, Row};
use crate::engine::runner::TaskRunner;
use crate::engine::schema::SchemaManager;
use crate::error::{EngineResult, ProviderError};
use crate::provider::{Provider, ProviderFactory};

enum Reply {
    Rows(Value),
    Fail(String),
}

struct Rule {
    code: String,
    when: Option<Map<String, Value>>,
    reply: Reply,
}

impl Rule {
    fn matches(&self, code: &str, params: &Map<String, Value>) -> bool {
        self.code == code
            && self
                .when
                .as_ref()
                .map_or(true, |when| when.iter().all(|(k, v)| params.get(k) == Some(v)))
    }
}

/// Scripted provider. Conditional rules win over unconditional ones;
/// within each group the first registered match wins.
#[derive(Default)]
pub struct MockProvider {
    rules: Vec<Rule>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to `code` with `rows` (a JSON array of objects).
    pub fn respond(self, code: &str, rows: Value) -> Self {
        self.rule(code, None, Reply::Rows(rows))
    }

    /// Answer calls to `code` whose params contain `when`.
    pub fn respond_when(self, code: &str, when: Value, rows: Value) -> Self {
        self.rule(code, when.as_object().cloned(), Reply::Rows(rows))
    }

    /// Fail every call to `code`.
    pub fn fail(self, code: &str, msg: &str) -> Self {
        self.rule(code, None, Reply::Fail(msg.to_string()))
    }

    /// Fail calls to `code` whose params contain `when`.
    pub fn fail_when(self, code: &str, when: Value, msg: &str) -> Self {
        self.rule(code, when.as_object().cloned(), Reply::Fail(msg.to_string()))
    }

    fn rule(mut self, code: &str, when: Option<Map<String, Value>>, reply: Reply) -> Self {
        self.rules.push(Rule {
            code: code.to_string(),
            when,
            reply,
        });
        self
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn call(&self, api_code: &str, params: &Map<String, Value>) -> Result<ResultSet, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((api_code.to_string(), params.clone()));

        let rule = self
            .rules
            .iter()
            .filter(|r| r.when.is_some())
            .chain(self.rules.iter().filter(|r| r.when.is_none()))
            .find(|r| r.matches(api_code, params));

        match rule.map(|r| &r.reply) {
            Some(Reply::Rows(rows)) => {
                let rows: Vec<Row> = rows
                    .as_array()
                    .map(|items| items.iter().filter_map(|r| r.as_object().cloned()).collect())
                    .unwrap_or_default();
                Ok(ResultSet::from_rows(rows))
            }
            Some(Reply::Fail(msg)) => Err(ProviderError::Api {
                code: -1,
                msg: msg.clone(),
            }),
            None => Err(ProviderError::Api {
                code: -1,
                msg: format!("no scripted response for {}", api_code),
            }),
        }
    }
}

struct MockProviderFactory(Arc<MockProvider>);

#[async_trait]
impl ProviderFactory for MockProviderFactory {
    async fn open(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        Ok(self.0.clone())
    }
}

/// In-memory bookkeeping store.
#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<BTreeMap<i64, DownloadTask>>,
    configs: BTreeMap<i64, ApiConfig>,
    workflows: BTreeMap<i64, WorkflowConfig>,
    steps: Vec<WorkflowStep>,
    logs: Mutex<Vec<NewDownloadLog>>,
    runs: Mutex<Vec<(i64, bool)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(self, task: DownloadTask) -> Self {
        self.tasks.lock().unwrap().insert(task.task_id, task);
        self
    }

    pub fn with_config(mut self, config: ApiConfig) -> Self {
        self.configs.insert(config.config_id, config);
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowConfig) -> Self {
        self.workflows.insert(workflow.workflow_id, workflow);
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> Vec<WorkflowStep> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| (s.step_order, s.step_id));
        steps
    }

    pub fn logs(&self) -> Vec<NewDownloadLog> {
        self.logs.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<(i64, bool)> {
        self.runs.lock().unwrap().clone()
    }

    pub fn task(&self, task_id: i64) -> Option<DownloadTask> {
        self.tasks.lock().unwrap().get(&task_id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_task(&self, task_id: i64) -> EngineResult<Option<DownloadTask>> {
        Ok(self.task(task_id))
    }

    async fn get_api_config(&self, config_id: i64) -> EngineResult<Option<ApiConfig>> {
        Ok(self.configs.get(&config_id).cloned())
    }

    async fn get_workflow(&self, workflow_id: i64) -> EngineResult<Option<WorkflowConfig>> {
        Ok(self.workflows.get(&workflow_id).cloned())
    }

    async fn list_workflow_steps(&self, workflow_id: i64) -> EngineResult<Vec<WorkflowStep>> {
        Ok(self
            .steps()
            .into_iter()
            .filter(|s| s.workflow_id == workflow_id)
            .collect())
    }

    async fn insert_log(&self, log: &NewDownloadLog) -> EngineResult<i64> {
        let mut logs = self.logs.lock().unwrap();
        logs.push(log.clone());
        Ok(logs.len() as i64)
    }

    async fn record_run(&self, task_id: i64, succeeded: bool, at: DateTime<Utc>) -> EngineResult<()> {
        self.runs.lock().unwrap().push((task_id, succeeded));
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&task_id) {
            task.run_count = Some(task.run_count.unwrap_or(0) + 1);
            if succeeded {
                task.success_count = Some(task.success_count.unwrap_or(0) + 1);
            } else {
                task.fail_count = Some(task.fail_count.unwrap_or(0) + 1);
            }
            task.last_run_time = Some(at);
        }
        Ok(())
    }
}

/// Table backend that records statements instead of executing them.
#[derive(Default)]
pub struct RecordingBackend {
    existing: Mutex<HashMap<String, Vec<(String, ColumnType)>>>,
    statements: Mutex<Vec<String>>,
    checks: AtomicUsize,
    inserts: Mutex<Vec<Vec<InsertBatch>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: &str, columns: &[(&str, ColumnType)]) -> Self {
        let columns = columns.iter().map(|(name, ty)| (name.to_string(), *ty)).collect();
        self.existing.lock().unwrap().insert(table.to_string(), columns);
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn existence_checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> Vec<Vec<InsertBatch>> {
        self.inserts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TableBackend for RecordingBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgresql
    }

    async fn table_exists(&self, table: &str) -> EngineResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.existing.lock().unwrap().contains_key(table))
    }

    async fn table_columns(&self, table: &str) -> EngineResult<Vec<(String, ColumnType)>> {
        Ok(self.existing.lock().unwrap().get(table).cloned().unwrap_or_default())
    }

    async fn execute_batch(&self, statements: &[String]) -> EngineResult<()> {
        self.statements.lock().unwrap().extend(statements.iter().cloned());
        Ok(())
    }

    async fn insert_batches(&self, batches: &[InsertBatch]) -> EngineResult<u64> {
        self.inserts.lock().unwrap().push(batches.to_vec());
        Ok(batches.iter().map(|b| b.rows as u64).sum())
    }
}

/// Wiring shared by engine tests.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub tables: Arc<RecordingBackend>,
    pub provider: Arc<MockProvider>,
    pub schema: Arc<SchemaManager>,
}

impl TestEnv {
    pub fn new(provider: MockProvider) -> Self {
        Self::with_store(provider, MemoryStore::new())
    }

    pub fn with_store(provider: MockProvider, store: MemoryStore) -> Self {
        Self {
            store: Arc::new(store),
            tables: Arc::new(RecordingBackend::new()),
            provider: Arc::new(provider),
            schema: Arc::new(SchemaManager::new(1000)),
        }
    }

    pub fn runner(&self) -> TaskRunner {
        TaskRunner::new(
            self.store.clone(),
            self.tables.clone(),
            self.schema.clone(),
            Arc::new(MockProviderFactory(self.provider.clone())),
            EngineConfig::default(),
        )
    }
}

/// Base date of [`context`].
pub fn test_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
}

/// A run context for task 1 ("t") on 2024-05-20 with no outputs enabled.
pub fn context(env: &TestEnv, adjust: impl FnOnce(&mut TaskSnapshot)) -> RunContext {
    let mut task = TaskSnapshot {
        task_id: 1,
        task_name: "t".to_string(),
        config_id: 1,
        workflow_id: None,
        save_to_db: false,
        save_path: None,
        save_format: SaveFormat::Csv,
        data_table_name: None,
        overrides: Map::new(),
    };
    adjust(&mut task);
    RunContext {
        task,
        download_date: "20240520".to_string(),
        today: test_today(),
        store: env.store.clone(),
        tables: env.tables.clone(),
        schema: env.schema.clone(),
        provider: env.provider.clone(),
    }
}

pub fn api_config(config_id: i64, api_code: &str) -> ApiConfig {
    ApiConfig {
        config_id,
        api_name: format!("{} api", api_code),
        api_code: api_code.to_string(),
        api_desc: None,
        api_params: None,
        data_fields: None,
        status: Some("0".to_string()),
        create_time: None,
    }
}

pub fn download_task(task_id: i64, task_name: &str) -> DownloadTask {
    DownloadTask {
        task_id,
        task_name: task_name.to_string(),
        config_id: None,
        workflow_id: None,
        cron_expression: None,
        start_date: None,
        end_date: None,
        task_params: None,
        save_path: None,
        save_format: None,
        save_to_db: None,
        data_table_name: None,
        status: Some("0".to_string()),
        last_run_time: None,
        run_count: Some(0),
        success_count: Some(0),
        fail_count: Some(0),
    }
}

pub fn workflow(workflow_id: i64) -> WorkflowConfig {
    WorkflowConfig {
        workflow_id,
        workflow_name: format!("workflow {}", workflow_id),
        workflow_desc: None,
        status: Some("0".to_string()),
        create_time: None,
    }
}

/// An enabled task step, non-fan-out.
pub fn step(workflow_id: i64, step_id: i64, name: &str, config_id: i64, params: Option<&str>) -> WorkflowStep {
    WorkflowStep {
        step_id,
        workflow_id,
        step_order: step_id as i32,
        step_name: name.to_string(),
        config_id: Some(config_id),
        step_params: params.map(str::to_string),
        condition_expr: None,
        loop_mode: Some("0".to_string()),
        data_table_name: None,
        node_type: Some("task".to_string()),
        status: Some("0".to_string()),
    }
}

impl WorkflowStep {
    pub fn fan_out_mode(mut self) -> Self {
        self.loop_mode = Some("1".to_string());
        self
    }
}
