//! Dispatching task runs onto independent workers.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::runner::{RunReport, TaskRunner};
use super::schema::SchemaManager;
use crate::config::{DatabaseConfig, Dialect, EngineConfig};
use crate::db::{create_session_pool, PgStore, PgTableBackend};
use crate::error::{EngineError, EngineResult};
use crate::provider::TushareProviderFactory;

/// Spawns task runs, each on its own tokio task with its own database
/// session.
///
/// Runs of the same task id are not serialized against each other.
pub struct Dispatcher {
    database: DatabaseConfig,
    engine: EngineConfig,
    schema: Arc<SchemaManager>,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// Dynamic tables are written through the PostgreSQL backend, so a
    /// MySQL dialect is rejected here rather than at the first insert.
    pub fn new(database: DatabaseConfig, engine: EngineConfig) -> EngineResult<Self> {
        if engine.db_type != Dialect::Postgresql {
            return Err(EngineError::Config(format!(
                "TUSHARE_DB_TYPE={} is not supported by the worker backend",
                engine.db_type
            )));
        }
        let schema = Arc::new(SchemaManager::new(engine.insert_chunk_size));
        let semaphore = Arc::new(Semaphore::new(engine.max_concurrent_runs.max(1)));
        Ok(Self {
            database,
            engine,
            schema,
            semaphore,
        })
    }

    /// Start one run without waiting for it.
    pub fn spawn(&self, task_id: i64, download_date: Option<String>) -> JoinHandle<EngineResult<RunReport>> {
        let database = self.database.clone();
        let engine = self.engine.clone();
        let schema = self.schema.clone();
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| EngineError::Internal(e.to_string()))?;

            let pool = create_session_pool(&database).await?;
            let runner = TaskRunner::new(
                Arc::new(PgStore::new(pool.clone())),
                Arc::new(PgTableBackend::new(pool.clone())),
                schema,
                Arc::new(TushareProviderFactory::new(engine.clone())),
                engine,
            );
            let result = runner.run(task_id, download_date).await;
            pool.close().await;
            tracing::debug!(task_id, "Run session closed");
            result
        })
    }

    /// Run every task and wait for all of them.
    ///
    /// Results are returned in the order of `task_ids`.
    pub async fn run_all(&self, task_ids: &[i64], download_date: Option<String>) -> Vec<EngineResult<RunReport>> {
        let handles: Vec<_> = task_ids
            .iter()
            .map(|&task_id| self.spawn(task_id, download_date.clone()))
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|e| Err(EngineError::from(e))));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_is_rejected() {
        let engine = EngineConfig {
            db_type: Dialect::Mysql,
            ..EngineConfig::default()
        };
        let err = Dispatcher::new(DatabaseConfig::default(), engine).err().unwrap();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains("mysql"));
    }

    #[test]
    fn test_concurrency_bound_is_at_least_one() {
        let engine = EngineConfig {
            max_concurrent_runs: 0,
            ..EngineConfig::default()
        };
        let dispatcher = Dispatcher::new(DatabaseConfig::default(), engine).unwrap();
        assert_eq!(dispatcher.semaphore.available_permits(), 1);
    }
}
