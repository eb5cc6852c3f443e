//! Tushare ingestion engine.
//!
//! Executes download tasks against the Tushare Pro API: either a single
//! configured API call or a multi-step workflow whose steps feed values
//! into later steps, fanning out one call per parameter combination.
//! Results are persisted to auto-created tables and/or output files, and
//! every call is recorded as a download log.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod provider;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DatabaseConfig, Dialect, EngineConfig};
pub use engine::{Dispatcher, RunReport, TaskRunner};
pub use error::{EngineError, EngineResult, ProviderError};
