//! Engine configuration: provider access, SQL dialect and run limits.

use std::fmt;

use serde::Deserialize;

/// SQL dialect of the store holding the dynamic data tables.
///
/// Only identifier quoting and column type mapping depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    #[serde(alias = "postgres", alias = "pg")]
    Postgresql,
    Mysql,
}

impl Dialect {
    /// Quote an already validated identifier.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::Postgresql => format!("\"{}\"", ident),
            Dialect::Mysql => format!("`{}`", ident),
        }
    }

    /// Positional bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgresql => format!("${}", index),
            Dialect::Mysql => "?".to_string(),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgresql => write!(f, "postgresql"),
            Dialect::Mysql => write!(f, "mysql"),
        }
    }
}

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `TUSHARE_`:
/// - `TUSHARE_TOKEN`: Provider auth token
/// - `TUSHARE_API_URL`: Provider endpoint (default: "http://api.tushare.pro")
/// - `TUSHARE_DB_TYPE`: `postgresql` or `mysql` (default: postgresql)
/// - `TUSHARE_TIMEOUT_SECS`: Provider HTTP timeout (default: 30)
/// - `TUSHARE_MAX_CONCURRENT_RUNS`: Parallel task runs per worker (default: 4)
/// - `TUSHARE_ERROR_MESSAGE_LIMIT`: Cap for stored failure reports (default: 5000)
/// - `TUSHARE_INSERT_CHUNK_SIZE`: Rows per insert statement batch (default: 1000)
#[derive(Clone, Deserialize)]
pub struct EngineConfig {
    /// Provider auth token
    #[serde(default)]
    pub token: String,

    /// Provider endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Dialect for dynamic tables
    #[serde(default)]
    pub db_type: Dialect,

    /// Provider HTTP timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum task runs executing at once in one worker
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Maximum stored length of a run failure report, in characters
    #[serde(default = "default_error_message_limit")]
    pub error_message_limit: usize,

    /// Rows bound per insert batch
    #[serde(default = "default_insert_chunk_size")]
    pub insert_chunk_size: usize,
}

fn default_api_url() -> String {
    "http://api.tushare.pro".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_error_message_limit() -> usize {
    5000
}

fn default_insert_chunk_size() -> usize {
    1000
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `TUSHARE_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("TUSHARE_").from_env::<EngineConfig>()
    }

    /// Default target table for an API code when none is configured.
    pub fn default_table_name(api_code: &str) -> String {
        format!("tushare_{}", api_code)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: default_api_url(),
            db_type: Dialect::default(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_runs: default_max_concurrent_runs(),
            error_message_limit: default_error_message_limit(),
            insert_chunk_size: default_insert_chunk_size(),
        }
    }
}

// Keeps the token out of logs.
impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("token", &if self.token.is_empty() { "" } else { "[REDACTED]" })
            .field("api_url", &self.api_url)
            .field("db_type", &self.db_type)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_concurrent_runs", &self.max_concurrent_runs)
            .field("error_message_limit", &self.error_message_limit)
            .field("insert_chunk_size", &self.insert_chunk_size)
            .finish()
    }
}
