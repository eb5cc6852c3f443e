//! Database models for the Tushare bookkeeping tables.
//!
//! Status columns are `CHAR(1)` flags where `'0'` means enabled (or, on
//! download logs, success).

pub mod api_config;
pub mod download_log;
pub mod task;
pub mod workflow;

pub use api_config::*;
pub use download_log::*;
pub use task::*;
pub use workflow::*;

/// Flag value meaning enabled / success.
pub const STATUS_OK: &str = "0";

/// Flag value meaning disabled / failure.
pub const STATUS_FAILED: &str = "1";

pub(crate) fn flag_is_ok(flag: Option<&str>) -> bool {
    flag.map(str::trim).unwrap_or(STATUS_OK) == STATUS_OK
}
