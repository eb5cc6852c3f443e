//! Database module for the Tushare engine.
//!
//! This module provides database connectivity, the bookkeeping models and
//! queries, and the two seams the engine talks through: [`Store`] for
//! task/config/log records and [`TableBackend`] for dynamic data tables.

pub mod models;
pub mod pool;
pub mod queries;
pub mod store;
pub mod tables;

pub use pool::{create_pool, create_session_pool, health_check, DbPool};
pub use store::{PgStore, Store};
pub use tables::{InsertBatch, PgTableBackend, SqlValue, TableBackend};
