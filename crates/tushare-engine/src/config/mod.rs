//! Configuration module for the Tushare engine.
//!
//! This module provides configuration loading from environment variables
//! using the `envy` crate for type-safe environment variable parsing.

mod database;
mod engine;

pub use database::DatabaseConfig;
pub use engine::{Dialect, EngineConfig};
