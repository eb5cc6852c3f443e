//! Database queries for the bookkeeping tables.
//!
//! Only the reads and writes the execution engine needs live here; the
//! CRUD surface for managing these records belongs to the admin service.

pub mod api_config;
pub mod download_log;
pub mod task;
pub mod workflow;
