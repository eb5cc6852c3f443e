//! Execution engine.
//!
//! Resolution (`date_expr`, `params`, `previous`, `combinations`,
//! `condition`), persistence (`schema`, `output`) and execution
//! (`executor`, `orchestrator`, `runner`, `dispatch`).

pub mod combinations;
pub mod condition;
pub mod context;
pub mod date_expr;
pub mod dispatch;
pub mod executor;
pub mod orchestrator;
pub mod output;
pub mod params;
pub mod previous;
pub mod result_set;
pub mod runner;
pub mod schema;

pub use context::{RunContext, TaskSnapshot};
pub use dispatch::Dispatcher;
pub use executor::{execute_one, CallOutcome, CallScope, CallStatus};
pub use orchestrator::{WorkflowOrchestrator, WorkflowStats};
pub use result_set::{ColumnType, ResultSet, Row};
pub use runner::{RunReport, TaskRunner};
pub use schema::SchemaManager;
