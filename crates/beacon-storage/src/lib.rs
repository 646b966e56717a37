//! Beacon Storage crate - SQLite persistence for rules and execution records.
//!
//! Provides a WAL-mode SQLite database with migrations, a rule repository
//! keyed by rule id and an append-only execution log indexed by
//! `(rule_id, executed_at)` for rolling-window queries.

pub mod db;
pub mod executions;
pub mod migrations;
pub mod rules;

pub use db::Database;
pub use executions::{ExecutionFilters, ExecutionRepository};
pub use rules::RuleRepository;
