use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::TriggerEvent;

// =============================================================================
// Identity
// =============================================================================

/// Unique identifier for an action rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RuleId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for an execution record.
///
/// Also handed to executors as the idempotency key of an admitted execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// =============================================================================
// Execution records
// =============================================================================

/// Terminal status of one rule evaluation that reached the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "skipped" => Ok(ExecutionStatus::Skipped),
            _ => Err(format!("Unknown execution status: {}", s)),
        }
    }
}

/// Immutable audit entry, written once per governed rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub rule_id: RuleId,
    /// Message id of the event that triggered the evaluation.
    pub triggered_by: String,
    pub trigger_data: TriggerEvent,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    /// Dispatch attempts used; zero for skipped records.
    #[serde(default)]
    pub attempts: u32,
}

impl ExecutionRecord {
    /// Build a `skipped` record for a rejected admission.
    pub fn skipped(
        rule_id: RuleId,
        event: &TriggerEvent,
        reason: impl Into<String>,
        executed_at: DateTime<Utc>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            rule_id,
            triggered_by: event.message_id.clone(),
            trigger_data: event.clone(),
            status: ExecutionStatus::Skipped,
            result: None,
            error_message: Some(reason.into()),
            executed_at,
            processing_time_ms,
            attempts: 0,
        }
    }

    /// Whether this record counts as an admitted execution.
    pub fn is_admitted(&self) -> bool {
        self.status != ExecutionStatus::Skipped
    }
}

/// Aggregate statistics derived from rules and execution records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_rules: u64,
    pub active_rules: u64,
    /// Admitted executions (success + failed).
    pub total_executions: u64,
    /// Admitted executions within the last 24 hours.
    pub executions_last_24h: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}
