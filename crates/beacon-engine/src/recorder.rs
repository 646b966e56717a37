//! Seams between the engine and persistence.
//!
//! The engine reads rules and writes execution records through these
//! traits; the SQLite repositories implement them.

use chrono::{DateTime, Utc};

use beacon_core::error::BeaconError;
use beacon_core::{ActionRule, ExecutionRecord, RuleId};
use beacon_storage::{ExecutionRepository, RuleRepository};

/// Where the engine gets its rules.
pub trait RuleSource: Send + Sync {
    /// Active rules whose instance scope admits `instance_id`, in a stable
    /// order.
    fn active_rules_for_instance(&self, instance_id: &str) -> Result<Vec<ActionRule>, BeaconError>;

    /// Persist an admission: bump the rule's counter and advance its
    /// `last_executed_at`.
    fn record_admission(&self, rule_id: RuleId, at: DateTime<Utc>) -> Result<(), BeaconError>;
}

/// Append-only execution log.
pub trait ExecutionRecorder: Send + Sync {
    fn record(&self, record: &ExecutionRecord) -> Result<(), BeaconError>;

    /// Admission times of `rule_id` after `since`, oldest first. Used to
    /// rebuild governor state after a restart.
    fn admitted_since(
        &self,
        rule_id: RuleId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, BeaconError>;
}

impl RuleSource for RuleRepository {
    fn active_rules_for_instance(&self, instance_id: &str) -> Result<Vec<ActionRule>, BeaconError> {
        self.list_active_for_instance(instance_id)
    }

    fn record_admission(&self, rule_id: RuleId, at: DateTime<Utc>) -> Result<(), BeaconError> {
        RuleRepository::record_admission(self, rule_id, at)
    }
}

impl ExecutionRecorder for ExecutionRepository {
    fn record(&self, record: &ExecutionRecord) -> Result<(), BeaconError> {
        self.save(record)
    }

    fn admitted_since(
        &self,
        rule_id: RuleId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, BeaconError> {
        ExecutionRepository::admitted_since(self, rule_id, since)
    }
}
