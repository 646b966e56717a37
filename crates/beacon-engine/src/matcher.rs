//! Rule matching.
//!
//! Pure functions over a rule set and one event snapshot: activity,
//! instance scope, performer scope, then trigger conditions.

use std::collections::BTreeSet;
use std::fmt;

use beacon_core::{ActionRule, Trigger, TriggerEvent};

/// Evaluates trigger kinds that depend on data the engine does not own:
/// schedules, geofences and contact groups.
pub trait ConditionOracle: Send + Sync {
    fn schedule_due(&self, schedule: &str, timezone: Option<&str>, event: &TriggerEvent) -> bool;

    fn within_geofence(
        &self,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
        event: &TriggerEvent,
    ) -> bool;

    fn sender_in_groups(&self, sender_jid: &str, group_ids: &BTreeSet<String>) -> bool;
}

/// Oracle for deployments without scheduling, geofencing or group data.
/// Rules using those triggers never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

impl ConditionOracle for NoOracle {
    fn schedule_due(&self, _: &str, _: Option<&str>, _: &TriggerEvent) -> bool {
        false
    }

    fn within_geofence(&self, _: f64, _: f64, _: f64, _: &TriggerEvent) -> bool {
        false
    }

    fn sender_in_groups(&self, _: &str, _: &BTreeSet<String>) -> bool {
        false
    }
}

/// Why a rule did not match an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Inactive,
    InstanceScope,
    Performer,
    Condition,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::Inactive => write!(f, "rule is inactive"),
            MissReason::InstanceScope => write!(f, "instance is outside the rule's scope"),
            MissReason::Performer => write!(f, "event author is excluded by the performer filter"),
            MissReason::Condition => write!(f, "trigger conditions not met"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVerdict {
    Match,
    Miss(MissReason),
}

impl MatchVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchVerdict::Match)
    }
}

/// Evaluate one rule against an event.
pub fn evaluate(rule: &ActionRule, event: &TriggerEvent, oracle: &dyn ConditionOracle) -> MatchVerdict {
    if !rule.is_active {
        return MatchVerdict::Miss(MissReason::Inactive);
    }
    if !rule.instance_filter.admits(&event.instance_id) {
        return MatchVerdict::Miss(MissReason::InstanceScope);
    }
    if !rule.performer_filter.admits(event.is_from_account_owner) {
        return MatchVerdict::Miss(MissReason::Performer);
    }
    if !conditions_met(&rule.trigger, event, oracle) {
        return MatchVerdict::Miss(MissReason::Condition);
    }
    MatchVerdict::Match
}

/// Trigger-type specific condition check.
pub fn conditions_met(trigger: &Trigger, event: &TriggerEvent, oracle: &dyn ConditionOracle) -> bool {
    match trigger {
        Trigger::Reaction { emojis } => event
            .reaction_emoji
            .as_deref()
            .map(str::trim)
            .is_some_and(|emoji| emojis.iter().any(|e| e.trim() == emoji)),
        Trigger::Hashtag { tags } => tags.iter().any(|tag| event.has_hashtag(tag)),
        Trigger::Keyword { words } => {
            let content = event.content.to_lowercase();
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .any(|w| !w.is_empty() && content.contains(&w))
        }
        Trigger::TimeBased { schedule, timezone } => {
            oracle.schedule_due(schedule, timezone.as_deref(), event)
        }
        Trigger::Location {
            latitude,
            longitude,
            radius_meters,
        } => oracle.within_geofence(*latitude, *longitude, *radius_meters, event),
        Trigger::ContactGroup { group_ids } => oracle.sender_in_groups(&event.sender_jid, group_ids),
    }
}

/// The rules that match `event`, in input order.
pub fn match_rules<'a>(
    event: &TriggerEvent,
    rules: &'a [ActionRule],
    oracle: &dyn ConditionOracle,
) -> Vec<&'a ActionRule> {
    rules
        .iter()
        .filter(|rule| evaluate(rule, event, oracle).is_match())
        .collect()
}
