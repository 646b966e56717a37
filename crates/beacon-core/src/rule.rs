//! Action rules: trigger, action, scoping and rate limits.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::{BeaconError, Result};
use crate::event::normalize_tag;
use crate::types::RuleId;

fn default_true() -> bool {
    true
}

fn default_max_executions_per_day() -> u32 {
    100
}

// =============================================================================
// Trigger
// =============================================================================

/// The kind of occurrence a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Reaction,
    Hashtag,
    Keyword,
    TimeBased,
    Location,
    ContactGroup,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::Reaction => write!(f, "reaction"),
            TriggerType::Hashtag => write!(f, "hashtag"),
            TriggerType::Keyword => write!(f, "keyword"),
            TriggerType::TimeBased => write!(f, "time_based"),
            TriggerType::Location => write!(f, "location"),
            TriggerType::ContactGroup => write!(f, "contact_group"),
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reaction" => Ok(TriggerType::Reaction),
            "hashtag" => Ok(TriggerType::Hashtag),
            "keyword" => Ok(TriggerType::Keyword),
            "time_based" => Ok(TriggerType::TimeBased),
            "location" => Ok(TriggerType::Location),
            "contact_group" => Ok(TriggerType::ContactGroup),
            _ => Err(format!("Unknown trigger type: {}", s)),
        }
    }
}

/// Trigger type paired with its conditions.
///
/// Serialized as `{"trigger_type": "...", "trigger_conditions": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "trigger_type",
    content = "trigger_conditions",
    rename_all = "snake_case"
)]
pub enum Trigger {
    Reaction {
        emojis: BTreeSet<String>,
    },
    Hashtag {
        tags: BTreeSet<String>,
    },
    Keyword {
        words: BTreeSet<String>,
    },
    /// Evaluated by the scheduling collaborator.
    TimeBased {
        schedule: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Evaluated by the geofencing collaborator.
    Location {
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
    },
    /// Evaluated by the group-membership collaborator.
    ContactGroup {
        group_ids: BTreeSet<String>,
    },
}

impl Trigger {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Trigger::Reaction { .. } => TriggerType::Reaction,
            Trigger::Hashtag { .. } => TriggerType::Hashtag,
            Trigger::Keyword { .. } => TriggerType::Keyword,
            Trigger::TimeBased { .. } => TriggerType::TimeBased,
            Trigger::Location { .. } => TriggerType::Location,
            Trigger::ContactGroup { .. } => TriggerType::ContactGroup,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Trigger::Reaction { emojis } => non_empty_set("emojis", emojis),
            Trigger::Hashtag { tags } => {
                non_empty_set("tags", tags)?;
                if tags.iter().any(|t| normalize_tag(t).is_empty()) {
                    return Err(BeaconError::Validation(
                        "trigger_conditions.tags must not contain bare '#'".to_string(),
                    ));
                }
                Ok(())
            }
            Trigger::Keyword { words } => non_empty_set("words", words),
            Trigger::TimeBased { schedule, .. } => {
                if schedule.trim().is_empty() {
                    return Err(BeaconError::Validation(
                        "trigger_conditions.schedule must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            Trigger::Location {
                latitude,
                longitude,
                radius_meters,
            } => {
                if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) {
                    return Err(BeaconError::Validation(
                        "trigger_conditions coordinates are out of range".to_string(),
                    ));
                }
                if !radius_meters.is_finite() || *radius_meters <= 0.0 {
                    return Err(BeaconError::Validation(
                        "trigger_conditions.radius_meters must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Trigger::ContactGroup { group_ids } => non_empty_set("group_ids", group_ids),
        }
    }

    /// Canonical form: hashtags normalized, keywords and emojis trimmed.
    pub fn normalized(self) -> Self {
        let trimmed = |set: BTreeSet<String>| -> BTreeSet<String> {
            set.into_iter().map(|s| s.trim().to_string()).collect()
        };
        match self {
            Trigger::Hashtag { tags } => Trigger::Hashtag {
                tags: tags.iter().map(|t| normalize_tag(t)).collect(),
            },
            Trigger::Keyword { words } => Trigger::Keyword {
                words: trimmed(words),
            },
            Trigger::Reaction { emojis } => Trigger::Reaction {
                emojis: trimmed(emojis),
            },
            other => other,
        }
    }
}

fn non_empty_set(field: &str, set: &BTreeSet<String>) -> Result<()> {
    if set.is_empty() {
        return Err(BeaconError::Validation(format!(
            "trigger_conditions.{} must not be empty",
            field
        )));
    }
    if set.iter().any(|s| s.trim().is_empty()) {
        return Err(BeaconError::Validation(format!(
            "trigger_conditions.{} must not contain blank entries",
            field
        )));
    }
    Ok(())
}

// =============================================================================
// Scoping
// =============================================================================

/// Which authors a rule honors events from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformerFilter {
    UserOnly,
    ContactsOnly,
    #[default]
    Both,
}

impl PerformerFilter {
    pub fn admits(&self, is_from_account_owner: bool) -> bool {
        match self {
            PerformerFilter::Both => true,
            PerformerFilter::UserOnly => is_from_account_owner,
            PerformerFilter::ContactsOnly => !is_from_account_owner,
        }
    }
}

impl fmt::Display for PerformerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformerFilter::UserOnly => write!(f, "user_only"),
            PerformerFilter::ContactsOnly => write!(f, "contacts_only"),
            PerformerFilter::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for PerformerFilter {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user_only" => Ok(PerformerFilter::UserOnly),
            "contacts_only" => Ok(PerformerFilter::ContactsOnly),
            "both" => Ok(PerformerFilter::Both),
            _ => Err(format!("Unknown performer filter: {}", s)),
        }
    }
}

/// Which messaging instances a rule applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "instances", rename_all = "snake_case")]
pub enum InstanceFilter {
    #[default]
    All,
    Include(BTreeSet<String>),
    Exclude(BTreeSet<String>),
}

impl InstanceFilter {
    pub fn admits(&self, instance_id: &str) -> bool {
        match self {
            InstanceFilter::All => true,
            InstanceFilter::Include(set) => set.contains(instance_id),
            InstanceFilter::Exclude(set) => !set.contains(instance_id),
        }
    }

    /// Storage discriminator: `all`, `include` or `exclude`.
    pub fn kind(&self) -> &'static str {
        match self {
            InstanceFilter::All => "all",
            InstanceFilter::Include(_) => "include",
            InstanceFilter::Exclude(_) => "exclude",
        }
    }

    pub fn instances(&self) -> BTreeSet<String> {
        match self {
            InstanceFilter::All => BTreeSet::new(),
            InstanceFilter::Include(set) | InstanceFilter::Exclude(set) => set.clone(),
        }
    }

    /// Inverse of `kind` + `instances`.
    pub fn from_parts(kind: &str, instances: BTreeSet<String>) -> Result<Self> {
        match kind {
            "all" => Ok(InstanceFilter::All),
            "include" => Ok(InstanceFilter::Include(instances)),
            "exclude" => Ok(InstanceFilter::Exclude(instances)),
            other => Err(BeaconError::Validation(format!(
                "Unknown instance filter type: {}",
                other
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            InstanceFilter::Include(set) | InstanceFilter::Exclude(set) if set.is_empty() => {
                Err(BeaconError::Validation(format!(
                    "instance filter '{}' requires at least one instance",
                    self.kind()
                )))
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Rules
// =============================================================================

/// User-supplied rule definition, without identity or counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub trigger: Trigger,
    pub action: Action,
    #[serde(default)]
    pub cooldown_minutes: u32,
    #[serde(default = "default_max_executions_per_day")]
    pub max_executions_per_day: u32,
    #[serde(default)]
    pub performer_filter: PerformerFilter,
    #[serde(default)]
    pub instance_filter: InstanceFilter,
}

impl RuleDraft {
    pub fn new(name: &str, trigger: Trigger, action: Action) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            is_active: true,
            trigger,
            action,
            cooldown_minutes: 0,
            max_executions_per_day: default_max_executions_per_day(),
            performer_filter: PerformerFilter::default(),
            instance_filter: InstanceFilter::default(),
        }
    }

    /// Reject definitions that could never be evaluated correctly.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BeaconError::Validation(
                "name must not be empty".to_string(),
            ));
        }
        if self.max_executions_per_day == 0 {
            return Err(BeaconError::Validation(
                "max_executions_per_day must be at least 1".to_string(),
            ));
        }
        self.trigger.validate()?;
        self.instance_filter.validate()?;
        self.action.validate()
    }
}

/// A persisted automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    pub trigger: Trigger,
    pub action: Action,
    pub cooldown_minutes: u32,
    pub max_executions_per_day: u32,
    pub performer_filter: PerformerFilter,
    pub instance_filter: InstanceFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_executions: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionRule {
    /// Validate a draft and build a fresh rule from it.
    pub fn from_draft(draft: RuleDraft, now: DateTime<Utc>) -> Result<Self> {
        draft.validate()?;
        Ok(Self {
            id: RuleId::new(),
            name: draft.name.trim().to_string(),
            description: draft.description,
            is_active: draft.is_active,
            trigger: draft.trigger.normalized(),
            action: draft.action,
            cooldown_minutes: draft.cooldown_minutes,
            max_executions_per_day: draft.max_executions_per_day,
            performer_filter: draft.performer_filter,
            instance_filter: draft.instance_filter,
            last_executed_at: None,
            total_executions: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the definition, keeping identity and execution counters.
    pub fn apply_draft(&mut self, draft: RuleDraft, now: DateTime<Utc>) -> Result<()> {
        draft.validate()?;
        self.name = draft.name.trim().to_string();
        self.description = draft.description;
        self.is_active = draft.is_active;
        self.trigger = draft.trigger.normalized();
        self.action = draft.action;
        self.cooldown_minutes = draft.cooldown_minutes;
        self.max_executions_per_day = draft.max_executions_per_day;
        self.performer_filter = draft.performer_filter;
        self.instance_filter = draft.instance_filter;
        self.updated_at = now;
        Ok(())
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger.trigger_type()
    }
}
