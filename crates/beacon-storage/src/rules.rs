//! Rule repository.
//!
//! Trigger conditions, action configs and instance sets are stored as JSON
//! beside their type discriminators, so rows stay queryable by type.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde_json::Value;
use tracing::error;

use beacon_core::error::BeaconError;
use beacon_core::{Action, ActionRule, ActionType, InstanceFilter, RuleId, Trigger};

use crate::db::{datetime_from_millis, Database};

const RULE_COLUMNS: &str = "id, name, description, is_active, trigger_type, trigger_conditions,
     action_type, action_config, cooldown_minutes, max_executions_per_day,
     performer_filter, instance_filter_type, selected_instances,
     last_executed_at, total_executions, created_at, updated_at";

/// Repository for action rules.
pub struct RuleRepository {
    db: Arc<Database>,
}

impl RuleRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new rule.
    pub fn create(&self, rule: &ActionRule) -> Result<(), BeaconError> {
        let row = RuleRow::encode(rule)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO action_rules (id, name, description, is_active, trigger_type,
                    trigger_conditions, action_type, action_config, cooldown_minutes,
                    max_executions_per_day, performer_filter, instance_filter_type,
                    selected_instances, last_executed_at, total_executions, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    rule.id.to_string(),
                    rule.name,
                    rule.description,
                    rule.is_active,
                    row.trigger_type,
                    row.trigger_conditions,
                    row.action_type,
                    row.action_config,
                    rule.cooldown_minutes,
                    rule.max_executions_per_day,
                    rule.performer_filter.to_string(),
                    rule.instance_filter.kind(),
                    row.selected_instances,
                    rule.last_executed_at.map(|t| t.timestamp_millis()),
                    rule.total_executions as i64,
                    rule.created_at.timestamp_millis(),
                    rule.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to save rule: {}", e)))?;
            Ok(())
        })
    }

    /// Persist a rule's definition. Execution counters are left untouched.
    pub fn update(&self, rule: &ActionRule) -> Result<(), BeaconError> {
        let row = RuleRow::encode(rule)?;
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE action_rules SET name = ?2, description = ?3, is_active = ?4,
                    trigger_type = ?5, trigger_conditions = ?6, action_type = ?7,
                    action_config = ?8, cooldown_minutes = ?9, max_executions_per_day = ?10,
                    performer_filter = ?11, instance_filter_type = ?12,
                    selected_instances = ?13, updated_at = ?14
                 WHERE id = ?1",
                rusqlite::params![
                    rule.id.to_string(),
                    rule.name,
                    rule.description,
                    rule.is_active,
                    row.trigger_type,
                    row.trigger_conditions,
                    row.action_type,
                    row.action_config,
                    rule.cooldown_minutes,
                    rule.max_executions_per_day,
                    rule.performer_filter.to_string(),
                    rule.instance_filter.kind(),
                    row.selected_instances,
                    rule.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to update rule: {}", e)))
        })?;
        if changed == 0 {
            return Err(BeaconError::NotFound(format!("rule {}", rule.id)));
        }
        Ok(())
    }

    /// Delete a rule. Returns whether a row was removed.
    pub fn delete(&self, id: RuleId) -> Result<bool, BeaconError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM action_rules WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| BeaconError::Storage(format!("Failed to delete rule: {}", e)))?;
            Ok(removed > 0)
        })
    }

    /// Flip `is_active` and return the updated rule.
    pub fn toggle(&self, id: RuleId, now: DateTime<Utc>) -> Result<ActionRule, BeaconError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE action_rules SET is_active = 1 - is_active, updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), now.timestamp_millis()],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to toggle rule: {}", e)))
        })?;
        if changed == 0 {
            return Err(BeaconError::NotFound(format!("rule {}", id)));
        }
        self.get(id)?
            .ok_or_else(|| BeaconError::NotFound(format!("rule {}", id)))
    }

    pub fn get(&self, id: RuleId) -> Result<Option<ActionRule>, BeaconError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM action_rules WHERE id = ?1", RULE_COLUMNS);
            let result = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_rule(row))
                })
                .optional()
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            match result {
                Some(rule) => Ok(Some(rule?)),
                None => Ok(None),
            }
        })
    }

    /// List rules in creation order, optionally filtered by activity.
    pub fn list(&self, active: Option<bool>) -> Result<Vec<ActionRule>, BeaconError> {
        self.select(active)?
            .into_iter()
            .map(|(_, rule)| rule)
            .collect()
    }

    /// Active rules whose instance scope admits `instance_id`.
    ///
    /// A row that no longer decodes is logged and left out, so one bad
    /// definition cannot stop the remaining rules from being evaluated.
    pub fn list_active_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<ActionRule>, BeaconError> {
        let rules = self
            .select(Some(true))?
            .into_iter()
            .filter_map(|(id, rule)| match rule {
                Ok(rule) => Some(rule),
                Err(e) => {
                    error!(rule_id = %id, error = %e, "Skipping undecodable rule");
                    None
                }
            })
            .filter(|rule| rule.instance_filter.admits(instance_id))
            .collect();
        Ok(rules)
    }

    /// Rows in creation order, each paired with its raw id and decoded
    /// independently.
    fn select(
        &self,
        active: Option<bool>,
    ) -> Result<Vec<(String, Result<ActionRule, BeaconError>)>, BeaconError> {
        self.db.with_conn(|conn| {
            let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match active
            {
                Some(flag) => (
                    format!(
                        "SELECT {} FROM action_rules WHERE is_active = ?1
                         ORDER BY created_at ASC, rowid ASC",
                        RULE_COLUMNS
                    ),
                    vec![Box::new(flag) as Box<dyn rusqlite::types::ToSql>],
                ),
                None => (
                    format!(
                        "SELECT {} FROM action_rules ORDER BY created_at ASC, rowid ASC",
                        RULE_COLUMNS
                    ),
                    Vec::new(),
                ),
            };
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| BeaconError::Storage(format!("Rule list prepare: {}", e)))?;
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row_to_rule(row)))
                })
                .map_err(|e| BeaconError::Storage(format!("Rule list: {}", e)))?;

            let mut decoded = Vec::new();
            for row in rows {
                decoded.push(row.map_err(|e| BeaconError::Storage(e.to_string()))?);
            }
            Ok(decoded)
        })
    }

    /// Record an admitted execution: bump the counter and advance
    /// `last_executed_at` (never backwards).
    pub fn record_admission(&self, id: RuleId, at: DateTime<Utc>) -> Result<(), BeaconError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE action_rules
                 SET total_executions = total_executions + 1,
                     last_executed_at = MAX(COALESCE(last_executed_at, 0), ?2)
                 WHERE id = ?1",
                rusqlite::params![id.to_string(), at.timestamp_millis()],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to record admission: {}", e)))?;
            Ok(())
        })
    }

    /// `(total, active)` rule counts.
    pub fn counts(&self) -> Result<(u64, u64), BeaconError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM action_rules",
                [],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            )
            .map_err(|e| BeaconError::Storage(e.to_string()))
        })
    }
}

// ============================================================================
// Row encoding
// ============================================================================

struct RuleRow {
    trigger_type: String,
    trigger_conditions: String,
    action_type: String,
    action_config: String,
    selected_instances: String,
}

impl RuleRow {
    fn encode(rule: &ActionRule) -> Result<Self, BeaconError> {
        let mut trigger = serde_json::to_value(&rule.trigger)?;
        let conditions = trigger
            .get_mut("trigger_conditions")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok(Self {
            trigger_type: rule.trigger.trigger_type().to_string(),
            trigger_conditions: conditions.to_string(),
            action_type: rule.action.action_type().to_string(),
            action_config: rule.action.config_value()?.to_string(),
            selected_instances: serde_json::to_string(&rule.instance_filter.instances())?,
        })
    }
}

fn decode_trigger(trigger_type: &str, conditions: &str) -> Result<Trigger, BeaconError> {
    let conditions: Value = serde_json::from_str(conditions)?;
    serde_json::from_value(serde_json::json!({
        "trigger_type": trigger_type,
        "trigger_conditions": conditions,
    }))
    .map_err(|e| BeaconError::Storage(format!("Corrupt trigger for type {}: {}", trigger_type, e)))
}

fn decode_action(action_type: &str, config: &str) -> Result<Action, BeaconError> {
    let action_type: ActionType = action_type
        .parse()
        .map_err(|e: String| BeaconError::Storage(e))?;
    let config: Value = serde_json::from_str(config)?;
    Action::from_parts(action_type, config)
}

fn row_to_rule(row: &rusqlite::Row<'_>) -> Result<ActionRule, BeaconError> {
    let get_err = |e: rusqlite::Error| BeaconError::Storage(e.to_string());

    let id_str: String = row.get(0).map_err(get_err)?;
    let trigger_type: String = row.get(4).map_err(get_err)?;
    let trigger_conditions: String = row.get(5).map_err(get_err)?;
    let action_type: String = row.get(6).map_err(get_err)?;
    let action_config: String = row.get(7).map_err(get_err)?;
    let performer: String = row.get(10).map_err(get_err)?;
    let filter_type: String = row.get(11).map_err(get_err)?;
    let instances_json: String = row.get(12).map_err(get_err)?;
    let last_executed_at: Option<i64> = row.get(13).map_err(get_err)?;
    let total_executions: i64 = row.get(14).map_err(get_err)?;
    let created_at: i64 = row.get(15).map_err(get_err)?;
    let updated_at: i64 = row.get(16).map_err(get_err)?;

    let instances: BTreeSet<String> = serde_json::from_str(&instances_json)?;

    Ok(ActionRule {
        id: id_str
            .parse()
            .map_err(|e| BeaconError::Storage(format!("Invalid UUID: {}", e)))?,
        name: row.get(1).map_err(get_err)?,
        description: row.get(2).map_err(get_err)?,
        is_active: row.get(3).map_err(get_err)?,
        trigger: decode_trigger(&trigger_type, &trigger_conditions)?,
        action: decode_action(&action_type, &action_config)?,
        cooldown_minutes: row.get(8).map_err(get_err)?,
        max_executions_per_day: row.get(9).map_err(get_err)?,
        performer_filter: performer.parse().map_err(BeaconError::Storage)?,
        instance_filter: InstanceFilter::from_parts(&filter_type, instances)?,
        last_executed_at: last_executed_at.map(datetime_from_millis).transpose()?,
        total_executions: total_executions as u64,
        created_at: datetime_from_millis(created_at)?,
        updated_at: datetime_from_millis(updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{
        MessageConfig, PerformerFilter, Priority, RuleDraft, TaskConfig, WebhookConfig,
    };
    use chrono::Duration;

    fn make_repo() -> RuleRepository {
        RuleRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn hashtag_rule(name: &str, created_at: DateTime<Utc>) -> ActionRule {
        let draft = RuleDraft::new(
            name,
            Trigger::Hashtag { tags: set(&["todo"]) },
            Action::CreateTask(TaskConfig {
                title: "Task: {{content}}".to_string(),
                description: Some("from chat".to_string()),
                priority: Priority::Urgent,
                due_in_minutes: Some(60),
                space_id: None,
            }),
        );
        ActionRule::from_draft(draft, created_at).unwrap()
    }

    #[test]
    fn test_create_and_get_preserves_rule() {
        let repo = make_repo();
        let mut rule = hashtag_rule("todo", Utc::now());
        rule.performer_filter = PerformerFilter::ContactsOnly;
        rule.instance_filter = InstanceFilter::Exclude(set(&["inst-b"]));
        repo.create(&rule).unwrap();

        let loaded = repo.get(rule.id).unwrap().unwrap();
        assert_eq!(loaded.name, rule.name);
        assert_eq!(loaded.trigger, rule.trigger);
        assert_eq!(loaded.action, rule.action);
        assert_eq!(loaded.performer_filter, PerformerFilter::ContactsOnly);
        assert_eq!(loaded.instance_filter, rule.instance_filter);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            rule.created_at.timestamp_millis()
        );
    }

    #[test]
    fn test_get_missing_returns_none() {
        let repo = make_repo();
        assert!(repo.get(RuleId::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_keeps_counters() {
        let repo = make_repo();
        let mut rule = hashtag_rule("todo", Utc::now());
        repo.create(&rule).unwrap();
        repo.record_admission(rule.id, Utc::now()).unwrap();

        rule.name = "renamed".to_string();
        rule.action = Action::Webhook(WebhookConfig {
            url: "https://hooks.example.com/{{chatId}}".to_string(),
            method: "PUT".to_string(),
            headers: [("X-Source".to_string(), "beacon".to_string())]
                .into_iter()
                .collect(),
            body: None,
            timeout_secs: Some(5),
        });
        rule.total_executions = 0;
        repo.update(&rule).unwrap();

        let loaded = repo.get(rule.id).unwrap().unwrap();
        assert_eq!(loaded.name, "renamed");
        assert_eq!(loaded.action, rule.action);
        assert_eq!(loaded.total_executions, 1);
        assert!(loaded.last_executed_at.is_some());
    }

    #[test]
    fn test_update_missing_rule_is_not_found() {
        let repo = make_repo();
        let rule = hashtag_rule("ghost", Utc::now());
        assert!(matches!(repo.update(&rule), Err(BeaconError::NotFound(_))));
    }

    #[test]
    fn test_toggle_and_delete() {
        let repo = make_repo();
        let rule = hashtag_rule("todo", Utc::now());
        repo.create(&rule).unwrap();

        let toggled = repo.toggle(rule.id, Utc::now()).unwrap();
        assert!(!toggled.is_active);
        let toggled = repo.toggle(rule.id, Utc::now()).unwrap();
        assert!(toggled.is_active);

        assert!(repo.delete(rule.id).unwrap());
        assert!(!repo.delete(rule.id).unwrap());
        assert!(matches!(
            repo.toggle(rule.id, Utc::now()),
            Err(BeaconError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_in_creation_order_with_active_filter() {
        let repo = make_repo();
        let base = Utc::now();
        let first = hashtag_rule("first", base);
        let mut second = hashtag_rule("second", base + Duration::seconds(1));
        second.is_active = false;
        let third = hashtag_rule("third", base + Duration::seconds(2));
        // Insert out of order; listing follows created_at.
        repo.create(&third).unwrap();
        repo.create(&first).unwrap();
        repo.create(&second).unwrap();

        let names: Vec<String> = repo.list(None).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["first", "second", "third"]);

        let active: Vec<String> = repo
            .list(Some(true))
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(active, vec!["first", "third"]);
        assert_eq!(repo.counts().unwrap(), (3, 2));
    }

    #[test]
    fn test_list_active_for_instance() {
        let repo = make_repo();
        let base = Utc::now();
        let mut scoped = hashtag_rule("scoped", base);
        scoped.instance_filter = InstanceFilter::Include(set(&["inst-a"]));
        let open = hashtag_rule("open", base + Duration::seconds(1));
        repo.create(&scoped).unwrap();
        repo.create(&open).unwrap();

        let for_a = repo.list_active_for_instance("inst-a").unwrap();
        assert_eq!(for_a.len(), 2);
        let for_b = repo.list_active_for_instance("inst-b").unwrap();
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].name, "open");
    }

    #[test]
    fn test_undecodable_rule_does_not_hide_the_others() {
        let repo = make_repo();
        let base = Utc::now();
        let broken = hashtag_rule("broken", base);
        let healthy = hashtag_rule("healthy", base + Duration::seconds(1));
        repo.create(&broken).unwrap();
        repo.create(&healthy).unwrap();

        repo.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE action_rules SET trigger_conditions = '{}' WHERE id = ?1",
                    [broken.id.to_string()],
                )
                .map_err(|e| BeaconError::Storage(e.to_string()))
            })
            .unwrap();

        let active = repo.list_active_for_instance("inst-a").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, healthy.id);

        // The unfiltered listing still reports the damage.
        assert!(repo.list(None).is_err());
    }

    #[test]
    fn test_record_admission_never_moves_backwards() {
        let repo = make_repo();
        let rule = hashtag_rule("todo", Utc::now());
        repo.create(&rule).unwrap();

        let later = Utc::now();
        let earlier = later - Duration::minutes(5);
        repo.record_admission(rule.id, later).unwrap();
        repo.record_admission(rule.id, earlier).unwrap();

        let loaded = repo.get(rule.id).unwrap().unwrap();
        assert_eq!(loaded.total_executions, 2);
        assert_eq!(
            loaded.last_executed_at.map(|t| t.timestamp_millis()),
            Some(later.timestamp_millis())
        );
    }

    #[test]
    fn test_all_trigger_kinds_round_trip() {
        let repo = make_repo();
        let triggers = vec![
            Trigger::Reaction { emojis: set(&["👍"]) },
            Trigger::Keyword { words: set(&["invoice"]) },
            Trigger::TimeBased {
                schedule: "0 9 * * MON".to_string(),
                timezone: Some("Europe/Berlin".to_string()),
            },
            Trigger::Location {
                latitude: 52.52,
                longitude: 13.405,
                radius_meters: 250.0,
            },
            Trigger::ContactGroup { group_ids: set(&["vip"]) },
        ];
        for trigger in triggers {
            let draft = RuleDraft::new(
                "kind",
                trigger.clone(),
                Action::SendMessage(MessageConfig {
                    message: "hi {{sender}}".to_string(),
                    chat_id: None,
                }),
            );
            let rule = ActionRule::from_draft(draft, Utc::now()).unwrap();
            repo.create(&rule).unwrap();
            assert_eq!(repo.get(rule.id).unwrap().unwrap().trigger, trigger);
        }
    }
}
