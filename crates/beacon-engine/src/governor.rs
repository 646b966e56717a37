//! Execution governor: per-rule cooldown and rolling daily caps.
//!
//! Each rule owns an independently locked window in a concurrent map, so
//! unrelated rules never contend. The window lock is held only for the
//! admission bookkeeping, never across dispatch.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, error};

use beacon_core::{ActionRule, RuleId};

/// Length of the rolling window for the daily cap.
pub const ROLLING_WINDOW_HOURS: i64 = 24;

/// Why an admission was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Cooldown { remaining_secs: i64 },
    DailyCap { limit: u32 },
    /// Bookkeeping could not be consulted; the rule is not admitted.
    Unavailable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Cooldown { remaining_secs } => {
                write!(f, "cooldown active, {}s remaining", remaining_secs)
            }
            SkipReason::DailyCap { limit } => {
                write!(f, "daily execution cap of {} reached", limit)
            }
            SkipReason::Unavailable(detail) => {
                write!(f, "rate-limit bookkeeping unavailable: {}", detail)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(SkipReason),
}

#[derive(Debug, Default)]
struct RuleWindow {
    last_executed_at: Option<DateTime<Utc>>,
    admissions: VecDeque<DateTime<Utc>>,
}

impl RuleWindow {
    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(ROLLING_WINDOW_HOURS);
        self.admissions.retain(|t| *t > horizon);
    }
}

/// Arena of per-rule admission state.
#[derive(Debug, Default)]
pub struct Governor {
    windows: DashMap<RuleId, Arc<Mutex<RuleWindow>>>,
}

impl Governor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the rule already has in-memory state.
    pub fn is_tracked(&self, rule_id: RuleId) -> bool {
        self.windows.contains_key(&rule_id)
    }

    /// Install persisted state for a rule not yet tracked. Existing state
    /// always wins, so concurrent seeding is harmless.
    pub fn seed(
        &self,
        rule_id: RuleId,
        last_executed_at: Option<DateTime<Utc>>,
        admissions: Vec<DateTime<Utc>>,
    ) {
        self.windows.entry(rule_id).or_insert_with(|| {
            Arc::new(Mutex::new(RuleWindow {
                last_executed_at,
                admissions: admissions.into(),
            }))
        });
    }

    /// Decide whether `rule` may execute at `now`, recording the admission
    /// atomically when it may.
    pub fn admit(&self, rule: &ActionRule, now: DateTime<Utc>) -> Admission {
        let window = self
            .windows
            .entry(rule.id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(RuleWindow {
                    last_executed_at: rule.last_executed_at,
                    admissions: VecDeque::new(),
                }))
            })
            .clone();

        let mut window = match window.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!(rule_id = %rule.id, "Governor window poisoned: {}", e);
                return Admission::Rejected(SkipReason::Unavailable(
                    "window lock poisoned".to_string(),
                ));
            }
        };

        let last = window.last_executed_at.max(rule.last_executed_at);
        if rule.cooldown_minutes > 0 {
            if let Some(last) = last {
                let cooldown = Duration::minutes(i64::from(rule.cooldown_minutes));
                let elapsed = now - last;
                if elapsed < cooldown {
                    let remaining_secs = (cooldown - elapsed).num_seconds().max(1);
                    debug!(rule_id = %rule.id, remaining_secs, "Admission rejected: cooldown");
                    return Admission::Rejected(SkipReason::Cooldown { remaining_secs });
                }
            }
        }

        window.prune(now);
        if window.admissions.len() >= rule.max_executions_per_day as usize {
            debug!(
                rule_id = %rule.id,
                limit = rule.max_executions_per_day,
                "Admission rejected: daily cap"
            );
            return Admission::Rejected(SkipReason::DailyCap {
                limit: rule.max_executions_per_day,
            });
        }

        window.admissions.push_back(now);
        window.last_executed_at = Some(last.map_or(now, |l| l.max(now)));
        Admission::Admitted
    }

    /// Drop a rule's state, e.g. after deletion.
    pub fn forget(&self, rule_id: RuleId) {
        self.windows.remove(&rule_id);
    }
}

#[cfg(test)]
impl Governor {
    /// Admissions currently inside the rolling window.
    pub fn admissions_in_window(&self, rule_id: RuleId, now: DateTime<Utc>) -> usize {
        let Some(window) = self.windows.get(&rule_id).map(|w| Arc::clone(w.value())) else {
            return 0;
        };
        let horizon = now - Duration::hours(ROLLING_WINDOW_HOURS);
        window
            .lock()
            .map(|w| w.admissions.iter().filter(|t| **t > horizon).count())
            .unwrap_or(0)
    }
}
