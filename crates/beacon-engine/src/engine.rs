//! The automation engine: match, govern, render, dispatch, record.
//!
//! One call to [`Engine::process_event`] evaluates every active rule in
//! scope against a single event snapshot. Each matched rule runs on its own
//! task, so an admitted execution always reaches its record even when the
//! caller stops waiting. The only shared mutable state those tasks touch is
//! their own governor window.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use beacon_core::config::EngineConfig;
use beacon_core::{
    ActionRule, ExecutionId, ExecutionRecord, ExecutionStatus, RuleId, TriggerEvent,
};

use crate::dispatcher::{Dispatcher, RetryPolicy};
use crate::error::EngineError;
use crate::governor::{Admission, Governor, SkipReason, ROLLING_WINDOW_HOURS};
use crate::handler::{ActionContext, ActionRegistry};
use crate::matcher::{evaluate, match_rules, ConditionOracle, MatchVerdict, NoOracle};
use crate::recorder::{ExecutionRecorder, RuleSource};
use crate::template::render_action;

/// What happened to one matched rule for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleReport {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub status: ExecutionStatus,
    /// Absent for skips that were not logged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a side-effect-free rule test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRun {
    pub would_trigger: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// What the rule's handler would do for this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Accepting flag plus the count of evaluations still running.
struct Activity {
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Activity {
    fn new() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn track(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            activity: Arc::clone(self),
        }
    }
}

/// Decrements the in-flight count on drop and wakes `drain` at zero.
struct InFlight {
    activity: Arc<Activity>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.activity.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.activity.idle.notify_waiters();
        }
    }
}

/// Everything one matched rule needs from admission to record. Cheap to
/// clone into a task.
#[derive(Clone)]
struct RuleRunner {
    rules: Arc<dyn RuleSource>,
    recorder: Arc<dyn ExecutionRecorder>,
    governor: Arc<Governor>,
    dispatcher: Arc<Dispatcher>,
    log_skipped: bool,
}

pub struct Engine {
    runner: RuleRunner,
    oracle: Arc<dyn ConditionOracle>,
    activity: Arc<Activity>,
}

impl Engine {
    pub fn new(
        rules: Arc<dyn RuleSource>,
        recorder: Arc<dyn ExecutionRecorder>,
        registry: ActionRegistry,
        config: &EngineConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            registry,
            RetryPolicy::from_config(config),
            Duration::from_secs(config.default_timeout_secs),
        );
        Self {
            runner: RuleRunner {
                rules,
                recorder,
                governor: Arc::new(Governor::new()),
                dispatcher: Arc::new(dispatcher),
                log_skipped: config.log_skipped,
            },
            oracle: Arc::new(NoOracle),
            activity: Arc::new(Activity::new()),
        }
    }

    /// Use `oracle` for time-based, location and contact-group triggers.
    pub fn with_oracle(mut self, oracle: Arc<dyn ConditionOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        self.runner.dispatcher.registry()
    }

    pub fn governor(&self) -> &Governor {
        &self.runner.governor
    }

    pub async fn process_event(
        &self,
        event: &TriggerEvent,
    ) -> Result<Vec<RuleReport>, EngineError> {
        self.process_event_at(event, Utc::now()).await
    }

    /// Evaluate `event` as if it arrived at `now`.
    ///
    /// Fails only when the engine is shutting down or the rule set cannot
    /// be loaded. Per-rule problems end up in the reports. Dropping the
    /// returned future does not cancel rules already handed to their tasks.
    pub async fn process_event_at(
        &self,
        event: &TriggerEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<RuleReport>, EngineError> {
        let _guard = self.enter()?;

        let rules = self.runner.rules.active_rules_for_instance(&event.instance_id)?;
        let matched = match_rules(event, &rules, self.oracle.as_ref());
        debug!(
            instance_id = %event.instance_id,
            candidates = rules.len(),
            matched = matched.len(),
            "Event evaluated"
        );

        let event = Arc::new(event.clone());
        let tasks: Vec<_> = matched
            .into_iter()
            .map(|rule| {
                let label = (rule.id, rule.name.clone());
                let rule = rule.clone();
                let runner = self.runner.clone();
                let event = Arc::clone(&event);
                let guard = self.activity.track();
                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    runner.run(&rule, &event, now).await
                });
                (label, handle)
            })
            .collect();

        let (labels, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let reports = join_all(handles)
            .await
            .into_iter()
            .zip(labels)
            .map(|(joined, (rule_id, rule_name))| match joined {
                Ok(report) => report,
                Err(e) => {
                    error!(rule_id = %rule_id, "Execution task failed: {}", e);
                    RuleReport {
                        rule_id,
                        rule_name,
                        status: ExecutionStatus::Failed,
                        execution_id: None,
                        attempts: 0,
                        result: None,
                        error: Some(format!("execution task failed: {}", e)),
                    }
                }
            })
            .collect();
        Ok(reports)
    }

    fn enter(&self) -> Result<InFlight, EngineError> {
        let guard = self.activity.track();
        if !self.activity.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        Ok(guard)
    }

    /// Dry-run: would `rule` match `event`, and what would its handler do?
    /// Touches neither the governor nor any executor, and records nothing.
    pub fn test_rule(&self, rule: &ActionRule, event: &TriggerEvent) -> DryRun {
        match evaluate(rule, event, self.oracle.as_ref()) {
            MatchVerdict::Match => {
                let action =
                    render_action(&rule.action, event).unwrap_or_else(|_| rule.action.clone());
                DryRun {
                    would_trigger: true,
                    reason: None,
                    action: self
                        .registry()
                        .get(action.action_type())
                        .map(|handler| handler.describe(&action)),
                }
            }
            MatchVerdict::Miss(reason) => DryRun {
                would_trigger: false,
                reason: Some(reason.to_string()),
                action: None,
            },
        }
    }

    /// Drop governor state for a deleted rule.
    pub fn forget_rule(&self, rule_id: RuleId) {
        self.runner.governor.forget(rule_id);
    }

    /// Stop accepting events. Evaluations already running continue.
    pub fn shutdown(&self) {
        if self.activity.accepting.swap(false, Ordering::SeqCst) {
            info!(in_flight = self.in_flight(), "Engine shutting down");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.activity.accepting.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.activity.in_flight.load(Ordering::SeqCst)
    }

    /// Wait up to `grace` for in-flight evaluations to finish. Returns
    /// whether the engine went idle in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let idle = self.activity.idle.notified();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                let remaining = self.in_flight();
                if remaining > 0 {
                    warn!(remaining, "Shutdown grace period elapsed with executions in flight");
                }
                return remaining == 0;
            }
        }
    }
}

impl RuleRunner {
    async fn run(&self, rule: &ActionRule, event: &TriggerEvent, now: DateTime<Utc>) -> RuleReport {
        let started = Instant::now();

        let admission = match self.warm_start(rule, now) {
            Ok(()) => self.governor.admit(rule, now),
            Err(reason) => Admission::Rejected(reason),
        };
        if let Admission::Rejected(reason) = admission {
            return self.skip(rule, event, reason, now, started);
        }

        info!(rule_id = %rule.id, rule = %rule.name, "Rule admitted");
        if let Err(e) = self.rules.record_admission(rule.id, now) {
            error!(rule_id = %rule.id, "Failed to persist admission: {}", e);
        }

        let execution_id = ExecutionId::new();
        let (outcome, attempts) = match render_action(&rule.action, event) {
            Ok(action) => {
                let ctx = ActionContext {
                    execution_id,
                    action,
                    event: event.clone(),
                };
                let report = self.dispatcher.dispatch(&ctx).await;
                (report.outcome, report.attempts)
            }
            Err(e) => (Err(e), 0),
        };

        let (status, result, error_message) = match outcome {
            Ok(result) => {
                info!(
                    rule_id = %rule.id,
                    action_type = %rule.action.action_type(),
                    attempts,
                    "Action succeeded"
                );
                (ExecutionStatus::Success, Some(result), None)
            }
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    action_type = %rule.action.action_type(),
                    attempts,
                    "Action failed: {}",
                    e
                );
                (ExecutionStatus::Failed, None, Some(e.to_string()))
            }
        };

        let record = ExecutionRecord {
            id: execution_id,
            rule_id: rule.id,
            triggered_by: event.message_id.clone(),
            trigger_data: event.clone(),
            status,
            result: result.clone(),
            error_message: error_message.clone(),
            executed_at: now,
            processing_time_ms: started.elapsed().as_millis() as u64,
            attempts,
        };
        if let Err(e) = self.recorder.record(&record) {
            error!(rule_id = %rule.id, execution_id = %execution_id, "Failed to record execution: {}", e);
        }

        RuleReport {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            status,
            execution_id: Some(execution_id),
            attempts,
            result,
            error: error_message,
        }
    }

    /// Seed the governor from persisted history the first time a rule is
    /// seen. A failed lookup rejects the rule rather than admitting it
    /// with an empty window.
    fn warm_start(&self, rule: &ActionRule, now: DateTime<Utc>) -> Result<(), SkipReason> {
        if self.governor.is_tracked(rule.id) {
            return Ok(());
        }
        let since = now - chrono::Duration::hours(ROLLING_WINDOW_HOURS);
        match self.recorder.admitted_since(rule.id, since) {
            Ok(admissions) => {
                debug!(rule_id = %rule.id, admissions = admissions.len(), "Governor warm-started");
                self.governor.seed(rule.id, rule.last_executed_at, admissions);
                Ok(())
            }
            Err(e) => {
                error!(rule_id = %rule.id, "Failed to load execution history: {}", e);
                Err(SkipReason::Unavailable(e.to_string()))
            }
        }
    }

    fn skip(
        &self,
        rule: &ActionRule,
        event: &TriggerEvent,
        reason: SkipReason,
        now: DateTime<Utc>,
        started: Instant,
    ) -> RuleReport {
        debug!(rule_id = %rule.id, reason = %reason, "Rule skipped");
        let reason = reason.to_string();

        let mut execution_id = None;
        if self.log_skipped {
            let record = ExecutionRecord::skipped(
                rule.id,
                event,
                reason.clone(),
                now,
                started.elapsed().as_millis() as u64,
            );
            match self.recorder.record(&record) {
                Ok(()) => execution_id = Some(record.id),
                Err(e) => error!(rule_id = %rule.id, "Failed to record skip: {}", e),
            }
        }

        RuleReport {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            status: ExecutionStatus::Skipped,
            execution_id,
            attempts: 0,
            result: None,
            error: Some(reason),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dispatcher", &self.runner.dispatcher)
            .field("log_skipped", &self.runner.log_skipped)
            .field("accepting", &self.is_accepting())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
