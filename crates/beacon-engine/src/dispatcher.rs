//! Action dispatch with per-attempt timeouts and bounded retries.
//!
//! Only transient failures (collaborator unavailable, timeout) are
//! retried. Every attempt of one execution carries the same execution id,
//! which executors use as their idempotency key.

use std::time::Duration;

use serde_json::Value;

use beacon_core::config::EngineConfig;

use crate::error::ActionError;
use crate::handler::{ActionContext, ActionRegistry};

/// Exponential backoff between dispatch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per execution, including the first. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay after the given (1-based) failed attempt: 200ms, 400ms, 800ms...
    /// with the default base, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Outcome of dispatching one admitted execution.
#[derive(Debug)]
pub struct DispatchReport {
    pub outcome: Result<Value, ActionError>,
    /// Attempts made; 0 when no handler was invoked.
    pub attempts: u32,
}

pub struct Dispatcher {
    registry: ActionRegistry,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: ActionRegistry, policy: RetryPolicy, default_timeout: Duration) -> Self {
        Self {
            registry,
            policy,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run the context's action through its registered handler.
    pub async fn dispatch(&self, ctx: &ActionContext) -> DispatchReport {
        let action_type = ctx.action.action_type();
        let Some(handler) = self.registry.get(action_type) else {
            tracing::warn!(action_type = %action_type, "No handler registered");
            return DispatchReport {
                outcome: Err(ActionError::UnregisteredHandler(action_type)),
                attempts: 0,
            };
        };
        let timeout = handler.timeout(&ctx.action).unwrap_or(self.default_timeout);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(timeout, handler.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::Timeout(timeout.as_millis() as u64)),
            };

            match outcome {
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        execution_id = %ctx.execution_id,
                        action_type = %action_type,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "Action failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                outcome => {
                    return DispatchReport {
                        outcome,
                        attempts: attempt,
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
