//! Action handler registry and trait definition.
//!
//! Each action type is served by one `ActionHandler` registered at startup.
//! Adding an action type means registering another handler; the dispatcher
//! never branches on the type itself.

pub mod messaging;
pub mod notification;
pub mod webhook;
pub mod workspace;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use beacon_core::{Action, ActionType, ExecutionId, TriggerEvent};

use crate::error::ActionError;
use messaging::{MessageGateway, OutboxGateway, SendMessageHandler};
use notification::{Notification, NotificationHandler};
use webhook::WebhookHandler;
use workspace::{InMemoryWorkspace, WorkspaceBackend, WorkspaceHandler};

/// Everything a handler sees for one admitted execution.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Doubles as the idempotency key across retries.
    pub execution_id: ExecutionId,
    /// The rendered action.
    pub action: Action,
    pub event: TriggerEvent,
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// Perform the action, returning an executor-defined result payload.
    async fn execute(&self, ctx: &ActionContext) -> Result<Value, ActionError>;

    /// One-line human readable summary of what `execute` would do.
    fn describe(&self, action: &Action) -> String;

    /// Per-attempt timeout; `None` uses the dispatcher default.
    fn timeout(&self, _action: &Action) -> Option<Duration> {
        None
    }
}

/// Collaborators the built-in handlers delegate to.
#[derive(Clone)]
pub struct HandlerDeps {
    pub workspace: Arc<dyn WorkspaceBackend>,
    pub gateway: Arc<dyn MessageGateway>,
    pub notifications: broadcast::Sender<Notification>,
    pub http: reqwest::Client,
    pub webhook_timeout: Duration,
}

impl HandlerDeps {
    /// In-process defaults: in-memory workspace, outbox gateway and a
    /// notification channel with no subscribers yet.
    pub fn in_memory(webhook_timeout: Duration) -> Self {
        let (notifications, _) = broadcast::channel(256);
        Self {
            workspace: Arc::new(InMemoryWorkspace::new()),
            gateway: Arc::new(OutboxGateway::new()),
            notifications,
            http: reqwest::Client::new(),
            webhook_timeout,
        }
    }
}

/// Maps action types to their handlers.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for its type.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.action_type(), handler);
    }

    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }

    pub fn is_registered(&self, action_type: ActionType) -> bool {
        self.handlers.contains_key(&action_type)
    }

    pub fn registered_types(&self) -> Vec<ActionType> {
        let mut types: Vec<ActionType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    /// Register the built-in handler for every action type.
    pub fn register_defaults(&mut self, deps: &HandlerDeps) {
        self.register(Arc::new(WebhookHandler::new(
            deps.http.clone(),
            deps.webhook_timeout,
        )));
        self.register(Arc::new(SendMessageHandler::new(Arc::clone(&deps.gateway))));
        self.register(Arc::new(NotificationHandler::new(deps.notifications.clone())));
        for action_type in ActionType::ALL {
            if WorkspaceHandler::serves(action_type) {
                self.register(Arc::new(WorkspaceHandler::new(
                    action_type,
                    Arc::clone(&deps.workspace),
                )));
            }
        }
    }

    pub fn with_defaults(deps: &HandlerDeps) -> Self {
        let mut registry = Self::new();
        registry.register_defaults(deps);
        registry
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("action_types", &self.registered_types())
            .finish()
    }
}
