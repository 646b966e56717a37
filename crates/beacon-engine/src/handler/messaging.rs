//! `send_message` handler.
//!
//! Replies go out through a `MessageGateway`, the boundary to the
//! messaging-instance layer that owns sessions and connections.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use beacon_core::{Action, ActionType, ExecutionId};

use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};

/// Outbound message delivery.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Send `text` to `chat_id` on `instance_id`, returning the platform
    /// message id. Repeated calls with the same `idempotency_key` must not
    /// send twice.
    async fn send(
        &self,
        instance_id: &str,
        chat_id: &str,
        text: &str,
        idempotency_key: ExecutionId,
    ) -> Result<String, ActionError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub message_id: String,
    pub instance_id: String,
    pub chat_id: String,
    pub text: String,
    pub queued_at: DateTime<Utc>,
}

/// Messages kept by a default [`OutboxGateway`].
pub const DEFAULT_OUTBOX_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Outbox {
    messages: HashMap<ExecutionId, OutboundMessage>,
    order: VecDeque<ExecutionId>,
}

/// Gateway that queues messages in memory for a delivery worker to pick
/// up. Holds at most `capacity` messages, dropping the oldest.
#[derive(Debug)]
pub struct OutboxGateway {
    outbox: Mutex<Outbox>,
    capacity: usize,
}

impl Default for OutboxGateway {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl OutboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            outbox: Mutex::new(Outbox::default()),
            capacity: capacity.max(1),
        }
    }

    /// Messages still queued, oldest first.
    pub fn queued(&self) -> Vec<OutboundMessage> {
        match self.outbox.lock() {
            Ok(outbox) => outbox
                .order
                .iter()
                .filter_map(|id| outbox.messages.get(id).cloned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl MessageGateway for OutboxGateway {
    async fn send(
        &self,
        instance_id: &str,
        chat_id: &str,
        text: &str,
        idempotency_key: ExecutionId,
    ) -> Result<String, ActionError> {
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| ActionError::Transient("outbox lock poisoned".to_string()))?;
        if let Some(existing) = outbox.messages.get(&idempotency_key) {
            return Ok(existing.message_id.clone());
        }

        let message_id = format!("beacon-{}", idempotency_key);
        outbox.messages.insert(
            idempotency_key,
            OutboundMessage {
                message_id: message_id.clone(),
                instance_id: instance_id.to_string(),
                chat_id: chat_id.to_string(),
                text: text.to_string(),
                queued_at: Utc::now(),
            },
        );
        outbox.order.push_back(idempotency_key);
        while outbox.order.len() > self.capacity {
            if let Some(evicted) = outbox.order.pop_front() {
                outbox.messages.remove(&evicted);
            }
        }
        tracing::info!(instance_id = %instance_id, chat_id = %chat_id, "Message queued");
        Ok(message_id)
    }
}

/// Handler for `send_message`.
pub struct SendMessageHandler {
    gateway: Arc<dyn MessageGateway>,
}

impl SendMessageHandler {
    pub fn new(gateway: Arc<dyn MessageGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ActionHandler for SendMessageHandler {
    fn action_type(&self) -> ActionType {
        ActionType::SendMessage
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<Value, ActionError> {
        let Action::SendMessage(config) = &ctx.action else {
            return Err(ActionError::InvalidConfig(format!(
                "send_message handler received {}",
                ctx.action.action_type()
            )));
        };
        let chat_id = config.chat_id.as_deref().unwrap_or(&ctx.event.chat_id);
        let message_id = self
            .gateway
            .send(
                &ctx.event.instance_id,
                chat_id,
                &config.message,
                ctx.execution_id,
            )
            .await?;
        Ok(serde_json::json!({
            "message_id": message_id,
            "chat_id": chat_id,
        }))
    }

    fn describe(&self, action: &Action) -> String {
        match action {
            Action::SendMessage(config) => match &config.chat_id {
                Some(chat) => format!("Send message to {}", chat),
                None => "Reply in the triggering chat".to_string(),
            },
            other => format!("Unsupported action: {}", other.action_type()),
        }
    }
}
