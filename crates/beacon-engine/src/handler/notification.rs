//! `send_notification` handler.
//!
//! Publishes notifications on a broadcast channel; whoever subscribed
//! (the app's log sink, a push bridge) delivers them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use beacon_core::{Action, ActionType, ExecutionId};

use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub execution_id: ExecutionId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
}

pub struct NotificationHandler {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHandler {
    pub fn new(sender: broadcast::Sender<Notification>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ActionHandler for NotificationHandler {
    fn action_type(&self) -> ActionType {
        ActionType::SendNotification
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<Value, ActionError> {
        let Action::SendNotification(config) = &ctx.action else {
            return Err(ActionError::InvalidConfig(format!(
                "send_notification handler received {}",
                ctx.action.action_type()
            )));
        };

        let notification = Notification {
            execution_id: ctx.execution_id,
            title: config.title.clone(),
            body: config.body.clone(),
            chat_id: ctx.event.chat_id.clone(),
            created_at: Utc::now(),
        };

        // No subscribers is not a failure; the notification is simply dropped.
        let delivered = self.sender.send(notification).unwrap_or(0);
        tracing::info!(title = %config.title, delivered, "Notification published");

        Ok(serde_json::json!({ "delivered": delivered }))
    }

    fn describe(&self, action: &Action) -> String {
        match action {
            Action::SendNotification(config) => format!("Notify: {}", config.title),
            other => format!("Unsupported action: {}", other.action_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{NotificationConfig, TriggerEvent};

    fn ctx(title: &str) -> ActionContext {
        ActionContext {
            execution_id: ExecutionId::new(),
            action: Action::SendNotification(NotificationConfig {
                title: title.to_string(),
                body: Some("check the chat".to_string()),
            }),
            event: TriggerEvent::message("inst", "chat-9", "#urgent"),
        }
    }

    #[tokio::test]
    async fn test_notification_reaches_subscriber() {
        let (tx, mut rx) = broadcast::channel(8);
        let handler = NotificationHandler::new(tx);
        let ctx = ctx("Urgent message");

        let result = handler.execute(&ctx).await.unwrap();
        assert_eq!(result["delivered"], 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.title, "Urgent message");
        assert_eq!(received.chat_id, "chat-9");
        assert_eq!(received.execution_id, ctx.execution_id);
    }

    #[tokio::test]
    async fn test_notification_without_subscribers_succeeds() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let handler = NotificationHandler::new(tx);
        let result = handler.execute(&ctx("Nobody listening")).await.unwrap();
        assert_eq!(result["delivered"], 0);
    }

    #[test]
    fn test_describe() {
        let (tx, _) = broadcast::channel(1);
        let handler = NotificationHandler::new(tx);
        assert_eq!(handler.describe(&ctx("Hi").action), "Notify: Hi");
    }
}
