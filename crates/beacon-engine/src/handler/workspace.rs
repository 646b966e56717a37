//! Workspace actions: tasks, projects, notes, files, calendar entries,
//! labels, contacts, spaces, finance records.
//!
//! The handlers are thin; everything they create goes through a
//! `WorkspaceBackend`, which owns the actual data stores.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use beacon_core::{Action, ActionType, ExecutionId, TriggerEvent};

use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};

/// Backend that applies workspace actions.
#[async_trait]
pub trait WorkspaceBackend: Send + Sync {
    /// Apply `action` for `event`. Calls repeated with the same
    /// `execution_id` must return the first result without creating
    /// anything new.
    async fn perform(
        &self,
        execution_id: ExecutionId,
        action: &Action,
        event: &TriggerEvent,
    ) -> Result<Value, ActionError>;
}

/// Something a workspace action created or changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceEntity {
    pub execution_id: ExecutionId,
    pub action_type: ActionType,
    pub instance_id: String,
    pub chat_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Entities kept by a default [`InMemoryWorkspace`].
pub const DEFAULT_WORKSPACE_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct WorkspaceState {
    results: HashMap<ExecutionId, Value>,
    entities: VecDeque<WorkspaceEntity>,
}

/// Process-local workspace for tests and single-node demos without a
/// workspace service behind them. Keeps the most recent `capacity`
/// entities; older ones, and their idempotency entries, are evicted.
#[derive(Debug)]
pub struct InMemoryWorkspace {
    state: Mutex<WorkspaceState>,
    capacity: usize,
}

impl Default for InMemoryWorkspace {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WORKSPACE_CAPACITY)
    }
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(WorkspaceState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Entities still held, in creation order.
    pub fn entities(&self) -> Vec<WorkspaceEntity> {
        match self.state.lock() {
            Ok(state) => state.entities.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Build the result payload for one workspace action.
fn materialize(
    action: &Action,
    event: &TriggerEvent,
    now: DateTime<Utc>,
) -> Result<Value, ActionError> {
    let value = match action {
        Action::CreateTask(c) => json!({
            "task_id": new_id("task"),
            "title": c.title,
            "priority": c.priority,
            "space_id": c.space_id,
            "due_at": c
                .due_in_minutes
                .map(|m| rfc3339(now + ChronoDuration::minutes(i64::from(m)))),
        }),
        Action::CreateProject(c) => json!({
            "project_id": new_id("project"),
            "name": c.name,
            "space_id": c.space_id,
        }),
        Action::CreateNote(c) => json!({
            "note_id": new_id("note"),
            "title": c.title,
            "length": c.content.chars().count(),
        }),
        Action::StoreFile(c) => json!({
            "file_id": new_id("file"),
            "message_id": event.message_id,
            "folder": c.folder,
            "file_name": c.file_name,
        }),
        Action::CreateDocument(c) => json!({
            "document_id": new_id("doc"),
            "title": c.title,
        }),
        Action::CreateCalendarEvent(c) => {
            let starts_at = now + ChronoDuration::minutes(i64::from(c.start_in_minutes));
            let ends_at = starts_at + ChronoDuration::minutes(i64::from(c.duration_minutes));
            json!({
                "event_id": new_id("event"),
                "title": c.title,
                "starts_at": rfc3339(starts_at),
                "ends_at": rfc3339(ends_at),
            })
        }
        Action::AddLabel(c) => json!({
            "chat_id": event.chat_id,
            "label": c.label,
        }),
        Action::UpdateContact(c) => json!({
            "contact": event.sender_jid,
            "field": c.field,
            "value": c.value,
        }),
        Action::MoveToFolder(c) => json!({
            "chat_id": event.chat_id,
            "folder": c.folder,
        }),
        Action::CreateSpace(c) => json!({
            "space_id": new_id("space"),
            "name": c.name,
        }),
        Action::UpdateProjectStatus(c) => json!({
            "project_id": c.project_id,
            "status": c.status,
        }),
        Action::CreateChecklist(c) => json!({
            "checklist_id": new_id("checklist"),
            "title": c.title,
            "items": c.items.len(),
        }),
        Action::AssignToSpace(c) => json!({
            "chat_id": event.chat_id,
            "space_id": c.space_id,
        }),
        Action::CreateFinancialRecord(c) => json!({
            "record_id": new_id("record"),
            "kind": c.kind,
            "amount": c.amount,
            "currency": c.currency,
        }),
        Action::ScheduleMeeting(c) => {
            let starts_at = now + ChronoDuration::minutes(i64::from(c.start_in_minutes.unwrap_or(0)));
            json!({
                "meeting_id": new_id("meeting"),
                "title": c.title,
                "starts_at": rfc3339(starts_at),
                "ends_at": rfc3339(starts_at + ChronoDuration::minutes(i64::from(c.duration_minutes))),
                "attendees": c.attendees,
            })
        }
        Action::CreateInvoice(c) => json!({
            "invoice_id": new_id("invoice"),
            "client": c.client,
            "amount": c.amount,
            "currency": c.currency,
            "due_at": c
                .due_in_days
                .map(|d| rfc3339(now + ChronoDuration::days(i64::from(d)))),
        }),
        Action::UpdateTaskPriority(c) => json!({
            "task_id": c.task_id,
            "priority": c.priority,
        }),
        Action::SendMessage(_) | Action::SendNotification(_) | Action::Webhook(_) => {
            return Err(ActionError::InvalidConfig(format!(
                "{} is not a workspace action",
                action.action_type()
            )))
        }
    };
    Ok(value)
}

#[async_trait]
impl WorkspaceBackend for InMemoryWorkspace {
    async fn perform(
        &self,
        execution_id: ExecutionId,
        action: &Action,
        event: &TriggerEvent,
    ) -> Result<Value, ActionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ActionError::Transient("workspace lock poisoned".to_string()))?;
        if let Some(existing) = state.results.get(&execution_id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let payload = materialize(action, event, now)?;
        state.entities.push_back(WorkspaceEntity {
            execution_id,
            action_type: action.action_type(),
            instance_id: event.instance_id.clone(),
            chat_id: event.chat_id.clone(),
            payload: payload.clone(),
            created_at: now,
        });
        state.results.insert(execution_id, payload.clone());
        while state.entities.len() > self.capacity {
            if let Some(evicted) = state.entities.pop_front() {
                state.results.remove(&evicted.execution_id);
            }
        }
        Ok(payload)
    }
}

/// Handler for one workspace action type.
pub struct WorkspaceHandler {
    action_type: ActionType,
    backend: Arc<dyn WorkspaceBackend>,
}

impl WorkspaceHandler {
    pub fn new(action_type: ActionType, backend: Arc<dyn WorkspaceBackend>) -> Self {
        Self {
            action_type,
            backend,
        }
    }

    /// Whether `action_type` is served by the workspace backend.
    pub fn serves(action_type: ActionType) -> bool {
        !matches!(
            action_type,
            ActionType::SendMessage | ActionType::SendNotification | ActionType::Webhook
        )
    }
}

#[async_trait]
impl ActionHandler for WorkspaceHandler {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<Value, ActionError> {
        if ctx.action.action_type() != self.action_type {
            return Err(ActionError::InvalidConfig(format!(
                "{} handler received {}",
                self.action_type,
                ctx.action.action_type()
            )));
        }
        let result = self
            .backend
            .perform(ctx.execution_id, &ctx.action, &ctx.event)
            .await?;
        tracing::info!(
            action_type = %self.action_type,
            execution_id = %ctx.execution_id,
            "Workspace action applied"
        );
        Ok(result)
    }

    fn describe(&self, action: &Action) -> String {
        match action {
            Action::CreateTask(c) => format!("Create task: {}", c.title),
            Action::CreateProject(c) => format!("Create project: {}", c.name),
            Action::CreateNote(_) => "Create note".to_string(),
            Action::StoreFile(c) => match &c.folder {
                Some(folder) => format!("Store attachment in {}", folder),
                None => "Store attachment".to_string(),
            },
            Action::CreateDocument(c) => format!("Create document: {}", c.title),
            Action::CreateCalendarEvent(c) => format!("Create calendar event: {}", c.title),
            Action::AddLabel(c) => format!("Label chat '{}'", c.label),
            Action::UpdateContact(c) => format!("Set contact {} = {}", c.field, c.value),
            Action::MoveToFolder(c) => format!("Move chat to {}", c.folder),
            Action::CreateSpace(c) => format!("Create space: {}", c.name),
            Action::UpdateProjectStatus(c) => {
                format!("Set project {} status to {}", c.project_id, c.status)
            }
            Action::CreateChecklist(c) => {
                format!("Create checklist: {} ({} items)", c.title, c.items.len())
            }
            Action::AssignToSpace(c) => format!("Assign chat to space {}", c.space_id),
            Action::CreateFinancialRecord(c) => {
                format!("Record {:.2} {}: {}", c.amount, c.currency, c.description)
            }
            Action::ScheduleMeeting(c) => format!("Schedule meeting: {}", c.title),
            Action::CreateInvoice(c) => {
                format!("Invoice {} for {:.2} {}", c.client, c.amount, c.currency)
            }
            Action::UpdateTaskPriority(c) => {
                format!("Set task {} priority to {:?}", c.task_id, c.priority)
            }
            other => format!("Unsupported action: {}", other.action_type()),
        }
    }
}
