//! Action types and their configuration payloads.
//!
//! `Action` pairs the closed `ActionType` vocabulary with the matching
//! configuration struct, so a rule can never hold a `webhook` type with a
//! task-shaped config: the mismatch fails to deserialize.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BeaconError, Result};

// =============================================================================
// Enums
// =============================================================================

/// The closed set of side-effecting actions a rule can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateTask,
    CreateProject,
    CreateNote,
    StoreFile,
    CreateDocument,
    CreateCalendarEvent,
    SendMessage,
    AddLabel,
    UpdateContact,
    MoveToFolder,
    SendNotification,
    Webhook,
    CreateSpace,
    UpdateProjectStatus,
    CreateChecklist,
    AssignToSpace,
    CreateFinancialRecord,
    ScheduleMeeting,
    CreateInvoice,
    UpdateTaskPriority,
}

impl ActionType {
    pub const ALL: [ActionType; 20] = [
        ActionType::CreateTask,
        ActionType::CreateProject,
        ActionType::CreateNote,
        ActionType::StoreFile,
        ActionType::CreateDocument,
        ActionType::CreateCalendarEvent,
        ActionType::SendMessage,
        ActionType::AddLabel,
        ActionType::UpdateContact,
        ActionType::MoveToFolder,
        ActionType::SendNotification,
        ActionType::Webhook,
        ActionType::CreateSpace,
        ActionType::UpdateProjectStatus,
        ActionType::CreateChecklist,
        ActionType::AssignToSpace,
        ActionType::CreateFinancialRecord,
        ActionType::ScheduleMeeting,
        ActionType::CreateInvoice,
        ActionType::UpdateTaskPriority,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreateTask => "create_task",
            ActionType::CreateProject => "create_project",
            ActionType::CreateNote => "create_note",
            ActionType::StoreFile => "store_file",
            ActionType::CreateDocument => "create_document",
            ActionType::CreateCalendarEvent => "create_calendar_event",
            ActionType::SendMessage => "send_message",
            ActionType::AddLabel => "add_label",
            ActionType::UpdateContact => "update_contact",
            ActionType::MoveToFolder => "move_to_folder",
            ActionType::SendNotification => "send_notification",
            ActionType::Webhook => "webhook",
            ActionType::CreateSpace => "create_space",
            ActionType::UpdateProjectStatus => "update_project_status",
            ActionType::CreateChecklist => "create_checklist",
            ActionType::AssignToSpace => "assign_to_space",
            ActionType::CreateFinancialRecord => "create_financial_record",
            ActionType::ScheduleMeeting => "schedule_meeting",
            ActionType::CreateInvoice => "create_invoice",
            ActionType::UpdateTaskPriority => "update_task_priority",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown action type: {}", s))
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Direction of a financial record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Income,
    #[default]
    Expense,
}

fn default_duration_minutes() -> u32 {
    30
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_method() -> String {
    "POST".to_string()
}

// =============================================================================
// Configuration payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_in_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
}

/// Stores the triggering message's attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentConfig {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalendarEventConfig {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Minutes after the triggering event; 0 starts at the event time.
    #[serde(default)]
    pub start_in_minutes: u32,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageConfig {
    pub message: String,
    /// Target chat; defaults to the chat the event came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelConfig {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactUpdateConfig {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderConfig {
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Request body; when absent the event snapshot is sent as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpaceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectStatusConfig {
    pub project_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChecklistConfig {
    pub title: String,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpaceAssignmentConfig {
    pub space_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinancialRecordConfig {
    pub description: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub kind: RecordKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeetingConfig {
    pub title: String,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_in_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvoiceConfig {
    pub client: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_in_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskPriorityConfig {
    pub task_id: String,
    pub priority: Priority,
}

// =============================================================================
// Action
// =============================================================================

/// An action type together with its configuration.
///
/// Serialized as `{"action_type": "...", "action_config": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", content = "action_config", rename_all = "snake_case")]
pub enum Action {
    CreateTask(TaskConfig),
    CreateProject(ProjectConfig),
    CreateNote(NoteConfig),
    StoreFile(FileConfig),
    CreateDocument(DocumentConfig),
    CreateCalendarEvent(CalendarEventConfig),
    SendMessage(MessageConfig),
    AddLabel(LabelConfig),
    UpdateContact(ContactUpdateConfig),
    MoveToFolder(FolderConfig),
    SendNotification(NotificationConfig),
    Webhook(WebhookConfig),
    CreateSpace(SpaceConfig),
    UpdateProjectStatus(ProjectStatusConfig),
    CreateChecklist(ChecklistConfig),
    AssignToSpace(SpaceAssignmentConfig),
    CreateFinancialRecord(FinancialRecordConfig),
    ScheduleMeeting(MeetingConfig),
    CreateInvoice(InvoiceConfig),
    UpdateTaskPriority(TaskPriorityConfig),
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self {
            Action::CreateTask(_) => ActionType::CreateTask,
            Action::CreateProject(_) => ActionType::CreateProject,
            Action::CreateNote(_) => ActionType::CreateNote,
            Action::StoreFile(_) => ActionType::StoreFile,
            Action::CreateDocument(_) => ActionType::CreateDocument,
            Action::CreateCalendarEvent(_) => ActionType::CreateCalendarEvent,
            Action::SendMessage(_) => ActionType::SendMessage,
            Action::AddLabel(_) => ActionType::AddLabel,
            Action::UpdateContact(_) => ActionType::UpdateContact,
            Action::MoveToFolder(_) => ActionType::MoveToFolder,
            Action::SendNotification(_) => ActionType::SendNotification,
            Action::Webhook(_) => ActionType::Webhook,
            Action::CreateSpace(_) => ActionType::CreateSpace,
            Action::UpdateProjectStatus(_) => ActionType::UpdateProjectStatus,
            Action::CreateChecklist(_) => ActionType::CreateChecklist,
            Action::AssignToSpace(_) => ActionType::AssignToSpace,
            Action::CreateFinancialRecord(_) => ActionType::CreateFinancialRecord,
            Action::ScheduleMeeting(_) => ActionType::ScheduleMeeting,
            Action::CreateInvoice(_) => ActionType::CreateInvoice,
            Action::UpdateTaskPriority(_) => ActionType::UpdateTaskPriority,
        }
    }

    /// The configuration payload alone, as JSON.
    pub fn config_value(&self) -> Result<Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("action_config")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Rebuild an action from its type and configuration JSON.
    ///
    /// Fails when the configuration does not have the shape `action_type`
    /// requires.
    pub fn from_parts(action_type: ActionType, config: Value) -> Result<Self> {
        let tagged = serde_json::json!({
            "action_type": action_type,
            "action_config": config,
        });
        serde_json::from_value(tagged).map_err(|e| {
            BeaconError::Validation(format!(
                "action_config does not match action_type '{}': {}",
                action_type, e
            ))
        })
    }

    /// Check required fields.
    ///
    /// Runs when a rule is created or updated and again on the rendered
    /// configuration right before dispatch.
    pub fn validate(&self) -> Result<()> {
        match self {
            Action::CreateTask(c) => require("title", &c.title),
            Action::CreateProject(c) => require("name", &c.name),
            Action::CreateNote(c) => require("content", &c.content),
            Action::StoreFile(_) => Ok(()),
            Action::CreateDocument(c) => require("title", &c.title),
            Action::CreateCalendarEvent(c) => {
                require("title", &c.title)?;
                positive("duration_minutes", c.duration_minutes)
            }
            Action::SendMessage(c) => require("message", &c.message),
            Action::AddLabel(c) => require("label", &c.label),
            Action::UpdateContact(c) => {
                require("field", &c.field)?;
                require("value", &c.value)
            }
            Action::MoveToFolder(c) => require("folder", &c.folder),
            Action::SendNotification(c) => require("title", &c.title),
            Action::Webhook(c) => validate_webhook(c),
            Action::CreateSpace(c) => require("name", &c.name),
            Action::UpdateProjectStatus(c) => {
                require("project_id", &c.project_id)?;
                require("status", &c.status)
            }
            Action::CreateChecklist(c) => require("title", &c.title),
            Action::AssignToSpace(c) => require("space_id", &c.space_id),
            Action::CreateFinancialRecord(c) => {
                require("description", &c.description)?;
                require("currency", &c.currency)?;
                positive_amount(c.amount)
            }
            Action::ScheduleMeeting(c) => {
                require("title", &c.title)?;
                positive("duration_minutes", c.duration_minutes)
            }
            Action::CreateInvoice(c) => {
                require("client", &c.client)?;
                require("currency", &c.currency)?;
                positive_amount(c.amount)
            }
            Action::UpdateTaskPriority(c) => require("task_id", &c.task_id),
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BeaconError::Validation(format!(
            "action_config.{} must not be empty",
            field
        )));
    }
    Ok(())
}

fn positive(field: &str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(BeaconError::Validation(format!(
            "action_config.{} must be greater than zero",
            field
        )));
    }
    Ok(())
}

fn positive_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(BeaconError::Validation(
            "action_config.amount must be a positive number".to_string(),
        ));
    }
    Ok(())
}

fn validate_webhook(config: &WebhookConfig) -> Result<()> {
    require("url", &config.url)?;
    // A fully templated URL can only be checked once rendered.
    let templated = config.url.contains("{{");
    if !templated && !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
        return Err(BeaconError::Validation(
            "action_config.url must use http or https".to_string(),
        ));
    }
    match config.method.to_ascii_uppercase().as_str() {
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" => {}
        other => {
            return Err(BeaconError::Validation(format!(
                "action_config.method '{}' is not supported",
                other
            )))
        }
    }
    if config.timeout_secs == Some(0) {
        return Err(BeaconError::Validation(
            "action_config.timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
