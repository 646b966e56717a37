//! Core domain model for Beacon.
//!
//! Rules, trigger events and execution records shared by the storage,
//! engine and API crates, plus the top-level error and configuration.

pub mod action;
pub mod config;
pub mod error;
pub mod event;
pub mod rule;
pub mod types;

pub use action::{
    Action, ActionType, CalendarEventConfig, ChecklistConfig, ContactUpdateConfig,
    DocumentConfig, FileConfig, FinancialRecordConfig, InvoiceConfig, LabelConfig,
    MeetingConfig, MessageConfig, NoteConfig, NotificationConfig, Priority, ProjectConfig,
    ProjectStatusConfig, RecordKind, SpaceAssignmentConfig, SpaceConfig, TaskConfig,
    TaskPriorityConfig, FolderConfig, WebhookConfig,
};
pub use config::BeaconConfig;
pub use error::{BeaconError, Result};
pub use event::TriggerEvent;
pub use rule::{ActionRule, InstanceFilter, PerformerFilter, RuleDraft, Trigger, TriggerType};
pub use types::*;
