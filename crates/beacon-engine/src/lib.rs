//! Rule evaluation and action dispatch for Beacon.
//!
//! Matches incoming chat events against stored rules, enforces per-rule
//! cooldowns and rolling daily caps, renders action templates and
//! dispatches the result through pluggable handlers.

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod governor;
pub mod handler;
pub mod matcher;
pub mod recorder;
pub mod template;

pub use dispatcher::{DispatchReport, Dispatcher, RetryPolicy};
pub use engine::{DryRun, Engine, RuleReport};
pub use error::{ActionError, EngineError};
pub use governor::{Admission, Governor, SkipReason};
pub use handler::{ActionContext, ActionHandler, ActionRegistry, HandlerDeps};
pub use matcher::{evaluate, match_rules, ConditionOracle, MatchVerdict, MissReason, NoOracle};
pub use recorder::{ExecutionRecorder, RuleSource};
pub use template::{render, render_action, render_url};
