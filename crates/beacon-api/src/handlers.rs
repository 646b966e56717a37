//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! calls into the repositories or the engine, and returns JSON.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use beacon_core::event::extract_hashtags;
use beacon_core::{ActionRule, EngineStats, ExecutionRecord, ExecutionStatus, RuleDraft, RuleId, TriggerEvent};
use beacon_engine::{DryRun, RuleReport};
use beacon_storage::ExecutionFilters;

use crate::error::ApiError;
use crate::state::AppState;

/// Upper bound on `limit` for the execution log.
const MAX_PAGE_SIZE: u32 = 500;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RuleListParams {
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionParams {
    pub rule_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// An inbound event as posted by an instance bridge or a test client.
///
/// Only `instance_id` and `chat_id` are required. Hashtags are extracted
/// from `content` when not supplied.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub instance_id: String,
    pub chat_id: String,
    pub message_id: Option<String>,
    #[serde(default)]
    pub sender_jid: String,
    #[serde(default)]
    pub is_from_account_owner: bool,
    #[serde(default)]
    pub content: String,
    pub hashtags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub keywords_detected: BTreeSet<String>,
    pub reaction_emoji: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventRequest {
    pub fn into_event(self) -> TriggerEvent {
        let hashtags = match self.hashtags {
            Some(tags) => tags,
            None => extract_hashtags(&self.content),
        };
        let event = TriggerEvent {
            instance_id: self.instance_id,
            chat_id: self.chat_id,
            message_id: self
                .message_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            sender_jid: self.sender_jid,
            is_from_account_owner: self.is_from_account_owner,
            content: self.content,
            hashtags: BTreeSet::new(),
            keywords_detected: self.keywords_detected,
            reaction_emoji: self.reaction_emoji,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        };
        // Normalizes the supplied tags the same way extraction does.
        event.with_hashtags(hashtags)
    }
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub accepting_events: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RulesResponse {
    pub rules: Vec<ActionRule>,
    pub total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionsResponse {
    pub executions: Vec<ExecutionRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub outcomes: Vec<RuleReport>,
}

fn parse_rule_id(raw: &str) -> Result<RuleId, ApiError> {
    raw.parse::<RuleId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid rule id '{}': {}", raw, e)))
}

fn load_rule(state: &AppState, id: RuleId) -> Result<ActionRule, ApiError> {
    state
        .rules
        .get(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Rule {} not found", id)))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        accepting_events: state.engine.is_accepting(),
    })
}

// =============================================================================
// Rules
// =============================================================================

/// GET /rules?active=true|false
pub async fn list_rules(
    State(state): State<AppState>,
    Query(params): Query<RuleListParams>,
) -> Result<Json<RulesResponse>, ApiError> {
    let rules = state.rules.list(params.active)?;
    Ok(Json(RulesResponse {
        total: rules.len() as u64,
        rules,
    }))
}

/// POST /rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(draft): Json<RuleDraft>,
) -> Result<(StatusCode, Json<ActionRule>), ApiError> {
    let rule = ActionRule::from_draft(draft, Utc::now())?;
    state.rules.create(&rule)?;
    tracing::info!(rule_id = %rule.id, name = %rule.name, "Rule created");
    Ok((StatusCode::CREATED, Json(rule)))
}

/// GET /rules/{id}
pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionRule>, ApiError> {
    let id = parse_rule_id(&id)?;
    Ok(Json(load_rule(&state, id)?))
}

/// PUT /rules/{id} - replace the definition; counters are kept.
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<RuleDraft>,
) -> Result<Json<ActionRule>, ApiError> {
    let id = parse_rule_id(&id)?;
    let mut rule = load_rule(&state, id)?;
    rule.apply_draft(draft, Utc::now())?;
    state.rules.update(&rule)?;
    tracing::info!(rule_id = %rule.id, "Rule updated");
    Ok(Json(rule))
}

/// DELETE /rules/{id}
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_rule_id(&id)?;
    if !state.rules.delete(id)? {
        return Err(ApiError::NotFound(format!("Rule {} not found", id)));
    }
    state.engine.forget_rule(id);
    tracing::info!(rule_id = %id, "Rule deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rules/{id}/toggle
pub async fn toggle_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionRule>, ApiError> {
    let id = parse_rule_id(&id)?;
    let rule = state.rules.toggle(id, Utc::now())?;
    tracing::info!(rule_id = %id, is_active = rule.is_active, "Rule toggled");
    Ok(Json(rule))
}

/// POST /rules/{id}/test - dry-run against a synthetic event.
pub async fn test_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EventRequest>,
) -> Result<Json<DryRun>, ApiError> {
    let id = parse_rule_id(&id)?;
    let rule = load_rule(&state, id)?;
    Ok(Json(state.engine.test_rule(&rule, &body.into_event())))
}

// =============================================================================
// Stats and execution log
// =============================================================================

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<EngineStats>, ApiError> {
    Ok(Json(state.executions.stats(Utc::now())?))
}

/// GET /executions?rule_id=&status=&limit=&offset=
pub async fn list_executions(
    State(state): State<AppState>,
    Query(params): Query<ExecutionParams>,
) -> Result<Json<ExecutionsResponse>, ApiError> {
    let rule_id = params
        .rule_id
        .as_deref()
        .map(parse_rule_id)
        .transpose()?;
    let status = params
        .status
        .as_deref()
        .map(|s| s.parse::<ExecutionStatus>())
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let defaults = ExecutionFilters::default();
    let filters = ExecutionFilters {
        rule_id,
        status,
        limit: params.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
        offset: params.offset.unwrap_or(0),
    };

    let executions = state.executions.query(&filters)?;
    let total = state.executions.count(&filters)?;
    Ok(Json(ExecutionsResponse {
        executions,
        total,
        limit: filters.limit,
        offset: filters.offset,
    }))
}

// =============================================================================
// Event ingestion
// =============================================================================

/// POST /events - evaluate one event and return per-rule outcomes.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(body): Json<EventRequest>,
) -> Result<Json<EventResponse>, ApiError> {
    if body.instance_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "'instance_id' must not be empty".to_string(),
        ));
    }
    let event = body.into_event();
    let outcomes = state.engine.process_event(&event).await?;
    Ok(Json(EventResponse { outcomes }))
}
