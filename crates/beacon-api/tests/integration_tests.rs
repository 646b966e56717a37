//! Integration tests for the Beacon control API.
//!
//! Each test builds its own in-memory database, engine and router and
//! drives it with `oneshot` requests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use beacon_api::create_router;
use beacon_api::handlers::{ExecutionsResponse, HealthResponse, RulesResponse};
use beacon_api::state::AppState;
use beacon_core::config::EngineConfig;
use beacon_core::{ActionRule, EngineStats};
use beacon_engine::{ActionRegistry, Engine, HandlerDeps};
use beacon_storage::{Database, ExecutionRepository, RuleRepository};

// =============================================================================
// Helpers
// =============================================================================

fn make_state() -> AppState {
    let db = Arc::new(Database::in_memory().unwrap());
    let rules = Arc::new(RuleRepository::new(db.clone()));
    let executions = Arc::new(ExecutionRepository::new(db));
    let registry = ActionRegistry::with_defaults(&HandlerDeps::in_memory(Duration::from_secs(5)));
    let engine = Arc::new(Engine::new(
        rules.clone(),
        executions.clone(),
        registry,
        &EngineConfig::default(),
    ));
    AppState::new(engine, rules, executions)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

fn todo_rule_json() -> Value {
    json!({
        "name": "Todo to task",
        "trigger": {
            "trigger_type": "hashtag",
            "trigger_conditions": {"tags": ["#Todo"]}
        },
        "action": {
            "action_type": "create_task",
            "action_config": {"title": "Task: {{content}}", "priority": "high"}
        },
        "cooldown_minutes": 0,
        "max_executions_per_day": 2
    })
}

async fn create_todo_rule(state: &AppState) -> ActionRule {
    let resp = create_router(state.clone())
        .oneshot(post_json("/rules", &todo_rule_json()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

fn todo_event(content: &str) -> Value {
    json!({
        "instance_id": "inst-a",
        "chat_id": "120363@g.us",
        "sender_jid": "15550001111@s.whatsapp.net",
        "content": content,
        "hashtags": ["todo"]
    })
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_happy_path() {
    let resp = create_router(make_state())
        .oneshot(get("/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(health.status, "healthy");
    assert!(health.accepting_events);
}

// =============================================================================
// Rule CRUD
// =============================================================================

#[tokio::test]
async fn test_create_and_get_rule() {
    let state = make_state();
    let rule = create_todo_rule(&state).await;
    assert!(rule.is_active);
    assert_eq!(rule.total_executions, 0);

    let resp = create_router(state.clone())
        .oneshot(get(&format!("/rules/{}", rule.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["name"], "Todo to task");
    // Tags are stored normalized.
    assert_eq!(json["trigger"]["trigger_conditions"]["tags"], json!(["todo"]));
    assert_eq!(json["action"]["action_type"], "create_task");
}

#[tokio::test]
async fn test_create_rule_validation_error_returns_422() {
    let mut body = todo_rule_json();
    body["name"] = json!("   ");
    let resp = create_router(make_state())
        .oneshot(post_json("/rules", &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(resp).await;
    assert_eq!(json["error"], "unprocessable_entity");
    assert!(json["message"].as_str().unwrap().contains("name"));
}

#[tokio::test]
async fn test_create_rule_with_mismatched_action_config_is_rejected() {
    let mut body = todo_rule_json();
    body["action"] = json!({
        "action_type": "webhook",
        "action_config": {"title": "not a webhook"}
    });
    let resp = create_router(make_state())
        .oneshot(post_json("/rules", &body))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn test_get_rule_not_found_and_bad_id() {
    let app = create_router(make_state());
    let resp = app
        .clone()
        .oneshot(get(&format!("/rules/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app.oneshot(get("/rules/not-a-uuid")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "bad_request");
}

#[tokio::test]
async fn test_list_rules_filters_by_active() {
    let state = make_state();
    let first = create_todo_rule(&state).await;
    create_todo_rule(&state).await;

    let resp = create_router(state.clone())
        .oneshot(post_empty(&format!("/rules/{}/toggle", first.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["is_active"], false);

    let app = create_router(state);
    let all: RulesResponse =
        serde_json::from_slice(&body_bytes(app.clone().oneshot(get("/rules")).await.unwrap()).await)
            .unwrap();
    assert_eq!(all.total, 2);

    let active: RulesResponse = serde_json::from_slice(
        &body_bytes(app.clone().oneshot(get("/rules?active=true")).await.unwrap()).await,
    )
    .unwrap();
    assert_eq!(active.total, 1);

    let inactive: RulesResponse = serde_json::from_slice(
        &body_bytes(app.oneshot(get("/rules?active=false")).await.unwrap()).await,
    )
    .unwrap();
    assert_eq!(inactive.rules[0].id, first.id);
}

#[tokio::test]
async fn test_update_rule_keeps_identity() {
    let state = make_state();
    let rule = create_todo_rule(&state).await;

    let mut body = todo_rule_json();
    body["name"] = json!("Renamed");
    body["cooldown_minutes"] = json!(15);
    let resp = create_router(state.clone())
        .oneshot(put_json(&format!("/rules/{}", rule.id), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: ActionRule = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(updated.id, rule.id);
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.cooldown_minutes, 15);
    assert_eq!(
        updated.created_at.timestamp_millis(),
        rule.created_at.timestamp_millis()
    );
}

#[tokio::test]
async fn test_delete_rule() {
    let state = make_state();
    let rule = create_todo_rule(&state).await;
    let app = create_router(state);

    let resp = app
        .clone()
        .oneshot(delete(&format!("/rules/{}", rule.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(delete(&format!("/rules/{}", rule.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Dry run
// =============================================================================

#[tokio::test]
async fn test_rule_test_endpoint_has_no_side_effects() {
    let state = make_state();
    let rule = create_todo_rule(&state).await;
    let app = create_router(state.clone());

    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/rules/{}/test", rule.id),
            &json!({"instance_id": "inst-a", "chat_id": "c", "content": "buy milk #todo"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({"would_trigger": true, "action": "Create task: Task: buy milk #todo"})
    );

    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/rules/{}/test", rule.id),
            &json!({"instance_id": "inst-a", "chat_id": "c", "content": "call back #urgent"}),
        ))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["would_trigger"], false);
    assert_eq!(json["reason"], "trigger conditions not met");

    let resp = app.oneshot(get("/executions")).await.unwrap();
    let log: ExecutionsResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(log.total, 0);
    assert_eq!(state.rules.get(rule.id).unwrap().unwrap().total_executions, 0);
}

// =============================================================================
// Events, executions and stats
// =============================================================================

#[tokio::test]
async fn test_event_ingestion_runs_matching_rule() {
    let state = make_state();
    let rule = create_todo_rule(&state).await;
    let app = create_router(state);

    let resp = app
        .clone()
        .oneshot(post_json("/events", &todo_event("buy milk")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let outcomes = json["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["status"], "success");
    assert_eq!(outcomes[0]["rule_id"], rule.id.to_string());
    assert_eq!(outcomes[0]["result"]["title"], "Task: buy milk");

    let resp = app
        .oneshot(get(&format!("/executions?rule_id={}&status=success", rule.id)))
        .await
        .unwrap();
    let log: ExecutionsResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(log.total, 1);
    assert_eq!(log.executions[0].trigger_data.content, "buy milk");
}

#[tokio::test]
async fn test_daily_cap_produces_skipped_record_and_stats() {
    let state = make_state();
    create_todo_rule(&state).await;
    let app = create_router(state);

    for content in ["one", "two", "three"] {
        let resp = app
            .clone()
            .oneshot(post_json("/events", &todo_event(content)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .clone()
        .oneshot(get("/executions?status=skipped"))
        .await
        .unwrap();
    let log: ExecutionsResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(log.total, 1);
    assert!(log.executions[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("daily execution cap"));

    let resp = app.oneshot(get("/stats")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let stats: EngineStats = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(stats.total_rules, 1);
    assert_eq!(stats.active_rules, 1);
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.executions_last_24h, 2);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn test_executions_invalid_status_returns_400() {
    let resp = create_router(make_state())
        .oneshot(get("/executions?status=exploded"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_events_rejected_after_shutdown() {
    let state = make_state();
    state.engine.shutdown();
    let resp = create_router(state)
        .oneshot(post_json("/events", &todo_event("late")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(resp).await["error"], "service_unavailable");
}
