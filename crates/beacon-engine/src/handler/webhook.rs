//! `webhook` handler.
//!
//! Sends the rendered request with an `Idempotency-Key` header carrying the
//! execution id, so receivers can collapse retried deliveries.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use beacon_core::{Action, ActionType, WebhookConfig};

use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};

/// Longest response body kept in the execution result.
const MAX_RESPONSE_CHARS: usize = 4 * 1024;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct WebhookHandler {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl WebhookHandler {
    pub fn new(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }

    fn effective_timeout(&self, config: &WebhookConfig) -> Duration {
        config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }
}

/// Map a response status to the retry taxonomy.
pub fn classify_status(status: reqwest::StatusCode) -> Result<(), ActionError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("webhook returned HTTP {}", status.as_u16());
    if status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        Err(ActionError::Transient(message))
    } else {
        Err(ActionError::Permanent(message))
    }
}

fn classify_send_error(err: reqwest::Error, timeout: Duration) -> ActionError {
    if err.is_timeout() {
        ActionError::Timeout(timeout.as_millis() as u64)
    } else if err.is_builder() {
        ActionError::InvalidConfig(format!("invalid webhook request: {}", err))
    } else {
        ActionError::Transient(format!("webhook request failed: {}", err))
    }
}

fn truncate(body: String) -> String {
    if body.chars().count() <= MAX_RESPONSE_CHARS {
        return body;
    }
    body.chars().take(MAX_RESPONSE_CHARS).collect()
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Webhook
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<Value, ActionError> {
        let Action::Webhook(config) = &ctx.action else {
            return Err(ActionError::InvalidConfig(format!(
                "webhook handler received {}",
                ctx.action.action_type()
            )));
        };

        let url = reqwest::Url::parse(&config.url)
            .map_err(|e| ActionError::InvalidConfig(format!("invalid URL: {}", e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ActionError::InvalidConfig(format!(
                "URL scheme '{}' not allowed",
                url.scheme()
            )));
        }
        let method = config
            .method
            .to_ascii_uppercase()
            .parse::<reqwest::Method>()
            .map_err(|e| {
                ActionError::InvalidConfig(format!("invalid HTTP method '{}': {}", config.method, e))
            })?;
        let timeout = self.effective_timeout(config);

        let mut request = self
            .client
            .request(method, url)
            .timeout(timeout)
            .header(IDEMPOTENCY_HEADER, ctx.execution_id.to_string());
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match &config.body {
            Some(body) => request.body(body.clone()),
            None => request.json(&ctx.event),
        };

        let response = request
            .send()
            .await
            .map_err(|e| classify_send_error(e, timeout))?;
        let status = response.status();
        classify_status(status)?;

        let text = response
            .text()
            .await
            .map_err(|e| classify_send_error(e, timeout))?;
        let body = serde_json::from_str::<Value>(&text)
            .unwrap_or_else(|_| Value::String(truncate(text)));

        tracing::info!(
            execution_id = %ctx.execution_id,
            status = status.as_u16(),
            "Webhook delivered"
        );
        Ok(serde_json::json!({
            "status": status.as_u16(),
            "body": body,
        }))
    }

    fn describe(&self, action: &Action) -> String {
        match action {
            Action::Webhook(config) => {
                format!("{} {}", config.method.to_ascii_uppercase(), config.url)
            }
            other => format!("Unsupported action: {}", other.action_type()),
        }
    }

    fn timeout(&self, action: &Action) -> Option<Duration> {
        match action {
            // Leave headroom so reqwest's own timeout fires first.
            Action::Webhook(config) => Some(self.effective_timeout(config) + Duration::from_secs(1)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use beacon_core::{ExecutionId, TriggerEvent};

    #[derive(Clone, Default)]
    struct Received {
        hits: Arc<AtomicU32>,
        keys: Arc<Mutex<Vec<String>>>,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn spawn_server() -> (String, Received) {
        let received = Received::default();
        let app = Router::new()
            .route(
                "/ok",
                post(
                    |State(r): State<Received>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        r.hits.fetch_add(1, Ordering::SeqCst);
                        if let Some(key) = headers.get(IDEMPOTENCY_HEADER) {
                            r.keys.lock().unwrap().push(key.to_str().unwrap().to_string());
                        }
                        r.bodies.lock().unwrap().push(body);
                        Json(serde_json::json!({"accepted": true}))
                    },
                ),
            )
            .route("/missing", post(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/busy",
                post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), received)
    }

    fn ctx(url: String, method: &str, body: Option<&str>) -> ActionContext {
        ActionContext {
            execution_id: ExecutionId::new(),
            action: Action::Webhook(WebhookConfig {
                url,
                method: method.to_string(),
                headers: BTreeMap::new(),
                body: body.map(str::to_string),
                timeout_secs: None,
            }),
            event: TriggerEvent::message("inst", "chat", "ship it #deploy"),
        }
    }

    fn handler() -> WebhookHandler {
        WebhookHandler::new(reqwest::Client::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_posts_event_with_idempotency_key() {
        let (base, received) = spawn_server().await;
        let ctx = ctx(format!("{}/ok", base), "post", None);

        let result = handler().execute(&ctx).await.unwrap();
        assert_eq!(result["status"], 200);
        assert_eq!(result["body"]["accepted"], true);

        assert_eq!(received.hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            received.keys.lock().unwrap().as_slice(),
            &[ctx.execution_id.to_string()]
        );
        let bodies = received.bodies.lock().unwrap();
        assert_eq!(bodies[0]["content"], "ship it #deploy");
    }

    #[tokio::test]
    async fn test_explicit_body_is_sent_verbatim() {
        let (base, received) = spawn_server().await;
        let mut ctx = ctx(format!("{}/ok", base), "POST", Some(r#"{"text": "hello"}"#));
        if let Action::Webhook(config) = &mut ctx.action {
            config
                .headers
                .insert("Content-Type".to_string(), "application/json".to_string());
        }
        handler().execute(&ctx).await.unwrap();
        assert_eq!(received.bodies.lock().unwrap()[0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let (base, _) = spawn_server().await;
        let err = handler()
            .execute(&ctx(format!("{}/missing", base), "POST", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Permanent(_)));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let (base, _) = spawn_server().await;
        let err = handler()
            .execute(&ctx(format!("{}/busy", base), "POST", None))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let (base, _) = spawn_server().await;
        let handler = WebhookHandler::new(reqwest::Client::new(), Duration::from_millis(100));
        let err = handler
            .execute(&ctx(format!("{}/slow", base), "GET", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Timeout(100)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let err = handler()
            .execute(&ctx("http://127.0.0.1:1/".to_string(), "POST", None))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_bad_url_is_invalid_config() {
        let err = handler()
            .execute(&ctx("not a url".to_string(), "POST", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));
    }

    #[test]
    fn test_classify_status() {
        use reqwest::StatusCode;
        assert!(classify_status(StatusCode::NO_CONTENT).is_ok());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS)
            .unwrap_err()
            .is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT)
            .unwrap_err()
            .is_transient());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY)
            .unwrap_err()
            .is_transient());
    }
}
