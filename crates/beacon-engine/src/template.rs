//! Template rendering for action configs.
//!
//! Recognized tokens: `{{sender}}`, `{{content}}`, `{{hashtags}}`,
//! `{{reaction}}`, `{{timestamp}}`, `{{chatId}}`. Substitution is a single
//! pass; substituted text is never rescanned and unknown tokens are kept
//! verbatim.

use chrono::SecondsFormat;
use serde_json::Value;

use beacon_core::{Action, ActionType, TriggerEvent};

use crate::error::ActionError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

fn variable(name: &str, event: &TriggerEvent) -> Option<String> {
    let value = match name {
        "sender" => event.sender_jid.clone(),
        "content" => event.content.clone(),
        "hashtags" => event
            .hashtags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        "reaction" => event.reaction_emoji.clone().unwrap_or_default(),
        "timestamp" => event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        "chatId" => event.chat_id.clone(),
        _ => return None,
    };
    Some(value)
}

/// Render one template string against an event.
pub fn render(template: &str, event: &TriggerEvent) -> String {
    render_with(template, event, |value| value)
}

/// Render a URL template. Substituted values are percent-encoded so
/// message text cannot add query parameters or a fragment.
pub fn render_url(template: &str, event: &TriggerEvent) -> String {
    render_with(template, event, |value| urlencoding::encode(&value).into_owned())
}

fn render_with(template: &str, event: &TriggerEvent, escape: impl Fn(String) -> String) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            // Unterminated: keep the remainder as-is.
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after_open[..end];
        // A stray `{{` earlier in the text: keep it and rescan from the
        // innermost opener.
        if let Some(inner) = name.rfind(OPEN) {
            out.push_str(&rest[start..start + OPEN.len() + inner]);
            rest = &after_open[inner..];
            continue;
        }
        match variable(name, event) {
            Some(value) => out.push_str(&escape(value)),
            None => {
                out.push_str(OPEN);
                out.push_str(name);
                out.push_str(CLOSE);
            }
        }
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

/// Render every string field of a JSON object, recursing into nested
/// objects. Arrays, numbers and booleans pass through unchanged.
pub fn render_value(value: &mut Value, event: &TriggerEvent) {
    match value {
        Value::String(s) => {
            if s.contains(OPEN) {
                *s = render(s, event);
            }
        }
        Value::Object(map) => {
            for field in map.values_mut() {
                render_value(field, event);
            }
        }
        _ => {}
    }
}

/// Materialize an action for one event and re-check its required fields.
///
/// A template that renders a required field empty is a permanent
/// configuration error.
pub fn render_action(action: &Action, event: &TriggerEvent) -> Result<Action, ActionError> {
    let mut config = action
        .config_value()
        .map_err(|e| ActionError::InvalidConfig(e.to_string()))?;

    let url = match config.as_object_mut() {
        Some(map) if action.action_type() == ActionType::Webhook => map.remove("url"),
        _ => None,
    };
    render_value(&mut config, event);
    if let (Some(url), Some(map)) = (url, config.as_object_mut()) {
        let url = match url {
            Value::String(template) => Value::String(render_url(&template, event)),
            other => other,
        };
        map.insert("url".to_string(), url);
    }

    let rendered = Action::from_parts(action.action_type(), config)
        .map_err(|e| ActionError::InvalidConfig(e.to_string()))?;
    rendered
        .validate()
        .map_err(|e| ActionError::InvalidConfig(e.to_string()))?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{MessageConfig, Priority, TaskConfig, WebhookConfig};
    use chrono::{TimeZone, Utc};

    fn event() -> TriggerEvent {
        TriggerEvent::message("inst", "123@g.us", "buy milk #todo #home")
            .with_sender("555@s.whatsapp.net")
            .at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap())
    }

    #[test]
    fn test_all_variables() {
        let e = event();
        assert_eq!(render("{{sender}}", &e), "555@s.whatsapp.net");
        assert_eq!(render("{{content}}", &e), "buy milk #todo #home");
        assert_eq!(render("{{hashtags}}", &e), "home, todo");
        assert_eq!(render("[{{reaction}}]", &e), "[]");
        assert_eq!(render("{{timestamp}}", &e), "2026-03-01T09:30:00Z");
        assert_eq!(render("chat {{chatId}}", &e), "chat 123@g.us");

        let reaction = TriggerEvent::reaction("inst", "c", "m", "🔥");
        assert_eq!(render("{{reaction}}", &reaction), "🔥");
    }

    #[test]
    fn test_plain_text_unchanged_and_deterministic() {
        let e = event();
        let plain = "no tokens here { } }} {";
        assert_eq!(render(plain, &e), plain);
        let t = "Task: {{content}} from {{sender}}";
        assert_eq!(render(t, &e), render(t, &e));
    }

    #[test]
    fn test_unknown_and_case_mismatched_tokens_kept() {
        let e = event();
        assert_eq!(render("{{unknown}}", &e), "{{unknown}}");
        assert_eq!(render("{{Sender}}", &e), "{{Sender}}");
        assert_eq!(render("{{chatid}}", &e), "{{chatid}}");
        assert_eq!(render("a {{sender", &e), "a {{sender");
    }

    #[test]
    fn test_stray_opener_does_not_swallow_token() {
        let e = TriggerEvent::message("inst", "chat", "buy milk");
        assert_eq!(render("Note {{ draft: {{content}}", &e), "Note {{ draft: buy milk");
        assert_eq!(render("{{{{content}}", &e), "{{buy milk");
        assert_eq!(render("a {{ b {{ c {{sender}} d", &e.clone().with_sender("bob")), "a {{ b {{ c bob d");
    }

    #[test]
    fn test_url_values_are_percent_encoded() {
        let e = TriggerEvent::message("inst", "chat", "milk & eggs #todo");
        assert_eq!(
            render_url("https://api.example.com/notes?text={{content}}&src=beacon", &e),
            "https://api.example.com/notes?text=milk%20%26%20eggs%20%23todo&src=beacon"
        );
        assert_eq!(render_url("https://api.example.com/{{unknown}}", &e), "https://api.example.com/{{unknown}}");
    }

    #[test]
    fn test_substitution_is_not_recursive() {
        let e = TriggerEvent::message("inst", "chat", "{{sender}}").with_sender("bob");
        assert_eq!(render("{{content}}", &e), "{{sender}}");
    }

    #[test]
    fn test_render_action_only_touches_strings() {
        let action = Action::CreateTask(TaskConfig {
            title: "Task: {{content}}".to_string(),
            description: Some("from {{sender}}".to_string()),
            priority: Priority::High,
            due_in_minutes: Some(30),
            space_id: None,
        });
        let rendered = render_action(&action, &event()).unwrap();
        match rendered {
            Action::CreateTask(c) => {
                assert_eq!(c.title, "Task: buy milk #todo #home");
                assert_eq!(c.description.as_deref(), Some("from 555@s.whatsapp.net"));
                assert_eq!(c.priority, Priority::High);
                assert_eq!(c.due_in_minutes, Some(30));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_render_action_renders_nested_headers() {
        let action = Action::Webhook(WebhookConfig {
            url: "https://hooks.example.com/{{chatId}}".to_string(),
            method: "POST".to_string(),
            headers: [("X-Sender".to_string(), "{{sender}}".to_string())]
                .into_iter()
                .collect(),
            body: Some("{\"text\": \"{{content}}\"}".to_string()),
            timeout_secs: None,
        });
        match render_action(&action, &event()).unwrap() {
            Action::Webhook(c) => {
                assert_eq!(c.url, "https://hooks.example.com/123%40g.us");
                assert_eq!(c.headers["X-Sender"], "555@s.whatsapp.net");
                assert_eq!(
                    c.body.as_deref(),
                    Some("{\"text\": \"buy milk #todo #home\"}")
                );
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_render_action_rejects_empty_required_field() {
        let action = Action::SendMessage(MessageConfig {
            message: "{{reaction}}".to_string(),
            chat_id: None,
        });
        let err = render_action(&action, &event()).unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));
        assert!(!err.is_transient());
    }
}
