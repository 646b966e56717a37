//! Canonical trigger events.
//!
//! Raw messaging-platform payloads are normalized into a `TriggerEvent`
//! before they reach the engine. The event is a read-only snapshot: every
//! rule evaluated for it sees exactly the same data.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound occurrence on a messaging instance (message or reaction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub instance_id: String,
    pub chat_id: String,
    pub message_id: String,
    #[serde(default)]
    pub sender_jid: String,
    #[serde(default)]
    pub is_from_account_owner: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub hashtags: BTreeSet<String>,
    #[serde(default)]
    pub keywords_detected: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_emoji: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    /// Build a plain chat message event, extracting hashtags from `content`.
    pub fn message(instance_id: &str, chat_id: &str, content: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            chat_id: chat_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
            sender_jid: String::new(),
            is_from_account_owner: false,
            content: content.to_string(),
            hashtags: extract_hashtags(content),
            keywords_detected: BTreeSet::new(),
            reaction_emoji: None,
            timestamp: Utc::now(),
        }
    }

    /// Build a reaction event on an existing message.
    pub fn reaction(instance_id: &str, chat_id: &str, message_id: &str, emoji: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            sender_jid: String::new(),
            is_from_account_owner: false,
            content: String::new(),
            hashtags: BTreeSet::new(),
            keywords_detected: BTreeSet::new(),
            reaction_emoji: Some(emoji.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_sender(mut self, sender_jid: &str) -> Self {
        self.sender_jid = sender_jid.to_string();
        self
    }

    pub fn from_account_owner(mut self, owner: bool) -> Self {
        self.is_from_account_owner = owner;
        self
    }

    pub fn with_hashtags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hashtags = tags
            .into_iter()
            .map(|t| normalize_tag(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the event carries `tag` (compared after normalization).
    pub fn has_hashtag(&self, tag: &str) -> bool {
        let wanted = normalize_tag(tag);
        self.hashtags.iter().any(|t| normalize_tag(t) == wanted)
    }
}

/// Normalize a hashtag for comparison: trim, strip leading `#`, lowercase.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

/// Extract `#tags` from free text, normalized.
pub fn extract_hashtags(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .filter(|word| word.starts_with('#'))
        .map(|word| {
            word.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        })
        .map(normalize_tag)
        .filter(|t| !t.is_empty())
        .collect()
}
