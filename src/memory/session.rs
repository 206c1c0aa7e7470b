//! Session records
//!
//! One `Session` is one durable conversation thread. Its serialized form is
//! the on-disk record: `messages`, `last_access`, `context`, `metadata`.
//! The identifier is the record's key, not part of the document.

use crate::error::PipelineError;
use crate::models::ResponseSource;
use crate::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Characters of the first user message used as the auto title
pub const TITLE_MAX_CHARS: usize = 50;

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn label(&self) -> &'static str {
        match self {
            Sender::User => "User",
            Sender::Assistant => "Assistant",
        }
    }
}

/// Immutable once created; sessions only ever append
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResponseSource>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl Message {
    pub fn user(text: &str) -> Self {
        Self {
            text: text.to_string(),
            sender: Sender::User,
            timestamp: Utc::now(),
            source: None,
            is_error: None,
        }
    }

    pub fn assistant(text: &str, source: ResponseSource, is_error: bool) -> Self {
        Self {
            text: text.to_string(),
            sender: Sender::Assistant,
            timestamp: Utc::now(),
            source: Some(source),
            is_error: Some(is_error),
        }
    }
}

//
// ================= Context & Metadata =================
//

/// Scratch context carried between turns
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionContext {
    /// Result of the most recent data turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    #[serde(default = "Utc::now", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_timestamp"
    )]
    pub imported_at: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn new(title: String) -> Self {
        Self {
            created_at: Utc::now(),
            title,
            tags: Vec::new(),
            imported_at: None,
        }
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new(String::new())
    }
}

//
// ================= Session =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub last_access: DateTime<Utc>,
    #[serde(default)]
    pub context: SessionContext,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Session {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            last_access: Utc::now(),
            context: SessionContext::default(),
            metadata: Metadata::new(default_title(id)),
        }
    }

    /// Parse a stored record, filling the key and a missing title
    pub fn from_record(id: &str, bytes: &[u8]) -> Result<Self> {
        let mut session: Session = serde_json::from_slice(bytes)?;
        session.id = id.to_string();
        if session.metadata.title.is_empty() {
            session.metadata.title = default_title(id);
        }
        Ok(session)
    }

    pub fn to_record(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Build a session from an uploaded record, filling whatever is missing
    pub fn from_import(id: &str, mut record: Value) -> Result<Self> {
        let object = record.as_object_mut().ok_or_else(|| {
            PipelineError::InvalidInput("imported conversation must be a JSON object".to_string())
        })?;
        let now = Utc::now().to_rfc3339();

        object
            .entry("messages")
            .or_insert_with(|| Value::Array(Vec::new()));
        object
            .entry("context")
            .or_insert_with(|| Value::Object(Default::default()));
        object
            .entry("last_access")
            .or_insert_with(|| Value::String(now.clone()));
        object.entry("metadata").or_insert_with(|| {
            serde_json::json!({
                "title": "Imported conversation",
                "created_at": now,
                "tags": ["imported"],
            })
        });

        let mut session: Session = serde_json::from_value(record).map_err(|e| {
            PipelineError::InvalidInput(format!("malformed conversation record: {}", e))
        })?;
        session.id = id.to_string();
        session.metadata.imported_at = Some(Utc::now());
        if session.metadata.title.is_empty() {
            session.metadata.title = "Imported conversation".to_string();
        }
        Ok(session)
    }

    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    /// Keep only user/assistant pairs, newest `max_pairs` of them
    pub fn normalize_history(&mut self, max_pairs: usize) {
        let mut paired = Vec::with_capacity(self.messages.len());
        let mut pending: Option<Message> = None;
        for message in self.messages.drain(..) {
            match message.sender {
                Sender::User => pending = Some(message),
                Sender::Assistant => {
                    if let Some(question) = pending.take() {
                        paired.push(question);
                        paired.push(message);
                    }
                }
            }
        }

        let excess = paired.len().saturating_sub(max_pairs * 2);
        paired.drain(..excess);
        self.messages = paired;
    }

    /// Empty messages and context; metadata survives
    pub fn clear(&mut self) {
        self.messages.clear();
        self.context = SessionContext::default();
        self.touch();
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Tag filter is exact; search is a case-insensitive substring of the
    /// title or of the first three message pairs
    pub fn matches(&self, tag: Option<&str>, search: Option<&str>) -> bool {
        if let Some(tag) = tag {
            if !self.metadata.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        match search {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                self.metadata.title.to_lowercase().contains(&needle)
                    || self
                        .messages
                        .iter()
                        .take(6)
                        .any(|m| m.text.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            title: self.metadata.title.clone(),
            created_at: self.metadata.created_at,
            last_access: self.last_access,
            message_count: self.messages.len(),
            tags: self.metadata.tags.clone(),
        }
    }
}

/// Listing entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub message_count: usize,
    pub tags: Vec<String>,
}

pub fn default_title(id: &str) -> String {
    format!("Conversation {}", id.chars().take(8).collect::<String>())
}

/// First user message, cut to 50 characters with an ellipsis
pub fn auto_title(first_message: &str) -> String {
    if first_message.chars().count() > TITLE_MAX_CHARS {
        let head: String = first_message.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        first_message.to_string()
    }
}

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("Invalid session id regex"))
}

/// Identifiers become file names, so only a safe alphabet is accepted
pub fn validate_id(id: &str) -> Result<()> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(PipelineError::InvalidInput(format!(
            "invalid session id '{}': use 1-128 letters, digits, '-' or '_'",
            id
        )))
    }
}

/// Accepts RFC 3339 or naive ISO-8601 (read as UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}

mod optional_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_str(&value.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw))),
            None => Ok(None),
        }
    }
}
