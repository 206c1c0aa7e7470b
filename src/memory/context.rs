//! Conversation Context
//!
//! Turn-level view over a `Session`: appends question/answer pairs, keeps
//! the log bounded, and renders recent turns for prompts.

use super::session::{auto_title, Message, Session, SessionContext};
use super::store::SessionStore;
use crate::models::ResponseSource;
use crate::Result;
use serde_json::Value;

/// Assistant side of a turn
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub text: String,
    pub source: ResponseSource,
    pub is_error: bool,
    /// Overwrites `last_result` when present
    pub result: Option<Value>,
}

impl AssistantReply {
    pub fn conversation(text: &str) -> Self {
        Self {
            text: text.to_string(),
            source: ResponseSource::Conversation,
            is_error: false,
            result: None,
        }
    }

    pub fn data(text: &str, result: Value) -> Self {
        Self {
            text: text.to_string(),
            source: ResponseSource::Dataframe,
            is_error: false,
            result: Some(result),
        }
    }

    /// Data turn that produced no result
    pub fn failed(text: &str) -> Self {
        Self {
            text: text.to_string(),
            source: ResponseSource::Dataframe,
            is_error: true,
            result: None,
        }
    }
}

pub struct ConversationContext {
    session: Session,
    max_history: usize,
}

impl ConversationContext {
    /// `max_history` counts pairs
    pub fn new(mut session: Session, max_history: usize) -> Self {
        let max_history = max_history.max(1);
        session.normalize_history(max_history);
        Self {
            session,
            max_history,
        }
    }

    pub fn load(store: &dyn SessionStore, id: &str, max_history: usize) -> Result<Self> {
        Ok(Self::new(store.get_or_create(id)?, max_history))
    }

    /// Append exactly one user and one assistant message
    pub fn add_turn(&mut self, question: &str, reply: AssistantReply) {
        let messages = &mut self.session.messages;
        messages.push(Message::user(question));
        messages.push(Message::assistant(&reply.text, reply.source, reply.is_error));

        if messages.len() == 2 {
            self.session.metadata.title = auto_title(question);
        }

        let limit = self.max_history * 2;
        while messages.len() > limit {
            messages.drain(..2);
        }

        if let Some(result) = reply.result {
            self.session.context.last_result = Some(result);
        }
        self.session.touch();
    }

    /// The last `limit` complete pairs as "User:"/"System:" lines, oldest first
    pub fn recent_text(&self, limit: usize) -> String {
        let messages = &self.session.messages;
        if messages.is_empty() {
            return String::new();
        }

        let pairs = limit.min(messages.len() / 2);
        let start = messages.len() - pairs * 2;

        let mut text = String::from("Previous conversation:\n");
        for pair in messages[start..].chunks_exact(2) {
            text.push_str(&format!("User: {}\n", pair[0].text));
            text.push_str(&format!("System: {}\n", pair[1].text));
        }
        text
    }

    pub fn context(&self) -> &SessionContext {
        &self.session.context
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn persist(&self, store: &dyn SessionStore) -> Result<()> {
        store.persist(&self.session)
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}
