//! Conversation history storage
//!
//! Stores session messages with timestamps and metadata. History is
//! append-only: there is no way to rewrite or drop an entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Unknown roles read back from storage are treated as user text.
    pub fn parse(role: &str) -> Self {
        match role.to_lowercase().as_str() {
            "assistant" | "agent" | "ai" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

/// A single message in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
    /// Approximate token count for context window management
    pub token_count: usize,
    /// Optional metadata about message type (question, answer, ...)
    pub message_type: Option<String>,
}

impl ConversationMessage {
    /// Create a new conversation message
    pub fn new(role: MessageRole, content: String, message_type: Option<String>) -> Self {
        let token_count = estimate_tokens(&content);

        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content,
            token_count,
            message_type,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into(), Some("question".to_string()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content.into(), Some("answer".to_string()))
    }
}

pub(crate) fn estimate_tokens(content: &str) -> usize {
    (content.len() + 3) / 4
}

/// Conversation history for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: Vec<ConversationMessage>,
    /// Total token count (approximate)
    total_tokens: usize,
}

impl ConversationHistory {
    /// Create an empty history
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            messages: Vec::new(),
            total_tokens: 0,
        }
    }

    /// Append a message
    pub fn add_message(&mut self, message: ConversationMessage) {
        self.total_tokens += message.token_count;
        if self.messages.is_empty() {
            self.created_at = message.timestamp;
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    // =============================
    // Views
    // =============================

    pub fn as_slice(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// The `count` most recent messages, oldest first
    pub fn recent_messages(&self, count: usize) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// User utterances, most recent first
    pub fn user_turns_rev(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// Get total token count
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// Get message count
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_message_creation() {
        let msg = ConversationMessage::user("What was the close of AAPL on 2025-06-12?");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.message_type.as_deref(), Some("question"));
        assert!(msg.token_count > 0);
    }

    #[test]
    fn test_conversation_history() {
        let mut history = ConversationHistory::new("session-1");

        history.add_message(ConversationMessage::user("Hi there!"));
        history.add_message(ConversationMessage::assistant("Hello! Ask me about stocks."));

        assert_eq!(history.message_count(), 2);
        assert!(history.total_tokens() > 0);
        assert_eq!(history.user_turns_rev().next(), Some("Hi there!"));
    }

    #[test]
    fn test_recent_messages_keeps_order() {
        let mut history = ConversationHistory::new("session-1");

        for i in 0..10 {
            history.add_message(ConversationMessage::user(format!("Question {}", i)));
        }

        let recent = history.recent_messages(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "Question 7");
        assert_eq!(recent[2].content, "Question 9");
        assert_eq!(history.recent_messages(50).len(), 10);
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(MessageRole::parse("agent"), MessageRole::Assistant);
        assert_eq!(MessageRole::parse("ASSISTANT"), MessageRole::Assistant);
        assert_eq!(MessageRole::parse("system"), MessageRole::User);
    }
}
