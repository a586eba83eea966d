//! Context Window Management
//!
//! Selects the slice of session history handed to the language model so
//! prompts stay bounded no matter how long a session runs.

use crate::memory::store::{ConversationHistory, ConversationMessage};
use tracing::debug;

/// Configuration for context window management
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Token budget for history included in a prompt
    pub max_context_tokens: usize,
    /// Number of recent messages considered
    pub preserve_recent_count: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 4_000,
            preserve_recent_count: 10,
        }
    }
}

/// Picks the recent-history window for LLM calls
#[derive(Debug, Clone)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new() -> Self {
        Self {
            config: ContextConfig::default(),
        }
    }

    pub fn with_config(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Recent messages within the token budget, oldest first.
    ///
    /// Walks backwards from the newest message and stops at the first one
    /// that would overflow the budget, so the window is always contiguous.
    pub fn prepare_context_for_llm<'a>(
        &self,
        history: &'a ConversationHistory,
    ) -> &'a [ConversationMessage] {
        let recent = history.recent_messages(self.config.preserve_recent_count);

        let mut used = 0usize;
        let mut keep = 0usize;
        for msg in recent.iter().rev() {
            if used + msg.token_count > self.config.max_context_tokens {
                break;
            }
            used += msg.token_count;
            keep += 1;
        }

        debug!(
            window = keep,
            tokens = used,
            total_messages = history.message_count(),
            "Prepared LLM context window"
        );

        &recent[recent.len() - keep..]
    }

    /// Get percentage of the token budget the whole history would use
    pub fn get_context_usage_percent(&self, history: &ConversationHistory) -> f32 {
        (history.total_tokens() as f32 / self.config.max_context_tokens as f32) * 100.0
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::ConversationMessage;

    #[test]
    fn test_context_manager_creation() {
        let manager = ContextManager::new();
        assert_eq!(manager.config().preserve_recent_count, 10);
    }

    #[test]
    fn test_prepare_context_for_llm() {
        let manager = ContextManager::new();
        let mut history = ConversationHistory::new("s");

        for i in 0..15 {
            history.add_message(ConversationMessage::user(format!("Question {}", i)));
        }

        let context = manager.prepare_context_for_llm(&history);
        assert_eq!(context.len(), 10);
        assert_eq!(context.last().map(|m| m.content.as_str()), Some("Question 14"));
    }

    #[test]
    fn test_token_budget_trims_oldest() {
        let manager = ContextManager::with_config(ContextConfig {
            max_context_tokens: 30,
            preserve_recent_count: 10,
        });
        let mut history = ConversationHistory::new("s");

        for i in 0..5 {
            // 40 chars ≈ 10 tokens each
            history.add_message(ConversationMessage::user(format!("{:0>40}", i)));
        }

        let context = manager.prepare_context_for_llm(&history);
        assert_eq!(context.len(), 3);
        assert!(context[2].content.ends_with('4'));
        assert!(manager.get_context_usage_percent(&history) > 100.0);
    }
}
