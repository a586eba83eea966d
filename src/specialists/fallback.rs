//! Conversational fallback
//!
//! Last line of response: whatever happens to the language model, the turn
//! still gets a reply.

use crate::collaborators::LanguageModel;
use crate::memory::{ConversationHistory, ContextManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_FALLBACK_REPLY: &str = "I'm not sure I can help with that. Try asking about a \
stock price, like \"What was the close price of AAPL on 2025-06-12?\", or for company news, \
like \"Latest news for Tesla\".";

pub struct FallbackAgent {
    llm: Option<Arc<dyn LanguageModel>>,
    context_manager: ContextManager,
    timeout: Duration,
}

impl FallbackAgent {
    pub fn new(
        llm: Option<Arc<dyn LanguageModel>>,
        context_manager: ContextManager,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            context_manager,
            timeout,
        }
    }

    /// Produce a short conversational reply; never fails
    pub async fn run(&self, question: &str, history: &ConversationHistory) -> String {
        let Some(llm) = &self.llm else {
            return DEFAULT_FALLBACK_REPLY.to_string();
        };

        let window = self.context_manager.prepare_context_for_llm(history);

        match tokio::time::timeout(self.timeout, llm.generate(question, window)).await {
            Ok(Ok(reply)) if !reply.trim().is_empty() => {
                info!(
                    context_messages = window.len(),
                    context_usage_percent = self.context_manager.get_context_usage_percent(history),
                    "Fallback reply generated"
                );
                reply.trim().to_string()
            }
            Ok(Ok(_)) => {
                warn!("Fallback model returned an empty reply, using default");
                DEFAULT_FALLBACK_REPLY.to_string()
            }
            Ok(Err(error)) => {
                warn!("Fallback model failed, using default: {}", error);
                DEFAULT_FALLBACK_REPLY.to_string()
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Fallback model timed out");
                DEFAULT_FALLBACK_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::StubLlm;
    use crate::collaborators::LanguageModel;
    use crate::error::OrchestrationError;
    use crate::memory::ConversationMessage;
    use async_trait::async_trait;

    fn agent(llm: Option<Arc<dyn LanguageModel>>) -> FallbackAgent {
        FallbackAgent::new(llm, ContextManager::new(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_model_reply_is_used() {
        let reply = agent(Some(Arc::new(StubLlm::replying("  Hello! How can I help?  "))))
            .run("Hi there!", &ConversationHistory::new("s"))
            .await;
        assert_eq!(reply, "Hello! How can I help?");
    }

    #[tokio::test]
    async fn test_failures_fall_back_to_default() {
        let history = ConversationHistory::new("s");

        assert_eq!(agent(None).run("Hi", &history).await, DEFAULT_FALLBACK_REPLY);
        assert_eq!(
            agent(Some(Arc::new(StubLlm::down()))).run("Hi", &history).await,
            DEFAULT_FALLBACK_REPLY
        );
        assert_eq!(
            agent(Some(Arc::new(StubLlm::replying("   ")))).run("Hi", &history).await,
            DEFAULT_FALLBACK_REPLY
        );
    }

    struct SlowLlm;

    #[async_trait]
    impl LanguageModel for SlowLlm {
        async fn classify(&self, _text: &str) -> crate::Result<crate::models::RouteLabel> {
            Err(OrchestrationError::ServiceUnavailable("unused".into()))
        }

        async fn generate(&self, _prompt: &str, history: &[ConversationMessage]) -> crate::Result<String> {
            assert!(!history.is_empty());
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".into())
        }
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_default() {
        let mut history = ConversationHistory::new("s");
        history.add_message(ConversationMessage::user("Hi"));
        history.add_message(ConversationMessage::assistant("Hello!"));

        let reply = agent(Some(Arc::new(SlowLlm))).run("Still there?", &history).await;
        assert_eq!(reply, DEFAULT_FALLBACK_REPLY);
    }
}
