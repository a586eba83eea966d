//! Intent Classifier
//!
//! Decides which specialists a question needs:
//! - Structured: prices, OHLCV fields, trading data
//! - Search: news, headlines, articles
//!
//! Deterministic cues are authoritative. The language model is consulted
//! only when no cue fires, and its answer is distrusted when it asks for a
//! specialist without any ticker to work with.

use crate::collaborators::LanguageModel;
use crate::memory::ConversationHistory;
use crate::models::{Classification, RouteBasis, RouteLabel, Routing};
use crate::query::{self, FollowUp};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Intent classifier
pub struct Classifier {
    llm: Option<Arc<dyn LanguageModel>>,
    timeout: Duration,
}

impl Classifier {
    /// `timeout` bounds the single language-model call
    pub fn new(llm: Option<Arc<dyn LanguageModel>>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Deterministic cue matching, no I/O
    pub fn apply_rules(question: &str) -> Routing {
        let need_search = query::has_news_cue(question);

        // A date counts even when it fails to parse; the structured agent
        // reports it as malformed instead of the turn going to chit-chat.
        let has_date = !matches!(query::extract_date_range(question), Ok(None));
        let ticker_with_date = has_date && query::extract_ticker(question).is_some();

        let need_structured =
            query::has_structured_cue(question) || (ticker_with_date && !need_search);

        Routing::new(need_structured, need_search)
    }

    /// Classify the latest user message
    pub async fn classify(&self, question: &str, history: &ConversationHistory) -> Classification {
        let routing = Self::apply_rules(question);

        if !routing.is_fallback() {
            debug!(?routing, "Routing decided by rules");
            return Classification {
                routing,
                basis: RouteBasis::Rules,
            };
        }

        let Some(llm) = &self.llm else {
            return ambiguous("no deterministic cue and no language model configured");
        };

        // The basis is exposed through the turn log, so collaborator error
        // text stays in the logs only.
        let label = match tokio::time::timeout(self.timeout, llm.classify(question)).await {
            Ok(Ok(label)) => label,
            Ok(Err(error)) => {
                warn!("LLM classification failed, routing to fallback: {}", error);
                return ambiguous("classification service unavailable");
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "LLM classification timed out");
                return ambiguous("classification timed out");
            }
        };

        let routing = Routing::from_label(label);
        if routing.is_fallback() {
            return Classification {
                routing,
                basis: RouteBasis::Llm(RouteLabel::None),
            };
        }

        let has_ticker_signal = query::extract_ticker(question).is_some()
            || FollowUp::from_history(history).ticker.is_some();

        if !has_ticker_signal {
            warn!(?label, "LLM route has no ticker to act on, treating as ambiguous");
            return ambiguous(format!(
                "model suggested {:?} but the conversation names no ticker",
                label
            ));
        }

        debug!(?routing, ?label, "Routing decided by LLM");
        Classification {
            routing,
            basis: RouteBasis::Llm(label),
        }
    }
}

fn ambiguous(reason: impl Into<String>) -> Classification {
    Classification {
        routing: Routing::default(),
        basis: RouteBasis::Ambiguous(reason.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::StubLlm;
    use crate::error::OrchestrationError;
    use crate::memory::ConversationMessage;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    fn classifier(llm: Option<Arc<dyn LanguageModel>>) -> Classifier {
        Classifier::new(llm, Duration::from_millis(200))
    }

    #[test]
    fn test_price_questions_need_structured() {
        let cases = vec![
            "What was the close price of AAPL on 2025-06-12?",
            "TSLA opening price yesterday",
            "volume for $NVDA on 06/11/2025",
            "AMZN on 2025-06-11",
        ];

        for c in cases {
            let routing = Classifier::apply_rules(c);
            assert!(routing.need_structured, "{}", c);
            assert!(!routing.need_search, "{}", c);
        }
    }

    #[test]
    fn test_news_questions_need_search() {
        let cases = vec![
            "Give me latest news for Microsoft.",
            "Any headlines about Tesla?",
            "MSFT articles from 2025-06-12",
        ];

        for c in cases {
            let routing = Classifier::apply_rules(c);
            assert!(routing.need_search, "{}", c);
            assert!(!routing.need_structured, "{}", c);
        }
    }

    #[test]
    fn test_combined_question_sets_both() {
        let routing =
            Classifier::apply_rules("Open and close price of AMZN on 2025-06-11 and related news");
        assert_eq!(routing, Routing::new(true, true));
    }

    #[tokio::test]
    async fn test_rules_skip_the_model() {
        let llm = Arc::new(StubLlm::new(Some(RouteLabel::None), None));
        let classifier = classifier(Some(llm.clone()));
        let history = ConversationHistory::new("s");

        let result = classifier
            .classify("What was the close price of AAPL on 2025-06-12?", &history)
            .await;

        assert_eq!(result.basis, RouteBasis::Rules);
        assert_eq!(llm.classify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chit_chat_goes_to_fallback() {
        let history = ConversationHistory::new("s");

        let offline = classifier(None);
        let result = offline.classify("Hi there!", &history).await;
        assert!(result.routing.is_fallback());
        assert!(matches!(result.basis, RouteBasis::Ambiguous(_)));

        let llm = Arc::new(StubLlm::new(Some(RouteLabel::None), None));
        let online = classifier(Some(llm));
        let result = online.classify("Hi there!", &history).await;
        assert!(result.routing.is_fallback());
        assert_eq!(result.basis, RouteBasis::Llm(RouteLabel::None));
    }

    #[tokio::test]
    async fn test_model_route_without_ticker_is_ambiguous() {
        let llm = Arc::new(StubLlm::new(Some(RouteLabel::Both), None));
        let classifier = classifier(Some(llm));
        let history = ConversationHistory::new("s");

        let result = classifier.classify("how is the market doing", &history).await;
        assert!(result.routing.is_fallback());
        assert!(matches!(result.basis, RouteBasis::Ambiguous(_)));
    }

    #[tokio::test]
    async fn test_model_route_uses_history_ticker() {
        let llm = Arc::new(StubLlm::new(Some(RouteLabel::Structured), None));
        let classifier = classifier(Some(llm));
        let mut history = ConversationHistory::new("s");
        history.add_message(ConversationMessage::user("Close of AAPL on 2025-06-12?"));
        history.add_message(ConversationMessage::assistant("AAPL closed at 199.20 on 2025-06-12."));

        let result = classifier.classify("and the day after that?", &history).await;
        assert_eq!(result.routing, Routing::new(true, false));
        assert_eq!(result.basis, RouteBasis::Llm(RouteLabel::Structured));
    }

    #[tokio::test]
    async fn test_model_failure_is_ambiguous() {
        let classifier = classifier(Some(Arc::new(StubLlm::down())));
        let history = ConversationHistory::new("s");

        let result = classifier.classify("tell me something", &history).await;
        assert!(result.routing.is_fallback());
        assert!(matches!(result.basis, RouteBasis::Ambiguous(_)));
    }

    struct LeakyLlm;

    #[async_trait]
    impl LanguageModel for LeakyLlm {
        async fn classify(&self, _text: &str) -> crate::Result<RouteLabel> {
            Err(OrchestrationError::ServiceUnavailable(
                "error sending request for url (https://llm.test/v1?key=SECRETKEY123)".into(),
            ))
        }

        async fn generate(&self, _prompt: &str, _history: &[ConversationMessage]) -> crate::Result<String> {
            Ok("unused".into())
        }
    }

    #[tokio::test]
    async fn test_model_error_text_stays_out_of_basis() {
        let classifier = classifier(Some(Arc::new(LeakyLlm)));
        let history = ConversationHistory::new("s");

        let result = classifier.classify("hello there friend", &history).await;
        assert!(result.routing.is_fallback());
        assert_eq!(
            result.basis,
            RouteBasis::Ambiguous("classification service unavailable".into())
        );

        let serialized = serde_json::to_string(&result.basis).unwrap();
        assert!(!serialized.contains("SECRETKEY123"));
    }

    struct HangingLlm;

    #[async_trait]
    impl LanguageModel for HangingLlm {
        async fn classify(&self, _text: &str) -> crate::Result<RouteLabel> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(RouteLabel::Both)
        }

        async fn generate(&self, _prompt: &str, _history: &[ConversationMessage]) -> crate::Result<String> {
            Ok("unused".into())
        }
    }

    #[tokio::test]
    async fn test_hanging_model_times_out_as_ambiguous() {
        let classifier = classifier(Some(Arc::new(HangingLlm)));
        let history = ConversationHistory::new("s");

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            classifier.classify("Hi there!", &history),
        )
        .await
        .expect("classification must respect its own deadline");

        assert!(result.routing.is_fallback());
        assert_eq!(result.basis, RouteBasis::Ambiguous("classification timed out".into()));
    }
}
