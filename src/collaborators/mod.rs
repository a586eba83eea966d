//! Collaborator contracts
//!
//! The core only talks to the price store, the headline index and the
//! language model through these traits. Concrete adapters live in the
//! submodules; the orchestrator never names them.

use crate::memory::ConversationMessage;
use crate::models::{DateRange, Headline, PriceRow, RouteLabel, SearchQuery};
use crate::Result;
use async_trait::async_trait;

pub mod gemini;
pub mod postgres;

pub use gemini::GeminiClient;
pub use postgres::{PgNewsIndex, PgStockStore};

/// Structured price store
#[async_trait]
pub trait StructuredQuery: Send + Sync {
    /// Rows for `symbol` inside `range`, oldest first, at most `limit`.
    async fn fetch(&self, symbol: &str, range: &DateRange, limit: usize) -> Result<Vec<PriceRow>>;
}

/// Relevance-ranked headline index
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn top_k(
        &self,
        query: &SearchQuery,
        k: usize,
        ticker: Option<&str>,
    ) -> Result<Vec<Headline>>;
}

/// Language model used for classification and free-text replies
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn classify(&self, text: &str) -> Result<RouteLabel>;

    /// Generate a reply to `prompt`; `history` is the recent window, oldest first.
    async fn generate(&self, prompt: &str, history: &[ConversationMessage]) -> Result<String>;
}

/// Stand-in for a collaborator that is not configured.
///
/// Every call fails with `ServiceUnavailable`, which the synthesizer turns
/// into an unavailability notice.
pub struct UnavailableCollaborator {
    reason: String,
}

impl UnavailableCollaborator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> crate::error::OrchestrationError {
        crate::error::OrchestrationError::ServiceUnavailable(self.reason.clone())
    }
}

#[async_trait]
impl StructuredQuery for UnavailableCollaborator {
    async fn fetch(&self, _symbol: &str, _range: &DateRange, _limit: usize) -> Result<Vec<PriceRow>> {
        Err(self.error())
    }
}

#[async_trait]
impl SemanticSearch for UnavailableCollaborator {
    async fn top_k(
        &self,
        _query: &SearchQuery,
        _k: usize,
        _ticker: Option<&str>,
    ) -> Result<Vec<Headline>> {
        Err(self.error())
    }
}
