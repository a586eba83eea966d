//! Headline search specialist

use crate::collaborators::SemanticSearch;
use crate::error::OrchestrationError;
use crate::models::{Headline, SearchQuery, SearchResult};
use crate::query::{self, FollowUp};
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

pub struct SearchAgent {
    index: Arc<dyn SemanticSearch>,
    top_k: usize,
    min_score: f64,
}

impl SearchAgent {
    pub fn new(index: Arc<dyn SemanticSearch>, top_k: usize, min_score: f64) -> Self {
        Self {
            index,
            top_k,
            min_score,
        }
    }

    /// Answer a topical question from the headline index
    pub async fn run(&self, question: &str, follow_up: &FollowUp) -> Result<SearchResult> {
        let ticker = query::extract_ticker(question).or_else(|| follow_up.ticker.clone());
        let search_query = build_query(question, ticker.as_deref());

        debug!(?ticker, query = %search_query.text, "Searching headlines");

        let mut headlines = self
            .index
            .top_k(&search_query, self.top_k, ticker.as_deref())
            .await?;

        headlines.retain(|h| h.score.is_finite() && h.score >= self.min_score);
        rank_headlines(&mut headlines);
        headlines.truncate(self.top_k);

        if headlines.is_empty() {
            return Err(OrchestrationError::NotFound(match &ticker {
                Some(ticker) => format!("no headlines for {}", ticker),
                None => format!("no headlines matching \"{}\"", search_query.text),
            }));
        }

        info!(?ticker, count = headlines.len(), "Headlines retrieved");

        Ok(SearchResult {
            ticker,
            query: search_query.text,
            headlines,
        })
    }
}

fn build_query(question: &str, ticker: Option<&str>) -> SearchQuery {
    let keywords = query::search_keywords(question, ticker);

    let text = if keywords.is_empty() {
        match ticker {
            Some(ticker) => format!("latest news for {}", ticker),
            None => "latest news".to_string(),
        }
    } else {
        keywords.join(" ")
    };

    SearchQuery { text, keywords }
}

/// Descending relevance, newer publication first on ties
pub fn rank_headlines(headlines: &mut [Headline]) {
    headlines.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.published.cmp(&a.published))
    });
}
