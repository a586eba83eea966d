//! Structured price specialist
//!
//! Ticker and date come from deterministic parsing only, so every query this
//! agent issues can be traced back to the words of the question.

use crate::collaborators::StructuredQuery;
use crate::error::OrchestrationError;
use crate::models::{DateRange, DayObservations, PriceRow, StructuredResult};
use crate::query::{self, FollowUp};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

pub struct StructuredAgent {
    store: Arc<dyn StructuredQuery>,
    max_rows: usize,
    retry_backoff: Duration,
}

impl StructuredAgent {
    pub fn new(store: Arc<dyn StructuredQuery>, max_rows: usize) -> Self {
        Self {
            store,
            max_rows,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Answer a quantitative question from the price store
    pub async fn run(&self, question: &str, follow_up: &FollowUp) -> Result<StructuredResult> {
        let ticker = query::extract_ticker(question)
            .or_else(|| follow_up.ticker.clone())
            .ok_or_else(|| {
                OrchestrationError::MalformedQuery("no ticker symbol in the question".to_string())
            })?;

        let range = match query::extract_date_range(question) {
            Ok(Some(range)) => range,
            Ok(None) => follow_up.range.ok_or_else(|| {
                OrchestrationError::MalformedQuery(format!("no date given for {}", ticker))
            })?,
            Err(reason) => return Err(OrchestrationError::MalformedQuery(reason)),
        };

        let requested_fields = query::requested_fields(question);
        debug!(%ticker, %range, ?requested_fields, "Structured request parsed");

        let rows = self.fetch_with_retry(&ticker, &range).await?;
        if rows.is_empty() {
            return Err(OrchestrationError::NotFound(format!(
                "no price data for {} on {}",
                ticker, range
            )));
        }

        let truncated = rows.len() >= self.max_rows
            && rows.last().is_some_and(|last| last.date < range.end);
        info!(%ticker, rows = rows.len(), truncated, "Structured data retrieved");

        let days = rows
            .iter()
            .map(|row| DayObservations {
                date: row.date,
                values: requested_fields
                    .iter()
                    .filter_map(|field| row.value(*field).map(|value| (*field, value)))
                    .collect(),
            })
            .collect();

        Ok(StructuredResult {
            ticker,
            range,
            requested_fields,
            days,
            truncated,
        })
    }

    /// One bounded retry on a transient connectivity failure
    async fn fetch_with_retry(&self, ticker: &str, range: &DateRange) -> Result<Vec<PriceRow>> {
        match self.store.fetch(ticker, range, self.max_rows).await {
            Err(error) if error.is_transient() => {
                warn!(%ticker, "Price store connection failed, retrying once: {}", error);
                tokio::time::sleep(self.retry_backoff).await;
                self.store.fetch(ticker, range, self.max_rows).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::{day, price_row, StubStore};
    use crate::models::PriceField;

    fn agent(store: Arc<StubStore>) -> StructuredAgent {
        StructuredAgent::new(store, 31).with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_close_price_lookup() {
        let store = Arc::new(StubStore::with_rows(vec![
            price_row(day(2025, 6, 11), 201.0, 198.5),
            price_row(day(2025, 6, 12), 199.1, 199.2),
        ]));

        let result = agent(store)
            .run("What was the close price of AAPL on 2025-06-12?", &FollowUp::default())
            .await
            .unwrap();

        assert_eq!(result.ticker, "AAPL");
        assert_eq!(result.requested_fields, vec![PriceField::Close]);
        assert_eq!(result.days.len(), 1);
        assert_eq!(result.days[0].values, vec![(PriceField::Close, 199.2)]);
    }

    #[tokio::test]
    async fn test_missing_fields_are_omitted() {
        let mut row = price_row(day(2025, 6, 11), 213.0, 212.1);
        row.open = None;
        let store = Arc::new(StubStore::with_rows(vec![row]));

        let result = agent(store)
            .run("Open and close price of AMZN on 2025-06-11", &FollowUp::default())
            .await
            .unwrap();

        assert_eq!(result.requested_fields, vec![PriceField::Open, PriceField::Close]);
        assert_eq!(result.days[0].values, vec![(PriceField::Close, 212.1)]);
    }

    #[tokio::test]
    async fn test_zero_rows_is_not_found() {
        let store = Arc::new(StubStore::with_rows(vec![]));
        let err = agent(store)
            .run("close of MSFT on 2025-06-12", &FollowUp::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unparseable_requests_are_malformed() {
        let store = Arc::new(StubStore::with_rows(vec![]));
        let agent = agent(store.clone());

        let no_ticker = agent.run("what was the close price on 2025-06-12", &FollowUp::default()).await;
        assert!(matches!(no_ticker, Err(OrchestrationError::MalformedQuery(_))));

        let no_date = agent.run("close price of AAPL", &FollowUp::default()).await;
        assert!(matches!(no_date, Err(OrchestrationError::MalformedQuery(_))));

        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_follow_up_fills_missing_parts() {
        let store = Arc::new(StubStore::with_rows(vec![price_row(day(2025, 6, 12), 300.0, 310.0)]));
        let follow_up = FollowUp {
            ticker: Some("TSLA".to_string()),
            range: Some(DateRange::single(day(2025, 6, 12))),
        };

        let result = agent(store).run("and the high?", &follow_up).await.unwrap();
        assert_eq!(result.ticker, "TSLA");
        assert_eq!(result.days[0].values, vec![(PriceField::High, 311.0)]);
    }

    #[tokio::test]
    async fn test_single_retry_on_connection_error() {
        let store = Arc::new(StubStore::failing(
            vec![OrchestrationError::ConnectionError("reset".into())],
            vec![price_row(day(2025, 6, 12), 199.1, 199.2)],
        ));

        let result = agent(store.clone())
            .run("AAPL close on 2025-06-12", &FollowUp::default())
            .await;
        tokio_test::assert_ok!(result);
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let store = Arc::new(StubStore::failing(
            vec![
                OrchestrationError::ConnectionError("reset".into()),
                OrchestrationError::ConnectionError("reset".into()),
                OrchestrationError::ConnectionError("reset".into()),
            ],
            vec![],
        ));

        let result = agent(store.clone())
            .run("AAPL close on 2025-06-12", &FollowUp::default())
            .await;
        assert!(matches!(result, Err(OrchestrationError::ConnectionError(_))));
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_row_limit_marks_result_truncated() {
        let rows: Vec<PriceRow> = (2..=6)
            .map(|d| price_row(day(2025, 6, d), 100.0, 101.0))
            .collect();
        let store = Arc::new(StubStore::with_rows(rows));
        let agent = StructuredAgent::new(store, 3).with_retry_backoff(Duration::from_millis(1));

        let long = agent
            .run("AAPL close from 2025-06-02 to 2025-06-30", &FollowUp::default())
            .await
            .unwrap();
        assert_eq!(long.days.len(), 3);
        assert!(long.truncated);

        let exact = agent
            .run("AAPL close from 2025-06-02 to 2025-06-04", &FollowUp::default())
            .await
            .unwrap();
        assert_eq!(exact.days.len(), 3);
        assert!(!exact.truncated);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let store = Arc::new(StubStore::failing(
            vec![OrchestrationError::NotFound("no rows".into())],
            vec![],
        ));

        let result = agent(store.clone())
            .run("AAPL close on 2025-06-12", &FollowUp::default())
            .await;
        tokio_test::assert_err!(result);
        assert_eq!(store.call_count(), 1);
    }
}
