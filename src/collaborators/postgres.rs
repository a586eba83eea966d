//! Postgres-backed price store and headline index
//!
//! Expected tables:
//! `stock_data(ticker, date, open, high, low, close[, volume])` and
//! `news_articles(headline, url, date, stock)`.
//!
//! `volume` is optional: the price store checks for the column once and
//! reports volume as missing when the table was loaded without it.

use super::{SemanticSearch, StructuredQuery};
use crate::error::OrchestrationError;
use crate::models::{DateRange, Headline, PriceRow, SearchQuery};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[derive(Clone)]
pub struct PgStockStore {
    pool: PgPool,
    has_volume: Arc<OnceCell<bool>>,
}

impl PgStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            has_volume: Arc::new(OnceCell::new()),
        }
    }

    async fn has_volume_column(&self) -> Result<bool> {
        self.has_volume
            .get_or_try_init(|| async {
                let present: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS (
                      SELECT 1 FROM information_schema.columns
                      WHERE table_name = 'stock_data' AND column_name = 'volume'
                    )
                    "#,
                )
                .fetch_one(&self.pool)
                .await
                .map_err(|e| OrchestrationError::from_store("stock_data schema check failed", e))?;

                info!(volume_column = present, "stock_data layout detected");
                Ok::<bool, OrchestrationError>(present)
            })
            .await
            .copied()
    }
}

/// Bounded price query; tables without a volume column yield NULL volume.
fn price_query(with_volume: bool) -> String {
    let volume = if with_volume {
        "volume::int8"
    } else {
        "NULL::int8"
    };

    format!(
        r#"
        SELECT date,
               open::float8   AS open,
               close::float8  AS close,
               high::float8   AS high,
               low::float8    AS low,
               {}   AS volume
        FROM stock_data
        WHERE ticker = $1 AND date BETWEEN $2 AND $3
        ORDER BY date ASC
        LIMIT $4
        "#,
        volume
    )
}

fn price_decode_error(e: sqlx::Error) -> OrchestrationError {
    OrchestrationError::from_store("stock_data row decode", e)
}

#[async_trait]
impl StructuredQuery for PgStockStore {
    async fn fetch(&self, symbol: &str, range: &DateRange, limit: usize) -> Result<Vec<PriceRow>> {
        debug!(symbol, %range, limit, "Querying stock_data");

        let sql = price_query(self.has_volume_column().await?);
        let rows = sqlx::query(&sql)
            .bind(symbol)
            .bind(range.start)
            .bind(range.end)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OrchestrationError::from_store("stock_data query failed", e))?;

        let mut prices = Vec::with_capacity(rows.len());
        for row in rows {
            prices.push(PriceRow {
                date: row.try_get("date").map_err(price_decode_error)?,
                open: row.try_get("open").map_err(price_decode_error)?,
                close: row.try_get("close").map_err(price_decode_error)?,
                high: row.try_get("high").map_err(price_decode_error)?,
                low: row.try_get("low").map_err(price_decode_error)?,
                volume: row.try_get("volume").map_err(price_decode_error)?,
            });
        }

        if prices.is_empty() {
            return Err(OrchestrationError::NotFound(format!(
                "no stock_data rows for {} on {}",
                symbol, range
            )));
        }

        Ok(prices)
    }
}

#[derive(Clone)]
pub struct PgNewsIndex {
    pool: PgPool,
}

impl PgNewsIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// OR-combine keywords into a `to_tsquery` expression.
///
/// Keywords are reduced to alphanumerics so user text can never produce
/// tsquery syntax.
fn or_tsquery(keywords: &[String]) -> Option<String> {
    let terms: Vec<String> = keywords
        .iter()
        .map(|k| k.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
        .filter(|k| !k.is_empty())
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" | "))
    }
}

#[async_trait]
impl SemanticSearch for PgNewsIndex {
    async fn top_k(
        &self,
        query: &SearchQuery,
        k: usize,
        ticker: Option<&str>,
    ) -> Result<Vec<Headline>> {
        let tsquery = or_tsquery(&query.keywords);
        debug!(?ticker, ?tsquery, k, "Querying news_articles");

        let rows = match &tsquery {
            Some(tsquery) => {
                sqlx::query(
                    r#"
                    SELECT headline, COALESCE(url, '') AS url, date,
                           ts_rank(to_tsvector('english', headline),
                                   to_tsquery('english', $1))::float8 AS score
                    FROM news_articles
                    WHERE ($2::text IS NULL OR stock = $2)
                    ORDER BY score DESC, date DESC
                    LIMIT $3
                    "#,
                )
                .bind(tsquery)
                .bind(ticker)
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT headline, COALESCE(url, '') AS url, date, 1.0::float8 AS score
                    FROM news_articles
                    WHERE ($1::text IS NULL OR stock = $1)
                    ORDER BY date DESC
                    LIMIT $2
                    "#,
                )
                .bind(ticker)
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| OrchestrationError::from_store("news_articles query failed", e))?;

        let decode = |e: sqlx::Error| OrchestrationError::from_store("news_articles row decode", e);

        let mut headlines = Vec::with_capacity(rows.len());
        for row in rows {
            let published: NaiveDateTime = row.try_get("date").map_err(decode)?;
            let headline: Option<String> = row.try_get("headline").map_err(decode)?;

            headlines.push(Headline {
                headline: headline.unwrap_or_default().replace('\n', " "),
                url: row.try_get("url").map_err(decode)?,
                published: published.and_utc(),
                score: row.try_get("score").map_err(decode)?,
            });
        }

        Ok(headlines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_tsquery_sanitizes_terms() {
        let keywords = vec!["robotaxi".to_string(), "launch's".to_string(), "&|!".to_string()];
        assert_eq!(or_tsquery(&keywords).as_deref(), Some("robotaxi | launchs"));
        assert_eq!(or_tsquery(&[]), None);
    }

    #[test]
    fn test_price_query_tolerates_missing_volume() {
        let without = price_query(false);
        assert!(without.contains("NULL::int8   AS volume"));
        assert!(!without.contains("volume::int8"));

        let with = price_query(true);
        assert!(with.contains("volume::int8   AS volume"));
        assert!(with.contains("LIMIT $4"));
    }
}
