//! Answer synthesis
//!
//! Deterministic composition of the final reply from whatever the turn's
//! specialists produced. No model is involved here, so the same outcomes
//! always render the same text.

use crate::models::{
    DayObservations, FailureKind, PriceField, SearchResult, SpecialistOutcome, StructuredResult,
};

/// Header that opens the headline list
pub const HEADLINES_HEADER: &str = "### Latest headlines";

/// Everything the synthesizer may draw on for one turn
#[derive(Debug, Clone)]
pub enum TurnOutcomes {
    /// At least one specialist was requested; `None` means not requested
    Specialists {
        structured: Option<SpecialistOutcome<StructuredResult>>,
        search: Option<SpecialistOutcome<SearchResult>>,
    },
    Fallback(String),
}

pub struct Synthesizer {
    max_headlines: usize,
}

impl Synthesizer {
    pub fn new(max_headlines: usize) -> Self {
        Self { max_headlines }
    }

    /// Compose the final answer; price part first, news part second.
    pub fn compose(&self, _question: &str, outcomes: &TurnOutcomes) -> String {
        let (structured, search) = match outcomes {
            TurnOutcomes::Fallback(text) => return text.clone(),
            TurnOutcomes::Specialists { structured, search } => (structured, search),
        };

        let mut parts = Vec::with_capacity(2);

        match structured {
            Some(Ok(result)) => parts.push(render_prices(result)),
            Some(Err(failure)) => parts.push(price_notice(failure.kind).to_string()),
            None => {}
        }

        match search {
            Some(Ok(result)) => parts.push(self.render_headlines(result)),
            Some(Err(failure)) => parts.push(news_notice(failure.kind).to_string()),
            None => {}
        }

        parts.join("\n\n")
    }

    fn render_headlines(&self, result: &SearchResult) -> String {
        let mut out = String::from(HEADLINES_HEADER);
        for (i, headline) in result.headlines.iter().take(self.max_headlines).enumerate() {
            out.push_str(&format!(
                "\n{}. [{}] {}",
                i + 1,
                headline.published.format("%Y-%m-%d"),
                headline.headline.trim()
            ));
        }
        out
    }
}

fn render_prices(result: &StructuredResult) -> String {
    let mut lines: Vec<String> = result
        .days
        .iter()
        .map(|day| render_day(&result.ticker, &result.requested_fields, day))
        .collect();

    if result.truncated {
        lines.push(format!(
            "Only the first {} trading days of {} are shown.",
            result.days.len(),
            result.range
        ));
    }

    lines.join("\n")
}

fn render_day(ticker: &str, requested: &[PriceField], day: &DayObservations) -> String {
    if day.values.is_empty() {
        let names: Vec<String> = requested.iter().map(|f| f.to_string()).collect();
        return format!(
            "{} has no recorded {} on {}.",
            ticker,
            join_clauses(&names),
            day.date
        );
    }

    let clauses: Vec<String> = day
        .values
        .iter()
        .map(|(field, value)| match field {
            PriceField::Open => format!("opened at {:.2}", value),
            PriceField::Close => format!("closed at {:.2}", value),
            PriceField::High => format!("reached a high of {:.2}", value),
            PriceField::Low => format!("touched a low of {:.2}", value),
            PriceField::Volume => format!("traded {} shares", thousands(*value as i64)),
        })
        .collect();

    format!("{} {} on {}.", ticker, join_clauses(&clauses), day.date)
}

/// "a", "a and b", "a, b and c"
fn join_clauses(clauses: &[String]) -> String {
    match clauses {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn price_notice(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::MalformedQuery => {
            "I couldn't work out a ticker and date for the price lookup. Try something like \
             \"close price of AAPL on 2025-06-12\"."
        }
        FailureKind::NotFound => "No price data was found for that ticker and date.",
        FailureKind::Unavailable => {
            "Price data is unavailable right now, so I can't answer the price part of your question."
        }
    }
}

fn news_notice(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::MalformedQuery => "I couldn't turn that into a news search.",
        FailureKind::NotFound => "I couldn't find any matching headlines.",
        FailureKind::Unavailable => {
            "News search is unavailable right now, so I can't list headlines."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::{day, headline};
    use crate::models::{DateRange, SpecialistFailure};

    fn aapl_close() -> StructuredResult {
        StructuredResult {
            ticker: "AAPL".into(),
            range: DateRange::single(day(2025, 6, 12)),
            requested_fields: vec![PriceField::Close],
            days: vec![DayObservations {
                date: day(2025, 6, 12),
                values: vec![(PriceField::Close, 199.2)],
            }],
            truncated: false,
        }
    }

    fn news(count: u32) -> SearchResult {
        SearchResult {
            ticker: Some("MSFT".into()),
            query: "latest news for MSFT".into(),
            headlines: (1..=count)
                .map(|i| headline(&format!("Story {}", i), 10 + i, 1.0))
                .collect(),
        }
    }

    #[test]
    fn test_price_sentence() {
        let outcomes = TurnOutcomes::Specialists {
            structured: Some(Ok(aapl_close())),
            search: None,
        };
        let answer = Synthesizer::new(5).compose("q", &outcomes);
        assert_eq!(answer, "AAPL closed at 199.20 on 2025-06-12.");
    }

    #[test]
    fn test_all_fields_with_volume() {
        let result = StructuredResult {
            ticker: "AMZN".into(),
            range: DateRange::single(day(2025, 6, 11)),
            requested_fields: PriceField::ALL.to_vec(),
            days: vec![DayObservations {
                date: day(2025, 6, 11),
                values: vec![
                    (PriceField::Open, 212.0),
                    (PriceField::Close, 213.456),
                    (PriceField::Volume, 39_325_981.0),
                ],
            }],
            truncated: false,
        };
        let answer = render_prices(&result);
        assert_eq!(
            answer,
            "AMZN opened at 212.00, closed at 213.46 and traded 39,325,981 shares on 2025-06-11."
        );
    }

    #[test]
    fn test_headline_list_is_bounded() {
        let outcomes = TurnOutcomes::Specialists {
            structured: None,
            search: Some(Ok(news(7))),
        };
        let answer = Synthesizer::new(3).compose("q", &outcomes);
        let lines: Vec<&str> = answer.lines().collect();
        assert_eq!(lines[0], HEADLINES_HEADER);
        assert_eq!(lines[1], "1. [2025-06-11] Story 1");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_price_part_precedes_news_part() {
        let outcomes = TurnOutcomes::Specialists {
            structured: Some(Ok(aapl_close())),
            search: Some(Ok(news(1))),
        };
        let answer = Synthesizer::new(5).compose("q", &outcomes);
        let price_at = answer.find("closed at").unwrap();
        let news_at = answer.find(HEADLINES_HEADER).unwrap();
        assert!(price_at < news_at);
        assert!(answer.contains("2025-06-12.\n\n### Latest"));
    }

    #[test]
    fn test_failure_notices_are_distinct_and_keep_other_part() {
        let synth = Synthesizer::new(5);
        let mut notices = Vec::new();

        for kind in [FailureKind::MalformedQuery, FailureKind::NotFound, FailureKind::Unavailable] {
            let outcomes = TurnOutcomes::Specialists {
                structured: Some(Err(SpecialistFailure {
                    kind,
                    detail: "x".into(),
                })),
                search: Some(Ok(news(2))),
            };
            let answer = synth.compose("q", &outcomes);
            assert!(answer.contains(HEADLINES_HEADER));
            notices.push(answer.split("\n\n").next().unwrap().to_string());
        }

        notices.dedup();
        assert_eq!(notices.len(), 3);
        assert!(notices[2].contains("unavailable"));
    }

    #[test]
    fn test_fallback_text_is_verbatim() {
        let outcomes = TurnOutcomes::Fallback("Hello! Ask me about stocks.".into());
        assert_eq!(
            Synthesizer::new(5).compose("Hi there!", &outcomes),
            "Hello! Ask me about stocks."
        );
    }

    #[test]
    fn test_day_without_requested_values() {
        let result = StructuredResult {
            ticker: "TSLA".into(),
            range: DateRange::single(day(2025, 6, 12)),
            requested_fields: vec![PriceField::High, PriceField::Low],
            days: vec![DayObservations {
                date: day(2025, 6, 12),
                values: vec![],
            }],
            truncated: false,
        };
        assert_eq!(
            render_prices(&result),
            "TSLA has no recorded high and low on 2025-06-12."
        );
    }

    #[test]
    fn test_truncated_range_is_flagged() {
        let result = StructuredResult {
            ticker: "AAPL".into(),
            range: DateRange {
                start: day(2025, 6, 2),
                end: day(2025, 6, 30),
            },
            requested_fields: vec![PriceField::Close],
            days: vec![
                DayObservations {
                    date: day(2025, 6, 2),
                    values: vec![(PriceField::Close, 201.7)],
                },
                DayObservations {
                    date: day(2025, 6, 3),
                    values: vec![(PriceField::Close, 203.3)],
                },
            ],
            truncated: true,
        };

        let answer = render_prices(&result);
        let lines: Vec<&str> = answer.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("Only the first 2 trading days of "));
        assert!(!render_prices(&aapl_close()).contains("Only the first"));
    }

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1_000), "1,000");
        assert_eq!(thousands(-1_234_567), "-1,234,567");
    }
}
