//! Core data models for the stock & news assistant

use crate::error::OrchestrationError;
use crate::memory::ConversationMessage;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Enums =================
//

/// OHLCV field of a trading day
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PriceField {
    Open,
    Close,
    High,
    Low,
    Volume,
}

impl PriceField {
    /// Canonical rendering order
    pub const ALL: [PriceField; 5] = [
        PriceField::Open,
        PriceField::Close,
        PriceField::High,
        PriceField::Low,
        PriceField::Volume,
    ];
}

/// Label returned by the language model when no rule fires
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteLabel {
    Structured,
    Search,
    Both,
    None,
}

impl RouteLabel {
    /// Parse a free-text model answer into a label.
    ///
    /// Accepts a bare word, a word wrapped in code fences or quotes, or a
    /// `{"route": "..."}` object.
    pub fn parse(raw: &str) -> Option<RouteLabel> {
        let trimmed = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        if trimmed.starts_with('{') {
            let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
            let route = value.get("route").and_then(|v| v.as_str())?;
            return Self::parse(route);
        }

        let word = trimmed
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
            .to_lowercase();

        match word.as_str() {
            "structured" | "sql" | "sql_agent" | "price" => Some(RouteLabel::Structured),
            "search" | "news" | "news_agent" => Some(RouteLabel::Search),
            "both" => Some(RouteLabel::Both),
            "none" | "fallback" => Some(RouteLabel::None),
            _ => None,
        }
    }
}

//
// ================= Routing =================
//

/// The two routing flags decided once per turn
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Routing {
    pub need_structured: bool,
    pub need_search: bool,
}

impl Routing {
    pub fn new(need_structured: bool, need_search: bool) -> Self {
        Self {
            need_structured,
            need_search,
        }
    }

    pub fn from_label(label: RouteLabel) -> Self {
        match label {
            RouteLabel::Structured => Self::new(true, false),
            RouteLabel::Search => Self::new(false, true),
            RouteLabel::Both => Self::new(true, true),
            RouteLabel::None => Self::new(false, false),
        }
    }

    /// Neither specialist applies
    pub fn is_fallback(&self) -> bool {
        !self.need_structured && !self.need_search
    }
}

/// How the routing decision was reached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RouteBasis {
    Rules,
    Llm(RouteLabel),
    Ambiguous(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub routing: Routing,
    pub basis: RouteBasis,
}

//
// ================= Structured Data =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }
}

/// One row returned by the structured store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<i64>,
}

impl PriceRow {
    pub fn value(&self, field: PriceField) -> Option<f64> {
        match field {
            PriceField::Open => self.open,
            PriceField::Close => self.close,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Volume => self.volume.map(|v| v as f64),
        }
    }
}

/// Requested (field, value) observations for one trading day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayObservations {
    pub date: NaiveDate,
    pub values: Vec<(PriceField, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredResult {
    pub ticker: String,
    pub range: DateRange,
    pub requested_fields: Vec<PriceField>,
    pub days: Vec<DayObservations>,
    /// The row limit cut the range short; `days` covers only its start
    #[serde(default)]
    pub truncated: bool,
}

//
// ================= Search Data =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Headline {
    pub headline: String,
    pub url: String,
    pub published: DateTime<Utc>,
    pub score: f64,
}

/// Text query handed to the semantic search collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub ticker: Option<String>,
    pub query: String,
    pub headlines: Vec<Headline>,
}

//
// ================= Specialist Outcomes =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedQuery,
    NotFound,
    Unavailable,
}

/// Error annotation recorded in place of a specialist result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialistFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl SpecialistFailure {
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Unavailable,
            detail: detail.into(),
        }
    }
}

impl From<OrchestrationError> for SpecialistFailure {
    fn from(error: OrchestrationError) -> Self {
        let kind = match &error {
            OrchestrationError::MalformedQuery(_) => FailureKind::MalformedQuery,
            OrchestrationError::NotFound(_) => FailureKind::NotFound,
            _ => FailureKind::Unavailable,
        };

        Self {
            kind,
            detail: error.to_string(),
        }
    }
}

pub type SpecialistOutcome<T> = std::result::Result<T, SpecialistFailure>;

/// Terminal status of one specialist within a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistStatus {
    NotRequested,
    Succeeded,
    Failed(FailureKind),
}

impl SpecialistStatus {
    pub fn of<T>(outcome: Option<&SpecialistOutcome<T>>) -> Self {
        match outcome {
            None => SpecialistStatus::NotRequested,
            Some(Ok(_)) => SpecialistStatus::Succeeded,
            Some(Err(failure)) => SpecialistStatus::Failed(failure.kind),
        }
    }
}

//
// ================= Turn Result =================
//

/// What `handle_turn` hands back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub session_id: String,
    pub final_answer: String,
    pub history: Vec<ConversationMessage>,
    pub routing: Routing,
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceField::Open => "open",
            PriceField::Close => "close",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Volume => "volume",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_day() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label_parsing() {
        assert_eq!(RouteLabel::parse("both"), Some(RouteLabel::Both));
        assert_eq!(RouteLabel::parse("  Search.\n"), Some(RouteLabel::Search));
        assert_eq!(RouteLabel::parse("```\nstructured\n```"), Some(RouteLabel::Structured));
        assert_eq!(
            RouteLabel::parse("```json\n{\"route\": \"none\"}\n```"),
            Some(RouteLabel::None)
        );
        assert_eq!(RouteLabel::parse("I think it is about prices"), None);
    }

    #[test]
    fn test_routing_from_label() {
        assert!(Routing::from_label(RouteLabel::None).is_fallback());
        let both = Routing::from_label(RouteLabel::Both);
        assert!(both.need_structured && both.need_search);
    }

    #[test]
    fn test_failure_kind_mapping() {
        let failure: SpecialistFailure =
            OrchestrationError::NotFound("no rows for AAPL".into()).into();
        assert_eq!(failure.kind, FailureKind::NotFound);

        let failure: SpecialistFailure =
            OrchestrationError::ConnectionError("refused".into()).into();
        assert_eq!(failure.kind, FailureKind::Unavailable);
    }

    #[test]
    fn test_date_range_display() {
        let d = NaiveDate::from_ymd_opt(2025, 6, 12).unwrap();
        let e = NaiveDate::from_ymd_opt(2025, 6, 13).unwrap();
        assert_eq!(DateRange::single(d).to_string(), "2025-06-12");
        assert_eq!(
            DateRange { start: d, end: e }.to_string(),
            "2025-06-12 to 2025-06-13"
        );
    }
}
