//! Deterministic question parsing
//!
//! Ticker, date and field extraction shared by the classifier and the
//! specialists. Nothing here calls a model: the structured path has to stay
//! auditable.

use crate::memory::ConversationHistory;
use crate::models::{DateRange, PriceField};
use chrono::{Duration, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DOLLAR_TICKER_RE: Regex = Regex::new(r"\$([A-Za-z]{1,5})\b")
        .expect("DOLLAR_TICKER_RE is a compile-time constant");
    static ref UPPER_TOKEN_RE: Regex =
        Regex::new(r"\b([A-Z]{2,5})\b").expect("UPPER_TOKEN_RE is a compile-time constant");
    static ref WORD_RE: Regex =
        Regex::new(r"[A-Za-z]+").expect("WORD_RE is a compile-time constant");
    static ref US_DATE_RE: Regex = Regex::new(
        r"\b(0?[1-9]|1[0-2])[/-](0?[1-9]|[12][0-9]|3[01])[/-](\d{4}|\d{2})\b"
    )
    .expect("US_DATE_RE is a compile-time constant");
    static ref ISO_DATE_RE: Regex = Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b")
        .expect("ISO_DATE_RE is a compile-time constant");
    static ref RELATIVE_DAY_RE: Regex = Regex::new(r"(?i)\b(today|yesterday)\b")
        .expect("RELATIVE_DAY_RE is a compile-time constant");
    static ref STRUCTURED_CUE_RE: Regex = Regex::new(
        r"(?i)\b(prices?|priced|open|opened|opening|close|closed|closing|highs?|lows?|volume|ohlcv?|quotes?|stock data|financial data|trading data|traded)\b"
    )
    .expect("STRUCTURED_CUE_RE is a compile-time constant");
    static ref NEWS_CUE_RE: Regex = Regex::new(
        r"(?i)\b(news|headlines?|articles?|updates?|stories|press releases?)\b"
    )
    .expect("NEWS_CUE_RE is a compile-time constant");
    static ref FIELD_RE: Regex = Regex::new(
        r"(?i)\b(open|opens|opened|opening|close|closes|closed|closing|high|highs|highest|low|lows|lowest|volume)\b"
    )
    .expect("FIELD_RE is a compile-time constant");
    static ref PRICE_WORD_RE: Regex =
        Regex::new(r"(?i)\bprices?\b").expect("PRICE_WORD_RE is a compile-time constant");
}

/// Company names and lowercase symbols mapped to tickers
const TICKER_ALIASES: &[(&str, &str)] = &[
    ("aapl", "AAPL"),
    ("apple", "AAPL"),
    ("msft", "MSFT"),
    ("microsoft", "MSFT"),
    ("googl", "GOOGL"),
    ("google", "GOOGL"),
    ("alphabet", "GOOGL"),
    ("tsla", "TSLA"),
    ("tesla", "TSLA"),
    ("amzn", "AMZN"),
    ("amazon", "AMZN"),
    ("meta", "META"),
    ("facebook", "META"),
    ("nvda", "NVDA"),
    ("nvidia", "NVDA"),
    ("nflx", "NFLX"),
    ("netflix", "NFLX"),
];

/// Uppercase tokens that look like symbols but are not
const NON_TICKER_WORDS: &[&str] = &[
    "OK", "US", "USA", "UK", "EU", "CEO", "CFO", "CTO", "AI", "ETF", "EPS", "IPO", "USD", "EUR",
    "GDP", "API", "SEC", "FAQ", "PM", "AM", "NEWS", "OHLC", "OHLCV", "THE", "AND", "FOR", "WHAT",
    "GIVE", "SHOW", "TELL", "ME", "HI", "HEY", "HELLO", "PRICE", "OPEN", "CLOSE", "HIGH", "LOW",
    "HIGHS", "LOWS", "WAS", "WERE", "IS", "ARE", "BE", "OF", "ON", "IN", "AT", "TO", "BY", "AN",
    "AS", "IT", "ITS", "IF", "SO", "NO", "NOT", "YES", "OR", "VS", "BUT", "DID", "DO", "DOES",
    "HOW", "WHY", "WHEN", "WHO", "WHICH", "ANY", "ALL", "ABOUT", "FROM", "WITH", "THIS", "THAT",
    "THERE", "THEIR", "AFTER", "THEN", "GET", "LAST", "MORE", "MY", "WE", "YOU", "CAN", "HAS",
    "HAD", "DAY", "WEEK", "TODAY", "STOCK", "SHARE", "QUOTE", "TRADE", "DATA", "OPENS",
];

/// Words that carry no topic for headline search
const SEARCH_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "me", "my", "give", "show", "tell", "get", "find", "fetch", "what", "whats",
    "was", "were", "is", "are", "be", "for", "of", "on", "in", "at", "about", "and", "or", "to",
    "from", "with", "by", "latest", "recent", "newest", "new", "any", "some", "please", "related",
    "today", "yesterday", "can", "could", "you", "there", "their", "how", "did", "does", "do",
    "stock", "stocks", "share", "shares", "company", "this", "that", "week", "day",
];

/// Ticker / date context carried from earlier user turns of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowUp {
    pub ticker: Option<String>,
    pub range: Option<DateRange>,
}

impl FollowUp {
    /// Most recent ticker and date mentioned by the user in `history`.
    pub fn from_history(history: &ConversationHistory) -> Self {
        let mut follow_up = FollowUp::default();

        for turn in history.user_turns_rev() {
            if follow_up.ticker.is_none() {
                follow_up.ticker = extract_ticker(turn);
            }
            if follow_up.range.is_none() {
                follow_up.range = extract_date_range(turn).ok().flatten();
            }
            if follow_up.ticker.is_some() && follow_up.range.is_some() {
                break;
            }
        }

        follow_up
    }
}

fn alias_symbol(word: &str) -> Option<&'static str> {
    let lower = word.to_lowercase();
    TICKER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, symbol)| *symbol)
}

/// Extract a ticker: an explicit `$TICKER`, then the first uppercase symbol
/// that is not an ordinary word, then a company alias.
pub fn extract_ticker(question: &str) -> Option<String> {
    if let Some(caps) = DOLLAR_TICKER_RE.captures(question) {
        return Some(caps[1].to_uppercase());
    }

    let symbol = UPPER_TOKEN_RE
        .captures_iter(question)
        .map(|caps| caps[1].to_string())
        .find(|token| !NON_TICKER_WORDS.contains(&token.as_str()));
    if let Some(token) = symbol {
        // "APPLE" in an all-caps question is still the company name
        return Some(alias_symbol(&token).map(String::from).unwrap_or(token));
    }

    WORD_RE
        .find_iter(question)
        .find_map(|word| alias_symbol(word.as_str()))
        .map(String::from)
}

/// Rewrite US style dates (`06/11/2025`, `6-11-25`) as ISO `2025-06-11`.
pub fn normalize_dates(text: &str) -> String {
    US_DATE_RE
        .replace_all(text, |caps: &regex::Captures| {
            let month: u32 = caps[1].parse().unwrap_or(0);
            let day: u32 = caps[2].parse().unwrap_or(0);
            let year = if caps[3].len() == 2 {
                format!("20{}", &caps[3])
            } else {
                caps[3].to_string()
            };
            format!("{}-{:02}-{:02}", year, month, day)
        })
        .into_owned()
}

/// Extract a date or date range relative to today's date.
pub fn extract_date_range(question: &str) -> Result<Option<DateRange>, String> {
    extract_date_range_at(question, Utc::now().date_naive())
}

/// Extract a date or date range; `today` anchors relative words.
///
/// The first two dates found bound the range. An inverted range is an error.
pub fn extract_date_range_at(
    question: &str,
    today: NaiveDate,
) -> Result<Option<DateRange>, String> {
    let normalized = normalize_dates(question);

    let mut dates = Vec::with_capacity(2);
    for caps in ISO_DATE_RE.captures_iter(&normalized) {
        let year: i32 = caps[1].parse().map_err(|_| format!("bad year in {}", &caps[0]))?;
        let month: u32 = caps[2].parse().map_err(|_| format!("bad month in {}", &caps[0]))?;
        let day: u32 = caps[3].parse().map_err(|_| format!("bad day in {}", &caps[0]))?;
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| format!("{} is not a calendar date", &caps[0]))?;
        dates.push(date);
        if dates.len() == 2 {
            break;
        }
    }

    if dates.is_empty() {
        if let Some(caps) = RELATIVE_DAY_RE.captures(&normalized) {
            let date = if caps[1].eq_ignore_ascii_case("yesterday") {
                today - Duration::days(1)
            } else {
                today
            };
            dates.push(date);
        }
    }

    match dates.as_slice() {
        [] => Ok(None),
        [date] => Ok(Some(DateRange::single(*date))),
        [start, end, ..] if start <= end => Ok(Some(DateRange {
            start: *start,
            end: *end,
        })),
        [start, end, ..] => Err(format!("date range {} to {} is inverted", start, end)),
    }
}

/// Fields named in the question; `price` alone means close, nothing means all.
pub fn requested_fields(question: &str) -> Vec<PriceField> {
    let mut fields = Vec::new();

    for m in FIELD_RE.find_iter(question) {
        let word = m.as_str().to_lowercase();
        let field = if word.starts_with("open") {
            PriceField::Open
        } else if word.starts_with("clos") {
            PriceField::Close
        } else if word.starts_with("high") {
            PriceField::High
        } else if word.starts_with("low") {
            PriceField::Low
        } else {
            PriceField::Volume
        };
        if !fields.contains(&field) {
            fields.push(field);
        }
    }

    if fields.is_empty() {
        if PRICE_WORD_RE.is_match(question) {
            return vec![PriceField::Close];
        }
        return PriceField::ALL.to_vec();
    }

    // Render in canonical order regardless of how the question lists them
    PriceField::ALL
        .iter()
        .copied()
        .filter(|f| fields.contains(f))
        .collect()
}

/// Price / OHLCV vocabulary present
pub fn has_structured_cue(question: &str) -> bool {
    STRUCTURED_CUE_RE.is_match(question)
}

/// News / headline vocabulary present
pub fn has_news_cue(question: &str) -> bool {
    NEWS_CUE_RE.is_match(question)
}

/// Topic keywords for headline search, lowercased and de-duplicated.
pub fn search_keywords(question: &str, ticker: Option<&str>) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    for word in WORD_RE.find_iter(question) {
        let lower = word.as_str().to_lowercase();
        if lower.len() < 3
            || SEARCH_STOP_WORDS.contains(&lower.as_str())
            || TICKER_ALIASES.iter().any(|(alias, _)| *alias == lower)
            || ticker.is_some_and(|t| t.eq_ignore_ascii_case(&lower))
            || has_news_cue(&lower)
            || has_structured_cue(&lower)
            || keywords.contains(&lower)
        {
            continue;
        }
        keywords.push(lower);
    }

    keywords
}
