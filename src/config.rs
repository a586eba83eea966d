//! Runtime configuration
//!
//! Everything is read from the environment; binaries load `.env` first.

use crate::audit::DEFAULT_TURN_LOG_CAPACITY;
use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub gemini_api_key: Option<String>,
    pub llm_model: String,
    pub database_url: Option<String>,
    pub specialist_timeout: Duration,
    pub search_top_k: usize,
    pub search_min_score: f64,
    pub max_headlines: usize,
    pub max_price_rows: usize,
    pub history_window: usize,
    pub turn_log_capacity: usize,
    pub port: u16,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            llm_model: "gemini-2.0-flash".to_string(),
            database_url: None,
            specialist_timeout: Duration::from_secs(15),
            search_top_k: 5,
            search_min_score: 0.0,
            max_headlines: 5,
            max_price_rows: 31,
            history_window: 10,
            turn_log_capacity: DEFAULT_TURN_LOG_CAPACITY,
            port: 8080,
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let gemini_api_key = non_empty_var("GEMINI_API_KEY")
            .filter(|key| key != "your_gemini_api_key_here");

        let database_url = non_empty_var("DATABASE_URL").or_else(|| non_empty_var("POSTGRES_URL"));

        let timeout_secs: u64 =
            parse_var("SPECIALIST_TIMEOUT_SECS", defaults.specialist_timeout.as_secs())?;

        let port = match non_empty_var("PORT").or_else(|| non_empty_var("API_PORT")) {
            Some(raw) => raw
                .parse()
                .map_err(|_| OrchestrationError::ConfigError(format!("PORT={} is not a port", raw)))?,
            None => defaults.port,
        };

        Ok(Self {
            gemini_api_key,
            llm_model: non_empty_var("LLM_MODEL").unwrap_or(defaults.llm_model),
            database_url,
            specialist_timeout: Duration::from_secs(timeout_secs.max(1)),
            search_top_k: parse_var("SEARCH_TOP_K", defaults.search_top_k)?.max(1),
            search_min_score: parse_var("SEARCH_MIN_SCORE", defaults.search_min_score)?,
            max_headlines: parse_var("MAX_HEADLINES", defaults.max_headlines)?.max(1),
            max_price_rows: parse_var("MAX_PRICE_ROWS", defaults.max_price_rows)?.max(1),
            history_window: parse_var("HISTORY_WINDOW", defaults.history_window)?,
            turn_log_capacity: parse_var("TURN_LOG_CAPACITY", defaults.turn_log_capacity)?.max(1),
            port,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match non_empty_var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            OrchestrationError::ConfigError(format!("{}={} could not be parsed", name, raw))
        }),
        None => Ok(default),
    }
}
