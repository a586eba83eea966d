//! Gemini API client
//!
//! Implements `LanguageModel` for routing labels and conversational replies.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::LanguageModel;
use crate::error::OrchestrationError;
use crate::memory::{ConversationMessage, MessageRole};
use crate::models::RouteLabel;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const API_KEY_HEADER: &str = "x-goog-api-key";

const CLASSIFY_PROMPT: &str = r#"You are a routing assistant for a stock-and-news chatbot.

Reply with exactly one word:
- structured : the user asks for prices, open / close / high / low, volume or other trading data
- search     : the user asks for news, headlines, articles or company updates
- both       : the user asks for trading data AND news
- none       : greetings, chit-chat, or anything unrelated or unclear"#;

const ASSISTANT_PROMPT: &str = r#"You are a friendly assistant for a stock price and market news service.

Guidelines:
- Keep replies short and conversational
- Never invent prices, dates or headlines
- When the user seems to want data, suggest asking for a ticker and a date,
  e.g. "What was the close price of AAPL on 2025-06-12?" or "Latest news for Tesla""#;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    fn request_builder(&self, request: &GeminiRequest) -> RequestBuilder {
        let url = format!("{}/{}:generateContent", BASE_URL, self.model);

        self.client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
    }

    async fn call(
        &self,
        contents: Vec<Content>,
        system_prompt: &str,
        generation_config: GenerationConfig,
    ) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ServiceUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = GeminiRequest {
            contents,
            generation_config,
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
        };

        debug!(model = %self.model, "Calling Gemini API");

        let response = self
            .request_builder(&request)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("Gemini API request failed: {}", e);
                OrchestrationError::ServiceUnavailable(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::ServiceUnavailable(format!(
                "Gemini API returned {}",
                status
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::ServiceUnavailable(format!("Gemini parse error: {}", e))
        })?;

        if let Some(usage) = &gemini_response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini usage"
            );
        }

        gemini_response.first_text().ok_or_else(|| {
            OrchestrationError::ServiceUnavailable("Empty response from Gemini".to_string())
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn classify(&self, text: &str) -> Result<RouteLabel> {
        let contents = vec![Content::user(text)];
        let raw = self
            .call(contents, CLASSIFY_PROMPT, GenerationConfig::deterministic(16))
            .await?;

        RouteLabel::parse(&raw).ok_or_else(|| {
            OrchestrationError::ClassificationAmbiguous(format!("unexpected label {:?}", raw))
        })
    }

    async fn generate(&self, prompt: &str, history: &[ConversationMessage]) -> Result<String> {
        let mut contents: Vec<Content> = history.iter().map(Content::from_message).collect();
        contents.push(Content::user(prompt));

        let answer = self
            .call(contents, ASSISTANT_PROMPT, GenerationConfig::conversational())
            .await?;

        info!(chars = answer.len(), "Gemini reply received");
        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }

    fn from_message(message: &ConversationMessage) -> Self {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "model",
        };
        Self {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: message.content.clone(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

impl GenerationConfig {
    fn deterministic(max_output_tokens: i32) -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            top_k: 1,
            max_output_tokens,
        }
    }

    fn conversational() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 512,
        }
    }
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}

impl GeminiResponse {
    fn first_text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        if let Some(reason) = candidate.finish_reason.as_deref().filter(|r| *r != "STOP") {
            debug!(finish_reason = reason, "Gemini candidate did not finish cleanly");
        }

        candidate
            .content
            .parts
            .first()
            .map(|p| p.text.trim().to_string())
            .filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![
                Content::from_message(&ConversationMessage::assistant("AAPL closed at 199.20.")),
                Content::user("Hi there!"),
            ],
            generation_config: GenerationConfig::conversational(),
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: ASSISTANT_PROMPT.to_string(),
                }],
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "model");
        assert_eq!(json["contents"][1]["parts"][0]["text"], "Hi there!");
        assert!(json["generationConfig"]["maxOutputTokens"].is_number());
        assert!(json.get("systemInstruction").is_some());
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "both"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 1}
        }"#;

        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.first_text().as_deref(), Some("both"));

        let blank: GeminiResponse =
            serde_json::from_str(r#"{"candidates": [{"content": {"parts": [{"text": "  "}]}}]}"#)
                .unwrap();
        assert_eq!(blank.first_text(), None);
    }

    #[test]
    fn test_api_key_travels_in_header_not_url() {
        let client =
            GeminiClient::new("SECRETKEY123".to_string(), "gemini-2.0-flash".to_string()).unwrap();
        let request = GeminiRequest {
            contents: vec![Content::user("Hi there!")],
            generation_config: GenerationConfig::deterministic(16),
            system_instruction: SystemInstruction { parts: vec![] },
        };

        let built = client.request_builder(&request).build().unwrap();
        assert!(built.url().query().is_none());
        assert!(!built.url().as_str().contains("SECRETKEY123"));
        assert_eq!(built.headers()[API_KEY_HEADER], "SECRETKEY123");
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new(String::new(), "gemini-2.0-flash".to_string()).unwrap();
        let result = client.generate("Hi there!", &[]).await;

        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.contains("GEMINI_API_KEY"));
    }
}
