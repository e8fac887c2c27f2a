//! OpenAI-compatible chat completion client and the LLM-backed semantic comparator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobsift_core::{CollaboratorError, JobRecord};
use jobsift_dedup::{SemanticComparator, SimilarityVerdict};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;

const DESCRIPTION_PROMPT_CHARS: usize = 600;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("json parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("gave up after {retries} retries")]
    RetriesExhausted { retries: u32 },
    #[error("llm returned empty content")]
    EmptyContent,
}

impl From<LlmError> for CollaboratorError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Http(e) if e.is_timeout() => CollaboratorError::Timeout,
            LlmError::Http(e) if e.is_connect() => CollaboratorError::Unavailable(e.to_string()),
            LlmError::Parse(e) => CollaboratorError::InvalidResponse(e.to_string()),
            LlmError::EmptyContent => CollaboratorError::InvalidResponse("empty content".into()),
            other => CollaboratorError::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// `None` when no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, LlmError> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Some(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries.max(1),
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat completion. Retries 429, 5xx and transport errors with exponential backoff.
    pub async fn chat(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let mut last_error = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1).min(5)));
                warn!(attempt, delay_ms = delay.as_millis() as u64, "llm call failed, retrying");
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_builder() => return Err(LlmError::Http(e)),
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let message = response.text().await.unwrap_or_default();
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: ChatResponse = response.json().await?;
            let content = parsed
                .choices
                .into_iter()
                .find_map(|c| c.message.content)
                .filter(|c| !c.trim().is_empty())
                .ok_or(LlmError::EmptyContent)?;
            debug!(model = %self.model, chars = content.len(), "llm call succeeded");
            return Ok(content);
        }

        Err(last_error.unwrap_or(LlmError::RetriesExhausted {
            retries: self.max_retries,
        }))
    }
}

pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    Ok(serde_json::from_str(strip_json_fences(text))?)
}

/// Strips ```json ... ``` or ``` ... ``` fences around a model reply.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .map(str::trim_start);
    match inner {
        Some(inner) => inner.strip_suffix("```").map(str::trim).unwrap_or(inner),
        None => text,
    }
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

pub(crate) fn describe_job(job: &JobRecord) -> String {
    let field = |v: &Option<String>| v.as_deref().unwrap_or("-").to_string();
    format!(
        "title: {}\ncompany: {}\nlocation: {}\nsalary: {}\nexperience: {}\ndescription: {}",
        field(&job.title),
        field(&job.company),
        field(&job.location),
        field(&job.salary_text),
        field(&job.experience_text),
        truncate_chars(job.description.as_deref().unwrap_or("-"), DESCRIPTION_PROMPT_CHARS),
    )
}

pub const DUPLICATE_SYSTEM_PROMPT: &str = "You decide whether two job postings describe the same opening. \
Reply with JSON only: {\"duplicate\": true|false, \"confidence\": number between 0 and 1}.";

pub fn duplicate_prompt(a: &JobRecord, b: &JobRecord) -> String {
    format!(
        "Posting A\n{}\n\nPosting B\n{}\n\nAre A and B the same job opening at the same company?",
        describe_job(a),
        describe_job(b)
    )
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct DuplicateReply {
    duplicate: bool,
    #[serde(default)]
    confidence: Option<f64>,
}

pub fn parse_duplicate_reply(text: &str) -> Result<SimilarityVerdict, LlmError> {
    let reply: DuplicateReply = parse_json_reply(text)?;
    let confidence = reply
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(if reply.duplicate { 1.0 } else { 0.0 });
    Ok(SimilarityVerdict {
        is_duplicate: reply.duplicate,
        confidence,
    })
}

/// Asks the model whether two postings are the same opening. Unavailable without a client.
#[derive(Debug, Clone, Default)]
pub struct LlmSemanticComparator {
    client: Option<Arc<LlmClient>>,
}

impl LlmSemanticComparator {
    pub fn new(client: Option<Arc<LlmClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SemanticComparator for LlmSemanticComparator {
    fn name(&self) -> &str {
        "llm"
    }

    fn is_available(&self) -> bool {
        self.client.is_some()
    }

    async fn compare(&self, a: &JobRecord, b: &JobRecord) -> Result<SimilarityVerdict, CollaboratorError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CollaboratorError::Unavailable("no llm api key configured".into()))?;
        let reply = client.chat(DUPLICATE_SYSTEM_PROMPT, &duplicate_prompt(a, b)).await?;
        Ok(parse_duplicate_reply(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn job(title: &str, company: &str) -> JobRecord {
        JobRecord::new("https://jobs.example/1", "board", Utc.timestamp_opt(0, 0).unwrap())
            .with_title(title)
            .with_company(company)
    }

    #[test]
    fn fences_are_stripped_with_or_without_language_tag() {
        assert_eq!(strip_json_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn duplicate_reply_clamps_confidence_and_defaults_it() {
        let verdict = parse_duplicate_reply("{\"duplicate\": true, \"confidence\": 1.7}").unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.confidence, 1.0);

        let verdict = parse_duplicate_reply("```json\n{\"duplicate\": false}\n```").unwrap();
        assert!(!verdict.is_duplicate);
        assert_eq!(verdict.confidence, 0.0);

        assert!(matches!(parse_duplicate_reply("yes"), Err(LlmError::Parse(_))));
    }

    #[test]
    fn prompt_truncates_long_descriptions() {
        let long = "深".repeat(DESCRIPTION_PROMPT_CHARS + 50);
        let a = job("算法工程师", "星河").with_description(long);
        let prompt = duplicate_prompt(&a, &job("Algorithm Engineer", "Xinghe"));
        assert!(prompt.contains("title: 算法工程师"));
        assert!(prompt.contains("company: Xinghe"));
        assert!(prompt.contains('…'));
        assert!(prompt.chars().count() < DESCRIPTION_PROMPT_CHARS + 400);
    }

    #[test]
    fn client_requires_an_api_key() {
        let config = LlmConfig::default();
        assert!(LlmClient::from_config(&config).unwrap().is_none());
        let config = LlmConfig {
            api_key: Some("sk-test".into()),
            base_url: "https://llm.example/v1/".into(),
            ..LlmConfig::default()
        };
        let client = LlmClient::from_config(&config).unwrap().expect("client");
        assert_eq!(client.endpoint, "https://llm.example/v1/chat/completions");
    }

    #[tokio::test]
    async fn comparator_without_client_is_unavailable() {
        let comparator = LlmSemanticComparator::default();
        assert!(!comparator.is_available());
        let err = comparator
            .compare(&job("a", "b"), &job("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }

    #[test]
    fn collaborator_error_mapping_marks_bad_json_invalid() {
        let parse_err = parse_json_reply::<DuplicateReply>("nope").unwrap_err();
        assert!(matches!(
            CollaboratorError::from(parse_err),
            CollaboratorError::InvalidResponse(_)
        ));
        assert!(matches!(
            CollaboratorError::from(LlmError::Api {
                status: 400,
                message: "bad".into()
            }),
            CollaboratorError::Failed(_)
        ));
    }
}
