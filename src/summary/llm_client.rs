use crate::config::AppConfig;
use crate::summary::backend::{BackendError, Condenser, Generator};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const CLAUDE_DEFAULT_MAX_TOKENS: u32 = 2048;

static THINKING_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<think(?:ing)?>.*?</think(?:ing)?>").expect("Invalid thinking-tag regex")
});

// Generic structure for OpenAI-compatible API chat messages
#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

// Generic structure for OpenAI-compatible API chat requests
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

// Generic structure for OpenAI-compatible API chat responses
#[derive(Deserialize, Debug)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
pub struct Choice {
    pub message: MessageContent,
}

#[derive(Deserialize, Debug)]
pub struct MessageContent {
    pub content: String,
}

// Claude-specific request structure
#[derive(Debug, Serialize)]
pub struct ClaudeRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

// Claude-specific response structure
#[derive(Deserialize, Debug)]
pub struct ClaudeChatResponse {
    pub content: Vec<ClaudeChatContent>,
}

#[derive(Deserialize, Debug)]
pub struct ClaudeChatContent {
    pub text: String,
}

/// LLM Provider enumeration for multi-provider support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LLMProvider {
    OpenAI,
    Claude,
    Groq,
    Ollama,
    OpenRouter,
}

impl FromStr for LLMProvider {
    type Err = String;

    /// Parse provider from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "claude" => Ok(Self::Claude),
            "groq" => Ok(Self::Groq),
            "ollama" => Ok(Self::Ollama),
            "openrouter" => Ok(Self::OpenRouter),
            _ => Err(format!("Unsupported LLM provider: {}", s)),
        }
    }
}

impl fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LLMProvider::OpenAI => "OpenAI",
            LLMProvider::Claude => "Claude",
            LLMProvider::Groq => "Groq",
            LLMProvider::Ollama => "Ollama",
            LLMProvider::OpenRouter => "OpenRouter",
        };
        f.write_str(name)
    }
}

/// Removes `<think>` blocks and a wrapping code fence from model output
pub fn clean_llm_output(raw: &str) -> String {
    let without_thinking = THINKING_BLOCK.replace_all(raw, "");
    let trimmed = without_thinking.trim();

    const PREFIXES: &[&str] = &["```markdown\n", "```json\n", "```\n"];
    const SUFFIX: &str = "```";

    for prefix in PREFIXES {
        if trimmed.starts_with(prefix) && trimmed.ends_with(SUFFIX) && trimmed.len() >= prefix.len() + SUFFIX.len() {
            let content = &trimmed[prefix.len()..trimmed.len() - SUFFIX.len()];
            return content.trim().to_string();
        }
    }

    trimmed.to_string()
}

/// Chat-completion backend over HTTP.
///
/// Built once at startup and shared behind an `Arc`; implements both
/// [`Condenser`] and [`Generator`].
pub struct LlmClient {
    client: Client,
    provider: LLMProvider,
    model: String,
    api_key: String,
    endpoint: Option<String>,
    generation_max_tokens: Option<u32>,
}

impl LlmClient {
    pub fn new(
        provider: LLMProvider,
        model: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let api_key = api_key.into();
        if api_key.is_empty() && provider != LLMProvider::Ollama {
            return Err(BackendError::Authentication(format!(
                "Api key not found for {}",
                provider
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            provider,
            model: model.into(),
            api_key,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            generation_max_tokens: None,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, BackendError> {
        let provider = LLMProvider::from_str(&config.provider).map_err(BackendError::InvalidRequest)?;
        Ok(Self::new(
            provider,
            config.model.clone(),
            config.api_key.clone().unwrap_or_default(),
            config.endpoint.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_generation_max_tokens(config.extraction_max_tokens))
    }

    /// Caps output tokens for [`Generator::generate`] calls
    pub fn with_generation_max_tokens(mut self, max_tokens: u32) -> Self {
        self.generation_max_tokens = Some(max_tokens);
        self
    }

    pub fn provider(&self) -> LLMProvider {
        self.provider
    }

    fn base_url(&self) -> String {
        match self.provider {
            LLMProvider::Ollama => format!(
                "{}/v1",
                self.endpoint.as_deref().unwrap_or(DEFAULT_OLLAMA_HOST)
            ),
            LLMProvider::OpenAI => self
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            LLMProvider::Groq => self
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string()),
            LLMProvider::OpenRouter => self
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            LLMProvider::Claude => self
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
        }
    }

    pub fn chat_url(&self) -> String {
        match self.provider {
            LLMProvider::Claude => format!("{}/messages", self.base_url()),
            _ => format!("{}/chat/completions", self.base_url()),
        }
    }

    fn headers(&self) -> Result<header::HeaderMap, BackendError> {
        let mut headers = header::HeaderMap::new();

        if self.provider == LLMProvider::Claude {
            headers.insert(
                "x-api-key",
                self.api_key
                    .parse()
                    .map_err(|_| BackendError::InvalidRequest("Invalid API key format".to_string()))?,
            );
            headers.insert("anthropic-version", header::HeaderValue::from_static("2023-06-01"));
        } else if !self.api_key.is_empty() {
            headers.insert(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_key).parse().map_err(|_| {
                    BackendError::InvalidRequest("Invalid authorization header".to_string())
                })?,
            );
        }

        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }

    /// Builds the provider-specific JSON body for one system/user exchange
    pub fn request_body(&self, system_prompt: &str, user_prompt: &str, max_tokens: Option<u32>) -> serde_json::Value {
        let user = ChatMessage {
            role: "user".to_string(),
            content: user_prompt.to_string(),
        };

        if self.provider == LLMProvider::Claude {
            return serde_json::json!(ClaudeRequest {
                model: self.model.clone(),
                max_tokens: max_tokens.unwrap_or(CLAUDE_DEFAULT_MAX_TOKENS),
                system: system_prompt.to_string(),
                messages: vec![user],
            });
        }

        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            });
        }
        messages.push(user);

        serde_json::json!(ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens,
        })
    }

    /// Sends one chat exchange and returns the cleaned reply text
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: Option<u32>,
    ) -> Result<String, BackendError> {
        let api_url = self.chat_url();
        let body = self.request_body(system_prompt, user_prompt, max_tokens);

        info!(
            "🤖 LLM Request to {}: model={}, url={}",
            self.provider, self.model, api_url
        );
        let request_start = Instant::now();

        let response = self
            .client
            .post(&api_url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                BackendError::RequestFailed(format!(
                    "Failed to send request to LLM after {}s: {} (URL: {})",
                    request_start.elapsed().as_secs(),
                    e,
                    api_url
                ))
            })?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to read LLM response: {}", e)))?;

        if !status.is_success() {
            return Err(status_error(status, &response_text));
        }

        info!(
            "🤖 LLM Response received from {} in {}s",
            self.provider,
            request_start.elapsed().as_secs()
        );

        let content = parse_chat_response(self.provider, &response_text)?;
        Ok(clean_llm_output(&content))
    }

    /// Startup connectivity probe. A failure here is fatal for the caller.
    pub async fn verify(&self) -> Result<(), BackendError> {
        let probe_url = match self.provider {
            LLMProvider::Ollama => format!(
                "{}/api/tags",
                self.endpoint.as_deref().unwrap_or(DEFAULT_OLLAMA_HOST)
            ),
            _ => format!("{}/models", self.base_url()),
        };
        info!("🔍 Verifying {} connectivity at: {}", self.provider, probe_url);

        let response = self
            .client
            .get(&probe_url)
            .headers(self.headers()?)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                BackendError::Unavailable(format!(
                    "Cannot connect to {} at {}: {}",
                    self.provider, probe_url, e
                ))
            })?;

        match response.status() {
            status if status.is_success() => {
                info!("✓ {} is reachable at {}", self.provider, probe_url);
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackendError::Authentication(format!(
                "{} rejected the configured API key",
                self.provider
            ))),
            status => Err(BackendError::Unavailable(format!(
                "{} returned error status {} at {}",
                self.provider, status, probe_url
            ))),
        }
    }
}

fn status_error(status: StatusCode, body: &str) -> BackendError {
    let preview: String = body.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::Authentication(format!("LLM API returned {}: {}", status, preview))
        }
        _ => BackendError::RequestFailed(format!("LLM API request failed ({}): {}", status, preview)),
    }
}

/// Pulls the reply text out of a raw provider response body
pub fn parse_chat_response(provider: LLMProvider, body: &str) -> Result<String, BackendError> {
    let content = if provider == LLMProvider::Claude {
        let chat_response: ClaudeChatResponse = serde_json::from_str(body)
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse LLM response: {}", e)))?;
        chat_response
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
    } else {
        let chat_response: ChatResponse = serde_json::from_str(body)
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse LLM response: {}", e)))?;
        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
    };

    content
        .map(|text| text.trim().to_string())
        .ok_or_else(|| BackendError::InvalidResponse("No content in LLM response".to_string()))
}

const CONDENSE_SYSTEM_PROMPT: &str = "You are an expert meeting summarizer. Condense the text you are given into a faithful summary. Keep specific names, owners, deadlines and decisions. Output only the summary text.";

#[async_trait]
impl Condenser for LlmClient {
    async fn condense(
        &self,
        text: &str,
        max_length: usize,
        min_length: usize,
    ) -> Result<String, BackendError> {
        if min_length > max_length {
            return Err(BackendError::InvalidRequest(format!(
                "min_length {} exceeds max_length {}",
                min_length, max_length
            )));
        }

        let user_prompt = format!(
            "Summarize the following transcript excerpt in at most {} tokens and no fewer than {} tokens.\n\n<transcript_chunk>\n{}\n</transcript_chunk>",
            max_length, min_length, text
        );
        let max_tokens = u32::try_from(max_length).unwrap_or(u32::MAX);

        let summary = self
            .chat(CONDENSE_SYSTEM_PROMPT, &user_prompt, Some(max_tokens))
            .await?;
        if summary.is_empty() {
            warn!("LLM returned an empty summary");
            return Err(BackendError::InvalidResponse("Empty summary".to_string()));
        }
        Ok(summary)
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        debug!("Generating with prompt of {} chars", prompt.len());
        self.chat("", prompt, self.generation_max_tokens).await
    }
}
