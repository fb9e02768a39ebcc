//! LLM adapter for repair completions.
//!
//! Supports OpenAI and Anthropic APIs, selected via environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sbx_core::{CoreResult, GeneratedText, RepairPrompt, TextGenerator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LlmError, LlmResult};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ATTEMPTS: u32 = 3;
const MAX_TOKENS: u32 = 8192;

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Anthropic => "claude-sonnet-4-5",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => OPENAI_BASE_URL,
            Self::Anthropic => ANTHROPIC_BASE_URL,
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => write!(f, "OpenAI"),
            Self::Anthropic => write!(f, "Anthropic"),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

/// Response from LLM including usage info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// LLM adapter that handles API calls
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: String,
    model: String,
    base_url: String,
    backoff: Duration,
    client: reqwest::Client,
}

impl LlmAdapter {
    /// Create a new LLM adapter with explicit configuration
    pub fn new(provider: LlmProvider, api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            base_url: provider.default_base_url().to_string(),
            backoff: Duration::from_secs(1),
            client: reqwest::Client::new(),
        }
    }

    /// Create an LLM adapter from environment variables
    ///
    /// `SBX_LLM_PROVIDER` pins the provider. Otherwise checks in order:
    /// 1. OPENAI_API_KEY
    /// 2. ANTHROPIC_API_KEY
    ///
    /// `SBX_LLM_MODEL` and `SBX_LLM_BASE_URL` override the defaults.
    pub fn from_env() -> LlmResult<Self> {
        let model = non_empty_var("SBX_LLM_MODEL");

        let adapter = match non_empty_var("SBX_LLM_PROVIDER") {
            Some(name) => {
                let provider: LlmProvider = name.parse()?;
                let key = non_empty_var(provider.key_var()).ok_or(LlmError::NotConfigured)?;
                Self::new(provider, key, model)
            }
            None => {
                if let Some(key) = non_empty_var("OPENAI_API_KEY") {
                    Self::new(LlmProvider::OpenAI, key, model)
                } else if let Some(key) = non_empty_var("ANTHROPIC_API_KEY") {
                    Self::new(LlmProvider::Anthropic, key, model)
                } else {
                    return Err(LlmError::NotConfigured);
                }
            }
        };

        Ok(match non_empty_var("SBX_LLM_BASE_URL") {
            Some(url) => adapter.with_base_url(url),
            None => adapter,
        })
    }

    /// Point the adapter at a compatible endpoint (proxy, gateway, local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Base delay between retries; doubles on every attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Get the current provider
    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Get the current model
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one system + user turn against the configured provider.
    pub async fn complete(&self, system: &str, user: &str) -> LlmResult<LlmResponse> {
        let response = match self.provider {
            LlmProvider::OpenAI => self.complete_openai(system, user).await?,
            LlmProvider::Anthropic => self.complete_anthropic(system, user).await?,
        };
        info!(
            "{} completion with {} used {} tokens",
            self.provider,
            self.model,
            response.total_tokens()
        );
        Ok(response)
    }

    async fn complete_openai(&self, system: &str, user: &str) -> LlmResult<LlmResponse> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_completion_tokens: Some(MAX_TOKENS),
        };
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];

        let result: OpenAIResponse = self.post("/chat/completions", &headers, &request).await?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyResponse(self.provider.to_string()))?;

        let (input_tokens, output_tokens) = result
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(LlmResponse {
            content,
            input_tokens,
            output_tokens,
            model: self.model.clone(),
        })
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> LlmResult<LlmResponse> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: Some(system.to_string()).filter(|s| !s.is_empty()),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };
        let headers = [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ];

        let result: AnthropicResponse = self.post("/messages", &headers, &request).await?;

        // Text blocks are concatenated; other block types are ignored.
        let content: String = result
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse(self.provider.to_string()));
        }

        let (input_tokens, output_tokens) = result
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        Ok(LlmResponse {
            content,
            input_tokens,
            output_tokens,
            model: self.model.clone(),
        })
    }

    /// POST a JSON body, retrying network errors, 429 and 5xx with exponential backoff.
    async fn post<B, R>(&self, path: &str, headers: &[(&str, String)], body: &B) -> LlmResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = self.backoff * (1 << attempt);
                debug!("Retrying {} in {:?}", url, delay);
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(body);
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(
                        "{} request failed (attempt {}/{}): {}",
                        self.provider,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        e
                    );
                    last_error = Some(LlmError::Network(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let error = LlmError::Api {
                    provider: self.provider.to_string(),
                    status: status.as_u16(),
                    body,
                };
                if !error.is_transient() {
                    return Err(error);
                }
                warn!(
                    "{} returned {} (attempt {}/{})",
                    self.provider,
                    status,
                    attempt + 1,
                    MAX_ATTEMPTS
                );
                last_error = Some(error);
                continue;
            }

            return response
                .json::<R>()
                .await
                .map_err(|e| LlmError::InvalidResponse(e.to_string()));
        }

        Err(last_error.unwrap_or(LlmError::RetriesExhausted))
    }
}

#[async_trait]
impl TextGenerator for LlmAdapter {
    async fn generate(&self, prompt: &RepairPrompt) -> CoreResult<GeneratedText> {
        let response = self.complete(&prompt.system, &prompt.user_message()).await?;
        Ok(GeneratedText {
            tokens_used: response.total_tokens(),
            text: response.content,
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// Shared message shape
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_detection() {
        // One test owns the environment to avoid races between tests.
        for var in [
            "OPENAI_API_KEY",
            "ANTHROPIC_API_KEY",
            "SBX_LLM_PROVIDER",
            "SBX_LLM_MODEL",
            "SBX_LLM_BASE_URL",
        ] {
            std::env::remove_var(var);
        }

        assert!(matches!(LlmAdapter::from_env(), Err(LlmError::NotConfigured)));

        std::env::set_var("ANTHROPIC_API_KEY", "test-key");
        let adapter = LlmAdapter::from_env().unwrap();
        assert_eq!(adapter.provider(), LlmProvider::Anthropic);
        assert_eq!(adapter.base_url(), ANTHROPIC_BASE_URL);

        std::env::set_var("OPENAI_API_KEY", "test-key");
        std::env::set_var("SBX_LLM_MODEL", "gpt-4.1");
        let adapter = LlmAdapter::from_env().unwrap();
        assert_eq!(adapter.provider(), LlmProvider::OpenAI);
        assert_eq!(adapter.model(), "gpt-4.1");

        std::env::set_var("SBX_LLM_PROVIDER", "anthropic");
        std::env::set_var("SBX_LLM_BASE_URL", "http://localhost:8080/v1/");
        let adapter = LlmAdapter::from_env().unwrap();
        assert_eq!(adapter.provider(), LlmProvider::Anthropic);
        assert_eq!(adapter.base_url(), "http://localhost:8080/v1");

        std::env::set_var("SBX_LLM_PROVIDER", "mistral");
        assert!(matches!(LlmAdapter::from_env(), Err(LlmError::UnknownProvider(_))));

        for var in [
            "OPENAI_API_KEY",
            "ANTHROPIC_API_KEY",
            "SBX_LLM_PROVIDER",
            "SBX_LLM_MODEL",
            "SBX_LLM_BASE_URL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_models() {
        let openai = LlmAdapter::new(LlmProvider::OpenAI, "key", None);
        assert_eq!(openai.model(), "gpt-4o-mini");

        let anthropic = LlmAdapter::new(LlmProvider::Anthropic, "key", None);
        assert_eq!(anthropic.model(), "claude-sonnet-4-5");
    }

    #[test]
    fn test_custom_model() {
        let adapter = LlmAdapter::new(LlmProvider::OpenAI, "key", Some("gpt-4.1".to_string()));
        assert_eq!(adapter.model(), "gpt-4.1");
        assert_eq!(adapter.name(), "gpt-4.1");
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAI);
        assert_eq!(" anthropic ".parse::<LlmProvider>().unwrap(), LlmProvider::Anthropic);
        assert!("other".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_anthropic_content_blocks() {
        let body = r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use"},{"type":"text","text":"b"}],"usage":{"input_tokens":3,"output_tokens":4}}"#;
        let parsed: AnthropicResponse = serde_json::from_str(body).unwrap();
        let text: String = parsed
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(text, "ab");
    }
}
