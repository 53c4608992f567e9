//! HTTP binding for an Anthropic-style messages endpoint.
//!
//! One client implements both service traits: critic calls use a small
//! completion budget (a score report is compact), fixer calls get a large
//! one (a full rewrite). There is no internal retry loop: a failed call
//! surfaces as an error and the engine degrades for that iteration only.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{RefineError, Result};
use crate::scoring::build_critic_prompt;
use crate::services::{CriticRequest, CriticService, FixRequest, FixerService};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Builder for [`MessagesClient`].
pub struct MessagesClientBuilder {
    api_key: String,
    base_url: String,
    model: String,
    critic_max_tokens: u32,
    fixer_max_tokens: u32,
    timeout: Duration,
}

impl MessagesClientBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            critic_max_tokens: 1024,
            fixer_max_tokens: 8192,
            timeout: Duration::from_secs(180),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Completion budget for critic calls. Score reports are compact.
    pub fn with_critic_max_tokens(mut self, max_tokens: u32) -> Self {
        self.critic_max_tokens = max_tokens;
        self
    }

    /// Completion budget for fixer calls. Rewrites carry whole drafts.
    pub fn with_fixer_max_tokens(mut self, max_tokens: u32) -> Self {
        self.fixer_max_tokens = max_tokens;
        self
    }

    /// HTTP-level timeout for a single request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<MessagesClient> {
        if self.api_key.trim().is_empty() {
            return Err(RefineError::Config("API key must not be empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(RefineError::Transport)?;

        Ok(MessagesClient {
            http,
            api_key: self.api_key,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            model: self.model,
            critic_max_tokens: self.critic_max_tokens,
            fixer_max_tokens: self.fixer_max_tokens,
        })
    }
}

/// Client for `POST {base}/v1/messages`, usable as both critic and fixer.
#[derive(Clone, Debug)]
pub struct MessagesClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    critic_max_tokens: u32,
    fixer_max_tokens: u32,
}

impl MessagesClient {
    pub fn builder(api_key: impl Into<String>) -> MessagesClientBuilder {
        MessagesClientBuilder::new(api_key)
    }

    #[instrument(skip_all, fields(model = %self.model, max_tokens))]
    async fn send(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let message = RefineError::truncate_for_display(&body, 500);

            return Err(match status.as_u16() {
                429 => RefineError::RateLimited {
                    retry_after_secs: retry_after.unwrap_or(5),
                },
                code if code >= 500 => RefineError::ServiceUnavailable { message },
                code => RefineError::BadResponse { code, message },
            });
        }

        let parsed: MessageResponse = response.json().await?;
        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .find(|text| !text.trim().is_empty())
            .ok_or(RefineError::EmptyResponse)?;

        debug!(chars = text.len(), "Received message completion");
        Ok(text)
    }
}

#[async_trait]
impl CriticService for MessagesClient {
    async fn evaluate(&self, request: CriticRequest<'_>) -> Result<String> {
        let prompt = build_critic_prompt(
            request.rubric_prompt,
            request.candidate_text,
            request.content_type,
        );
        self.send(&prompt, self.critic_max_tokens).await
    }
}

#[async_trait]
impl FixerService for MessagesClient {
    async fn rewrite(&self, request: FixRequest<'_>) -> Result<String> {
        let prompt = format!(
            "{}\n\nTEXT TO REVISE:\n{}",
            request.instructions, request.prior_text
        );
        self.send(&prompt, self.fixer_max_tokens).await
    }
}
