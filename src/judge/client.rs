//! # Judge Model Client
//!
//! Sends judging prompts to an OpenAI-compatible chat completions API.
//!
//! ## Error Mapping:
//! - request timed out → `AppError::Timeout`
//! - connection failure, non-2xx status, unreadable body, missing API key → `AppError::Upstream`
//!
//! The reply text itself is returned untouched; turning it into a verdict is
//! the job of [`crate::judge::verdict`].

use crate::config::JudgeConfig;
use crate::error::{AppError, AppResult};
use crate::judge::prompt::ChatMessage;
use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Anything that can turn chat messages into a model reply.
///
/// The HTTP handler only sees this trait, so tests can swap in a canned
/// backend instead of calling a real model.
pub trait JudgeBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        config: &'a JudgeConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'a, AppResult<String>>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Judge backed by an OpenAI-compatible HTTP API.
///
/// Model, key, base URL and timeout are read from the [`JudgeConfig`] passed
/// with every call, so runtime config updates apply to the next request.
pub struct OpenAiJudge {
    client: reqwest::Client,
}

impl OpenAiJudge {
    pub fn new() -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("learncat-backend/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { client })
    }

    async fn send_chat_completion(
        &self,
        config: &JudgeConfig,
        messages: Vec<ChatMessage>,
    ) -> AppResult<String> {
        if config.api_key.trim().is_empty() {
            return Err(AppError::Upstream("Judge API key is not configured".to_string()));
        }

        let url = format!("{}/chat/completions", config.api_base_url.trim_end_matches('/'));
        debug!(url = %url, model = %config.model, "Sending judge request");

        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
            .map_err(|e| AppError::Upstream(format!("Invalid authorization header value: {}", e)))?;

        let body = ChatCompletionRequest {
            model: &config.model,
            messages,
            temperature: 0.2,
        };

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, auth)
            .timeout(Duration::from_secs(config.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(AppError::Upstream(format!(
                "Judge API request failed with status {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(map_transport_error)?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

impl JudgeBackend for OpenAiJudge {
    fn complete<'a>(
        &'a self,
        config: &'a JudgeConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'a, AppResult<String>> {
        Box::pin(self.send_chat_completion(config, messages))
    }
}

fn map_transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("Judge API timed out: {}", err))
    } else {
        AppError::Upstream(format!("Judge API request failed: {}", err))
    }
}
