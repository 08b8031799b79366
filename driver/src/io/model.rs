//! Model client abstraction over a chat-completions endpoint.
//!
//! [`ModelClient`] is the only seam between the repair loop and the LLM. Every
//! failure of the remote call is folded into [`ModelOutcome::TransientFailure`]
//! here, so the loop never sees transport errors.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::ModelOutcome;

/// Longest API error body echoed back in a diagnostic.
const ERROR_SNIPPET_CHARS: usize = 200;

/// Abstraction over code-generation backends.
pub trait ModelClient {
    /// Send one prompt and return the response text or a transient failure.
    fn generate(&self, prompt: &str) -> ModelOutcome;
}

/// Settings fixed at startup for the lifetime of the process.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub api_key: String,
    pub model: String,
    /// Base URL up to and including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for OpenAI-compatible `POST {base_url}/chat/completions` endpoints.
#[derive(Debug)]
pub struct ChatModelClient {
    http: Client,
    config: ModelConfig,
}

impl ChatModelClient {
    /// Build the client. An empty API key or model identifier is rejected here,
    /// before any request is attempted.
    pub fn new(config: ModelConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("API key is empty");
        }
        if config.model.trim().is_empty() {
            bail!("model identifier is empty");
        }
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("invalid model base URL {:?}", config.base_url))?;
        let mut builder = Client::builder().timeout(config.timeout);
        // Local model servers must not be routed through a system proxy.
        if is_loopback(&base) {
            builder = builder.no_proxy();
        }
        let http = builder.build().context("build HTTP client")?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request(&self, prompt: &str) -> std::result::Result<String, String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .map_err(|err| format!("request failed: {}", describe_reqwest_error(&err)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(describe_status(status, &text));
        }

        let text = response
            .text()
            .map_err(|err| format!("read response: {}", describe_reqwest_error(&err)))?;
        extract_content(&text)
    }
}

impl ModelClient for ChatModelClient {
    #[instrument(skip_all, fields(model = %self.config.model, prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> ModelOutcome {
        if prompt.trim().is_empty() {
            return ModelOutcome::TransientFailure("refusing to send an empty prompt".to_string());
        }
        match self.request(prompt) {
            Ok(content) => {
                debug!(response_bytes = content.len(), "model responded");
                ModelOutcome::Produced(content)
            }
            Err(reason) => {
                warn!(%reason, "model call failed");
                ModelOutcome::TransientFailure(reason)
            }
        }
    }
}

fn is_loopback(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "timed out".to_string()
    } else if err.is_connect() {
        format!("could not connect ({err})")
    } else {
        err.to_string()
    }
}

fn describe_status(status: StatusCode, body: &str) -> String {
    match status {
        StatusCode::TOO_MANY_REQUESTS => "rate limited (status 429)".to_string(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("authentication failed (status {})", status.as_u16())
        }
        _ => {
            let snippet: String = body.trim().chars().take(ERROR_SNIPPET_CHARS).collect();
            if snippet.is_empty() {
                format!("api error (status {})", status.as_u16())
            } else {
                format!("api error (status {}): {snippet}", status.as_u16())
            }
        }
    }
}

/// Pull the first choice's message text out of a chat-completions body.
fn extract_content(body: &str) -> std::result::Result<String, String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|err| format!("malformed response: {err}"))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err("empty response".to_string());
    }
    Ok(content)
}
