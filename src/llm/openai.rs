//! OpenAI-compatible chat-completions client.
//!
//! Speaks the `/chat/completions` dialect used by OpenRouter, OpenAI, and
//! most self-hosted gateways. One request per [`LlmClient::chat`] call; tool
//! calls come back to the caller unresolved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::llm::{ChatMessage, ChatOutcome, ChatRequest, LlmClient, ToolCall};
use crate::{AppError, Result};

/// HTTP client for an OpenAI-compatible chat endpoint.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    /// Build a client from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the API key is missing.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AppError::Config(
                "LLM api_key is empty; call EngineConfig::load_llm_credentials first".into(),
            ));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [serde_json::Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: AssistantReply,
}

#[derive(Deserialize)]
struct AssistantReply {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            tool_choice: (!request.tools.is_empty()).then_some("auto"),
        };

        debug!(model = %self.model, messages = request.messages.len(), "chat completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Llm(format!("chat request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!(
                "chat endpoint returned {status}: {detail}"
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|err| AppError::Llm(format!("chat response decode failed: {err}")))?;

        let reply = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Llm("chat response carried no choices".into()))?
            .message;

        Ok(ChatOutcome {
            content: reply.content.unwrap_or_default(),
            tool_calls: reply.tool_calls,
        })
    }
}
