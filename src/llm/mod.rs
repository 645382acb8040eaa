//! LLM client seam: chat types and the provider-agnostic client trait.
//!
//! The engine never talks HTTP directly; it goes through [`LlmClient`] so
//! sessions can be driven by the OpenAI-compatible client in production and
//! by scripted doubles in tests. The trait is deliberately small: one chat
//! round per call, no streaming.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub mod openai;

pub use openai::OpenAiCompatClient;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions fixed for the whole exchange.
    System,
    /// Caller-supplied content.
    User,
    /// Model output, possibly carrying tool calls.
    Assistant,
    /// Result of a resolved tool call.
    Tool,
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    /// Tool name.
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// One tool call attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Correlation id echoed back in the tool response message.
    pub id: String,
    /// Call kind; chat-completions APIs only define `function` today.
    #[serde(rename = "type", default = "default_tool_kind")]
    pub kind: String,
    /// The requested invocation.
    pub function: FunctionCall,
}

fn default_tool_kind() -> String {
    "function".into()
}

/// One message in a chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message author.
    pub role: ChatRole,
    /// Text content; absent on tool-call-only assistant turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls issued by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Correlates a `tool` message with the call it answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Plain system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(ChatRole::System, content)
    }

    /// Plain user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(ChatRole::User, content)
    }

    /// Assistant message echoing the model's content and tool calls.
    #[must_use]
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool response message for the call identified by `tool_call_id`.
    #[must_use]
    pub fn tool_response(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// One chat round: full transcript plus the tools the model may call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Transcript so far, system prompt first.
    pub messages: Vec<ChatMessage>,
    /// JSON tool specifications offered to the model.
    pub tools: Vec<serde_json::Value>,
}

impl ChatRequest {
    /// Request with a system and a user message and no tools.
    #[must_use]
    pub fn prompt(system_prompt: &str, user_prompt: &str) -> Self {
        Self {
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
            ],
            tools: Vec::new(),
        }
    }
}

/// The model's reply to one chat round.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    /// Text content, empty when the model only issued tool calls.
    pub content: String,
    /// Tool calls the caller must resolve before asking again.
    pub tool_calls: Vec<ToolCall>,
}

/// Chat-completion provider used for proposal generation and evaluation.
///
/// Implementations must tolerate concurrent calls; one client instance is
/// shared across sessions.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one chat round.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Llm` on transport failures or responses the
    /// provider could not produce.
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome>;

    /// Convenience wrapper: single system + user prompt, text reply.
    ///
    /// # Errors
    ///
    /// Propagates [`LlmClient::chat`] failures.
    async fn generate_response(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let outcome = self.chat(ChatRequest::prompt(system_prompt, user_prompt)).await?;
        Ok(outcome.content)
    }
}
