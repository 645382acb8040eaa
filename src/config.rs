//! Engine configuration parsing, validation, and LLM credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Negotiation loop constants.
///
/// The round cap, retry count, and timeouts are deliberately configuration
/// rather than compile-time constants so that two peers built from the same
/// binary can still be tuned independently.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NegotiationConfig {
    /// Maximum outbound sequence number before negotiation is abandoned.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Retries after an unparseable or timed-out LLM round.
    #[serde(default = "default_llm_retries")]
    pub llm_retries: u32,
    /// Seconds to wait for the next inbound negotiation frame.
    #[serde(default = "default_round_timeout_seconds")]
    pub round_timeout_seconds: u64,
    /// Wall-clock bound on a single LLM call.
    #[serde(default = "default_llm_timeout_seconds")]
    pub llm_timeout_seconds: u64,
    /// Seconds to wait for the peer's code-generation acknowledgement.
    #[serde(default = "default_code_generation_timeout_seconds")]
    pub code_generation_timeout_seconds: u64,
}

fn default_max_rounds() -> u32 {
    10
}

fn default_llm_retries() -> u32 {
    2
}

fn default_round_timeout_seconds() -> u64 {
    60
}

fn default_llm_timeout_seconds() -> u64 {
    120
}

fn default_code_generation_timeout_seconds() -> u64 {
    60
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            llm_retries: default_llm_retries(),
            round_timeout_seconds: default_round_timeout_seconds(),
            llm_timeout_seconds: default_llm_timeout_seconds(),
            code_generation_timeout_seconds: default_code_generation_timeout_seconds(),
        }
    }
}

impl NegotiationConfig {
    /// Round-frame wait deadline.
    #[must_use]
    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout_seconds)
    }

    /// Per-call LLM deadline.
    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    /// Code-generation acknowledgement deadline.
    #[must_use]
    pub fn code_generation_timeout(&self) -> Duration {
        Duration::from_secs(self.code_generation_timeout_seconds)
    }
}

/// Connection settings for the OpenAI-compatible chat endpoint.
///
/// The API key is loaded at runtime from the environment, never from the
/// TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    /// Base URL of the chat-completions endpoint.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Model identifier passed on every request.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Bearer token (populated at runtime).
    #[serde(skip)]
    pub api_key: String,
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

fn default_llm_model() -> String {
    "deepseek/deepseek-chat".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: String::new(),
        }
    }
}

fn default_code_path() -> PathBuf {
    PathBuf::from("generated_protocols")
}

/// Engine configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Directory where generated handler code is written.
    #[serde(default = "default_code_path")]
    pub code_path: PathBuf,
    /// Negotiation loop constants.
    #[serde(default)]
    pub negotiation: NegotiationConfig,
    /// LLM endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            code_path: default_code_path(),
            negotiation: NegotiationConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load LLM credentials and endpoint overrides from environment
    /// variables.
    ///
    /// `OPENROUTER_API_KEY` is required; `OPENROUTER_BASE_URL` and
    /// `OPENROUTER_MODEL_NAME` override the TOML values when present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the API key variable is absent.
    pub fn load_llm_credentials(&mut self) -> Result<()> {
        if let Ok(base_url) = env::var("OPENROUTER_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Ok(model) = env::var("OPENROUTER_MODEL_NAME") {
            self.llm.model = model;
        }
        match env::var("OPENROUTER_API_KEY") {
            Ok(key) if !key.is_empty() => {
                self.llm.api_key = key;
                Ok(())
            }
            Ok(_) => {
                warn!("OPENROUTER_API_KEY is set but empty");
                Err(AppError::Config("OPENROUTER_API_KEY is empty".into()))
            }
            Err(_) => Err(AppError::Config(
                "OPENROUTER_API_KEY not found in environment".into(),
            )),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.negotiation.max_rounds == 0 {
            return Err(AppError::Config(
                "negotiation.max_rounds must be greater than zero".into(),
            ));
        }
        if self.negotiation.round_timeout_seconds == 0 {
            return Err(AppError::Config(
                "negotiation.round_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.code_path.as_os_str().is_empty() {
            return Err(AppError::Config("code_path must not be empty".into()));
        }
        Ok(())
    }
}
