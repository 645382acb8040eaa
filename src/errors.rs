//! Error types shared across the negotiation engine.

use std::fmt::{Display, Formatter};

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all negotiation failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Unparseable, schema-invalid, or unreachable LLM output.
    Llm(String),
    /// Out-of-sequence frame, unknown status, or malformed wire data.
    Protocol(String),
    /// Frame send or receive failure on the underlying channel.
    Transport(String),
    /// A round, LLM, or code-generation deadline expired.
    Timeout(String),
    /// Code generator returned failure or produced unusable output.
    Codegen(String),
    /// Negotiation exceeded the configured round cap without agreement.
    Convergence(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Llm(msg) => write!(f, "llm: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Codegen(msg) => write!(f, "codegen: {msg}"),
            Self::Convergence(msg) => write!(f, "convergence: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
