//! Code-generator facade invoked after a protocol is agreed.
//!
//! The engine treats handler generation as opaque: it hands the facade the
//! agreed protocol document, the local role, and an output directory, and
//! gets back the path of one written source file. Any error becomes a
//! `success=false` code-generation acknowledgement upstream.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::extract;
use crate::llm::LlmClient;
use crate::protocol::Role;
use crate::{AppError, Result};

/// Generates executable handler source for one side of an agreed protocol.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Write a handler for `role` under `code_path` and return its path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Codegen` when generation fails; the session maps
    /// any error to a failed acknowledgement.
    async fn generate(&self, protocol_doc: &str, role: Role, code_path: &Path) -> Result<PathBuf>;
}

/// Hex-encoded SHA-256 prefix identifying a protocol document.
///
/// Stable per document, so regenerating code for the same agreement
/// overwrites rather than accumulates.
#[must_use]
pub fn protocol_hash(protocol_doc: &str) -> String {
    let digest = Sha256::digest(protocol_doc.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

const REQUESTER_CODE_PROMPT: &str = r#"
You are a senior Python developer. Based on the protocol documentation below, implement the requester side of the protocol as a single self-contained Python module.

Requirements:
- Define one class with an async send_request(input: dict) -> dict method that constructs the request message defined by the protocol, sends it through an injected async send callback, awaits the response, and returns the response data.
- Provide a set_send_callback(callback) method and a handle_message(message: bytes) coroutine for inbound data.
- Follow the message formats, status codes, and error handling described in the protocol documentation exactly.
- Use type annotations and the logging module; handle timeouts and malformed responses.

Output the complete module wrapped in a single fenced ```python block.
"#;

const PROVIDER_CODE_PROMPT: &str = r#"
You are a senior Python developer. Based on the protocol documentation below, implement the provider side of the protocol as a single self-contained Python module.

Requirements:
- Define one class with a handle_message(message: bytes) coroutine that parses inbound request messages, dispatches to a registered async business handler, and sends the response through an injected async send callback.
- Provide set_send_callback(callback) and set_protocol_callback(handler) methods.
- Follow the message formats, status codes, and error handling described in the protocol documentation exactly; respond with the protocol's error codes on validation failures.
- Use type annotations and the logging module.

Output the complete module wrapped in a single fenced ```python block.
"#;

/// LLM-backed generator producing Python handler modules.
///
/// Writes two files under `code_path`: `<hash>.md` holding the agreed
/// protocol document and `<hash>.py` holding the extracted handler source.
/// The `.py` path is the module path reported to the host.
pub struct LlmCodeGenerator {
    llm: Arc<dyn LlmClient>,
}

impl LlmCodeGenerator {
    /// Build a generator sharing the engine's LLM client.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl CodeGenerator for LlmCodeGenerator {
    async fn generate(&self, protocol_doc: &str, role: Role, code_path: &Path) -> Result<PathBuf> {
        let system_prompt = match role {
            Role::Requester => REQUESTER_CODE_PROMPT,
            Role::Provider => PROVIDER_CODE_PROMPT,
        };
        let user_prompt = format!(
            "--[ protocol_document ]--\n{protocol_doc}\n--[END]--\n\nGenerate the {} module now.",
            role.as_str()
        );

        let completion = self
            .llm
            .generate_response(system_prompt, &user_prompt)
            .await
            .map_err(|err| AppError::Codegen(format!("handler generation failed: {err}")))?;

        let source = extract::extract_source(&completion, "python")
            .ok_or_else(|| AppError::Codegen("no python block in generated output".into()))?;

        let hash = protocol_hash(protocol_doc);
        tokio::fs::create_dir_all(code_path)
            .await
            .map_err(|err| AppError::Codegen(format!("cannot create code path: {err}")))?;

        let doc_path = code_path.join(format!("{hash}.md"));
        tokio::fs::write(&doc_path, protocol_doc)
            .await
            .map_err(|err| AppError::Codegen(format!("cannot write protocol document: {err}")))?;
        debug!(path = %doc_path.display(), "protocol document written");

        let module_path = code_path.join(format!("{hash}.py"));
        tokio::fs::write(&module_path, source)
            .await
            .map_err(|err| AppError::Codegen(format!("cannot write handler module: {err}")))?;

        info!(role = role.as_str(), path = %module_path.display(), "handler module generated");
        Ok(module_path)
    }
}
