//! Deterministic doubles for driving sessions in tests and examples:
//! a scripted LLM, fixed-outcome code generators, and a recording sink.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codegen::{protocol_hash, CodeGenerator};
use crate::llm::{ChatOutcome, ChatRequest, LlmClient, ToolCall};
use crate::mux::SessionMultiplexer;
use crate::negotiator::CapabilityInfoProvider;
use crate::protocol::frames::{decode_frame, MetaFrame};
use crate::protocol::Role;
use crate::transport::FrameSink;
use crate::{AppError, Result};

/// LLM double replaying a fixed sequence of chat outcomes.
///
/// Each [`LlmClient::chat`] call pops the next scripted outcome; an
/// exhausted script is an LLM error. Every request is recorded for
/// assertions.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<ChatOutcome>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    /// Empty script; every call fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a plain text reply.
    #[must_use]
    pub fn reply(self, content: impl Into<String>) -> Self {
        self.script.lock().expect("script lock").push_back(ChatOutcome {
            content: content.into(),
            tool_calls: Vec::new(),
        });
        self
    }

    /// Script a tool-call turn.
    #[must_use]
    pub fn reply_tool_call(self, id: &str, name: &str, arguments: &str) -> Self {
        self.script.lock().expect("script lock").push_back(ChatOutcome {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: id.to_owned(),
                kind: "function".into(),
                function: crate::llm::FunctionCall {
                    name: name.to_owned(),
                    arguments: arguments.to_owned(),
                },
            }],
        });
        self
    }

    /// Requests observed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        self.requests.lock().expect("requests lock").push(request);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| AppError::Llm("scripted llm exhausted".into()))
    }
}

/// Fenced-JSON negotiation result as the evaluator prompts require it.
#[must_use]
pub fn fenced_result(status: &str, candidate_protocol: &str, modification_summary: &str) -> String {
    let body = serde_json::json!({
        "status": status,
        "candidate_protocol": candidate_protocol,
        "modification_summary": modification_summary,
    });
    format!("```json\n{body}\n```")
}

/// Code generator writing a stub module without an LLM round trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubCodeGenerator;

#[async_trait]
impl CodeGenerator for StubCodeGenerator {
    async fn generate(&self, protocol_doc: &str, role: Role, code_path: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(code_path)
            .await
            .map_err(|err| AppError::Codegen(err.to_string()))?;
        let module_path = code_path.join(format!("{}.py", protocol_hash(protocol_doc)));
        let source = format!("# {} handler stub\n", role.as_str());
        tokio::fs::write(&module_path, source)
            .await
            .map_err(|err| AppError::Codegen(err.to_string()))?;
        Ok(module_path)
    }
}

/// Code generator that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCodeGenerator;

#[async_trait]
impl CodeGenerator for FailingCodeGenerator {
    async fn generate(&self, _: &str, _: Role, _: &Path) -> Result<PathBuf> {
        Err(AppError::Codegen("generator wired to fail".into()))
    }
}

/// Capability callback answering with a fixed assessment.
#[derive(Debug, Clone)]
pub struct StaticCapabilityInfo(pub String);

#[async_trait]
impl CapabilityInfoProvider for StaticCapabilityInfo {
    async fn get_capability_info(&self, _: &str, _: &str, _: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Frame sink that records every delivery for later decoding.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<Bytes>>>,
}

impl RecordingSink {
    /// Fresh empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw recorded deliveries, in send order.
    #[must_use]
    pub fn raw(&self) -> Vec<Bytes> {
        self.frames.lock().expect("frames lock").clone()
    }

    /// Decoded recorded frames, in send order.
    #[must_use]
    pub fn decoded(&self) -> Vec<MetaFrame> {
        self.raw()
            .iter()
            .map(|data| decode_frame(data).expect("recorded frame decodes"))
            .collect()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.frames.lock().expect("frames lock").push(data);
        Ok(())
    }
}

/// Frame sink that records every delivery and forwards it to an inner
/// sink, so tests can assert the exact wire traffic of a live link.
#[derive(Clone)]
pub struct TeeSink {
    record: RecordingSink,
    inner: Arc<dyn FrameSink>,
}

impl TeeSink {
    /// Tee recording into `record` before forwarding to `inner`.
    #[must_use]
    pub fn new(record: RecordingSink, inner: Arc<dyn FrameSink>) -> Self {
        Self { record, inner }
    }
}

#[async_trait]
impl FrameSink for TeeSink {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.record.send(data.clone()).await?;
        self.inner.send(data).await
    }
}

/// Frame sink that fails every send.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokenSink;

#[async_trait]
impl FrameSink for BrokenSink {
    async fn send(&self, _: Bytes) -> Result<()> {
        Err(AppError::Transport("sink wired to fail".into()))
    }
}

/// Feed an in-memory endpoint's inbound frames into a multiplexer until
/// the link closes.
#[must_use]
pub fn spawn_dispatch(
    mut inbound: mpsc::Receiver<Bytes>,
    mux: Arc<SessionMultiplexer>,
    did: impl Into<String>,
) -> JoinHandle<()> {
    let did = did.into();
    tokio::spawn(async move {
        while let Some(data) = inbound.recv().await {
            if let Err(err) = mux.dispatch(&did, &data).await {
                tracing::warn!(%did, %err, "test dispatch dropped a frame");
            }
        }
    })
}
