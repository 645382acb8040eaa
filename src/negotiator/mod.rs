//! LLM-driven proposal generation and evaluation.
//!
//! The negotiator is stateless over its explicit inputs: the session owns
//! the round history and all retry logic, and hands the negotiator exactly
//! what one LLM round needs. The only state kept here is the provider's
//! `capability_info_history`, which grows as the model calls the
//! `get_capability_info` tool and must be visible to every later round.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::extract;
use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::protocol::{NegotiationResult, NegotiationStatus, Role};
use crate::{AppError, Result};

pub mod prompts;

/// Upper bound on capability tool round-trips within one evaluation.
///
/// A model that keeps asking for capability info never terminates the
/// evaluation otherwise; past this bound the round is an LLM failure.
const MAX_TOOL_ROUNDS: usize = 8;

/// The requester's original requirement and I/O expectations.
///
/// Fixed for the lifetime of a session and fed into every requester-side
/// evaluation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterContext {
    /// Natural-language protocol requirement.
    pub requirement: String,
    /// Expected input format description.
    pub input_description: String,
    /// Expected output format description.
    pub output_description: String,
}

/// Host-side capability lookup for the provider role.
///
/// The LLM decides when to consult it; the negotiator resolves the call and
/// feeds the answer back into the conversation.
#[async_trait]
pub trait CapabilityInfoProvider: Send + Sync {
    /// Assess whether the host can implement the described protocol.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the negotiator folds the error text into
    /// the capability answer rather than aborting the round.
    async fn get_capability_info(
        &self,
        requirement: &str,
        input_description: &str,
        output_description: &str,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CapabilityArgs {
    requirement: String,
    input_description: String,
    output_description: String,
}

/// Per-session protocol negotiator.
pub struct Negotiator {
    llm: Arc<dyn LlmClient>,
    role: Role,
    requester_context: Option<RequesterContext>,
    capability: Option<Arc<dyn CapabilityInfoProvider>>,
    capability_info_history: Vec<String>,
}

impl Negotiator {
    /// Negotiator for the requester role.
    #[must_use]
    pub fn requester(llm: Arc<dyn LlmClient>, context: RequesterContext) -> Self {
        Self {
            llm,
            role: Role::Requester,
            requester_context: Some(context),
            capability: None,
            capability_info_history: Vec::new(),
        }
    }

    /// Negotiator for the provider role.
    #[must_use]
    pub fn provider(
        llm: Arc<dyn LlmClient>,
        capability: Option<Arc<dyn CapabilityInfoProvider>>,
    ) -> Self {
        Self {
            llm,
            role: Role::Provider,
            requester_context: None,
            capability,
            capability_info_history: Vec::new(),
        }
    }

    /// Negotiation role this negotiator evaluates for.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Capability answers accumulated over this session.
    #[must_use]
    pub fn capability_info_history(&self) -> &[String] {
        &self.capability_info_history
    }

    /// Produce the first protocol proposal. Requester only.
    ///
    /// Returns the protocol document together with the `Negotiating` status
    /// and round number 1 for the opening frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Llm` when the model cannot be reached or returns
    /// an empty document, and `AppError::Protocol` when called on a
    /// provider-role negotiator.
    pub async fn generate_initial_protocol(&self) -> Result<(String, NegotiationStatus, u32)> {
        let context = self.requester_context.as_ref().ok_or_else(|| {
            AppError::Protocol("initial protocol generation requires the requester role".into())
        })?;

        info!("generating initial protocol proposal");
        let user_prompt = prompts::initial_design_input(
            &context.requirement,
            &context.input_description,
            &context.output_description,
        );
        let protocol = self
            .llm
            .generate_response(prompts::PROTOCOL_DESIGNER_PROMPT, &user_prompt)
            .await?;

        if protocol.trim().is_empty() {
            return Err(AppError::Llm("initial protocol came back empty".into()));
        }

        debug!(bytes = protocol.len(), "initial protocol generated");
        Ok((protocol, NegotiationStatus::Negotiating, 1))
    }

    /// Evaluate the peer's latest proposal and produce this side's verdict.
    ///
    /// `own_previous` is this side's last-authored candidate from the
    /// session history, if any. The returned round number is the sequence
    /// id the session must use for its answering frame, always
    /// `peer_round + 1`.
    ///
    /// On an `Accepted` verdict the result's `candidate_protocol` is set to
    /// the peer's candidate, which is the document both sides agreed on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Llm` when the completion cannot be parsed into a
    /// valid [`NegotiationResult`].
    pub async fn evaluate_proposal(
        &mut self,
        peer_round: u32,
        peer_candidate: &str,
        peer_modification_summary: &str,
        own_previous: Option<&str>,
    ) -> Result<(NegotiationResult, u32)> {
        let self_round = peer_round + 1;
        let raw = match self.role {
            Role::Requester => {
                self.evaluate_as_requester(peer_candidate, peer_modification_summary, own_previous)
                    .await?
            }
            Role::Provider => {
                self.evaluate_as_provider(peer_candidate, peer_modification_summary, own_previous)
                    .await?
            }
        };

        let mut result = parse_result(&raw)?;
        if result.status == NegotiationStatus::Accepted {
            // The accepted document is the peer's candidate as received, not
            // whatever the model chose to echo.
            result.candidate_protocol = peer_candidate.to_owned();
        }

        info!(status = ?result.status, round = self_round, "proposal evaluated");
        Ok((result, self_round))
    }

    async fn evaluate_as_requester(
        &self,
        peer_candidate: &str,
        peer_modification_summary: &str,
        own_previous: Option<&str>,
    ) -> Result<String> {
        let context = self.requester_context.as_ref().ok_or_else(|| {
            AppError::Protocol("requester evaluation without requester context".into())
        })?;

        let user_prompt = prompts::requester_evaluation_input(
            &context.requirement,
            &context.input_description,
            &context.output_description,
            peer_candidate,
            own_previous,
            peer_modification_summary,
        );
        self.llm
            .generate_response(&prompts::requester_evaluation_prompt(), &user_prompt)
            .await
    }

    /// Provider evaluation runs a tool loop: the model may call
    /// `get_capability_info` any number of times (bounded) before giving a
    /// verdict, and each answer is appended to the session-lifetime
    /// capability history.
    async fn evaluate_as_provider(
        &mut self,
        peer_candidate: &str,
        peer_modification_summary: &str,
        own_previous: Option<&str>,
    ) -> Result<String> {
        let user_prompt = prompts::provider_evaluation_input(
            peer_candidate,
            own_previous,
            peer_modification_summary,
            &self.capability_info_history,
        );
        let mut messages = vec![
            ChatMessage::system(prompts::provider_evaluation_prompt()),
            ChatMessage::user(user_prompt),
        ];

        for _ in 0..MAX_TOOL_ROUNDS {
            let outcome = self
                .llm
                .chat(ChatRequest {
                    messages: messages.clone(),
                    tools: vec![prompts::capability_tool_spec()],
                })
                .await?;

            if outcome.tool_calls.is_empty() {
                return Ok(outcome.content);
            }

            messages.push(ChatMessage::assistant(
                (!outcome.content.is_empty()).then(|| outcome.content.clone()),
                outcome.tool_calls.clone(),
            ));

            for call in outcome.tool_calls {
                if call.function.name != "get_capability_info" {
                    warn!(tool = %call.function.name, "model requested an unknown tool");
                    messages.push(ChatMessage::tool_response(call.id, "unknown tool"));
                    continue;
                }
                let answer = self.resolve_capability_call(&call.function.arguments).await;
                self.capability_info_history.push(answer.clone());
                messages.push(ChatMessage::tool_response(call.id, answer));
            }
        }

        Err(AppError::Llm(format!(
            "provider evaluation exceeded {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }

    async fn resolve_capability_call(&self, arguments: &str) -> String {
        let args: CapabilityArgs = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(err) => {
                warn!(%err, "malformed get_capability_info arguments");
                return format!("Error: malformed capability arguments: {err}");
            }
        };

        let Some(capability) = &self.capability else {
            debug!("no capability callback registered, answering with empty info");
            return String::new();
        };

        match capability
            .get_capability_info(
                &args.requirement,
                &args.input_description,
                &args.output_description,
            )
            .await
        {
            Ok(info) => info,
            Err(err) => {
                warn!(%err, "capability info callback failed");
                format!("Error getting capability info: {err}")
            }
        }
    }
}

/// Parse a fenced-JSON completion into a validated [`NegotiationResult`].
///
/// # Errors
///
/// Returns `AppError::Llm` when no fenced JSON block is present, the JSON
/// does not match the result schema, or the candidate-protocol invariant is
/// violated.
pub fn parse_result(raw: &str) -> Result<NegotiationResult> {
    let body = extract::last_block_tagged(raw, "json")
        .or_else(|| extract::last_block_bare(raw))
        .ok_or_else(|| AppError::Llm("no fenced JSON block in evaluation output".into()))?;

    let result: NegotiationResult = serde_json::from_str(&body)
        .map_err(|err| AppError::Llm(format!("negotiation result does not parse: {err}")))?;
    result.validate()?;
    Ok(result)
}
