//! Unit tests for the LLM negotiator: result parsing, evaluation rounds,
//! and the provider capability tool loop.

use std::sync::Arc;

use agent_accord::llm::ChatRole;
use agent_accord::negotiator::{
    parse_result, CapabilityInfoProvider, Negotiator, RequesterContext,
};
use agent_accord::protocol::NegotiationStatus;
use agent_accord::test_support::{fenced_result, ScriptedLlm, StaticCapabilityInfo};
use agent_accord::AppError;

fn echo_context() -> RequesterContext {
    RequesterContext {
        requirement: "echo".into(),
        input_description: "{text:string}".into(),
        output_description: "{text:string}".into(),
    }
}

// ── Result parsing ────────────────────────────────────────────────────────────

#[test]
fn parse_result_reads_fenced_json() {
    let raw = fenced_result("negotiating", "# Protocol v2", "renamed a field");
    let result = parse_result(&raw).expect("fenced result must parse");

    assert_eq!(result.status, NegotiationStatus::Negotiating);
    assert_eq!(result.candidate_protocol, "# Protocol v2");
    assert_eq!(result.modification_summary, "renamed a field");
}

#[test]
fn parse_result_accepts_bare_fence() {
    let raw = "```\n{\"status\": \"accepted\", \"candidate_protocol\": \"\", \"modification_summary\": \"ok\"}\n```";
    let result = parse_result(raw).expect("bare fence must parse");
    assert_eq!(result.status, NegotiationStatus::Accepted);
}

#[test]
fn parse_result_requires_a_fence() {
    let raw = "{\"status\": \"accepted\", \"candidate_protocol\": \"\"}";
    let err = parse_result(raw).expect_err("unfenced output is an llm failure");
    assert!(matches!(err, AppError::Llm(_)), "got {err:?}");
}

#[test]
fn parse_result_rejects_unknown_status() {
    let raw = "```json\n{\"status\": \"maybe\", \"candidate_protocol\": \"\"}\n```";
    assert!(matches!(parse_result(raw), Err(AppError::Llm(_))));
}

#[test]
fn negotiating_without_candidate_is_invalid() {
    let raw = fenced_result("negotiating", "", "changed things");
    assert!(matches!(parse_result(raw.as_str()), Err(AppError::Llm(_))));
}

#[test]
fn terminal_with_candidate_is_invalid() {
    let raw = fenced_result("rejected", "# leftover", "no");
    assert!(matches!(parse_result(raw.as_str()), Err(AppError::Llm(_))));
}

// ── Initial proposal ──────────────────────────────────────────────────────────

#[tokio::test]
async fn initial_proposal_returns_round_one() {
    let llm = Arc::new(ScriptedLlm::new().reply("# Requirements\nEcho."));
    let negotiator = Negotiator::requester(llm, echo_context());

    let (protocol, status, round) = negotiator
        .generate_initial_protocol()
        .await
        .expect("initial proposal must succeed");

    assert_eq!(protocol, "# Requirements\nEcho.");
    assert_eq!(status, NegotiationStatus::Negotiating);
    assert_eq!(round, 1);
}

#[tokio::test]
async fn empty_initial_proposal_is_an_llm_error() {
    let llm = Arc::new(ScriptedLlm::new().reply("   \n"));
    let negotiator = Negotiator::requester(llm, echo_context());

    let err = negotiator
        .generate_initial_protocol()
        .await
        .expect_err("empty proposal must fail");
    assert!(matches!(err, AppError::Llm(_)), "got {err:?}");
}

#[tokio::test]
async fn provider_cannot_generate_the_initial_proposal() {
    let llm = Arc::new(ScriptedLlm::new());
    let negotiator = Negotiator::provider(llm, None);

    let err = negotiator
        .generate_initial_protocol()
        .await
        .expect_err("provider role must be refused");
    assert!(matches!(err, AppError::Protocol(_)), "got {err:?}");
}

// ── Evaluation rounds ─────────────────────────────────────────────────────────

#[tokio::test]
async fn evaluation_round_numbers_follow_the_peer() {
    let llm = Arc::new(ScriptedLlm::new().reply(fenced_result(
        "negotiating",
        "# Protocol v2",
        "added userId",
    )));
    let mut negotiator = Negotiator::requester(llm, echo_context());

    let (result, self_round) = negotiator
        .evaluate_proposal(2, "# Protocol v1", "", Some("# Protocol v0"))
        .await
        .expect("evaluation must succeed");

    assert_eq!(self_round, 3, "answer uses the next sequence number");
    assert_eq!(result.status, NegotiationStatus::Negotiating);
    assert_eq!(result.candidate_protocol, "# Protocol v2");
}

#[tokio::test]
async fn acceptance_pins_the_peer_candidate() {
    let llm = Arc::new(ScriptedLlm::new().reply(fenced_result("accepted", "", "lgtm")));
    let mut negotiator = Negotiator::requester(llm, echo_context());

    let (result, _) = negotiator
        .evaluate_proposal(2, "# Peer protocol", "tweaks", Some("# Mine"))
        .await
        .expect("evaluation must succeed");

    assert_eq!(result.status, NegotiationStatus::Accepted);
    assert_eq!(
        result.candidate_protocol, "# Peer protocol",
        "the agreed document is what the peer sent, not what the model echoed"
    );
}

#[tokio::test]
async fn unfenced_evaluation_output_is_an_llm_error() {
    let llm = Arc::new(ScriptedLlm::new().reply("I think we should accept this."));
    let mut negotiator = Negotiator::requester(llm, echo_context());

    let err = negotiator
        .evaluate_proposal(2, "# Peer protocol", "", None)
        .await
        .expect_err("prose output must fail");
    assert!(matches!(err, AppError::Llm(_)), "got {err:?}");
}

// ── Provider capability tool loop ─────────────────────────────────────────────

#[tokio::test]
async fn provider_tool_call_is_resolved_and_recorded() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .reply_tool_call(
                "call-1",
                "get_capability_info",
                r#"{"requirement":"echo","input_description":"{text}","output_description":"{text}"}"#,
            )
            .reply(fenced_result("accepted", "", "within capabilities")),
    );
    let capability: Arc<dyn CapabilityInfoProvider> =
        Arc::new(StaticCapabilityInfo("can implement echo".into()));
    let mut negotiator = Negotiator::provider(llm.clone(), Some(capability));

    let (result, self_round) = negotiator
        .evaluate_proposal(1, "# Echo protocol", "", None)
        .await
        .expect("tool-assisted evaluation must succeed");

    assert_eq!(self_round, 2);
    assert_eq!(result.status, NegotiationStatus::Accepted);
    assert_eq!(
        negotiator.capability_info_history(),
        ["can implement echo"],
        "tool answers accumulate in the session history"
    );

    // The second chat round carries the resolved tool response.
    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let followup = &requests[1].messages;
    let tool_message = followup
        .iter()
        .find(|message| message.role == ChatRole::Tool)
        .expect("tool response must be fed back");
    assert_eq!(tool_message.content.as_deref(), Some("can implement echo"));
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call-1"));
}

#[tokio::test]
async fn missing_capability_callback_answers_empty() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .reply_tool_call(
                "call-1",
                "get_capability_info",
                r#"{"requirement":"r","input_description":"i","output_description":"o"}"#,
            )
            .reply(fenced_result("rejected", "", "cannot verify capabilities")),
    );
    let mut negotiator = Negotiator::provider(llm, None);

    let (result, _) = negotiator
        .evaluate_proposal(1, "# Protocol", "", None)
        .await
        .expect("evaluation must still complete");

    assert_eq!(result.status, NegotiationStatus::Rejected);
    assert_eq!(negotiator.capability_info_history(), [""]);
}

#[tokio::test]
async fn endless_tool_calls_exhaust_the_round_bound() {
    let mut llm = ScriptedLlm::new();
    for n in 0..16 {
        llm = llm.reply_tool_call(
            &format!("call-{n}"),
            "get_capability_info",
            r#"{"requirement":"r","input_description":"i","output_description":"o"}"#,
        );
    }
    let capability: Arc<dyn CapabilityInfoProvider> = Arc::new(StaticCapabilityInfo("yes".into()));
    let mut negotiator = Negotiator::provider(Arc::new(llm), Some(capability));

    let err = negotiator
        .evaluate_proposal(1, "# Protocol", "", None)
        .await
        .expect_err("a model that never answers must fail the round");
    assert!(matches!(err, AppError::Llm(_)), "got {err:?}");
}
