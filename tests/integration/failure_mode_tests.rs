//! End-to-end failure scenarios: code-generation failure propagation and
//! evaluator breakdowns between two live sessions.

use std::sync::Arc;

use agent_accord::protocol::frames::MetaFrame;
use agent_accord::protocol::NegotiationStatus;
use agent_accord::test_support::{
    fenced_result, FailingCodeGenerator, ScriptedLlm, StubCodeGenerator,
};

use super::harness::{code_generation_count, negotiation_sequence_ids, run_pair, PairSetup};

const P0: &str = "# Requirements\nEcho text back.\n";

/// Negotiation succeeds but the requester's generator throws: both sides
/// exchange acknowledgements and both report failure.
#[tokio::test]
async fn one_sided_codegen_failure_fails_the_handshake_for_both() {
    let run = run_pair(PairSetup {
        requester_llm: ScriptedLlm::new().reply(P0),
        provider_llm: ScriptedLlm::new().reply(fenced_result("accepted", "", "ok")),
        requester_generator: Arc::new(FailingCodeGenerator),
        provider_generator: Arc::new(StubCodeGenerator),
        max_rounds: 10,
    })
    .await;

    assert!(!run.requester_outcome.success);
    assert!(!run.provider_outcome.success);
    assert_eq!(run.requester_outcome.module_path, None);
    assert_eq!(
        run.provider_outcome.module_path, None,
        "a failed handshake reports no module path even where generation worked"
    );

    // The handshake still completed on the wire: one ack per side, the
    // requester's carrying success=false.
    assert_eq!(code_generation_count(&run.requester_frames), 1);
    assert_eq!(code_generation_count(&run.provider_frames), 1);
    let requester_ack = run
        .requester_frames
        .iter()
        .find_map(|frame| match frame {
            MetaFrame::CodeGeneration(ack) => Some(ack.success),
            _ => None,
        })
        .expect("requester ack");
    assert!(!requester_ack);

    // Negotiation itself had agreed.
    assert_eq!(run.requester_session.status(), NegotiationStatus::Accepted);
    assert_eq!(run.provider_session.status(), NegotiationStatus::Accepted);
}

/// The provider's evaluator keeps returning garbage: its retries exhaust
/// and the requester receives a rejected frame.
#[tokio::test]
async fn provider_evaluator_breakdown_rejects_the_negotiation() {
    let run = run_pair(PairSetup {
        requester_llm: ScriptedLlm::new().reply(P0),
        // llm_retries is 1 in the harness config: two garbage replies
        // exhaust the budget.
        provider_llm: ScriptedLlm::new().reply("garbage").reply("more garbage"),
        requester_generator: Arc::new(StubCodeGenerator),
        provider_generator: Arc::new(StubCodeGenerator),
        max_rounds: 10,
    })
    .await;

    assert!(!run.requester_outcome.success);
    assert!(!run.provider_outcome.success);

    // The provider still owed the peer one final frame.
    assert_eq!(negotiation_sequence_ids(&run.provider_frames), [2]);
    match &run.provider_frames[0] {
        MetaFrame::ProtocolNegotiation(frame) => {
            assert_eq!(frame.status, NegotiationStatus::Rejected);
        }
        other => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(code_generation_count(&run.requester_frames), 0);
    assert_eq!(code_generation_count(&run.provider_frames), 0);
}

/// Once a session is terminal it emits no further negotiation frames,
/// even though the peer's final frame is still in flight.
#[tokio::test]
async fn terminal_sessions_emit_nothing_further() {
    let run = run_pair(PairSetup {
        requester_llm: ScriptedLlm::new().reply(P0),
        provider_llm: ScriptedLlm::new().reply(fenced_result("rejected", "", "incompatible")),
        requester_generator: Arc::new(StubCodeGenerator),
        provider_generator: Arc::new(StubCodeGenerator),
        max_rounds: 10,
    })
    .await;

    // Exactly one negotiation frame per side, nothing after the terminal
    // status on either side.
    assert_eq!(run.requester_frames.len(), 1);
    assert_eq!(run.provider_frames.len(), 1);
}
