//! Two-peer harness: a requester and a provider session wired over an
//! in-memory duplex link, each behind its own multiplexer, with every
//! outbound frame recorded for wire-level assertions.

use std::sync::Arc;

use agent_accord::codegen::CodeGenerator;
use agent_accord::config::{EngineConfig, NegotiationConfig};
use agent_accord::mux::SessionMultiplexer;
use agent_accord::negotiator::RequesterContext;
use agent_accord::protocol::frames::MetaFrame;
use agent_accord::session::{MetaSession, SessionOutcome};
use agent_accord::test_support::{spawn_dispatch, RecordingSink, ScriptedLlm, TeeSink};
use agent_accord::transport::memory_link;

pub const REQUESTER_DID: &str = "did:demo:alice";
pub const PROVIDER_DID: &str = "did:demo:bob";

/// Everything a scenario needs to assert on after the pair has run.
pub struct PairRun {
    pub requester_outcome: SessionOutcome,
    pub provider_outcome: SessionOutcome,
    pub requester_session: MetaSession,
    pub provider_session: MetaSession,
    /// Frames the requester put on the wire, in order.
    pub requester_frames: Vec<MetaFrame>,
    /// Frames the provider put on the wire, in order.
    pub provider_frames: Vec<MetaFrame>,
    _requester_dir: tempfile::TempDir,
    _provider_dir: tempfile::TempDir,
}

pub struct PairSetup {
    pub requester_llm: ScriptedLlm,
    pub provider_llm: ScriptedLlm,
    pub requester_generator: Arc<dyn CodeGenerator>,
    pub provider_generator: Arc<dyn CodeGenerator>,
    pub max_rounds: u32,
}

/// Run one full negotiation between two live sessions.
///
/// Short timeouts keep failure scenarios fast; the scripted LLMs answer
/// immediately, so happy paths never wait on them.
pub async fn run_pair(setup: PairSetup) -> PairRun {
    let requester_dir = tempfile::tempdir().expect("requester tempdir");
    let provider_dir = tempfile::tempdir().expect("provider tempdir");

    let max_rounds = setup.max_rounds;
    let config_for = move |dir: &tempfile::TempDir| {
        Arc::new(EngineConfig {
            code_path: dir.path().to_path_buf(),
            negotiation: NegotiationConfig {
                max_rounds,
                llm_retries: 1,
                round_timeout_seconds: 5,
                llm_timeout_seconds: 5,
                code_generation_timeout_seconds: 5,
            },
            llm: Default::default(),
        })
    };

    let (requester_end, provider_end) = memory_link(32);

    let requester_record = RecordingSink::new();
    let requester_sink = Arc::new(TeeSink::new(
        requester_record.clone(),
        Arc::new(requester_end.sink),
    ));
    let provider_record = RecordingSink::new();
    let provider_sink = Arc::new(TeeSink::new(
        provider_record.clone(),
        Arc::new(provider_end.sink),
    ));

    let (mut requester_session, requester_handle) = MetaSession::requester(
        config_for(&requester_dir),
        requester_sink,
        Arc::new(setup.requester_llm),
        setup.requester_generator,
        RequesterContext {
            requirement: "echo".into(),
            input_description: "{text:string}".into(),
            output_description: "{text:string}".into(),
        },
    );
    let (mut provider_session, provider_handle) = MetaSession::provider(
        config_for(&provider_dir),
        provider_sink,
        Arc::new(setup.provider_llm),
        setup.provider_generator,
        None,
    );

    // Each side routes inbound frames by the *peer's* DID.
    let requester_mux = Arc::new(SessionMultiplexer::new());
    requester_mux.register(PROVIDER_DID, requester_handle).await;
    let provider_mux = Arc::new(SessionMultiplexer::new());
    provider_mux.register(REQUESTER_DID, provider_handle).await;

    let requester_pump = spawn_dispatch(requester_end.inbound, requester_mux.clone(), PROVIDER_DID);
    let provider_pump = spawn_dispatch(provider_end.inbound, provider_mux.clone(), REQUESTER_DID);

    let requester_task = tokio::spawn(async move {
        let outcome = requester_session.negotiate_protocol().await;
        (outcome, requester_session)
    });
    let provider_task = tokio::spawn(async move {
        let outcome = provider_session.wait_remote_negotiation().await;
        (outcome, provider_session)
    });

    let (requester_outcome, requester_session) = requester_task.await.expect("requester task");
    let (provider_outcome, provider_session) = provider_task.await.expect("provider task");

    requester_pump.abort();
    provider_pump.abort();

    PairRun {
        requester_outcome,
        provider_outcome,
        requester_session,
        provider_session,
        requester_frames: requester_record.decoded(),
        provider_frames: provider_record.decoded(),
        // Temp dirs outlive the run so module-path assertions can stat the
        // generated files.
        _requester_dir: requester_dir,
        _provider_dir: provider_dir,
    }
}

/// Sequence ids of the `protocolNegotiation` frames in `frames`.
pub fn negotiation_sequence_ids(frames: &[MetaFrame]) -> Vec<u32> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            MetaFrame::ProtocolNegotiation(inner) => Some(inner.sequence_id),
            _ => None,
        })
        .collect()
}

/// Count of `codeGeneration` frames in `frames`.
pub fn code_generation_count(frames: &[MetaFrame]) -> usize {
    frames
        .iter()
        .filter(|frame| matches!(frame, MetaFrame::CodeGeneration(_)))
        .count()
}
