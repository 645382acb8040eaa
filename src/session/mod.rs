//! Per-peer meta-protocol session: state machine, round loop, and the
//! code-generation handshake.
//!
//! A session owns one driver task; every state mutation happens inside it.
//! Inbound frames are handed over through two bounded queues so the
//! transport's receiver task never touches session state: the negotiation
//! inbox (capacity 16) and a dedicated capacity-1 code-generation inbox,
//! which has a different lifecycle because its one frame may arrive before
//! or after the local acknowledgement is sent.
//!
//! Negotiation is strictly ping-pong. While an evaluation (an LLM call) is
//! in flight the driver does not read the inbox, so a frame arriving
//! mid-evaluation waits its turn; the evaluator's outbound frame always
//! goes out before the queued inbound frame is processed.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::codegen::CodeGenerator;
use crate::config::EngineConfig;
use crate::negotiator::{CapabilityInfoProvider, Negotiator, RequesterContext};
use crate::protocol::frames::{
    encode_frame, CodeGenerationFrame, MetaFrame, ProtocolNegotiationFrame,
};
use crate::protocol::{HistoryEntry, NegotiationStatus, Party, Role};
use crate::transport::FrameSink;
use crate::{AppError, Result};

/// Bound on queued inbound negotiation frames per session.
pub const NEGOTIATION_INBOX_CAPACITY: usize = 16;

/// The code-generation inbox accepts exactly one acknowledgement.
pub const CODE_GENERATION_INBOX_CAPACITY: usize = 1;

/// Driver-visible session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, driver not yet started.
    Init,
    /// Own frame sent, waiting for the peer's answer.
    Proposing,
    /// Peer frame received, evaluator in flight.
    Evaluating,
    /// Both sides agreed on a protocol document.
    Agreed,
    /// Local code generated, waiting for the peer's acknowledgement.
    CodegenWait,
    /// Negotiation or handshake failed.
    Failed,
    /// Session finished; no further frames are read or written.
    Done,
}

/// Final result of one session run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Whether negotiation and both code generations succeeded.
    pub success: bool,
    /// Path of the locally generated handler module; set only on success.
    pub module_path: Option<PathBuf>,
}

impl SessionOutcome {
    fn failure() -> Self {
        Self {
            success: false,
            module_path: None,
        }
    }
}

/// Cloneable inbox handle registered with the multiplexer.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    negotiation_tx: mpsc::Sender<ProtocolNegotiationFrame>,
    code_generation_tx: mpsc::Sender<CodeGenerationFrame>,
}

impl SessionHandle {
    /// Queue an inbound negotiation frame, waiting when the inbox is full.
    ///
    /// Returns `false` when the session is no longer reading.
    pub async fn deliver_negotiation(&self, frame: ProtocolNegotiationFrame) -> bool {
        self.negotiation_tx.send(frame).await.is_ok()
    }

    /// Offer the peer's code-generation acknowledgement.
    ///
    /// The inbox holds exactly one frame; a second delivery is refused,
    /// which enforces the accept-exactly-one rule for terminal sessions.
    pub fn deliver_code_generation(&self, frame: CodeGenerationFrame) -> bool {
        self.code_generation_tx.try_send(frame).is_ok()
    }
}

/// Per-peer negotiation session.
pub struct MetaSession {
    config: Arc<EngineConfig>,
    role: Role,
    sink: Arc<dyn FrameSink>,
    negotiator: Negotiator,
    generator: Arc<dyn CodeGenerator>,
    history: Vec<HistoryEntry>,
    self_round: u32,
    peer_round: u32,
    status: NegotiationStatus,
    state: SessionState,
    agreed_protocol: Option<String>,
    negotiation_rx: mpsc::Receiver<ProtocolNegotiationFrame>,
    code_generation_rx: mpsc::Receiver<CodeGenerationFrame>,
}

impl MetaSession {
    /// Build a requester-role session and its inbox handle.
    ///
    /// The session holds only the receive halves; when every handle clone
    /// is dropped (transport closed, multiplexer deregistered) the driver
    /// observes a closed inbox and fails the session.
    #[must_use]
    pub fn requester(
        config: Arc<EngineConfig>,
        sink: Arc<dyn FrameSink>,
        llm: Arc<dyn crate::llm::LlmClient>,
        generator: Arc<dyn CodeGenerator>,
        context: RequesterContext,
    ) -> (Self, SessionHandle) {
        Self::new(
            config,
            Role::Requester,
            sink,
            Negotiator::requester(llm, context),
            generator,
        )
    }

    /// Build a provider-role session and its inbox handle.
    #[must_use]
    pub fn provider(
        config: Arc<EngineConfig>,
        sink: Arc<dyn FrameSink>,
        llm: Arc<dyn crate::llm::LlmClient>,
        generator: Arc<dyn CodeGenerator>,
        capability: Option<Arc<dyn CapabilityInfoProvider>>,
    ) -> (Self, SessionHandle) {
        Self::new(
            config,
            Role::Provider,
            sink,
            Negotiator::provider(llm, capability),
            generator,
        )
    }

    fn new(
        config: Arc<EngineConfig>,
        role: Role,
        sink: Arc<dyn FrameSink>,
        negotiator: Negotiator,
        generator: Arc<dyn CodeGenerator>,
    ) -> (Self, SessionHandle) {
        let (negotiation_tx, negotiation_rx) = mpsc::channel(NEGOTIATION_INBOX_CAPACITY);
        let (code_generation_tx, code_generation_rx) =
            mpsc::channel(CODE_GENERATION_INBOX_CAPACITY);
        let session = Self {
            config,
            role,
            sink,
            negotiator,
            generator,
            history: Vec::new(),
            self_round: 0,
            peer_round: 0,
            status: NegotiationStatus::Negotiating,
            state: SessionState::Init,
            agreed_protocol: None,
            negotiation_rx,
            code_generation_rx,
        };
        (
            session,
            SessionHandle {
                negotiation_tx,
                code_generation_tx,
            },
        )
    }

    /// Current driver phase.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current negotiation status.
    #[must_use]
    pub fn status(&self) -> NegotiationStatus {
        self.status
    }

    /// Negotiation role of this session.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Append-only round history.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// The agreed protocol document, set exactly once on acceptance.
    #[must_use]
    pub fn agreed_protocol(&self) -> Option<&str> {
        self.agreed_protocol.as_deref()
    }

    // ── Entry points ──────────────────────────────────────────────────────────

    /// Drive a full requester-side negotiation, then the code-generation
    /// handshake.
    ///
    /// All failures are handled internally and reported through logs; the
    /// returned outcome is the session's single result.
    pub async fn negotiate_protocol(&mut self) -> SessionOutcome {
        let span = info_span!("negotiate_protocol", role = self.role.as_str());
        async {
            if self.role != Role::Requester {
                error!("negotiate_protocol called on a provider session");
                self.state = SessionState::Done;
                return SessionOutcome::failure();
            }
            let negotiated = self.drive_requester().await;
            self.conclude(negotiated).await
        }
        .instrument(span)
        .await
    }

    /// Wait for a remote requester to drive the negotiation, then run the
    /// code-generation handshake.
    pub async fn wait_remote_negotiation(&mut self) -> SessionOutcome {
        let span = info_span!("wait_remote_negotiation", role = self.role.as_str());
        async {
            if self.role != Role::Provider {
                error!("wait_remote_negotiation called on a requester session");
                self.state = SessionState::Done;
                return SessionOutcome::failure();
            }
            let negotiated = self.drive_provider().await;
            self.conclude(negotiated).await
        }
        .instrument(span)
        .await
    }

    // ── Negotiation drivers ───────────────────────────────────────────────────

    async fn drive_requester(&mut self) -> Result<bool> {
        self.state = SessionState::Evaluating;

        let protocol = match self.initial_proposal_with_retries().await {
            Ok(protocol) => protocol,
            Err(err) => {
                warn!(%err, "initial proposal failed, notifying peer");
                self.fail_with_reject(1, "initial protocol generation failed")
                    .await?;
                return Err(err);
            }
        };

        self.history.push(HistoryEntry {
            round: 1,
            candidate_protocol: protocol.clone(),
            modification_summary: String::new(),
            authored_by: Party::Local,
        });
        self.send_negotiation(1, protocol, NegotiationStatus::Negotiating, String::new())
            .await?;
        self.self_round = 1;
        self.state = SessionState::Proposing;

        self.round_loop().await
    }

    async fn drive_provider(&mut self) -> Result<bool> {
        // The provider proposes nothing until the requester's opening frame
        // arrives.
        self.state = SessionState::Proposing;
        self.round_loop().await
    }

    /// Shared round loop: one inbound frame consumed per iteration.
    ///
    /// Returns `Ok(true)` on agreement, `Ok(false)` on a clean rejection by
    /// either side, and an error for protocol, transport, timeout, LLM, or
    /// convergence failures (after any final frame owed to the peer has
    /// been sent).
    async fn round_loop(&mut self) -> Result<bool> {
        loop {
            let frame = self.await_negotiation_frame().await?;

            // Replays carry an already-accepted sequence id and cause no
            // state transition.
            if frame.sequence_id <= self.peer_round {
                debug!(
                    sequence_id = frame.sequence_id,
                    peer_round = self.peer_round,
                    "dropping duplicate negotiation frame"
                );
                continue;
            }
            if frame.sequence_id != self.self_round + 1 {
                warn!(
                    sequence_id = frame.sequence_id,
                    expected = self.self_round + 1,
                    "out-of-sequence negotiation frame"
                );
                self.fail_with_reject(frame.sequence_id + 1, "protocol error: unexpected sequence")
                    .await?;
                return Err(AppError::Protocol(format!(
                    "expected sequence {}, got {}",
                    self.self_round + 1,
                    frame.sequence_id
                )));
            }
            self.peer_round = frame.sequence_id;

            match frame.status {
                NegotiationStatus::Accepted => return self.handle_peer_accept(&frame).await,
                NegotiationStatus::Rejected => {
                    info!(
                        reason = %frame.modification_summary,
                        "peer rejected the negotiation"
                    );
                    self.status = NegotiationStatus::Rejected;
                    self.state = SessionState::Failed;
                    return Ok(false);
                }
                NegotiationStatus::Negotiating => {
                    if self.handle_peer_proposal(frame).await? {
                        return Ok(true);
                    }
                    if self.status == NegotiationStatus::Rejected {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Peer accepted: the agreed document is this side's last proposal.
    async fn handle_peer_accept(&mut self, frame: &ProtocolNegotiationFrame) -> Result<bool> {
        let Some(own_last) = self.last_local_candidate() else {
            self.fail_with_reject(
                frame.sequence_id + 1,
                "protocol error: acceptance before any proposal",
            )
            .await?;
            return Err(AppError::Protocol(
                "peer accepted before this side proposed anything".into(),
            ));
        };

        if !frame.candidate_protocols.is_empty() && frame.candidate_protocols != own_last {
            warn!("acceptance frame candidate differs from our last proposal");
        }

        self.agreed_protocol = Some(own_last);
        self.status = NegotiationStatus::Accepted;
        self.state = SessionState::Agreed;
        info!(round = frame.sequence_id, "peer accepted our proposal");
        Ok(true)
    }

    /// Peer is still negotiating: evaluate and answer.
    ///
    /// Returns `Ok(true)` when this side accepted the peer's candidate.
    async fn handle_peer_proposal(&mut self, frame: ProtocolNegotiationFrame) -> Result<bool> {
        self.history.push(HistoryEntry {
            round: frame.sequence_id,
            candidate_protocol: frame.candidate_protocols.clone(),
            modification_summary: frame.modification_summary.clone(),
            authored_by: Party::Peer,
        });
        self.state = SessionState::Evaluating;

        let next_seq = frame.sequence_id + 1;
        if next_seq > self.config.negotiation.max_rounds {
            warn!(
                next_seq,
                max_rounds = self.config.negotiation.max_rounds,
                "round cap reached without agreement"
            );
            self.fail_with_reject(next_seq, "negotiation did not converge within the round limit")
                .await?;
            return Err(AppError::Convergence(format!(
                "no agreement within {} rounds",
                self.config.negotiation.max_rounds
            )));
        }

        let own_previous = self.last_local_candidate();
        let evaluated = self
            .evaluate_with_retries(&frame, own_previous.as_deref())
            .await;
        let (result, self_seq) = match evaluated {
            Ok(outcome) => outcome,
            Err(err @ AppError::Llm(_)) => {
                self.fail_with_reject(next_seq, "proposal evaluation failed")
                    .await?;
                return Err(err);
            }
            Err(err) => {
                self.state = SessionState::Failed;
                return Err(err);
            }
        };

        match result.status {
            NegotiationStatus::Negotiating => {
                self.history.push(HistoryEntry {
                    round: self_seq,
                    candidate_protocol: result.candidate_protocol.clone(),
                    modification_summary: result.modification_summary.clone(),
                    authored_by: Party::Local,
                });
                self.send_negotiation(
                    self_seq,
                    result.candidate_protocol,
                    NegotiationStatus::Negotiating,
                    result.modification_summary,
                )
                .await?;
                self.self_round = self_seq;
                self.state = SessionState::Proposing;
                Ok(false)
            }
            NegotiationStatus::Accepted => {
                // Acceptance frames carry no candidate; each side resolves
                // the agreed document locally.
                self.send_negotiation(
                    self_seq,
                    String::new(),
                    NegotiationStatus::Accepted,
                    result.modification_summary,
                )
                .await?;
                self.self_round = self_seq;
                self.agreed_protocol = Some(result.candidate_protocol);
                self.status = NegotiationStatus::Accepted;
                self.state = SessionState::Agreed;
                info!(round = self_seq, "accepted the peer's proposal");
                Ok(true)
            }
            NegotiationStatus::Rejected => {
                info!(
                    reason = %result.modification_summary,
                    "rejecting the peer's proposal"
                );
                self.send_negotiation(
                    self_seq,
                    String::new(),
                    NegotiationStatus::Rejected,
                    result.modification_summary,
                )
                .await?;
                self.self_round = self_seq;
                self.status = NegotiationStatus::Rejected;
                self.state = SessionState::Failed;
                Ok(false)
            }
        }
    }

    // ── LLM rounds with retry ─────────────────────────────────────────────────

    async fn initial_proposal_with_retries(&mut self) -> Result<String> {
        let attempts = self.config.negotiation.llm_retries + 1;
        let llm_timeout = self.config.negotiation.llm_timeout();

        for attempt in 1..=attempts {
            match tokio::time::timeout(llm_timeout, self.negotiator.generate_initial_protocol())
                .await
            {
                Ok(Ok((protocol, _, _))) => return Ok(protocol),
                Ok(Err(AppError::Llm(msg))) => {
                    warn!(attempt, %msg, "initial proposal attempt failed");
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    warn!(attempt, "initial proposal attempt timed out");
                }
            }
        }
        Err(AppError::Llm(format!(
            "initial proposal failed after {attempts} attempts"
        )))
    }

    /// Run the evaluator, counting unparseable output and LLM timeouts
    /// against the retry budget. An abandoned call's late result is
    /// discarded with its future.
    async fn evaluate_with_retries(
        &mut self,
        frame: &ProtocolNegotiationFrame,
        own_previous: Option<&str>,
    ) -> Result<(crate::protocol::NegotiationResult, u32)> {
        let attempts = self.config.negotiation.llm_retries + 1;
        let llm_timeout = self.config.negotiation.llm_timeout();

        for attempt in 1..=attempts {
            let evaluation = tokio::time::timeout(
                llm_timeout,
                self.negotiator.evaluate_proposal(
                    frame.sequence_id,
                    &frame.candidate_protocols,
                    &frame.modification_summary,
                    own_previous,
                ),
            )
            .await;

            match evaluation {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(AppError::Llm(msg))) => {
                    warn!(attempt, %msg, "evaluation attempt failed");
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    warn!(attempt, "evaluation attempt timed out");
                }
            }
        }
        Err(AppError::Llm(format!(
            "evaluation failed after {attempts} attempts"
        )))
    }

    // ── Code-generation handshake ─────────────────────────────────────────────

    async fn conclude(&mut self, negotiated: Result<bool>) -> SessionOutcome {
        let outcome = match negotiated {
            Ok(true) => self.code_generation_handshake().await,
            Ok(false) => SessionOutcome::failure(),
            Err(err) => {
                error!(%err, "negotiation failed");
                SessionOutcome::failure()
            }
        };
        self.state = SessionState::Done;
        outcome
    }

    async fn code_generation_handshake(&mut self) -> SessionOutcome {
        self.state = SessionState::CodegenWait;

        let Some(protocol) = self.agreed_protocol.clone() else {
            error!("code generation requested without an agreed protocol");
            self.state = SessionState::Failed;
            return SessionOutcome::failure();
        };

        let generated = self
            .generator
            .generate(&protocol, self.role, &self.config.code_path)
            .await;
        let (code_ok, module_path) = match generated {
            Ok(path) => {
                info!(path = %path.display(), "local code generation succeeded");
                (true, Some(path))
            }
            Err(err) => {
                error!(%err, "local code generation failed");
                (false, None)
            }
        };

        // The peer gets our verdict either way; a local failure still
        // completes the handshake on the wire.
        if let Err(err) = self.send_code_generation(code_ok).await {
            error!(%err, "failed to send code-generation acknowledgement");
            self.state = SessionState::Failed;
            return SessionOutcome::failure();
        }

        let ack_timeout = self.config.negotiation.code_generation_timeout();
        match tokio::time::timeout(ack_timeout, self.code_generation_rx.recv()).await {
            Ok(Some(frame)) => {
                let success = code_ok && frame.success;
                info!(
                    local = code_ok,
                    peer = frame.success,
                    success,
                    "code-generation handshake complete"
                );
                SessionOutcome {
                    success,
                    module_path: if success { module_path } else { None },
                }
            }
            Ok(None) => {
                error!("code-generation inbox closed before the peer's acknowledgement");
                self.state = SessionState::Failed;
                SessionOutcome::failure()
            }
            Err(_) => {
                error!("timed out waiting for the peer's code-generation acknowledgement");
                self.state = SessionState::Failed;
                SessionOutcome::failure()
            }
        }
    }

    // ── Frame I/O ─────────────────────────────────────────────────────────────

    async fn await_negotiation_frame(&mut self) -> Result<ProtocolNegotiationFrame> {
        let round_timeout = self.config.negotiation.round_timeout();
        match tokio::time::timeout(round_timeout, self.negotiation_rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                self.state = SessionState::Failed;
                Err(AppError::Transport("negotiation inbox closed".into()))
            }
            Err(_) => {
                self.state = SessionState::Failed;
                Err(AppError::Timeout(format!(
                    "no negotiation frame within {round_timeout:?}"
                )))
            }
        }
    }

    async fn send_negotiation(
        &mut self,
        sequence_id: u32,
        candidate_protocols: String,
        status: NegotiationStatus,
        modification_summary: String,
    ) -> Result<()> {
        debug!(sequence_id, ?status, "sending negotiation frame");
        let frame = MetaFrame::ProtocolNegotiation(ProtocolNegotiationFrame {
            sequence_id,
            candidate_protocols,
            status,
            modification_summary,
        });
        self.send_frame(&frame).await
    }

    async fn send_code_generation(&mut self, success: bool) -> Result<()> {
        debug!(success, "sending code-generation acknowledgement");
        let frame = MetaFrame::CodeGeneration(CodeGenerationFrame { success });
        self.send_frame(&frame).await
    }

    async fn send_frame(&mut self, frame: &MetaFrame) -> Result<()> {
        let encoded = encode_frame(frame)?;
        if let Err(err) = self.sink.send(encoded).await {
            self.state = SessionState::Failed;
            return Err(err);
        }
        Ok(())
    }

    /// Notify the peer of a fatal failure with a single rejected frame,
    /// then mark the session failed.
    async fn fail_with_reject(&mut self, sequence_id: u32, reason: &str) -> Result<()> {
        self.send_negotiation(
            sequence_id,
            String::new(),
            NegotiationStatus::Rejected,
            reason.to_owned(),
        )
        .await?;
        self.self_round = sequence_id;
        self.status = NegotiationStatus::Rejected;
        self.state = SessionState::Failed;
        Ok(())
    }

    fn last_local_candidate(&self) -> Option<String> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.authored_by == Party::Local)
            .map(|entry| entry.candidate_protocol.clone())
    }
}
