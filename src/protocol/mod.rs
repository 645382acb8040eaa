//! Negotiation data model: statuses, roles, results, and history.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

pub mod frames;

/// Negotiation lifecycle status.
///
/// `Accepted` and `Rejected` are terminal; once a session reaches either,
/// no further `protocolNegotiation` frames are emitted or accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationStatus {
    /// Proposals are still being exchanged.
    Negotiating,
    /// Both sides hold an agreed protocol document.
    Accepted,
    /// One side declined; the session is finished without agreement.
    Rejected,
}

impl NegotiationStatus {
    /// Whether this status ends the negotiation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

/// Negotiation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Initiator; carries the original requirement and I/O descriptions.
    Requester,
    /// Responder; answers with capability-informed evaluations.
    Provider,
}

impl Role {
    /// Short label used in logs and generated-code file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Provider => "provider",
        }
    }
}

/// Which side authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    /// This session.
    Local,
    /// The remote peer.
    Peer,
}

/// One negotiation round recorded in a session's append-only history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Sequence number of the frame that carried this candidate.
    pub round: u32,
    /// Full candidate protocol document.
    pub candidate_protocol: String,
    /// Summary of changes relative to the previous proposal.
    pub modification_summary: String,
    /// Authoring side.
    pub authored_by: Party,
}

/// Strictly validated verdict parsed out of an evaluator completion.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NegotiationResult {
    /// Verdict for this round.
    pub status: NegotiationStatus,
    /// Full revised protocol document; non-empty iff still negotiating.
    #[serde(default)]
    pub candidate_protocol: String,
    /// What changed, or why the proposal was declined.
    #[serde(default)]
    pub modification_summary: String,
}

impl NegotiationResult {
    /// Enforce the candidate-protocol invariant.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Llm` when `candidate_protocol` is empty while
    /// still negotiating, or non-empty on a terminal status.
    pub fn validate(&self) -> Result<()> {
        let negotiating = self.status == NegotiationStatus::Negotiating;
        if negotiating && self.candidate_protocol.trim().is_empty() {
            return Err(AppError::Llm(
                "negotiating result carries no candidate protocol".into(),
            ));
        }
        if !negotiating && !self.candidate_protocol.is_empty() {
            return Err(AppError::Llm(format!(
                "terminal result ({:?}) must not carry a candidate protocol",
                self.status
            )));
        }
        Ok(())
    }
}
