//! Wire frames for the meta protocol and the header-byte codec.
//!
//! Every frame travels as one transport-framed byte string: a single header
//! byte whose top two bits carry the [`ProtocolType`] (remaining six bits
//! reserved), followed by a UTF-8 JSON object tagged by `messageType`.
//! Field names are camelCase and must be preserved case-sensitively for
//! interop with peers built independently against the same wire contract.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::protocol::NegotiationStatus;
use crate::{AppError, Result};

/// Outer protocol class carried in the top two bits of the header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolType {
    /// Meta protocol for negotiation.
    Meta = 0,
    /// Application protocol for data transfer.
    Application = 1,
    /// Natural language protocol.
    Natural = 2,
    /// Verification protocol.
    Verification = 3,
}

impl ProtocolType {
    /// Decode the protocol type from a header byte.
    #[must_use]
    pub fn from_header(byte: u8) -> Self {
        match byte >> 6 {
            0 => Self::Meta,
            1 => Self::Application,
            2 => Self::Natural,
            _ => Self::Verification,
        }
    }

    /// Encode this protocol type as a header byte.
    #[must_use]
    pub fn header(self) -> u8 {
        (self as u8) << 6
    }
}

/// Payload of a `protocolNegotiation` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolNegotiationFrame {
    /// Monotonic round number; requester emits odd ids, provider even.
    pub sequence_id: u32,
    /// Full candidate protocol document; empty on terminal statuses.
    #[serde(default)]
    pub candidate_protocols: String,
    /// Negotiation verdict for this round.
    pub status: NegotiationStatus,
    /// Summary of changes relative to the peer's previous proposal.
    #[serde(default)]
    pub modification_summary: String,
}

/// Payload of a `codeGeneration` acknowledgement frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodeGenerationFrame {
    /// Whether local handler generation succeeded.
    pub success: bool,
}

/// One decoded meta-protocol frame.
///
/// The three reserved kinds are decoded (any payload tolerated) so the
/// multiplexer can acknowledge them on the wire tag, but the engine drives
/// no behavior from them yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "messageType", rename_all = "camelCase")]
pub enum MetaFrame {
    /// A negotiation round.
    ProtocolNegotiation(ProtocolNegotiationFrame),
    /// A code-generation acknowledgement.
    CodeGeneration(CodeGenerationFrame),
    /// Reserved for test-case negotiation rounds.
    TestCasesNegotiation,
    /// Reserved for error-fixing rounds.
    FixErrorNegotiation,
    /// Reserved for free-form natural-language exchange.
    NaturalLanguageNegotiation,
}

impl MetaFrame {
    /// Wire tag of this frame kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolNegotiation(_) => "protocolNegotiation",
            Self::CodeGeneration(_) => "codeGeneration",
            Self::TestCasesNegotiation => "testCasesNegotiation",
            Self::FixErrorNegotiation => "fixErrorNegotiation",
            Self::NaturalLanguageNegotiation => "naturalLanguageNegotiation",
        }
    }
}

/// Encode a meta frame as `[header byte][JSON]`.
///
/// # Errors
///
/// Returns `AppError::Protocol` if JSON serialization fails.
pub fn encode_frame(frame: &MetaFrame) -> Result<Bytes> {
    let json = serde_json::to_vec(frame)
        .map_err(|err| AppError::Protocol(format!("frame serialization failed: {err}")))?;
    let mut buf = BytesMut::with_capacity(1 + json.len());
    buf.put_u8(ProtocolType::Meta.header());
    buf.put_slice(&json);
    Ok(buf.freeze())
}

/// Decode a transport delivery into a meta frame.
///
/// # Errors
///
/// Returns `AppError::Protocol` when the delivery is empty, the header byte
/// does not mark meta-protocol data, or the JSON body is malformed or of an
/// unknown kind.
pub fn decode_frame(data: &[u8]) -> Result<MetaFrame> {
    let (header, body) = data
        .split_first()
        .ok_or_else(|| AppError::Protocol("empty frame".into()))?;

    let protocol_type = ProtocolType::from_header(*header);
    if protocol_type != ProtocolType::Meta {
        return Err(AppError::Protocol(format!(
            "not a meta-protocol frame: {protocol_type:?}"
        )));
    }

    serde_json::from_slice(body)
        .map_err(|err| AppError::Protocol(format!("frame decode failed: {err}")))
}

/// Wire tag of a frame the typed decoder could not place.
///
/// Used by the multiplexer to tell an unknown-but-well-formed kind (log and
/// drop) apart from garbage (error).
#[must_use]
pub fn peek_kind(data: &[u8]) -> Option<String> {
    let body = data.get(1..)?;
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("messageType")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
}
