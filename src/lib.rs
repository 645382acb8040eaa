#![forbid(unsafe_code)]

//! `agent-accord` — LLM-assisted meta-protocol negotiation engine.
//!
//! Two agents with no prior agreement on message shapes converge on an
//! application-level wire protocol: the requester proposes a protocol
//! document, both sides iterate with LLM-evaluated counter-proposals, and
//! on acceptance each side generates its handler code locally and the two
//! exchange code-generation acknowledgements over the same transport.

pub mod codegen;
pub mod config;
pub mod errors;
pub mod extract;
pub mod llm;
pub mod mux;
pub mod negotiator;
pub mod protocol;
pub mod session;
pub mod test_support;
pub mod transport;

pub use config::EngineConfig;
pub use errors::{AppError, Result};
