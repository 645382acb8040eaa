//! Inbound frame routing across independent negotiation sessions.
//!
//! One multiplexer serves one transport endpoint. It holds the only piece
//! of state shared between sessions, the DID-to-inbox map, and is driven
//! from the transport's receiver task: decode the outer header and kind,
//! find or create the session, enqueue, return. Session state itself is
//! never touched here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::frames::{decode_frame, peek_kind, MetaFrame};
use crate::session::SessionHandle;
use crate::Result;

/// Host hook that builds a provider session when a frame arrives from a
/// DID with no registered session.
#[async_trait]
pub trait ProviderSessionHook: Send + Sync {
    /// Configure a session for `did` and return its inbox handle, or
    /// `None` to refuse the peer.
    async fn on_new_peer(&self, did: &str) -> Option<SessionHandle>;
}

/// Routes inbound meta-protocol frames to per-peer sessions.
pub struct SessionMultiplexer {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    provider_hook: Option<Arc<dyn ProviderSessionHook>>,
}

impl SessionMultiplexer {
    /// Multiplexer without a provider hook; unknown peers are dropped.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            provider_hook: None,
        }
    }

    /// Multiplexer that creates provider sessions on demand.
    #[must_use]
    pub fn with_provider_hook(hook: Arc<dyn ProviderSessionHook>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            provider_hook: Some(hook),
        }
    }

    /// Register a session's inbox under a peer DID.
    pub async fn register(&self, did: impl Into<String>, handle: SessionHandle) {
        let did = did.into();
        debug!(%did, "session registered");
        self.sessions.lock().await.insert(did, handle);
    }

    /// Remove a terminated session's mapping.
    pub async fn deregister(&self, did: &str) {
        if self.sessions.lock().await.remove(did).is_some() {
            debug!(%did, "session deregistered");
        }
    }

    /// Registered session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Decode one transport delivery and route it.
    ///
    /// Reserved and unknown-but-well-formed kinds are acknowledged in the
    /// log and dropped; refusals by a full or closed session inbox are
    /// logged and dropped as well.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` only for deliveries that are not
    /// meta-protocol frames at all (bad header or unparseable body).
    pub async fn dispatch(&self, did: &str, data: &[u8]) -> Result<()> {
        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(err) => {
                // A well-formed envelope of a kind this build does not know
                // is tolerated for forward compatibility.
                if let Some(kind) = peek_kind(data) {
                    warn!(%did, %kind, "dropping frame of unknown kind");
                    return Ok(());
                }
                return Err(err);
            }
        };
        debug!(%did, kind = frame.kind(), "inbound meta frame");

        match frame {
            MetaFrame::ProtocolNegotiation(negotiation) => {
                let Some(handle) = self.resolve(did).await else {
                    warn!(%did, "no session for peer, dropping negotiation frame");
                    return Ok(());
                };
                if !handle.deliver_negotiation(negotiation).await {
                    debug!(%did, "session no longer accepts negotiation frames");
                }
            }
            MetaFrame::CodeGeneration(ack) => {
                let Some(handle) = self.resolve(did).await else {
                    warn!(%did, "no session for peer, dropping code-generation frame");
                    return Ok(());
                };
                if !handle.deliver_code_generation(ack) {
                    debug!(%did, "code-generation acknowledgement refused");
                }
            }
            MetaFrame::TestCasesNegotiation
            | MetaFrame::FixErrorNegotiation
            | MetaFrame::NaturalLanguageNegotiation => {
                info!(%did, kind = frame.kind(), "reserved negotiation kind received, dropping");
            }
        }
        Ok(())
    }

    /// Find the session for `did`, invoking the provider hook on first
    /// contact. The map lock is never held across the hook call.
    async fn resolve(&self, did: &str) -> Option<SessionHandle> {
        if let Some(handle) = self.sessions.lock().await.get(did) {
            return Some(handle.clone());
        }

        let hook = self.provider_hook.as_ref()?;
        let created = hook.on_new_peer(did).await?;

        let mut sessions = self.sessions.lock().await;
        // A concurrent dispatch may have registered the peer meanwhile;
        // the first registration wins.
        let handle = sessions
            .entry(did.to_owned())
            .or_insert_with(|| {
                info!(%did, "provider session created for new peer");
                created
            })
            .clone();
        Some(handle)
    }
}

impl Default for SessionMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}
