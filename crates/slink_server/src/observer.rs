//! Diagnostics hook for handshake outcomes.

use std::net::SocketAddr;

use slink_utils::auth::Identity;

use crate::handshake::HandshakeError;
use crate::session::Session;

/// Injected sink for authentication events.
///
/// Unlike the wire, which only carries a coarse reason, observers see the fine-grained cause of a
/// rejection, e.g. an unknown client versus a wrong proof.
pub trait AuthObserver: Send + Sync {
    fn on_rejected(
        &self,
        peer: Option<SocketAddr>,
        identity: Option<&Identity>,
        error: &HandshakeError,
    );

    fn on_registered(&self, session: &Session);
}

/// Emits every authentication event as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AuthObserver for TracingObserver {
    fn on_rejected(
        &self,
        peer: Option<SocketAddr>,
        identity: Option<&Identity>,
        error: &HandshakeError,
    ) {
        let client_id = identity.map(Identity::client_id).unwrap_or("<none>");
        let reason = error.reason_code();
        match error {
            HandshakeError::Timeout | HandshakeError::MalformedHello => {
                tracing::info!(?peer, client_id, %reason, "handshake rejected: {}", error);
            }
            _ => {
                tracing::warn!(?peer, client_id, %reason, "handshake rejected: {}", error);
            }
        }
    }

    fn on_registered(&self, session: &Session) {
        tracing::info!(
            peer = ?session.connection().peer(),
            client_id = %session.identity(),
            group = session.group().name(),
            "session registered"
        );
    }
}
