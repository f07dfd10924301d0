//! Sessions: the binding of an authenticated connection to one invocation group.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use slink_utils::auth::Identity;
use tokio::sync::watch;

use crate::registry::InvocationGroup;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn unique() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a connection was closed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CloseReason {
    /// The remote side went away, or the transport failed.
    Disconnected,
    /// The handshake did not complete.
    HandshakeFailed,
    /// The service sent a second hello on a registered connection.
    AlreadyRegistered,
    /// The service sent a message that is not valid on a registered connection.
    ProtocolViolation,
    /// The server withdrew the session, e.g. after rotating the service's secret.
    Revoked,
    ServerShutdown,
    /// Closed on request of the dispatcher or another local component.
    Requested,
}

/// Reference to a connection owned by the transport layer.
///
/// Closing the handle asks the transport to tear the connection down; the task owning the stream
/// observes [ConnectionHandle::closed]. The first close wins, later ones are no-ops.
#[derive(Clone)]
pub struct ConnectionHandle(Arc<ConnectionInner>);

struct ConnectionInner {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    closed: watch::Sender<Option<CloseReason>>,
}

impl ConnectionHandle {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        let (closed, _) = watch::channel(None);
        Self(Arc::new(ConnectionInner {
            id: ConnectionId::unique(),
            peer,
            closed,
        }))
    }

    pub fn id(&self) -> ConnectionId {
        self.0.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.0.peer
    }

    /// Marks the connection closed. Returns `true` only for the call that closed it.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.0.closed.send_if_modified(|state| match state {
            Some(_) => false,
            None => {
                *state = Some(reason);
                true
            }
        })
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.0.closed.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason().is_some()
    }

    /// Resolves once the connection is closed, with the reason it was first closed for.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.0.closed.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return CloseReason::Disconnected;
            }
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.0.id)
            .field("peer", &self.0.peer)
            .field("closed", &self.close_reason())
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionState {
    Registered,
    Closed(CloseReason),
}

/// A live binding of an authenticated [Identity] to one [InvocationGroup] on one connection.
///
/// Sessions are only created by a successful handshake. Clones refer to the same session.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

struct SessionInner {
    identity: Identity,
    group: Arc<InvocationGroup>,
    connection: ConnectionHandle,
    registered_at: Instant,
}

impl Session {
    pub(crate) fn new(
        identity: Identity,
        group: Arc<InvocationGroup>,
        connection: ConnectionHandle,
    ) -> Self {
        Self(Arc::new(SessionInner {
            identity,
            group,
            connection,
            registered_at: Instant::now(),
        }))
    }

    pub fn identity(&self) -> &Identity {
        &self.0.identity
    }

    pub fn group(&self) -> &InvocationGroup {
        &self.0.group
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.0.connection
    }

    pub fn state(&self) -> SessionState {
        match self.0.connection.close_reason() {
            None => SessionState::Registered,
            Some(reason) => SessionState::Closed(reason),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.connection.is_closed()
    }

    /// Closes the session and its connection. Idempotent: only the first reason is kept.
    pub fn close(&self, reason: CloseReason) {
        if self.0.connection.close(reason) {
            tracing::info!(
                client_id = %self.0.identity,
                group = self.0.group.name(),
                connection = %self.0.connection.id(),
                ?reason,
                age = ?self.0.registered_at.elapsed(),
                "session closed"
            );
        }
    }

    pub async fn closed(&self) -> CloseReason {
        self.0.connection.closed().await
    }

    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.0.identity)
            .field("group", &self.0.group.name())
            .field("connection", &self.0.connection)
            .finish()
    }
}

/// The sessions currently registered on a server, keyed by connection.
#[derive(Default)]
pub struct LiveSessions {
    sessions: Mutex<HashMap<ConnectionId, Session>>,
}

impl LiveSessions {
    pub(crate) fn insert(&self, session: Session) {
        let previous = self
            .sessions
            .lock()
            .insert(session.connection().id(), session);
        slink_utils::log_assert!(
            previous.is_none(),
            "more than one session registered for a connection"
        );
    }

    pub(crate) fn remove(&self, connection: ConnectionId) -> Option<Session> {
        self.sessions.lock().remove(&connection)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn sessions_for(&self, identity: &Identity) -> Vec<Session> {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.identity() == identity)
            .cloned()
            .collect()
    }

    /// Closes every session of `identity`. Returns how many were closed.
    pub fn revoke(&self, identity: &Identity) -> usize {
        let revoked = self.sessions_for(identity);
        for session in &revoked {
            session.close(CloseReason::Revoked);
        }
        revoked.len()
    }

    pub fn close_all(&self, reason: CloseReason) {
        let all: Vec<_> = self.sessions.lock().values().cloned().collect();
        for session in all {
            session.close(reason);
        }
    }
}
