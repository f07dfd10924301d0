//! The accepting server: runs a handshake on every connection, then serves the resulting session.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use slink_utils::atomic;
use slink_utils::auth::Identity;
use slink_utils::net_async::{ServerListener, ServerStream};
use slink_utils::net_protocol::{
    self,
    auth::AuthResult,
    invoke::{Invocation, InvokeError, InvokeResult},
    ClientMessage, ServerMessage,
};
use slink_utils::server_shutdown::ShutdownReceiver;
use tokio::io::AsyncWriteExt;

use crate::config::DEFAULT_HANDSHAKE_TIMEOUT_SECS;
use crate::dispatch::{InvocationDispatcher, NoopDispatcher};
use crate::handshake::{run_handshake, HandshakeContext, HandshakeError, HandshakeFailure};
use crate::observer::{AuthObserver, TracingObserver};
use crate::prelude::{here, ErrorPeer, OpaqueResult, ResultLocation};
use crate::registry::GroupRegistry;
use crate::secret_store::SecretStore;
use crate::session::{CloseReason, ConnectionHandle, LiveSessions, Session};

pub struct ServerBuilder {
    registry: GroupRegistry,
    secrets: Arc<dyn SecretStore>,
    dispatcher: Arc<dyn InvocationDispatcher>,
    observer: Arc<dyn AuthObserver>,
    handshake_timeout: Duration,
}

impl ServerBuilder {
    pub fn dispatcher(mut self, dispatcher: Arc<dyn InvocationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn build(self) -> Server {
        let Self {
            registry,
            secrets,
            dispatcher,
            observer,
            handshake_timeout,
        } = self;
        Server {
            ctx: Arc::new(ServerCtx {
                registry,
                secrets,
                dispatcher,
                observer,
                handshake_timeout,
                sessions: LiveSessions::default(),
                active_handshakes: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }
}

struct ServerCtx {
    registry: GroupRegistry,
    secrets: Arc<dyn SecretStore>,
    dispatcher: Arc<dyn InvocationDispatcher>,
    observer: Arc<dyn AuthObserver>,
    handshake_timeout: Duration,
    sessions: LiveSessions,
    active_handshakes: AtomicUsize,
    shutting_down: AtomicBool,
}

/// Counts a connection as mid-handshake for as long as it is alive.
struct HandshakeGuard<'a>(&'a AtomicUsize);

impl<'a> HandshakeGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, atomic::ORDERING);
        Self(counter)
    }
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, atomic::ORDERING);
    }
}

/// A slink server. Clones share the same registry, secret store and live sessions.
#[derive(Clone)]
pub struct Server {
    ctx: Arc<ServerCtx>,
}

impl Server {
    pub fn builder(registry: GroupRegistry, secrets: Arc<dyn SecretStore>) -> ServerBuilder {
        ServerBuilder {
            registry,
            secrets,
            dispatcher: Arc::new(NoopDispatcher),
            observer: Arc::new(TracingObserver),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.ctx.registry
    }

    /// Number of registered sessions that have not yet closed.
    pub fn live_sessions(&self) -> usize {
        self.ctx.sessions.len()
    }

    pub fn sessions_for(&self, identity: &Identity) -> Vec<Session> {
        self.ctx.sessions.sessions_for(identity)
    }

    /// Number of connections currently in the handshake.
    pub fn active_handshakes(&self) -> usize {
        self.ctx.active_handshakes.load(atomic::ORDERING)
    }

    /// Forcibly closes every session of `identity`, e.g. after its secret was rotated.
    pub fn revoke(&self, identity: &Identity) -> usize {
        let revoked = self.ctx.sessions.revoke(identity);
        tracing::info!(client_id = %identity, revoked, "revoked sessions");
        revoked
    }

    /// Accepts connections on `listener` until `shutdown` fires, then closes every live session.
    pub async fn start(
        self,
        listener: Box<dyn ServerListener>,
        mut shutdown: ShutdownReceiver,
    ) -> io::Result<()> {
        tracing::info!(
            addr = ?listener.local_addr()?,
            groups = ?self.ctx.registry.group_names().collect::<Vec<_>>(),
            "slink server listening"
        );

        enum Task {
            HandleConn(Box<dyn ServerStream>, SocketAddr),
        }
        use Task::*;

        loop {
            let task = tokio::select! {
                conn = listener.accept() => {
                    match conn {
                        Ok((conn, addr)) => HandleConn(conn, addr),
                        Err(e) => {
                            tracing::error!("error accepting connection: {:?}", e);
                            continue;
                        }
                    }
                }
                _ = shutdown.recv_shutdown_immediately() => {
                    break;
                }
            };

            match task {
                HandleConn(stream, addr) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let result = Self::handle(ctx, stream).await.peer(Some(addr));
                        if let Err(error) = result {
                            slink_utils::log_connection_error!(
                                error,
                                "error handling connection: {}"
                            )
                        }
                    });
                }
            }
        }

        self.ctx.shutting_down.store(true, atomic::ORDERING);
        self.ctx.sessions.close_all(CloseReason::ServerShutdown);
        tracing::info!("slink server stopped");
        Ok(())
    }

    async fn handle(ctx: Arc<ServerCtx>, mut stream: Box<dyn ServerStream>) -> OpaqueResult<()> {
        let peer = stream.peer_addr().ok();
        let connection = ConnectionHandle::new(peer);

        let handshake = {
            let _guard = HandshakeGuard::enter(&ctx.active_handshakes);
            let handshake_ctx = HandshakeContext {
                registry: &ctx.registry,
                secrets: &*ctx.secrets,
                observer: &*ctx.observer,
                timeout: ctx.handshake_timeout,
            };
            run_handshake(&mut stream, &handshake_ctx, connection.clone()).await
        };
        let session = match handshake {
            Ok(session) => session,
            Err(HandshakeFailure::Rejected(_)) => {
                connection.close(CloseReason::HandshakeFailed);
                let _shutdown = stream.shutdown().await;
                return Ok(());
            }
            Err(HandshakeFailure::Disconnected(_)) => {
                connection.close(CloseReason::Disconnected);
                return Ok(());
            }
        };

        ctx.sessions.insert(session.clone());
        if ctx.shutting_down.load(atomic::ORDERING) {
            session.close(CloseReason::ServerShutdown);
        }
        tokio::select! {
            biased;
            _ = session.closed() => {}
            _ = ctx.dispatcher.on_session(&session) => {}
        }

        let result = Self::serve_session(&ctx, &mut stream, &session).await;

        ctx.sessions.remove(connection.id());
        session.close(CloseReason::Disconnected);
        let _shutdown = stream.shutdown().await;
        result
    }

    async fn serve_session(
        ctx: &ServerCtx,
        stream: &mut Box<dyn ServerStream>,
        session: &Session,
    ) -> OpaqueResult<()> {
        loop {
            let message = tokio::select! {
                biased;
                reason = session.closed() => {
                    tracing::debug!(
                        client_id = %session.identity(),
                        ?reason,
                        "closing connection of closed session"
                    );
                    return Ok(());
                }
                message = net_protocol::async_read::<_, ClientMessage>(stream) => message,
            };

            let message = match message {
                Ok(message) => message,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    session.close(CloseReason::Disconnected);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    session.close(CloseReason::ProtocolViolation);
                    return Err(e).located(here!());
                }
                Err(e) => {
                    session.close(CloseReason::Disconnected);
                    return Err(e).located(here!());
                }
            };

            match message {
                ClientMessage::Invoke(invocation) => {
                    let result = match Self::invoke(ctx, session, &invocation).await {
                        Some(result) => result,
                        None => {
                            tracing::debug!(
                                client_id = %session.identity(),
                                id = invocation.id,
                                state = ?session.state(),
                                "dropping invocation of closed session"
                            );
                            return Ok(());
                        }
                    };
                    let response = ServerMessage::InvokeResult(InvokeResult {
                        id: invocation.id,
                        result,
                    });
                    net_protocol::async_write(stream, &response)
                        .await
                        .located(here!())?;
                }
                ClientMessage::Hello(_) => {
                    let error = HandshakeError::AlreadyRegistered;
                    Self::reject_registered(ctx, stream, session, &error).await;
                    session.close(CloseReason::AlreadyRegistered);
                    return Ok(());
                }
                ClientMessage::Proof(_) => {
                    let error = HandshakeError::ProtocolViolation {
                        stage: crate::handshake::Stage::Registered,
                        received: "proof",
                    };
                    Self::reject_registered(ctx, stream, session, &error).await;
                    session.close(CloseReason::ProtocolViolation);
                    return Ok(());
                }
            }
        }
    }

    async fn reject_registered(
        ctx: &ServerCtx,
        stream: &mut Box<dyn ServerStream>,
        session: &Session,
        error: &HandshakeError,
    ) {
        ctx.observer
            .on_rejected(session.connection().peer(), Some(session.identity()), error);
        let rejection = ServerMessage::AuthResult(AuthResult::Rejected {
            reason: error.reason_code(),
        });
        let _ = net_protocol::async_write(stream, &rejection).await;
    }

    /// Runs `invocation` unless the session closes first, in which case there is no result.
    async fn invoke(
        ctx: &ServerCtx,
        session: &Session,
        invocation: &Invocation,
    ) -> Option<Result<Value, InvokeError>> {
        if session.is_closed() {
            return None;
        }
        let group = session.group();
        if !group.allows(&invocation.operation) {
            tracing::warn!(
                client_id = %session.identity(),
                group = group.name(),
                operation = %invocation.operation,
                "rejected invocation outside of group"
            );
            return Some(Err(InvokeError::NotPermitted {
                operation: invocation.operation.clone(),
                group: group.name().to_owned(),
            }));
        }
        tokio::select! {
            biased;
            _ = session.closed() => None,
            result = ctx.dispatcher.invoke(session, invocation) => Some(result),
        }
    }
}
