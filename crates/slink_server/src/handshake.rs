//! The per-connection authentication handshake.
//!
//! [Handshake] is the state machine proper and does no I/O:
//!
//! ```text
//! AwaitHello --hello--> AwaitProof --proof--> Verified --register--> Registered
//!      \                    \                    \
//!       `--------------------`--------------------`-----------------> Rejected
//! ```
//!
//! [run_handshake] drives it over a framed stream under a single deadline.

use std::fmt;
use std::io;
use std::time::Duration;

use slink_utils::auth::{Identity, Nonce, Proof, Secret};
use slink_utils::net_protocol::{
    self,
    auth::{AuthResult, Challenge, Hello, ProofMessage, RejectReason},
    ClientMessage, ServerMessage,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::observer::AuthObserver;
use crate::registry::GroupRegistry;
use crate::secret_store::{LookupError, SecretStore};
use crate::session::{ConnectionHandle, Session};

/// Derived against in place of a secret that could not be looked up. A proof for it is never
/// accepted.
const STAND_IN_SECRET: &[u8] = b"slink stand-in secret";

/// Why a service failed to authenticate. Only visible locally; the wire carries
/// [RejectReason::AuthenticationFailed] for all of them.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("unknown client")]
    UnknownClient,
    #[error("wrong proof")]
    WrongProof,
    #[error("secret store unavailable")]
    StoreUnavailable,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("malformed hello")]
    MalformedHello,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(AuthFailure),
    #[error("no invocation group named {0:?}")]
    GroupNotFound(String),
    #[error("connection is already registered")]
    AlreadyRegistered,
    #[error("handshake timed out")]
    Timeout,
    #[error("unexpected {received} while {stage}")]
    ProtocolViolation { stage: Stage, received: &'static str },
}

impl HandshakeError {
    /// The coarse reason reported to the remote party.
    pub fn reason_code(&self) -> RejectReason {
        match self {
            HandshakeError::MalformedHello => RejectReason::MalformedHello,
            HandshakeError::AuthenticationFailed(_) => RejectReason::AuthenticationFailed,
            HandshakeError::GroupNotFound(_) => RejectReason::GroupNotFound,
            HandshakeError::AlreadyRegistered => RejectReason::AlreadyRegistered,
            HandshakeError::Timeout => RejectReason::Timeout,
            HandshakeError::ProtocolViolation { .. } => RejectReason::ProtocolViolation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitHello,
    AwaitProof,
    Verified,
    Registered,
    Rejected(RejectReason),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::AwaitHello => f.write_str("awaiting hello"),
            Stage::AwaitProof => f.write_str("awaiting proof"),
            Stage::Verified => f.write_str("verified"),
            Stage::Registered => f.write_str("registered"),
            Stage::Rejected(reason) => write!(f, "rejected ({reason})"),
        }
    }
}

#[derive(Debug)]
enum State {
    AwaitHello,
    AwaitProof {
        identity: Identity,
        requested_group: String,
        // An unknown client still gets a challenge, and is only rejected on its proof, so that it
        // looks the same on the wire as a known client with the wrong secret.
        expected: Result<Proof, AuthFailure>,
    },
    Verified {
        identity: Identity,
        requested_group: String,
    },
    Registered,
    Rejected(RejectReason),
}

/// Handshake state of a single connection.
///
/// Leaving a state drops everything it held, so the expected proof for an issued nonce does not
/// outlive the [Stage::AwaitProof] stage.
#[derive(Debug)]
pub struct Handshake {
    state: State,
    claimed: Option<Identity>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: State::AwaitHello,
            claimed: None,
        }
    }

    pub fn stage(&self) -> Stage {
        match &self.state {
            State::AwaitHello => Stage::AwaitHello,
            State::AwaitProof { .. } => Stage::AwaitProof,
            State::Verified { .. } => Stage::Verified,
            State::Registered => Stage::Registered,
            State::Rejected(reason) => Stage::Rejected(*reason),
        }
    }

    /// The identity named by a well-formed hello, whether or not it was verified.
    pub fn claimed_identity(&self) -> Option<&Identity> {
        self.claimed.as_ref()
    }

    fn fail(&mut self, error: HandshakeError) -> HandshakeError {
        self.state = State::Rejected(error.reason_code());
        error
    }

    /// Rejects the handshake because a message of kind `received` arrived out of order.
    pub fn unexpected(&mut self, received: &'static str) -> HandshakeError {
        let stage = self.stage();
        self.fail(HandshakeError::ProtocolViolation { stage, received })
    }

    pub async fn on_hello(
        &mut self,
        hello: Hello,
        secrets: &dyn SecretStore,
    ) -> Result<Challenge, HandshakeError> {
        match self.state {
            State::AwaitHello => {}
            State::Registered => return Err(self.fail(HandshakeError::AlreadyRegistered)),
            _ => return Err(self.unexpected("hello")),
        }

        let Hello {
            client_id,
            requested_group,
        } = hello;
        if requested_group.trim().is_empty() {
            return Err(self.fail(HandshakeError::MalformedHello));
        }
        let identity = match Identity::new(client_id) {
            Ok(identity) => identity,
            Err(_) => return Err(self.fail(HandshakeError::MalformedHello)),
        };
        self.claimed = Some(identity.clone());

        let nonce = Nonce::new_random();
        let (secret, failure) = match secrets.lookup_secret(&identity).await {
            Ok(secret) => (secret, None),
            Err(LookupError::UnknownClient) => {
                (Secret::new(STAND_IN_SECRET), Some(AuthFailure::UnknownClient))
            }
            Err(LookupError::Unavailable(cause)) => {
                tracing::error!(client_id = %identity, %cause, "secret lookup failed");
                (Secret::new(STAND_IN_SECRET), Some(AuthFailure::StoreUnavailable))
            }
        };
        // One derivation per hello, so unknown clients are not challenged any sooner.
        let proof = Proof::derive(&secret, &nonce);
        let expected = match failure {
            None => Ok(proof),
            Some(failure) => Err(failure),
        };

        self.state = State::AwaitProof {
            identity,
            requested_group,
            expected,
        };
        Ok(Challenge { nonce })
    }

    pub fn on_proof(&mut self, proof: ProofMessage) -> Result<(), HandshakeError> {
        let (identity, requested_group, expected) =
            match std::mem::replace(&mut self.state, State::AwaitHello) {
                State::AwaitProof {
                    identity,
                    requested_group,
                    expected,
                } => (identity, requested_group, expected),
                other => {
                    self.state = other;
                    return Err(self.unexpected("proof"));
                }
            };

        match expected {
            Ok(expected) if expected == proof.proof => {
                self.state = State::Verified {
                    identity,
                    requested_group,
                };
                Ok(())
            }
            Ok(_) => Err(self.fail(HandshakeError::AuthenticationFailed(
                AuthFailure::WrongProof,
            ))),
            Err(failure) => Err(self.fail(HandshakeError::AuthenticationFailed(failure))),
        }
    }

    /// Binds the verified identity to its requested group, producing the connection's session.
    pub fn register(
        &mut self,
        registry: &GroupRegistry,
        connection: ConnectionHandle,
    ) -> Result<Session, HandshakeError> {
        let (identity, requested_group) =
            match std::mem::replace(&mut self.state, State::AwaitHello) {
                State::Verified {
                    identity,
                    requested_group,
                } => (identity, requested_group),
                other => {
                    self.state = other;
                    return Err(self.unexpected("registration"));
                }
            };

        match registry.lookup(&requested_group) {
            Ok(group) => {
                self.state = State::Registered;
                Ok(Session::new(identity, group, connection))
            }
            Err(_) => Err(self.fail(HandshakeError::GroupNotFound(requested_group))),
        }
    }

    /// Rejects a handshake that did not finish in time. Terminal handshakes are left as they are.
    pub fn on_timeout(&mut self) -> HandshakeError {
        match self.state {
            State::Registered | State::Rejected(_) => HandshakeError::Timeout,
            _ => self.fail(HandshakeError::Timeout),
        }
    }

    #[cfg(test)]
    fn holds_challenge(&self) -> bool {
        matches!(self.state, State::AwaitProof { .. })
    }
}

/// Shared, read-only collaborators of every handshake on a server.
pub struct HandshakeContext<'a> {
    pub registry: &'a GroupRegistry,
    pub secrets: &'a dyn SecretStore,
    pub observer: &'a dyn AuthObserver,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum HandshakeFailure {
    #[error("handshake rejected: {0}")]
    Rejected(#[from] HandshakeError),
    #[error("connection lost during handshake: {0}")]
    Disconnected(#[from] io::Error),
}

/// Runs the server side of a handshake on `stream`.
///
/// On rejection the remote party is sent the coarse [RejectReason], and the observer the
/// fine-grained cause; closing the stream is left to the caller.
pub async fn run_handshake<S>(
    stream: &mut S,
    ctx: &HandshakeContext<'_>,
    connection: ConnectionHandle,
) -> Result<Session, HandshakeFailure>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let peer = connection.peer();
    let mut handshake = Handshake::new();

    let outcome = tokio::time::timeout(
        ctx.timeout,
        drive(stream, &mut handshake, ctx, connection),
    )
    .await;
    let result = match outcome {
        Ok(result) => result,
        Err(_elapsed) => Err(handshake.on_timeout().into()),
    };

    match result {
        Ok(session) => {
            ctx.observer.on_registered(&session);
            Ok(session)
        }
        Err(HandshakeFailure::Rejected(error)) => {
            ctx.observer
                .on_rejected(peer, handshake.claimed_identity(), &error);
            let rejection = ServerMessage::AuthResult(AuthResult::Rejected {
                reason: error.reason_code(),
            });
            // Best-effort: the remote party may already be gone.
            let _ = tokio::time::timeout(ctx.timeout, net_protocol::async_write(stream, &rejection))
                .await;
            Err(HandshakeFailure::Rejected(error))
        }
        Err(HandshakeFailure::Disconnected(error)) => {
            tracing::debug!(
                ?peer,
                stage = %handshake.stage(),
                "connection lost during handshake: {}",
                error
            );
            Err(HandshakeFailure::Disconnected(error))
        }
    }
}

async fn drive<S>(
    stream: &mut S,
    handshake: &mut Handshake,
    ctx: &HandshakeContext<'_>,
    connection: ConnectionHandle,
) -> Result<Session, HandshakeFailure>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        let message = match net_protocol::async_read(stream).await {
            Ok(message) => message,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(handshake.unexpected("malformed frame").into());
            }
            Err(e) => return Err(e.into()),
        };

        match message {
            ClientMessage::Hello(hello) => {
                let challenge = handshake.on_hello(hello, ctx.secrets).await?;
                net_protocol::async_write(stream, &ServerMessage::Challenge(challenge)).await?;
            }
            ClientMessage::Proof(proof) => {
                handshake.on_proof(proof)?;
                let session = handshake.register(ctx.registry, connection)?;
                net_protocol::async_write(stream, &ServerMessage::AuthResult(AuthResult::Accepted))
                    .await?;
                return Ok(session);
            }
            ClientMessage::Invoke(_) => return Err(handshake.unexpected("invocation").into()),
        }
    }
}
