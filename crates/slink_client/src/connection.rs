//! Logging in to a slink server, and invoking operations once logged in.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use slink_utils::auth::{CredentialBundle, Identity, Secret};
use slink_utils::net_async::{tcp, ClientStream, ConfiguredClient};
use slink_utils::net_protocol::{
    self,
    auth::{AuthResult, Hello, ProofMessage},
    invoke::{Invocation, InvocationId},
    ClientMessage, ServerMessage,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::ClientError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the service side of the handshake on `stream`.
///
/// The secret never leaves this process; only a proof over the server's nonce is sent.
pub async fn handshake<S>(
    stream: &mut S,
    credentials: &CredentialBundle,
    group: &str,
) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = ClientMessage::Hello(Hello {
        client_id: credentials.identity().client_id().to_owned(),
        requested_group: group.to_owned(),
    });
    net_protocol::async_write(stream, &hello).await?;

    let nonce = match net_protocol::async_read(stream).await? {
        ServerMessage::Challenge(challenge) => challenge.nonce,
        ServerMessage::AuthResult(AuthResult::Rejected { reason }) => {
            return Err(ClientError::Rejected(reason))
        }
        ServerMessage::AuthResult(AuthResult::Accepted) => {
            return Err(ClientError::UnexpectedMessage("acceptance before proof"))
        }
        ServerMessage::InvokeResult(_) => {
            return Err(ClientError::UnexpectedMessage("invocation result"))
        }
    };

    let proof = ClientMessage::Proof(ProofMessage {
        proof: credentials.prove(&nonce),
    });
    net_protocol::async_write(stream, &proof).await?;

    match net_protocol::async_read(stream).await? {
        ServerMessage::AuthResult(AuthResult::Accepted) => Ok(()),
        ServerMessage::AuthResult(AuthResult::Rejected { reason }) => {
            Err(ClientError::Rejected(reason))
        }
        ServerMessage::Challenge(_) => Err(ClientError::UnexpectedMessage("second challenge")),
        ServerMessage::InvokeResult(_) => Err(ClientError::UnexpectedMessage("invocation result")),
    }
}

/// Logs a service in to slink servers with one set of credentials and one requested group.
pub struct ServiceClient {
    credentials: CredentialBundle,
    group: String,
    transport: Box<dyn ConfiguredClient>,
}

impl ServiceClient {
    pub fn new(credentials: CredentialBundle, group: impl Into<String>) -> Self {
        Self {
            credentials,
            group: group.into(),
            transport: Box::new(tcp::ConfiguredClient::new(DEFAULT_CONNECT_TIMEOUT)),
        }
    }

    /// Validates the credentials before anything touches the network.
    pub fn create(
        client_id: impl Into<String>,
        secret: impl Into<Secret>,
        group: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let credentials = CredentialBundle::create(client_id, secret)?;
        Ok(Self::new(credentials, group))
    }

    pub fn identity(&self) -> &Identity {
        self.credentials.identity()
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub async fn login(&self, addr: SocketAddr) -> Result<AuthenticatedConnection, ClientError> {
        let mut stream = self.transport.connect(addr).await?;
        if let Err(error) = handshake(&mut stream, &self.credentials, &self.group).await {
            let _shutdown = stream.shutdown().await;
            return Err(error);
        }
        tracing::debug!(%addr, client_id = %self.identity(), group = %self.group, "logged in");
        Ok(AuthenticatedConnection {
            stream,
            server: addr,
            identity: self.identity().clone(),
            group: self.group.clone(),
            next_id: 0,
        })
    }
}

/// A connection whose session is registered on the server.
#[derive(Debug)]
pub struct AuthenticatedConnection {
    stream: Box<dyn ClientStream>,
    server: SocketAddr,
    identity: Identity,
    group: String,
    next_id: InvocationId,
}

impl AuthenticatedConnection {
    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Invokes `operation` and waits for its result.
    pub async fn invoke(
        &mut self,
        operation: impl Into<String>,
        args: Value,
    ) -> Result<Value, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let invocation = ClientMessage::Invoke(Invocation {
            id,
            operation: operation.into(),
            args,
        });
        net_protocol::async_write(&mut self.stream, &invocation).await?;

        match net_protocol::async_read(&mut self.stream).await? {
            ServerMessage::InvokeResult(result) if result.id == id => Ok(result.result?),
            ServerMessage::InvokeResult(_) => {
                Err(ClientError::UnexpectedMessage("result for another invocation"))
            }
            ServerMessage::AuthResult(AuthResult::Rejected { reason }) => {
                Err(ClientError::Rejected(reason))
            }
            ServerMessage::AuthResult(AuthResult::Accepted) => {
                Err(ClientError::UnexpectedMessage("auth result"))
            }
            ServerMessage::Challenge(_) => Err(ClientError::UnexpectedMessage("challenge")),
        }
    }

    /// Logs off by closing the connection.
    pub async fn logoff(mut self) {
        let _shutdown = self.stream.shutdown().await;
    }
}
