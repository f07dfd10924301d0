use std::io;

use slink_utils::auth::CredentialError;
use slink_utils::net_protocol::{auth::RejectReason, invoke::InvokeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    InvalidCredential(#[from] CredentialError),
    #[error("no address found for game host {0}")]
    Resolve(String),
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
    #[error("login rejected: {0}")]
    Rejected(RejectReason),
    #[error("unexpected {0} from server")]
    UnexpectedMessage(&'static str),
    #[error("invocation failed: {0}")]
    Invoke(#[from] InvokeError),
    /// There is no logged-on connection to a game host.
    #[error("game link down")]
    LinkDown,
}

impl ClientError {
    /// Whether the connection that produced this error is no longer usable.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::UnexpectedMessage(_) | ClientError::Rejected(_)
        )
    }

    /// Whether retrying the same login may succeed. A rejection is final until credentials or
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Resolve(_))
    }
}
