//! Messages of the authentication handshake.
//!
//! ```text
//! service                       server
//!    | --- Hello ----------------> |
//!    | <-------------- Challenge - |
//!    | --- Proof ----------------> |
//!    | <------------- AuthResult - |
//! ```

use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::auth::{Nonce, Proof};

/// Opens a handshake. Fields are raw strings so that a malformed hello can be told apart from a
/// frame that doesn't parse at all. A missing field reads as empty.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub requested_group: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub nonce: Nonce,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProofMessage {
    pub proof: Proof,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthResult {
    Accepted,
    Rejected { reason: RejectReason },
}

/// Coarse reason a handshake was rejected, as told to the remote party.
///
/// Deliberately does not tell an unknown client apart from a wrong secret.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MalformedHello,
    AuthenticationFailed,
    GroupNotFound,
    AlreadyRegistered,
    Timeout,
    /// A message arrived that is not valid in the handshake's current state.
    ProtocolViolation,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::MalformedHello => "malformed hello",
            RejectReason::AuthenticationFailed => "authentication failed",
            RejectReason::GroupNotFound => "group not found",
            RejectReason::AlreadyRegistered => "already registered",
            RejectReason::Timeout => "timed out",
            RejectReason::ProtocolViolation => "protocol violation",
        };
        f.write_str(s)
    }
}
