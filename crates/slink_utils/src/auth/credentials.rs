use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{Identity, Nonce, Proof};

/// A long-lived shared secret. The contents are wiped from memory on drop and are never
/// displayed.
#[derive(Clone)]
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("invalid credentials: client id and secret must both be non-empty")]
    InvalidCredential,
}

/// Credentials of a service connecting to a slink server.
///
/// The bundle is only ever used locally: to compute a [Proof] on the client, or to verify one on
/// the server. It does have a wire representation, but the handshake never sends it.
#[derive(Clone)]
pub struct CredentialBundle {
    identity: Identity,
    secret: Secret,
}

impl CredentialBundle {
    pub fn create(
        client_id: impl Into<String>,
        secret: impl Into<Secret>,
    ) -> Result<Self, CredentialError> {
        let identity = Identity::new(client_id).map_err(|_| CredentialError::InvalidCredential)?;
        let secret = secret.into();
        if secret.is_empty() {
            return Err(CredentialError::InvalidCredential);
        }
        Ok(Self { identity, secret })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Computes the proof of knowing this bundle's secret, for the given challenge.
    pub fn prove(&self, nonce: &Nonce) -> Proof {
        Proof::derive(&self.secret, nonce)
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("identity", &self.identity)
            .field("secret", &self.secret)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct RawCredentials {
    client_id: String,
    secret: Vec<u8>,
}

impl Serialize for CredentialBundle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawCredentials {
            client_id: self.identity.client_id().to_owned(),
            secret: self.secret.expose().to_vec(),
        };
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CredentialBundle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut raw = RawCredentials::deserialize(deserializer)?;
        let client_id = std::mem::take(&mut raw.client_id);
        let secret = Secret::new(std::mem::take(&mut raw.secret));
        CredentialBundle::create(client_id, secret).map_err(serde::de::Error::custom)
    }
}
