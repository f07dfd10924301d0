use std::fmt;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// The identifier of a service client, and its authenticated principal once a handshake
/// succeeds.
///
/// Identities are case-sensitive and never empty. Equality, ordering and hashing are determined
/// solely by the client id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid identity: client id must not be empty")]
    InvalidIdentity,
}

impl Identity {
    pub fn new(client_id: impl Into<String>) -> Result<Self, IdentityError> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(IdentityError::InvalidIdentity);
        }
        Ok(Self(client_id))
    }

    pub fn client_id(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(client_id: String) -> Result<Self, Self::Error> {
        Self::new(client_id)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({:?})", self.0)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::{Identity, IdentityError};

    #[test]
    fn reject_empty_client_id() {
        assert_eq!(Identity::new(""), Err(IdentityError::InvalidIdentity));
    }

    #[test]
    fn reject_whitespace_client_id() {
        assert_eq!(Identity::new(" \t\n"), Err(IdentityError::InvalidIdentity));
    }

    #[test]
    fn client_id_is_case_sensitive() {
        let lower = Identity::new("svc-42").unwrap();
        let upper = Identity::new("SVC-42").unwrap();
        assert_ne!(lower, upper);

        let set: HashSet<_> = [lower.clone(), upper, lower].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ordering_follows_client_id() {
        let mut ids: Vec<Identity> = ["web-2", "web-10", "batch"]
            .into_iter()
            .map(|s| s.parse().unwrap())
            .collect();
        ids.sort();
        let sorted: Vec<_> = ids.iter().map(Identity::client_id).collect();
        assert_eq!(sorted, ["batch", "web-10", "web-2"]);
    }

    #[test]
    fn deserialize_validates() {
        let ok: Identity = serde_json::from_str(r#""svc-42""#).unwrap();
        assert_eq!(ok.client_id(), "svc-42");

        let bad: Result<Identity, _> = serde_json::from_str(r#""""#);
        assert!(bad.is_err());
    }
}
