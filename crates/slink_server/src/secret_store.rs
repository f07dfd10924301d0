//! Lookup of the secrets services authenticate with.
//!
//! Secrets live outside the [group registry][crate::registry::GroupRegistry]: group definitions
//! are operational config, while secrets are sensitive material with stricter handling.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use slink_utils::auth::{Identity, Secret};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("unknown client")]
    UnknownClient,
    /// The backing store could not answer. Never contains secret material.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Source of the expected secret for a service client.
///
/// Must be safe for concurrent lookups from many connections. A lookup may suspend its
/// connection; it never blocks other connections.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn lookup_secret(&self, identity: &Identity) -> Result<Secret, LookupError>;
}

/// One shared secret for every service client.
///
/// Without a secret, logins are disabled: every lookup fails with [LookupError::UnknownClient].
#[derive(Clone, Debug)]
pub struct SharedSecretStore {
    secret: Option<Secret>,
}

impl SharedSecretStore {
    pub fn new(secret: impl Into<Secret>) -> Self {
        let secret = secret.into();
        if secret.is_empty() {
            return Self::disabled();
        }
        Self {
            secret: Some(secret),
        }
    }

    pub fn disabled() -> Self {
        tracing::info!("shared secret not configured, logins disabled");
        Self { secret: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }
}

#[async_trait]
impl SecretStore for SharedSecretStore {
    async fn lookup_secret(&self, _identity: &Identity) -> Result<Secret, LookupError> {
        self.secret.clone().ok_or(LookupError::UnknownClient)
    }
}

/// A fixed table of per-client secrets.
#[derive(Clone, Default, Debug)]
pub struct MapSecretStore {
    secrets: HashMap<Identity, Secret>,
}

#[derive(Debug, Error)]
pub enum SecretFileError {
    #[error("could not read secrets file: {0}")]
    Io(#[from] std::io::Error),
    /// The parser's message is dropped: it quotes the offending line, which may hold a secret.
    #[error("could not parse secrets file")]
    Parse,
    #[error("secrets file has an entry with an empty client id")]
    EmptyClientId,
    #[error("secrets file has an empty secret for client {0:?}")]
    EmptySecret(String),
}

impl MapSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: Identity, secret: impl Into<Secret>) {
        self.secrets.insert(identity, secret.into());
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Parses a TOML table of `client_id = "secret"` entries.
    pub fn from_toml(contents: &str) -> Result<Self, SecretFileError> {
        let table: HashMap<String, String> =
            toml::from_str(contents).map_err(|_| SecretFileError::Parse)?;
        let mut store = Self::new();
        for (client_id, secret) in table {
            if secret.is_empty() {
                return Err(SecretFileError::EmptySecret(client_id));
            }
            let identity = Identity::new(client_id).map_err(|_| SecretFileError::EmptyClientId)?;
            store.insert(identity, secret);
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<Self, SecretFileError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }
}

#[async_trait]
impl SecretStore for MapSecretStore {
    async fn lookup_secret(&self, identity: &Identity) -> Result<Secret, LookupError> {
        self.secrets
            .get(identity)
            .cloned()
            .ok_or(LookupError::UnknownClient)
    }
}
