//! Server configuration, loaded from TOML.
//!
//! ```toml
//! bind = "0.0.0.0:47624"
//! handshake_timeout_secs = 10
//!
//! [[groups]]
//! name = "slink"
//! operations = ["ping", "invoke"]
//!
//! [secrets]
//! shared_secret_env = "SLINK_SHARED_SECRET"
//! ```
//!
//! `SLINK_BIND` and `SLINK_HANDSHAKE_TIMEOUT_SECS` override the corresponding keys.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_derive::Deserialize;
use thiserror::Error;

use crate::registry::{GroupRegistry, RegistryError};
use crate::secret_store::{MapSecretStore, SecretFileError, SecretStore, SharedSecretStore};

pub const DEFAULT_BIND: &str = "0.0.0.0:47624";
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SHARED_SECRET_ENV: &str = "SLINK_SHARED_SECRET";

pub const BIND_ENV: &str = "SLINK_BIND";
pub const HANDSHAKE_TIMEOUT_ENV: &str = "SLINK_HANDSHAKE_TIMEOUT_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("handshake timeout must be at least one second")]
    ZeroTimeout,
    #[error("invalid group configuration: {0}")]
    Registry(#[from] RegistryError),
    #[error("`secrets.shared_secret_env` and `secrets.file` are mutually exclusive")]
    ConflictingSecrets,
    #[error(transparent)]
    Secrets(#[from] SecretFileError),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Where service secrets come from. Secrets themselves never appear in the config file.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecretsConfig {
    /// Environment variable holding one secret shared by every service client.
    pub shared_secret_env: Option<String>,
    /// TOML file of per-client secrets, `client_id = "secret"`.
    pub file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

fn default_bind() -> SocketAddr {
    DEFAULT_BIND
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 47624)))
}

fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            groups: Vec::new(),
            secrets: SecretsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads a config file and applies overrides from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.secrets.shared_secret_env.is_some() && self.secrets.file.is_some() {
            return Err(ConfigError::ConflictingSecrets);
        }
        Ok(())
    }

    /// Overrides config keys from `env`, a lookup of environment variables.
    pub fn apply_env_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = env(BIND_ENV) {
            self.bind = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: BIND_ENV,
                value: value.clone(),
            })?;
            tracing::debug!(bind = %self.bind, "overriding bind from {}", BIND_ENV);
        }
        if let Some(value) = env(HANDSHAKE_TIMEOUT_ENV) {
            self.handshake_timeout_secs =
                value.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: HANDSHAKE_TIMEOUT_ENV,
                    value: value.clone(),
                })?;
            tracing::debug!(
                secs = self.handshake_timeout_secs,
                "overriding handshake timeout from {}",
                HANDSHAKE_TIMEOUT_ENV
            );
        }
        self.validate()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Builds the group registry. Duplicate or empty group names are errors.
    pub fn build_registry(&self) -> Result<GroupRegistry, ConfigError> {
        let groups = self
            .groups
            .iter()
            .map(|g| (g.name.as_str(), g.operations.iter().map(String::as_str)));
        Ok(GroupRegistry::build(groups)?)
    }

    /// Builds the secret store. A missing shared secret disables logins rather than failing.
    pub fn build_secret_store(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Arc<dyn SecretStore>, ConfigError> {
        if let Some(path) = &self.secrets.file {
            let store = MapSecretStore::load(path)?;
            tracing::info!(path = %path.display(), clients = store.len(), "loaded service secrets");
            return Ok(Arc::new(store));
        }

        let var = self
            .secrets
            .shared_secret_env
            .as_deref()
            .unwrap_or(DEFAULT_SHARED_SECRET_ENV);
        let store = match env(var) {
            Some(secret) => SharedSecretStore::new(secret),
            None => SharedSecretStore::disabled(),
        };
        Ok(Arc::new(store))
    }
}
