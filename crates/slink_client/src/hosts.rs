//! Game hosts a service may log in to, and how they are discovered.

use std::cmp::Ordering;
use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::ClientError;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct GameHost {
    pub name: String,
    pub port: u16,
}

impl GameHost {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    pub async fn resolve(&self) -> Result<SocketAddr, ClientError> {
        tokio::net::lookup_host((self.name.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| ClientError::Resolve(self.to_string()))
    }
}

impl fmt::Display for GameHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

/// Source of the game hosts that might accept a login.
#[async_trait]
pub trait HostRepo: Send + Sync {
    async fn servers(&self) -> Vec<GameHost>;
}

/// A fixed set of hosts. A single host is the non-clustered deployment.
#[derive(Clone, Debug, Default)]
pub struct StaticHosts(Vec<GameHost>);

impl StaticHosts {
    pub fn new(hosts: impl IntoIterator<Item = GameHost>) -> Self {
        Self(hosts.into_iter().collect())
    }

    pub fn single(host: GameHost) -> Self {
        Self(vec![host])
    }
}

#[async_trait]
impl HostRepo for StaticHosts {
    async fn servers(&self) -> Vec<GameHost> {
        self.0.clone()
    }
}

/// Recent login history of a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GameHostInfo {
    pub host: GameHost,
    pub failures: u32,
}

/// Failures per step in preference. A host may fail this many times before it sorts after its
/// peers.
const FAILURE_QUANTUM: u32 = 3;

impl GameHostInfo {
    pub fn new(host: GameHost) -> Self {
        Self { host, failures: 0 }
    }
}

impl Ord for GameHostInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.failures / FAILURE_QUANTUM)
            .cmp(&(other.failures / FAILURE_QUANTUM))
            .then_with(|| self.host.name.cmp(&other.host.name))
            .then_with(|| self.host.port.cmp(&other.host.port))
    }
}

impl PartialOrd for GameHostInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
