//! Keeps a service logged in to one of a set of game hosts.
//!
//! Hosts are tried in order of recent failures, then name, then port. A host may fail a few times
//! before it loses its place, so a single hiccup doesn't move the service to another host. Any
//! successful login forgets all failures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use slink_utils::atomic;
use slink_utils::auth::Secret;
use slink_utils::server_shutdown::{ShutdownManager, ShutdownReceiver};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::connection::{AuthenticatedConnection, ServiceClient};
use crate::error::ClientError;
use crate::hosts::{GameHost, GameHostInfo, HostRepo};

pub const DEFAULT_GROUP: &str = "slink";
pub const DEFAULT_LOGOFF_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_HOST_REFRESH_WAIT: Duration = Duration::from_secs(60);

pub struct LoginConfig {
    pub hosts: Arc<dyn HostRepo>,
    pub client_id: String,
    pub secret: Secret,
    pub group: String,
    /// How long to wait before logging in again after a logoff or a failed login.
    pub logoff_wait: Duration,
    /// How long to wait before asking for hosts again when there were none.
    pub host_refresh_wait: Duration,
}

impl LoginConfig {
    pub fn new(hosts: Arc<dyn HostRepo>, secret: impl Into<Secret>) -> Self {
        Self {
            hosts,
            client_id: default_client_id(|var| std::env::var(var).ok()),
            secret: secret.into(),
            group: DEFAULT_GROUP.to_owned(),
            logoff_wait: DEFAULT_LOGOFF_WAIT,
            host_refresh_wait: DEFAULT_HOST_REFRESH_WAIT,
        }
    }
}

/// The name a service logs in as when none is configured: its host name.
pub fn default_client_id(env: impl Fn(&str) -> Option<String>) -> String {
    match env("HOSTNAME") {
        Some(host) if !host.trim().is_empty() => host,
        _ => {
            tracing::warn!("hostname is not set, logging in as localhost");
            "localhost".to_owned()
        }
    }
}

#[derive(Default)]
struct Shared {
    connection: tokio::sync::Mutex<Option<AuthenticatedConnection>>,
    logged_on: AtomicBool,
    current_host: Mutex<Option<GameHost>>,
    host_info: Mutex<HashMap<GameHost, GameHostInfo>>,
    link_lost: Notify,
}

impl Shared {
    /// Replaces the known hosts with `hosts`, keeping the history of hosts seen before.
    fn update_hosts(&self, hosts: Vec<GameHost>) {
        let hosts: HashSet<GameHost> = hosts.into_iter().collect();
        let mut host_info = self.host_info.lock();
        host_info.retain(|host, _| hosts.contains(host));
        for host in hosts {
            host_info
                .entry(host.clone())
                .or_insert_with(|| GameHostInfo::new(host));
        }
    }

    fn next_host(&self) -> Option<GameHost> {
        self.host_info
            .lock()
            .values()
            .min()
            .map(|info| info.host.clone())
    }

    async fn did_logon(&self, host: &GameHost, connection: AuthenticatedConnection) {
        tracing::info!(%host, "connection to game established");
        for info in self.host_info.lock().values_mut() {
            info.failures = 0;
        }
        *self.connection.lock().await = Some(connection);
        *self.current_host.lock() = Some(host.clone());
        self.logged_on.store(true, atomic::ORDERING);
    }

    async fn did_logoff(&self, host: &GameHost) {
        self.take_connection().await;
        match self.host_info.lock().get_mut(host) {
            Some(info) => info.failures += 1,
            None => tracing::warn!(%host, "connection from unrecognized host"),
        }
    }

    async fn take_connection(&self) -> Option<AuthenticatedConnection> {
        let connection = self.connection.lock().await.take();
        self.logged_on.store(false, atomic::ORDERING);
        *self.current_host.lock() = None;
        connection
    }
}

/// Maintains a login to a game host in the background.
pub struct LoginManager {
    shared: Arc<Shared>,
    shutdown: Mutex<ShutdownManager>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LoginManager {
    /// Starts logging in. Fails without touching the network if the credentials are invalid.
    pub fn start(config: LoginConfig) -> Result<Self, ClientError> {
        let LoginConfig {
            hosts,
            client_id,
            secret,
            group,
            logoff_wait,
            host_refresh_wait,
        } = config;
        let client = ServiceClient::create(client_id, secret, group)?;

        let shared = Arc::new(Shared::default());
        let (shutdown, shutdown_rx) = ShutdownManager::new_pair();

        tracing::info!(
            client_id = %client.identity(),
            group = client.group(),
            "starting login manager"
        );
        let task = tokio::spawn(
            run(
                Arc::clone(&shared),
                client,
                hosts,
                logoff_wait,
                host_refresh_wait,
                shutdown_rx,
            )
            .in_current_span(),
        );

        Ok(Self {
            shared,
            shutdown: Mutex::new(shutdown),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn is_logged_on(&self) -> bool {
        self.shared.logged_on.load(atomic::ORDERING)
    }

    pub fn current_host(&self) -> Option<GameHost> {
        self.shared.current_host.lock().clone()
    }

    /// Runs `f` on the live connection, or fails with [ClientError::LinkDown] if there is none.
    ///
    /// If `f` fails in a way that leaves the connection unusable, the connection is dropped and
    /// the manager logs in again.
    pub async fn with_connection<R, F>(&self, f: F) -> Result<R, ClientError>
    where
        F: for<'c> FnOnce(&'c mut AuthenticatedConnection) -> BoxFuture<'c, Result<R, ClientError>>,
    {
        let mut guard = self.shared.connection.lock().await;
        let connection = guard.as_mut().ok_or(ClientError::LinkDown)?;
        let result = f(connection).await;
        if let Err(error) = &result {
            if error.is_link_failure() {
                tracing::warn!("lost game link: {}", error);
                guard.take();
                self.shared.logged_on.store(false, atomic::ORDERING);
                self.shared.link_lost.notify_one();
            }
        }
        result
    }

    pub async fn invoke(
        &self,
        operation: impl Into<String>,
        args: Value,
    ) -> Result<Value, ClientError> {
        let operation = operation.into();
        self.with_connection(move |conn| Box::pin(conn.invoke(operation, args)))
            .await
    }

    /// Logs off if logged on, and stops all further login attempts.
    pub async fn shutdown(&self) {
        {
            let mut shutdown = self.shutdown.lock();
            if shutdown.is_shutdown() {
                return;
            }
            tracing::info!("stopping login manager");
            let _ = shutdown.shutdown_immediately();
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for LoginManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Sleeps for `wait`, unless shutdown comes first. Returns whether shutdown came first.
async fn sleep_or_shutdown(wait: Duration, shutdown: &mut ShutdownReceiver) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        _ = shutdown.recv_shutdown_immediately() => true,
    }
}

async fn run(
    shared: Arc<Shared>,
    client: ServiceClient,
    hosts: Arc<dyn HostRepo>,
    logoff_wait: Duration,
    host_refresh_wait: Duration,
    mut shutdown: ShutdownReceiver,
) {
    while !shutdown.is_shutdown() {
        shared.update_hosts(hosts.servers().await);

        let host = match shared.next_host() {
            Some(host) => host,
            None => {
                tracing::info!(retry = ?host_refresh_wait, "no game hosts available");
                if sleep_or_shutdown(host_refresh_wait, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        tracing::info!(%host, "attempting login to game host");
        let login = async {
            let addr = host.resolve().await?;
            client.login(addr).await
        };
        let login = tokio::select! {
            login = login => login,
            _ = shutdown.recv_shutdown_immediately() => break,
        };

        match login {
            Ok(connection) => {
                shared.did_logon(&host, connection).await;
                tokio::select! {
                    _ = shared.link_lost.notified() => {}
                    _ = shutdown.recv_shutdown_immediately() => break,
                }
            }
            Err(error) => {
                tracing::warn!(%host, "login to game host failed: {}", error);
            }
        }

        // Failed logins and logoffs are treated alike.
        shared.did_logoff(&host).await;
        tracing::info!(%host, retry = ?logoff_wait, "game connection failure");
        if sleep_or_shutdown(logoff_wait, &mut shutdown).await {
            break;
        }
    }

    if let Some(connection) = shared.take_connection().await {
        tracing::info!(server = %connection.server_addr(), "logging off");
        connection.logoff().await;
    }
}
