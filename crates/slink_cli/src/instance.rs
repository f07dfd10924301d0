use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use slink_server::config::ServerConfig;
use slink_server::server::Server;
use slink_utils::net_async::{tcp, ServerListener};
use slink_utils::server_shutdown::ShutdownManager;

use crate::dispatcher::BuiltinDispatcher;

/// Reads the server config from `path`, or from defaults and the environment without one.
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let mut config = ServerConfig::default();
            config.apply_env_overrides(|var| std::env::var(var).ok())?;
            Ok(config)
        }
    }
}

/// Builds a server from `config`. The secret store reads the process environment.
pub(crate) fn build_server(config: &ServerConfig) -> anyhow::Result<Server> {
    let registry = config
        .build_registry()
        .context("invalid invocation groups")?;
    if registry.is_empty() {
        tracing::warn!("no invocation groups are configured; every login will be rejected");
    }

    let secrets = config
        .build_secret_store(|var| std::env::var(var).ok())
        .context("failed to load service secrets")?;

    Ok(Server::builder(registry, secrets)
        .dispatcher(Arc::new(BuiltinDispatcher))
        .handshake_timeout(config.handshake_timeout())
        .build())
}

/// Serves until SIGINT or SIGTERM.
pub(crate) async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let server = build_server(&config)?;
    let listener = tcp::ServerListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    println!("slink server listening on {}", listener.local_addr()?);

    let (mut shutdown, shutdown_rx) = ShutdownManager::new_pair();

    // Make sure live sessions are closed when the process is asked to stop.
    let signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    let signals_task = tokio::spawn(async move {
        let mut signals = signals;
        if let Some(signal) = signals.next().await {
            tracing::info!(signal, "received termination signal, shutting down");
            if let Err(error) = shutdown.shutdown_immediately() {
                tracing::error!(?error, "failed to signal shutdown");
            }
        }
    });

    let result = server.start(Box::new(listener), shutdown_rx).await;

    signals_handle.close();
    let _ = signals_task.await;

    result.context("server stopped with an error")
}
