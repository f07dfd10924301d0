use std::path::PathBuf;

use clap::{Parser, Subcommand};
use slink_client::GameHost;
use slink_server::config::DEFAULT_SHARED_SECRET_ENV;

pub(crate) const DEFAULT_GROUP: &str = slink_client::login_manager::DEFAULT_GROUP;

/// Service links for game servers
///
/// The slink cli
#[derive(Parser)]
pub struct Cli {
    /// Log at debug level, regardless of SLINK_LOG.
    #[clap(long, short, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Starts a slink server that authenticates services and hands their sessions to the
    /// built-in operations.
    Serve {
        /// Path to a TOML config file. Without one, the server binds the default address, has
        /// no invocation groups, and reads its shared secret from SLINK_SHARED_SECRET.
        #[clap(long, short, env = "SLINK_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Logs in to a slink server, invokes one operation, and prints its result.
    Ping {
        /// Server to log in to, as `host:port`.
        #[clap(long, required = true, value_parser = parse_game_host)]
        server: GameHost,

        /// Client id to log in as. Defaults to the hostname.
        #[clap(long)]
        client_id: Option<String>,

        /// Shared secret. Prefer setting it in the environment over passing it as an argument.
        #[clap(long, env = DEFAULT_SHARED_SECRET_ENV, hide_env_values = true)]
        secret: String,

        /// Invocation group to request.
        #[clap(long, default_value = DEFAULT_GROUP)]
        group: String,

        /// Operation to invoke once logged in.
        #[clap(long, default_value = "ping")]
        operation: String,

        /// Arguments to the operation, as JSON.
        #[clap(long, default_value = "null", value_parser = parse_json)]
        args: serde_json::Value,

        /// How many times to try connecting before giving up.
        #[clap(long, default_value_t = 3)]
        attempts: usize,
    },
}

fn parse_game_host(s: &str) -> Result<GameHost, String> {
    let (name, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {s:?}"))?;
    if name.is_empty() {
        return Err(format!("missing host in {s:?}"));
    }
    let port = port
        .parse()
        .map_err(|_| format!("invalid port in {s:?}"))?;
    Ok(GameHost::new(name, port))
}

fn parse_json(s: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|e| e.to_string())
}
