mod args;
mod dispatcher;
mod instance;
mod ping;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{Cli, Command};

const LOG_ENV: &str = "SLINK_LOG";

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Serve { config } => {
            let config = instance::load_config(config.as_deref())?;
            instance::serve(config).await
        }
        Command::Ping {
            server,
            client_id,
            secret,
            group,
            operation,
            args,
            attempts,
        } => {
            let client_id = client_id.unwrap_or_else(|| {
                slink_client::login_manager::default_client_id(|var| std::env::var(var).ok())
            });
            let result = ping::ping(ping::PingArgs {
                server,
                client_id,
                secret,
                group,
                operation,
                args,
                attempts,
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
