use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use xmlsyncd::config::ConfigStore;
use xmlsyncd::daemon::DaemonRuntime;
use xmlsyncd::logging;

#[derive(Debug, Parser)]
#[command(name = "xmlsyncd", version, about = "Uploads local XML files to Google Drive")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Upload periodically until interrupted
    Run,
    /// Run a single pass and print the summary
    Once,
    /// Establish or refresh the Drive session
    Auth,
    /// Remove the saved token
    Logout,
    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let store = match &cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::at_default_location()?,
    };
    let config = store
        .load_effective()
        .with_context(|| format!("failed to load {}", store.path().display()))?;
    let _log_guard = logging::init(cli.verbose, config.log_dir().as_deref());

    match cli.command {
        None if !config.auto_start => {
            warn!("auto_start is disabled in the configuration; use `xmlsyncd run` to start");
            Ok(())
        }
        None | Some(Command::Run) => DaemonRuntime::bootstrap(config)?.run().await,
        Some(Command::Once) => {
            let daemon = DaemonRuntime::bootstrap(config)?;
            let result = daemon.run_once().await.context("sync pass failed")?;
            println!("{result}");
            for failure in &result.failures {
                println!(
                    "  {}: {}",
                    failure.path.display(),
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }
            if result.failed > 0 {
                anyhow::bail!("{} of {} uploads failed", result.failed, result.total);
            }
            Ok(())
        }
        Some(Command::Auth) => {
            let daemon = DaemonRuntime::bootstrap(config)?;
            daemon.connect().await?;
            println!("Google Drive connection established");
            Ok(())
        }
        Some(Command::Logout) => DaemonRuntime::bootstrap(config)?.logout().await,
        Some(Command::Config { write }) => {
            if write {
                store.save(&config)?;
                info!(path = %store.path().display(), "configuration written");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
