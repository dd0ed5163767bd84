use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::auth::{AuthCollaborator, InstalledAppAuth};
use crate::config::SyncConfig;
use crate::remote::{DriveRemote, RemoteStore};
use crate::session::{Session, SessionProvider};
use crate::storage::{TokenStore, open_token_store};
use crate::sync::{RunError, Scheduler, SyncRunResult, SyncRunner};

/// Fully wired engine: token store, auth, Drive remote, runner, scheduler.
pub struct DaemonRuntime {
    config: SyncConfig,
    sessions: Arc<SessionProvider>,
    scheduler: Scheduler,
}

impl DaemonRuntime {
    pub fn bootstrap(config: SyncConfig) -> anyhow::Result<Self> {
        let tokens = open_token_store(config.token_backend)
            .context("failed to open token storage")?;
        let remote = Arc::new(DriveRemote::new().context("failed to build drive client")?);
        Ok(Self::assemble(
            config,
            tokens,
            Arc::new(InstalledAppAuth::new()),
            remote,
        ))
    }

    pub fn assemble(
        config: SyncConfig,
        tokens: Arc<dyn TokenStore>,
        auth: Arc<dyn AuthCollaborator>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let sessions = Arc::new(SessionProvider::new(tokens, auth));
        let runner = Arc::new(SyncRunner::new(sessions.clone(), remote));
        Self {
            config,
            sessions,
            scheduler: Scheduler::new(runner),
        }
    }

    /// Starts the periodic loop and blocks until SIGINT/SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            source = %self.config.source_dir.display(),
            folder = %self.config.destination_folder,
            interval_secs = self.config.interval().as_secs(),
            "xmlsyncd started"
        );
        self.scheduler.start(self.config.clone());

        let signal = shutdown_signal().await;
        self.scheduler.shutdown().await;
        signal.context("failed to listen for shutdown signals")?;

        let status = self.scheduler.status();
        info!(passes = status.passes, "xmlsyncd stopped");
        Ok(())
    }

    pub async fn run_once(&self) -> Result<SyncRunResult, RunError> {
        self.scheduler.run_once(&self.config).await
    }

    /// Establishes a session, authorizing interactively if needed.
    pub async fn connect(&self) -> anyhow::Result<Session> {
        self.sessions
            .ensure_session(&self.config)
            .await
            .context("failed to establish drive session")
    }

    /// Forgets the cached session and deletes the persisted token.
    pub async fn logout(&self) -> anyhow::Result<()> {
        self.sessions
            .logout()
            .await
            .context("failed to remove saved token")
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminated = terminate.recv();
    #[cfg(not(unix))]
    let terminated = std::future::pending::<Option<()>>();

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received SIGINT");
        }
        _ = terminated => {
            info!("received SIGTERM");
        }
    }
    Ok(())
}
