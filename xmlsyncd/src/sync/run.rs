use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use super::resolver::FolderResolver;
use super::scan::collect_documents;
use super::uploader::{FileUploader, UploadOutcome, UploadTurn};
use crate::config::{ConfigError, SyncConfig};
use crate::remote::{RemoteError, RemoteStore};
use crate::session::{AuthError, SessionProvider};

/// Pass-fatal failures. Per-file problems end up in
/// [`SyncRunResult::failures`] instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("remote folder error: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRunResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub folder_id: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub failures: Vec<UploadOutcome>,
}

impl SyncRunResult {
    fn from_outcomes(
        folder_id: String,
        started_at: OffsetDateTime,
        outcomes: Vec<UploadOutcome>,
    ) -> Self {
        let total = outcomes.len();
        let failures: Vec<_> = outcomes.into_iter().filter(|o| !o.succeeded).collect();
        Self {
            total,
            succeeded: total - failures.len(),
            failed: failures.len(),
            folder_id,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            failures,
        }
    }
}

impl fmt::Display for SyncRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let finished = self
            .finished_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.finished_at.to_string());
        write!(
            f,
            "{}/{} uploaded, {} failed (finished {finished})",
            self.succeeded, self.total, self.failed
        )
    }
}

/// One synchronization pass, as driven by the scheduler.
#[async_trait]
pub trait SyncPass: Send + Sync {
    async fn run_once(&self, config: &SyncConfig) -> Result<SyncRunResult, RunError>;
}

pub struct SyncRunner {
    sessions: Arc<SessionProvider>,
    resolver: FolderResolver,
    uploader: FileUploader,
}

impl SyncRunner {
    pub fn new(sessions: Arc<SessionProvider>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            sessions,
            resolver: FolderResolver::new(remote.clone()),
            uploader: FileUploader::new(remote),
        }
    }
}

#[async_trait]
impl SyncPass for SyncRunner {
    async fn run_once(&self, config: &SyncConfig) -> Result<SyncRunResult, RunError> {
        let started_at = OffsetDateTime::now_utc();
        let session = self.sessions.ensure_session(config).await?;
        let source_dir = config.check_source_dir().await?;
        let folder_name = config.check_destination()?;

        let folder = match self.resolver.resolve(&session, folder_name).await {
            Ok(folder) => folder,
            Err(err) => {
                if err.is_auth_failure() {
                    // Rejected token: the next pass goes back to the store or refreshes.
                    self.sessions.invalidate().await;
                }
                return Err(err.into());
            }
        };

        let files = collect_documents(source_dir)
            .await
            .map_err(|source| ConfigError::SourceDirUnreadable {
                path: source_dir.to_path_buf(),
                source,
            })?;
        debug!(count = files.len(), folder = %folder.id, "documents discovered");

        // Reads overlap; creates start in path order.
        let uploads: Vec<_> = files
            .iter()
            .zip(UploadTurn::chain(files.len()))
            .map(|(path, turn)| {
                self.uploader.upload(&session, &folder.id, path, turn)
            })
            .collect();
        let outcomes: Vec<UploadOutcome> = stream::iter(uploads)
            .buffered(config.upload_concurrency())
            .collect()
            .await;

        let result = SyncRunResult::from_outcomes(folder.id, started_at, outcomes);
        if result.failed > 0 {
            warn!(
                total = result.total,
                failed = result.failed,
                "sync pass finished with failures"
            );
        } else {
            info!(total = result.total, "sync pass finished");
        }
        Ok(result)
    }
}
