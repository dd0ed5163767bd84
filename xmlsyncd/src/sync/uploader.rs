use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::remote::{FileRef, NewFile, RemoteError, RemoteStore};
use crate::session::Session;

pub const XML_CONTENT_TYPE: &str = "application/xml";

/// Result of a single file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub path: PathBuf,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl UploadOutcome {
    fn success(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            succeeded: true,
            error: None,
        }
    }

    fn failure(path: &Path, error: &UploadError) -> Self {
        Self {
            path: path.to_path_buf(),
            succeeded: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
enum UploadError {
    #[error("path has no file name")]
    NoFileName,
    #[error("failed to read file: {0}")]
    Read(#[from] std::io::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Place in the line of remote creates. The create for a file starts only
/// after the one ahead of it has started or has given up.
pub struct UploadTurn {
    after: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl UploadTurn {
    /// A turn with nobody ahead of it.
    #[cfg(test)]
    pub(crate) fn unordered() -> Self {
        Self {
            after: None,
            release: None,
        }
    }

    /// `count` linked turns; turn `i` waits for turn `i - 1`.
    pub fn chain(count: usize) -> Vec<Self> {
        let mut turns = Vec::with_capacity(count);
        let mut previous = None;
        for _ in 0..count {
            let (release, next) = oneshot::channel();
            turns.push(Self {
                after: previous.take(),
                release: Some(release),
            });
            previous = Some(next);
        }
        turns
    }

    async fn wait(&mut self) {
        if let Some(after) = self.after.take() {
            // A dropped sender releases the line just like a send.
            let _ = after.await;
        }
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}

pub struct FileUploader {
    remote: Arc<dyn RemoteStore>,
}

impl FileUploader {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// Uploads `path` into `folder_id`. Failures are reported in the
    /// outcome, never returned. The remote create is issued only once `turn`
    /// comes up; reading the file does not wait.
    pub async fn upload(
        &self,
        session: &Session,
        folder_id: &str,
        path: &Path,
        mut turn: UploadTurn,
    ) -> UploadOutcome {
        let result = self.try_upload(session, folder_id, path, &mut turn).await;
        // A file that failed before its create still holds its place.
        turn.wait().await;
        turn.release();
        match result {
            Ok(file) => {
                debug!(path = %path.display(), id = %file.id, "uploaded");
                UploadOutcome::success(path)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "upload failed");
                UploadOutcome::failure(path, &err)
            }
        }
    }

    async fn try_upload(
        &self,
        session: &Session,
        folder_id: &str,
        path: &Path,
        turn: &mut UploadTurn,
    ) -> Result<FileRef, UploadError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or(UploadError::NoFileName)?;
        let content = tokio::fs::read(path).await?;
        let local_md5 = format!("{:x}", md5::compute(&content));

        let file = NewFile {
            name,
            parent_id: folder_id.to_string(),
            content_type: XML_CONTENT_TYPE.to_string(),
        };
        turn.wait().await;
        let create = self.remote.create_file(session, &file, content);
        turn.release();
        let created = create.await?;

        if let Some(remote_md5) = created.md5_checksum.as_deref()
            && !remote_md5.eq_ignore_ascii_case(&local_md5)
        {
            return Err(RemoteError::IntegrityMismatch {
                name: file.name,
                expected: local_md5,
                actual: remote_md5.to_string(),
            }
            .into());
        }
        Ok(created)
    }
}
