use async_trait::async_trait;
use thiserror::Error;
use xmlsync_core::{ApiErrorClass, DriveClient, DriveError, DriveFile, FileMetadata};

use crate::session::Session;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("drive request failed: {0}")]
    Drive(#[from] DriveError),
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        name: String,
        expected: String,
        actual: String,
    },
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Drive(err) => err.is_retryable(),
            RemoteError::IntegrityMismatch { .. } => true,
        }
    }

    /// The service rejected the session itself (revoked or expired token).
    pub fn is_auth_failure(&self) -> bool {
        match self {
            RemoteError::Drive(err) => err.classification() == Some(ApiErrorClass::Auth),
            RemoteError::IntegrityMismatch { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub md5_checksum: Option<String>,
}

/// A file to create under `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub name: String,
    pub parent_id: String,
    pub content_type: String,
}

/// The three remote operations a sync pass needs.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Non-trashed folders named exactly `name`, in service order.
    async fn list_folders(&self, session: &Session, name: &str)
    -> Result<Vec<FolderRef>, RemoteError>;

    async fn create_folder(
        &self,
        session: &Session,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderRef, RemoteError>;

    async fn create_file(
        &self,
        session: &Session,
        file: &NewFile,
        content: Vec<u8>,
    ) -> Result<FileRef, RemoteError>;
}

/// [`RemoteStore`] backed by the Drive v3 REST API.
#[derive(Clone)]
pub struct DriveRemote {
    client: DriveClient,
}

impl DriveRemote {
    pub fn new() -> Result<Self, RemoteError> {
        Ok(Self {
            client: DriveClient::new("")?,
        })
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, RemoteError> {
        Ok(Self {
            client: DriveClient::with_base_url(base_url, "")?,
        })
    }

    fn client_for(&self, session: &Session) -> DriveClient {
        self.client.with_token(session.access_token())
    }
}

#[async_trait]
impl RemoteStore for DriveRemote {
    async fn list_folders(
        &self,
        session: &Session,
        name: &str,
    ) -> Result<Vec<FolderRef>, RemoteError> {
        let folders = self.client_for(session).find_folders(name).await?;
        Ok(folders
            .into_iter()
            .filter(DriveFile::is_folder)
            .map(folder_ref)
            .collect())
    }

    async fn create_folder(
        &self,
        session: &Session,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderRef, RemoteError> {
        let folder = self
            .client_for(session)
            .create_folder(name, parent_id)
            .await?;
        Ok(folder_ref(folder))
    }

    async fn create_file(
        &self,
        session: &Session,
        file: &NewFile,
        content: Vec<u8>,
    ) -> Result<FileRef, RemoteError> {
        let metadata = FileMetadata::in_folder(&file.name, &file.parent_id);
        let created = self
            .client_for(session)
            .create_file_resumable(&metadata, &file.content_type, content)
            .await?;
        Ok(FileRef {
            id: created.id,
            name: created.name,
            md5_checksum: created.md5_checksum,
        })
    }
}

fn folder_ref(file: DriveFile) -> FolderRef {
    FolderRef {
        id: file.id,
        name: file.name,
    }
}
