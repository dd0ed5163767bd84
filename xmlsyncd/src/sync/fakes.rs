use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use xmlsync_core::{DriveError, StatusCode};

use crate::auth::{AuthCollaborator, AuthError};
use crate::config::SyncConfig;
use crate::remote::{FileRef, FolderRef, NewFile, RemoteError, RemoteStore};
use crate::session::{Session, SessionProvider};
use crate::storage::{MemoryTokenStore, OAuthState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RemoteCall {
    ListFolders(String),
    CreateFolder(String),
    CreateFile { name: String, parent_id: String },
}

#[derive(Default)]
struct RemoteState {
    folders: Vec<FolderRef>,
    calls: Vec<RemoteCall>,
    failing_files: HashSet<String>,
    listing_status: Option<StatusCode>,
    reported_checksum: Option<String>,
    next_id: usize,
}

/// In-memory remote that records every call in order.
#[derive(Default)]
pub(crate) struct FakeRemote {
    state: Mutex<RemoteState>,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_folder(self, id: &str, name: &str) -> Self {
        self.state().folders.push(FolderRef {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    pub(crate) fn failing_file(self, name: &str) -> Self {
        self.state().failing_files.insert(name.into());
        self
    }

    pub(crate) fn failing_listing(self, status: StatusCode) -> Self {
        self.state().listing_status = Some(status);
        self
    }

    pub(crate) fn reporting_checksum(self, checksum: &str) -> Self {
        self.state().reported_checksum = Some(checksum.into());
        self
    }

    pub(crate) fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub(crate) fn folder_creations(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RemoteCall::CreateFolder(_)))
            .count()
    }

    pub(crate) fn created_files(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::CreateFile { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }
}

fn api_error(status: StatusCode, body: &str) -> RemoteError {
    RemoteError::Drive(DriveError::Api {
        status,
        body: body.into(),
    })
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn list_folders(
        &self,
        _session: &Session,
        name: &str,
    ) -> Result<Vec<FolderRef>, RemoteError> {
        let mut state = self.state();
        state.calls.push(RemoteCall::ListFolders(name.into()));
        if let Some(status) = state.listing_status {
            return Err(api_error(status, "listing failed"));
        }
        Ok(state
            .folders
            .iter()
            .filter(|folder| folder.name == name)
            .cloned()
            .collect())
    }

    async fn create_folder(
        &self,
        _session: &Session,
        name: &str,
        _parent_id: Option<&str>,
    ) -> Result<FolderRef, RemoteError> {
        let mut state = self.state();
        state.calls.push(RemoteCall::CreateFolder(name.into()));
        state.next_id += 1;
        let folder = FolderRef {
            id: format!("folder-{}", state.next_id),
            name: name.into(),
        };
        state.folders.push(folder.clone());
        Ok(folder)
    }

    async fn create_file(
        &self,
        _session: &Session,
        file: &NewFile,
        content: Vec<u8>,
    ) -> Result<FileRef, RemoteError> {
        let mut state = self.state();
        state.calls.push(RemoteCall::CreateFile {
            name: file.name.clone(),
            parent_id: file.parent_id.clone(),
        });
        if state.failing_files.contains(&file.name) {
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "upload rejected"));
        }
        state.next_id += 1;
        let checksum = state
            .reported_checksum
            .clone()
            .unwrap_or_else(|| format!("{:x}", md5::compute(&content)));
        Ok(FileRef {
            id: format!("file-{}", state.next_id),
            name: file.name.clone(),
            md5_checksum: Some(checksum),
        })
    }
}

/// Authorizes instantly with a fixed token and counts handshakes.
#[derive(Default)]
pub(crate) struct InstantAuth {
    pub(crate) obtains: AtomicUsize,
}

#[async_trait]
impl AuthCollaborator for InstantAuth {
    async fn obtain_session(&self, _credentials: &Path) -> Result<OAuthState, AuthError> {
        self.obtains.fetch_add(1, Ordering::SeqCst);
        Ok(OAuthState {
            access_token: "test-token".into(),
            refresh_token: Some("test-refresh".into()),
            expires_at: None,
            scope: None,
            token_type: Some("Bearer".into()),
        })
    }

    async fn refresh_session(
        &self,
        credentials: &Path,
        _state: &OAuthState,
    ) -> Result<OAuthState, AuthError> {
        self.obtain_session(credentials).await
    }
}

pub(crate) fn test_session() -> Session {
    Session::new(OAuthState {
        access_token: "test-token".into(),
        refresh_token: None,
        expires_at: None,
        scope: None,
        token_type: None,
    })
}

pub(crate) fn session_provider() -> Arc<SessionProvider> {
    Arc::new(SessionProvider::new(
        Arc::new(MemoryTokenStore::new()),
        Arc::new(InstantAuth::default()),
    ))
}

/// Temporary source tree plus a config pointing at it and at a dummy
/// credentials file.
pub(crate) struct Workspace {
    _dir: TempDir,
    pub(crate) config: SyncConfig,
}

impl Workspace {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir(&source).unwrap();
        let credentials = dir.path().join("credentials.json");
        std::fs::write(&credentials, "{}").unwrap();
        let config = SyncConfig {
            credentials_path: credentials,
            source_dir: source,
            upload_concurrency: 1,
            ..SyncConfig::default()
        };
        Self { _dir: dir, config }
    }

    pub(crate) fn write(&self, relative: &str, contents: &str) {
        let path = self.config.source_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
}
