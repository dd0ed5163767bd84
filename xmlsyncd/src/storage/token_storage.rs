use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use keyring::Entry;
use thiserror::Error;

use super::OAuthState;
use crate::config::TokenBackend;

const SERVICE_NAME: &str = "io.xmlsync.drive";
const TOKEN_KEY: &str = "drive_token";
const STORAGE_DIR: &str = "xmlsync";
const TOKEN_FILENAME: &str = "token.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored token is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("configuration directory unavailable for token storage")]
    MissingConfigDir,
}

/// Persistence port for the session token.
pub trait TokenStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<OAuthState>, StorageError>;
    fn save(&self, state: &OAuthState) -> Result<(), StorageError>;
    fn delete(&self) -> Result<(), StorageError>;
}

pub fn open_token_store(backend: TokenBackend) -> Result<Arc<dyn TokenStore>, StorageError> {
    Ok(match backend {
        TokenBackend::File => Arc::new(FileTokenStore::at_default_location()?),
        TokenBackend::Keyring => Arc::new(KeyringTokenStore::new()?),
    })
}

/// JSON token file readable only by the owner.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_default_location() -> Result<Self, StorageError> {
        let mut path = dirs::config_dir().ok_or(StorageError::MissingConfigDir)?;
        path.push(STORAGE_DIR);
        path.push(TOKEN_FILENAME);
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<OAuthState>, StorageError> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, state: &OAuthState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(state)?;
        let mut options = OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;

        // `mode` only applies on creation; an older file is tightened before
        // the token lands in it.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(&payload)?;
        file.sync_all()?;
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Token serialized as JSON into the platform secret service.
pub struct KeyringTokenStore {
    entry: Entry,
}

impl KeyringTokenStore {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            entry: Entry::new(SERVICE_NAME, TOKEN_KEY)?,
        })
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<OAuthState>, StorageError> {
        match self.entry.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, state: &OAuthState) -> Result<(), StorageError> {
        self.entry.set_password(&serde_json::to_string(state)?)?;
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: Mutex<Option<OAuthState>>,
    saves: Mutex<usize>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: OAuthState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    pub fn current(&self) -> Option<OAuthState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful `save` calls.
    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<OAuthState>, StorageError> {
        Ok(self.current())
    }

    fn save(&self, state: &OAuthState) -> Result<(), StorageError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
