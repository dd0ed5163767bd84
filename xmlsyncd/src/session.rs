use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use crate::auth::AuthError;
use crate::auth::AuthCollaborator;
use crate::config::SyncConfig;
use crate::storage::{OAuthState, TokenStore, now_unix};

const REFRESH_SKEW_SECS: i64 = 60;

/// Authenticated handle passed to remote operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    state: OAuthState,
}

impl Session {
    pub fn new(state: OAuthState) -> Self {
        Self { state }
    }

    pub fn access_token(&self) -> &str {
        &self.state.access_token
    }

    pub fn state(&self) -> &OAuthState {
        &self.state
    }
}

/// Hands out a valid session: cached, persisted, refreshed or freshly
/// authorized, in that order of preference.
pub struct SessionProvider {
    store: Arc<dyn TokenStore>,
    auth: Arc<dyn AuthCollaborator>,
    cached: Mutex<Option<Session>>,
    refresh_skew_secs: i64,
}

impl SessionProvider {
    pub fn new(store: Arc<dyn TokenStore>, auth: Arc<dyn AuthCollaborator>) -> Self {
        Self {
            store,
            auth,
            cached: Mutex::new(None),
            refresh_skew_secs: REFRESH_SKEW_SECS,
        }
    }

    pub async fn ensure_session(&self, config: &SyncConfig) -> Result<Session, AuthError> {
        let credentials = check_credentials(&config.credentials_path).await?;

        // Held across refresh and authorization so concurrent callers share
        // one handshake.
        let mut cached = self.cached.lock().await;
        let now = now_unix();
        if let Some(session) = cached.as_ref()
            && session.state.is_valid_at(now, self.refresh_skew_secs)
        {
            return Ok(session.clone());
        }

        let previous = match cached.take() {
            Some(session) => Some(session.state),
            None => self.load_persisted(),
        };
        let state = self.acquire(credentials, previous, now).await?;
        let session = Session::new(state);
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Forgets the cached session; the next call goes back to the store.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.invalidate().await;
        self.store.delete()?;
        info!("persisted session removed");
        Ok(())
    }

    async fn acquire(
        &self,
        credentials: &Path,
        previous: Option<OAuthState>,
        now: i64,
    ) -> Result<OAuthState, AuthError> {
        if let Some(previous) = previous {
            if previous.is_valid_at(now, self.refresh_skew_secs) {
                debug!("reusing persisted session");
                return Ok(previous);
            }
            if previous.can_refresh() {
                match self.auth.refresh_session(credentials, &previous).await {
                    Ok(refreshed) => {
                        let refreshed = refreshed.inherit_from(&previous);
                        self.persist(&refreshed);
                        info!("session refreshed");
                        return Ok(refreshed);
                    }
                    Err(err) => {
                        warn!(error = %err, "session refresh failed, falling back to authorization");
                    }
                }
            }
        }

        info!("starting authorization");
        let state = self.auth.obtain_session(credentials).await?;
        self.persist(&state);
        Ok(state)
    }

    fn load_persisted(&self) -> Option<OAuthState> {
        match self.store.load() {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "failed to load persisted session");
                None
            }
        }
    }

    fn persist(&self, state: &OAuthState) {
        if let Err(err) = self.store.save(state) {
            warn!(error = %err, "failed to persist session");
        }
    }
}

async fn check_credentials(path: &Path) -> Result<&Path, AuthError> {
    if path.as_os_str().is_empty() {
        return Err(AuthError::CredentialsUnset);
    }
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(path),
        _ => Err(AuthError::CredentialsUnavailable(path.to_path_buf())),
    }
}
