use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use xmlsync_core::{ClientSecrets, DRIVE_FILE_SCOPE, OAuthClient, OAuthError};

use crate::storage::{OAuthState, StorageError};

const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials file is not configured")]
    CredentialsUnset,
    #[error("credentials file is unavailable: {0}")]
    CredentialsUnavailable(PathBuf),
    #[error("invalid client secrets: {0}")]
    Secrets(#[source] OAuthError),
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authorization code missing in redirect")]
    MissingCode,
    #[error("authorization was denied: {0}")]
    Denied(String),
    #[error("authorization timed out")]
    Timeout,
    #[error("session has no refresh token")]
    MissingRefreshToken,
    #[error("token storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Acquires and refreshes session tokens. The engine persists whatever this
/// returns without looking inside.
#[async_trait]
pub trait AuthCollaborator: Send + Sync {
    /// Interactive first-time authorization.
    async fn obtain_session(&self, credentials_path: &Path) -> Result<OAuthState, AuthError>;

    /// Non-interactive renewal of an expired session.
    async fn refresh_session(
        &self,
        credentials_path: &Path,
        state: &OAuthState,
    ) -> Result<OAuthState, AuthError>;
}

/// Installed-application flow: consent in the browser, redirect to a
/// loopback listener, code exchange at the token endpoint.
pub struct InstalledAppAuth {
    timeout: Duration,
    open_browser: bool,
}

impl InstalledAppAuth {
    pub fn new() -> Self {
        Self {
            timeout: oauth_timeout(),
            open_browser: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }
}

impl Default for InstalledAppAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthCollaborator for InstalledAppAuth {
    async fn obtain_session(&self, credentials_path: &Path) -> Result<OAuthState, AuthError> {
        let client = client_from_credentials(credentials_path)?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());
        let url = client.authorize_url(&redirect_uri, DRIVE_FILE_SCOPE, None);

        println!("Open this URL in your browser to authorize Google Drive access:\n{url}");
        if self.open_browser {
            open_in_browser(&url);
        }

        let code = wait_for_redirect(&listener, self.timeout).await?;
        let token = client.exchange_code(&code, &redirect_uri).await?;
        info!("authorization completed");
        Ok(OAuthState::from_oauth_token(&token))
    }

    async fn refresh_session(
        &self,
        credentials_path: &Path,
        state: &OAuthState,
    ) -> Result<OAuthState, AuthError> {
        let refresh_token = state
            .refresh_token
            .as_deref()
            .ok_or(AuthError::MissingRefreshToken)?;
        let client = client_from_credentials(credentials_path)?;
        let token = client.refresh_token(refresh_token).await?;
        Ok(OAuthState::from_oauth_token(&token).inherit_from(state))
    }
}

fn client_from_credentials(path: &Path) -> Result<OAuthClient, AuthError> {
    let secrets = ClientSecrets::from_path(path).map_err(AuthError::Secrets)?;
    OAuthClient::from_secrets(&secrets).map_err(AuthError::Secrets)
}

/// Serves loopback requests until one carries `code` or `error`. Browsers
/// may request other paths (e.g. `/favicon.ico`) first; those get a 404.
async fn wait_for_redirect(listener: &TcpListener, timeout: Duration) -> Result<String, AuthError> {
    let deadline = Instant::now() + timeout;
    loop {
        let (mut stream, peer) = tokio::time::timeout_at(deadline, listener.accept())
            .await
            .map_err(|_| AuthError::Timeout)??;
        let mut request = vec![0u8; 8192];
        let read = tokio::time::timeout_at(deadline, stream.read(&mut request))
            .await
            .map_err(|_| AuthError::Timeout)??;
        let request_text = String::from_utf8_lossy(&request[..read]);

        match parse_redirect(&request_text) {
            Some(RedirectParams::Code(code)) => {
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
                        <html><body><h2>Google Drive connected</h2><p>You can close this window.</p></body></html>",
                    )
                    .await;
                let _ = stream.shutdown().await;
                return Ok(code);
            }
            Some(RedirectParams::Error(reason)) => {
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
                        <html><body><h2>Authorization was not granted</h2></body></html>",
                    )
                    .await;
                let _ = stream.shutdown().await;
                return Err(AuthError::Denied(reason));
            }
            None => {
                debug!(%peer, "ignoring loopback request without authorization result");
                let _ = stream
                    .write_all(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = stream.shutdown().await;
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RedirectParams {
    Code(String),
    Error(String),
}

fn parse_redirect(request: &str) -> Option<RedirectParams> {
    let request_line = request.lines().next()?;
    let target = request_line.split_whitespace().nth(1)?;
    let request_url = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target).ok()?
    } else {
        Url::parse(&format!("http://127.0.0.1{target}")).ok()?
    };
    let mut error = None;
    for (key, value) in request_url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => return Some(RedirectParams::Code(value.into_owned())),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    error.map(RedirectParams::Error)
}

fn open_in_browser(url: &Url) {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Command::new("xdg-open")
    };
    let spawned = command
        .arg(url.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(err) = spawned {
        warn!(error = %err, "could not launch a browser, open the URL manually");
    }
}

fn oauth_timeout() -> Duration {
    let secs = std::env::var("XMLSYNC_OAUTH_TIMEOUT_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_OAUTH_TIMEOUT_SECS);
    Duration::from_secs(secs)
}
