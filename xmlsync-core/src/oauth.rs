use std::path::Path;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("failed to read client secrets: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid client secrets: {0}")]
    Secrets(#[from] serde_json::Error),
    #[error("client secrets contain neither an `installed` nor a `web` section")]
    MissingClientSection,
}

/// Client identity from a downloaded `credentials.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub auth_uri: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn from_json(raw: &str) -> Result<Self, OAuthError> {
        let file: ClientSecretsFile = serde_json::from_str(raw)?;
        file.installed
            .or(file.web)
            .ok_or(OAuthError::MissingClientSection)
    }

    pub fn from_path(path: &Path) -> Result<Self, OAuthError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    auth_url: Url,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_endpoints(DEFAULT_AUTH_URL, DEFAULT_TOKEN_URL, client_id, client_secret)
    }

    pub fn from_secrets(secrets: &ClientSecrets) -> Result<Self, OAuthError> {
        Self::with_endpoints(
            secrets.auth_uri.as_deref().unwrap_or(DEFAULT_AUTH_URL),
            secrets.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URL),
            secrets.client_id.clone(),
            secrets.client_secret.clone(),
        )
    }

    pub fn with_endpoints(
        auth_url: &str,
        token_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Ok(Self {
            http: Client::new(),
            auth_url: Url::parse(auth_url)?,
            token_url: Url::parse(token_url)?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    /// Consent URL requesting offline access so a refresh token is issued.
    pub fn authorize_url(&self, redirect_uri: &str, scope: &str, state: Option<&str>) -> Url {
        let mut url = self.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("scope", scope);
            query.append_pair("access_type", "offline");
            query.append_pair("prompt", "consent");
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        url
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthToken, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ];
        self.post_token_form(&form).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        self.post_token_form(&form).await
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<OAuthToken, OAuthError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .form(form)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<OAuthToken>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(OAuthError::Api { status, body })
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}
