use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id,name,mimeType,parents,md5Checksum,size";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,parents)";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("resumable upload session was not returned")]
    MissingUploadSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Same endpoint and connection pool, different bearer token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: token.into(),
        }
    }

    pub async fn list_files(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", query)
                .append_pair("spaces", "drive")
                .append_pair("fields", LIST_FIELDS);
            if let Some(page_token) = page_token {
                pairs.append_pair("pageToken", page_token);
            }
        }
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_files_all(&self, query: &str) -> Result<Vec<DriveFile>, DriveError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_files(query, page_token.as_deref()).await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    /// Non-trashed folders whose name is exactly `name`, in service order.
    pub async fn find_folders(&self, name: &str) -> Result<Vec<DriveFile>, DriveError> {
        self.list_files_all(&folder_query(name)).await
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);
        let metadata = FileMetadata {
            name: name.to_string(),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: parent_id.map(|id| vec![id.to_string()]).unwrap_or_default(),
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&metadata)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Creates a file with the two-step resumable protocol: open a session
    /// with the metadata, then send the whole body to the session URI.
    pub async fn create_file_resumable(
        &self,
        metadata: &FileMetadata,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<DriveFile, DriveError> {
        let session = self
            .start_resumable_session(metadata, content_type, content.len())
            .await?;
        let response = self
            .http
            .put(session)
            .header(CONTENT_TYPE, content_type)
            .body(content)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn start_resumable_session(
        &self,
        metadata: &FileMetadata,
        content_type: &str,
        content_length: usize,
    ) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", FILE_FIELDS);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header("X-Upload-Content-Type", content_type)
            .header("X-Upload-Content-Length", content_length.to_string())
            .json(metadata)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api { status, body });
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(DriveError::MissingUploadSession)?;
        Ok(Url::parse(location)?)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

/// Drive search query for a non-trashed folder with an exact name.
pub fn folder_query(name: &str) -> String {
    format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        escape_query_value(name),
        FOLDER_MIME_TYPE
    )
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, body } => Some(classify_api_status(*status, body)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DriveError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode, body: &str) -> ApiErrorClass {
    // Drive reports quota exhaustion as 403 with a rate-limit reason.
    if status == StatusCode::FORBIDDEN
        && (body.contains("rateLimitExceeded") || body.contains("RateLimitExceeded"))
    {
        ApiErrorClass::RateLimit
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl FileMetadata {
    pub fn in_folder(name: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            parents: vec![folder_id.into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_query_escapes_quotes_and_backslashes() {
        assert_eq!(
            folder_query(r"Joe's\XML"),
            r"name = 'Joe\'s\\XML' and mimeType = 'application/vnd.google-apps.folder' and trashed = false"
        );
    }

    #[test]
    fn forbidden_rate_limit_is_retryable() {
        let err = DriveError::Api {
            status: StatusCode::FORBIDDEN,
            body: r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#.into(),
        };
        assert_eq!(err.classification(), Some(ApiErrorClass::RateLimit));
        assert!(err.is_retryable());

        let denied = DriveError::Api {
            status: StatusCode::FORBIDDEN,
            body: "insufficientPermissions".into(),
        };
        assert_eq!(denied.classification(), Some(ApiErrorClass::Auth));
        assert!(!denied.is_retryable());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = DriveError::Api {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
        assert!(!DriveError::MissingUploadSession.is_retryable());
    }
}
