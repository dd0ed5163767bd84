mod client;
mod oauth;

pub use client::{
    ApiErrorClass, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE, FileList, FileMetadata,
    folder_query,
};
pub use oauth::{ClientSecrets, DRIVE_FILE_SCOPE, OAuthClient, OAuthError, OAuthToken};
pub use reqwest::StatusCode;
