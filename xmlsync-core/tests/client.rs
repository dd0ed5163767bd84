use serde_json::json;
use wiremock::matchers::{body_bytes, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xmlsync_core::{DriveClient, DriveError, FileMetadata, folder_query};

#[tokio::test]
async fn find_folders_sends_exact_name_query_with_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param("q", folder_query("Uploads_XML").as_str()))
        .and(query_param("spaces", "drive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                {
                    "id": "folder-1",
                    "name": "Uploads_XML",
                    "mimeType": "application/vnd.google-apps.folder"
                },
                {
                    "id": "folder-2",
                    "name": "Uploads_XML",
                    "mimeType": "application/vnd.google-apps.folder"
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let folders = client.find_folders("Uploads_XML").await.unwrap();

    assert_eq!(folders.len(), 2);
    assert_eq!(folders[0].id, "folder-1");
    assert!(folders[0].is_folder());
}

#[tokio::test]
async fn list_files_all_follows_page_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [{ "id": "b", "name": "b.xml" }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nextPageToken": "page-2",
            "files": [{ "id": "a", "name": "a.xml" }]
        })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let files = client.list_files_all("trashed = false").await.unwrap();

    let ids: Vec<_> = files.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn find_folders_collects_every_page() {
    let server = MockServer::start().await;
    let query = folder_query("Uploads_XML");

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", query.as_str()))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [{
                "id": "folder-2",
                "name": "Uploads_XML",
                "mimeType": "application/vnd.google-apps.folder"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", query.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nextPageToken": "page-2",
            "files": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let folders = client.find_folders("Uploads_XML").await.unwrap();

    let ids: Vec<_> = folders.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["folder-2"]);
}

#[tokio::test]
async fn create_folder_posts_folder_metadata() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "name": "Uploads_XML",
            "mimeType": "application/vnd.google-apps.folder"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "new-folder",
            "name": "Uploads_XML",
            "mimeType": "application/vnd.google-apps.folder"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let folder = client.create_folder("Uploads_XML", None).await.unwrap();

    assert_eq!(folder.id, "new-folder");
    assert!(folder.parents.is_empty());
}

#[tokio::test]
async fn create_file_resumable_opens_session_then_puts_content() {
    let server = MockServer::start().await;
    let session_uri = format!("{}/upload-session/42", server.uri());

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "resumable"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("x-upload-content-type", "application/xml"))
        .and(header("x-upload-content-length", "7"))
        .and(body_partial_json(json!({
            "name": "a.xml",
            "parents": ["folder-1"]
        })))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", session_uri.as_str()))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload-session/42"))
        .and(header("content-type", "application/xml"))
        .and(body_bytes(b"<a></a>".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-1",
            "name": "a.xml",
            "parents": ["folder-1"],
            "md5Checksum": "d41d8cd98f00b204e9800998ecf8427e"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let file = client
        .create_file_resumable(
            &FileMetadata::in_folder("a.xml", "folder-1"),
            "application/xml",
            b"<a></a>".to_vec(),
        )
        .await
        .unwrap();

    assert_eq!(file.id, "file-1");
    assert_eq!(
        file.md5_checksum.as_deref(),
        Some("d41d8cd98f00b204e9800998ecf8427e")
    );
}

#[tokio::test]
async fn create_file_resumable_requires_session_location() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .create_file_resumable(
            &FileMetadata::in_folder("a.xml", "folder-1"),
            "application/xml",
            b"x".to_vec(),
        )
        .await
        .expect_err("expected missing session error");

    assert!(matches!(err, DriveError::MissingUploadSession));
}

#[tokio::test]
async fn api_errors_carry_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .find_folders("Uploads_XML")
        .await
        .expect_err("expected api error");

    match &err {
        DriveError::Api { status, body } => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(body, "backend unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn with_token_switches_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "first").unwrap();
    let folders = client
        .with_token("second")
        .find_folders("Uploads_XML")
        .await
        .unwrap();

    assert!(folders.is_empty());
}
