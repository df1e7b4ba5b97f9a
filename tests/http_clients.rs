use bytes::Bytes;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{
        body_json, body_partial_json, body_string, header, header_exists, method, path,
    },
};

use vidream_upload::{
    api::{BunnyStreamClient, ConvexClient},
    credentials::{
        CredentialRequest, CredentialSource, PreparationFailed, PreparationFailure, VideoHost,
    },
    store::{MetadataStore, StoreError},
    upload::{TusClient, TusTransport, UploadError, UploadHeaders, UploadMetadata},
    video::{NewVideo, ProcessingStatus, VideoId, VideoPatch, Visibility},
};

fn upload_headers() -> UploadHeaders {
    UploadHeaders {
        signature: "sig".to_string(),
        expire: 1_700_003_600,
        video_id: "guid-1".to_string(),
        library_id: "4242".to_string(),
    }
}

fn auth_headers(mock: wiremock::MockBuilder) -> wiremock::MockBuilder {
    mock.and(header("Tus-Resumable", "1.0.0"))
        .and(header("AuthorizationSignature", "sig"))
        .and(header("AuthorizationExpire", "1700003600"))
        .and(header("VideoId", "guid-1"))
        .and(header("LibraryId", "4242"))
}

#[tokio::test]
async fn test_tus_create_resolves_relative_location() {
    let server = MockServer::start().await;
    let metadata = UploadMetadata {
        filetype: "video/mp4".to_string(),
        title: "Trip".to_string(),
        name: "trip.mp4".to_string(),
        collection: None,
    };
    auth_headers(Mock::given(method("POST")).and(path("/tusupload")))
        .and(header("Upload-Length", "3000"))
        .and(header_exists("Upload-Metadata"))
        .respond_with(ResponseTemplate::new(201).insert_header("Location", "/tusupload/abc"))
        .expect(1)
        .mount(&server)
        .await;

    let client = TusClient::new(&format!("{}/tusupload", server.uri())).unwrap();
    let location = client
        .create(&upload_headers(), 3000, &metadata)
        .await
        .unwrap();

    assert_eq!(location, format!("{}/tusupload/abc", server.uri()));
}

#[tokio::test]
async fn test_tus_offset_and_patch() {
    let server = MockServer::start().await;
    auth_headers(Mock::given(method("HEAD")).and(path("/tusupload/abc")))
        .respond_with(ResponseTemplate::new(200).insert_header("Upload-Offset", "5"))
        .mount(&server)
        .await;
    auth_headers(Mock::given(method("PATCH")).and(path("/tusupload/abc")))
        .and(header("Upload-Offset", "5"))
        .and(header("Content-Type", "application/offset+octet-stream"))
        .and(body_string("world"))
        .respond_with(ResponseTemplate::new(204).insert_header("Upload-Offset", "10"))
        .expect(1)
        .mount(&server)
        .await;

    let client = TusClient::new(&format!("{}/tusupload", server.uri())).unwrap();
    let location = format!("{}/tusupload/abc", server.uri());

    let offset = client
        .query_offset(&location, &upload_headers())
        .await
        .unwrap();
    assert_eq!(offset, 5);

    let accepted = client
        .patch(&location, &upload_headers(), offset, Bytes::from_static(b"world"))
        .await
        .unwrap();
    assert_eq!(accepted, 10);
}

#[tokio::test]
async fn test_tus_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/tusupload/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/tusupload/busy"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/tusupload/bare"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = TusClient::new(&format!("{}/tusupload", server.uri())).unwrap();

    let gone = client
        .query_offset(&format!("{}/tusupload/gone", server.uri()), &upload_headers())
        .await;
    assert_eq!(gone, Err(UploadError::SessionNotFound));

    let busy = client
        .patch(
            &format!("{}/tusupload/busy", server.uri()),
            &upload_headers(),
            0,
            Bytes::from_static(b"x"),
        )
        .await
        .unwrap_err();
    assert_eq!(
        busy,
        UploadError::Upstream {
            status: 503,
            message: "try later".to_string()
        }
    );
    assert!(busy.is_retryable());

    let bare = client
        .query_offset(&format!("{}/tusupload/bare", server.uri()), &upload_headers())
        .await;
    assert!(matches!(bare, Err(UploadError::Protocol(_))));
}

#[test]
fn test_tus_client_rejects_bad_endpoint() {
    assert!(matches!(
        TusClient::new("not a url"),
        Err(UploadError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_bunny_create_video() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/library/4242/videos"))
        .and(header("AccessKey", "secret"))
        .and(body_json(json!({ "title": "Trip", "collectionId": "col-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "guid": "abc-123" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = BunnyStreamClient::new(server.uri());
    let guid = client
        .create_video("4242", "secret", "Trip", Some("col-1"))
        .await
        .unwrap();
    assert_eq!(guid.as_deref(), Some("abc-123"));
}

#[tokio::test]
async fn test_bunny_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/library/1/videos"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "Message": "Invalid AccessKey" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/library/2/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "title": "Trip" })))
        .mount(&server)
        .await;

    let client = BunnyStreamClient::new(server.uri());

    let rejected = client.create_video("1", "wrong", "Trip", None).await;
    assert_eq!(
        rejected,
        Err(PreparationFailure::Upstream {
            status: 401,
            message: "Invalid AccessKey".to_string()
        })
    );

    let no_guid = client.create_video("2", "secret", "Trip", None).await;
    assert_eq!(no_guid, Ok(None));
}

fn convex(server: &MockServer) -> ConvexClient {
    ConvexClient::new(server.uri(), Some("token-1".to_string()))
}

#[tokio::test]
async fn test_convex_create_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/mutation"))
        .and(header("Authorization", "Bearer token-1"))
        .and(body_json(json!({
            "path": "videos:createVideo",
            "args": {
                "title": "Trip",
                "tags": ["beach"],
                "visibility": "unlisted",
            },
            "format": "json",
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "success", "value": "rec_1" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let id = convex(&server)
        .create_record(NewVideo {
            title: "Trip".to_string(),
            description: None,
            tags: vec!["beach".to_string()],
            visibility: Visibility::Unlisted,
        })
        .await
        .unwrap();
    assert_eq!(id, VideoId::new("rec_1"));
}

#[tokio::test]
async fn test_convex_patch_and_get() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/mutation"))
        .and(body_partial_json(json!({
            "path": "videos:updateVideo",
            "args": { "id": "rec_1", "status": "uploading" },
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "success", "value": { "success": true } })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(body_partial_json(json!({
            "path": "videos:getVideoById",
            "args": { "id": "rec_1" },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "value": {
                "_id": "rec_1",
                "_creationTime": 1700000000000.0,
                "userId": "user_1",
                "title": "Trip",
                "tags": [],
                "visibility": "public",
                "remoteVideoGUID": "guid-1",
                "processingStatus": "uploading",
            },
        })))
        .mount(&server)
        .await;

    let client = convex(&server);
    let id = VideoId::new("rec_1");
    client
        .patch_record(&id, VideoPatch::status(ProcessingStatus::Uploading))
        .await
        .unwrap();

    let record = client.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.user_id, "user_1");
    assert_eq!(record.remote_video_guid.as_deref(), Some("guid-1"));
    assert_eq!(record.processing_status, ProcessingStatus::Uploading);
}

#[tokio::test]
async fn test_convex_error_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(body_partial_json(json!({ "path": "videos:getUserVideos" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "errorMessage": "Unauthenticated call to getUserVideos",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(body_partial_json(json!({ "path": "videos:getVideoById" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "errorMessage": "Video not found",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/mutation"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "nope" })))
        .mount(&server)
        .await;

    let client = convex(&server);
    assert_eq!(
        client.list_for_user().await,
        Err(StoreError::Unauthenticated)
    );

    let id = VideoId::new("rec_9");
    assert_eq!(client.get_by_id(&id).await, Err(StoreError::NotFound(id.clone())));
    assert_eq!(
        client
            .patch_record(&id, VideoPatch::status(ProcessingStatus::Uploading))
            .await,
        Err(StoreError::Forbidden)
    );
}

#[tokio::test]
async fn test_convex_upload_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/action"))
        .and(body_json(json!({
            "path": "bunny:getUploadCredentials",
            "args": { "title": "Trip", "videoId": "rec_1", "collectionId": "col-1" },
            "format": "json",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "value": {
                "remoteVideoGUID": "guid-1",
                "signature": "sig",
                "expires": 1700003600u64,
                "libraryId": "4242",
            },
        })))
        .mount(&server)
        .await;

    let credential = convex(&server)
        .request_upload_credentials(CredentialRequest {
            title: "Trip".to_string(),
            collection_id: Some("col-1".to_string()),
            record_id: VideoId::new("rec_1"),
        })
        .await
        .unwrap();
    assert_eq!(credential.remote_video_guid, "guid-1");
    assert_eq!(credential.expires_at, 1_700_003_600);
    assert_eq!(credential.library_id, "4242");
}

#[tokio::test]
async fn test_convex_credentials_without_guid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/action"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "value": {
                "remoteVideoGUID": "",
                "signature": "sig",
                "expires": 1700003600u64,
                "libraryId": "4242",
            },
        })))
        .mount(&server)
        .await;

    let result = convex(&server)
        .request_upload_credentials(CredentialRequest {
            title: "Trip".to_string(),
            collection_id: None,
            record_id: VideoId::new("rec_1"),
        })
        .await;
    assert_eq!(
        result,
        Err(PreparationFailed(PreparationFailure::MissingVideoGuid))
    );
}

#[tokio::test]
async fn test_convex_credential_backend_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/action"))
        .and(body_partial_json(json!({ "args": { "title": "Broken" } })))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal stack trace"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/action"))
        .and(body_partial_json(json!({ "args": { "title": "Garbled" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "value": { "unexpected": true },
        })))
        .mount(&server)
        .await;

    let request = |title: &str| CredentialRequest {
        title: title.to_string(),
        collection_id: None,
        record_id: VideoId::new("rec_1"),
    };
    let client = convex(&server);

    for title in ["Broken", "Garbled"] {
        let Err(PreparationFailed(failure)) = client.request_upload_credentials(request(title)).await
        else {
            panic!("expected {title} to fail");
        };
        assert!(
            matches!(failure, PreparationFailure::Backend(_)),
            "{title}: {failure:?}"
        );
    }
}
