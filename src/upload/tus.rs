use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use constants::tus::headers;
use reqwest::{RequestBuilder, StatusCode, Url};

use crate::{credentials::UploadCredential, upload::UploadError};

/// The four authorization headers sent with every request of an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHeaders {
    pub signature: String,
    pub expire: u64,
    pub video_id: String,
    pub library_id: String,
}
impl From<&UploadCredential> for UploadHeaders {
    fn from(credential: &UploadCredential) -> Self {
        Self {
            signature: credential.signature.clone(),
            expire: credential.expires_at,
            video_id: credential.remote_video_guid.clone(),
            library_id: credential.library_id.clone(),
        }
    }
}
impl UploadHeaders {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(headers::TUS_RESUMABLE, constants::tus::VERSION)
            .header(headers::AUTHORIZATION_SIGNATURE, &self.signature)
            .header(headers::AUTHORIZATION_EXPIRE, self.expire)
            .header(headers::VIDEO_ID, &self.video_id)
            .header(headers::LIBRARY_ID, &self.library_id)
    }
}

/// Metadata attached to a new upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub filetype: String,
    pub title: String,
    pub name: String,
    pub collection: Option<String>,
}
impl UploadMetadata {
    /// `Upload-Metadata` header value: comma-separated `key base64(value)` pairs.
    pub fn encode(&self) -> String {
        [
            Some(("filetype", self.filetype.as_str())),
            Some(("title", self.title.as_str())),
            Some(("name", self.name.as_str())),
            self.collection.as_deref().map(|c| ("collection", c)),
        ]
        .into_iter()
        .flatten()
        .map(|(key, value)| format!("{key} {}", STANDARD.encode(value)))
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// The resumable upload protocol as seen by the driver.
#[async_trait]
pub trait TusTransport: Send + Sync {
    /// Creates a session for `length` bytes and returns its absolute URL.
    async fn create(
        &self,
        headers: &UploadHeaders,
        length: u64,
        metadata: &UploadMetadata,
    ) -> Result<String, UploadError>;

    /// The offset the server has accepted so far.
    async fn query_offset(&self, location: &str, headers: &UploadHeaders)
    -> Result<u64, UploadError>;

    /// Sends `chunk` starting at `offset` and returns the new accepted offset.
    async fn patch(
        &self,
        location: &str,
        headers: &UploadHeaders,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, UploadError>;
}

/// tus 1.0.0 over HTTPS.
pub struct TusClient {
    client: reqwest::Client,
    endpoint: Url,
}
impl TusClient {
    pub fn new(endpoint: &str) -> Result<Self, UploadError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| UploadError::Protocol(format!("invalid upload endpoint {endpoint}: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }
}

#[async_trait]
impl TusTransport for TusClient {
    async fn create(
        &self,
        headers: &UploadHeaders,
        length: u64,
        metadata: &UploadMetadata,
    ) -> Result<String, UploadError> {
        let response = headers
            .apply(self.client.post(self.endpoint.clone()))
            .header(headers::UPLOAD_LENGTH, length)
            .header(headers::UPLOAD_METADATA, metadata.encode())
            .send()
            .await?;
        let response = check_for_response_success(response).await?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| UploadError::Protocol("no Location header in create response".into()))?;
        let url = self
            .endpoint
            .join(location)
            .map_err(|e| UploadError::Protocol(format!("invalid Location {location}: {e}")))?;
        Ok(url.to_string())
    }

    async fn query_offset(
        &self,
        location: &str,
        headers: &UploadHeaders,
    ) -> Result<u64, UploadError> {
        let response = headers.apply(self.client.head(location)).send().await?;
        let response = check_for_response_success(response).await?;
        upload_offset(&response)
    }

    async fn patch(
        &self,
        location: &str,
        headers: &UploadHeaders,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, UploadError> {
        let response = headers
            .apply(self.client.patch(location))
            .header(headers::UPLOAD_OFFSET, offset)
            .header(
                reqwest::header::CONTENT_TYPE,
                constants::tus::OFFSET_CONTENT_TYPE,
            )
            .body(chunk)
            .send()
            .await?;
        let response = check_for_response_success(response).await?;
        upload_offset(&response)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Network(e.to_string())
    }
}

async fn check_for_response_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, UploadError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(UploadError::SessionNotFound);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match body.trim() {
            "" => status.canonical_reason().unwrap_or("unknown error").to_string(),
            text => text.to_string(),
        };
        return Err(UploadError::Upstream {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

fn upload_offset(response: &reqwest::Response) -> Result<u64, UploadError> {
    response
        .headers()
        .get(headers::UPLOAD_OFFSET)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| UploadError::Protocol("missing or invalid Upload-Offset header".into()))
}
