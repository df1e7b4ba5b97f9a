use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    config::ProviderConfig,
    store::MetadataStore,
    video::{VideoId, VideoPatch},
};

/// A signed, time-boxed authorization for exactly one resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCredential {
    #[serde(rename = "remoteVideoGUID", alias = "videoId")]
    pub remote_video_guid: String,
    pub signature: String,
    /// Unix timestamp after which the video host rejects the signature
    #[serde(rename = "expires")]
    pub expires_at: u64,
    pub library_id: String,
}
impl UploadCredential {
    /// The window includes `expires_at` itself.
    pub fn is_expired_at(&self, now_epoch_secs: u64) -> bool {
        now_epoch_secs > self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub title: String,
    pub collection_id: Option<String>,
    pub record_id: VideoId,
}

/// Why upload credentials could not be prepared. Logged in full server-side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreparationFailure {
    #[error("video hosting is not configured: missing {0}")]
    Configuration(String),
    #[error("video host returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("video host response did not contain a video id")]
    MissingVideoGuid,
    #[error("could not reach video host: {0}")]
    Network(String),
    /// A hosted backend reported a failure without further detail
    #[error("{0}")]
    Remote(String),
    /// The credential backend itself misbehaved; the detail is for logs only
    #[error("credential backend failed: {0}")]
    Backend(String),
}

/// The single error surfaced to callers of [`CredentialSource`]; no partial credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to prepare video upload: {0}")]
pub struct PreparationFailed(#[from] pub PreparationFailure);

/// Hands out upload credentials for a freshly created record.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn request_upload_credentials(
        &self,
        request: CredentialRequest,
    ) -> Result<UploadCredential, PreparationFailed>;
}

/// The video hosting provider's management API.
#[async_trait]
pub trait VideoHost: Send + Sync {
    /// Creates an empty video object and returns its GUID, if the provider sent one.
    async fn create_video(
        &self,
        library_id: &str,
        api_key: &str,
        title: &str,
        collection_id: Option<&str>,
    ) -> Result<Option<String>, PreparationFailure>;
}

/// `sha256(library_id ‖ api_key ‖ expires ‖ video_guid)`, hex encoded.
pub fn sign_upload(library_id: &str, api_key: &str, expires_at: u64, video_guid: &str) -> String {
    sha256::digest(format!("{library_id}{api_key}{expires_at}{video_guid}"))
}

/// Server-side credential issuance: creates the remote video, signs an upload
/// window and links the remote video to the record.
pub struct CredentialIssuer {
    config: ProviderConfig,
    host: Arc<dyn VideoHost>,
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
}
impl CredentialIssuer {
    /// `store` should be a system-scoped store; linking runs without a user identity.
    pub fn new(
        config: ProviderConfig,
        host: Arc<dyn VideoHost>,
        store: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            host,
            store,
            clock,
        }
    }

    async fn prepare(
        &self,
        request: &CredentialRequest,
    ) -> Result<UploadCredential, PreparationFailure> {
        let (library_id, api_key) = self.config.require_credentials()?;

        let remote_video_guid = self
            .host
            .create_video(
                library_id,
                api_key,
                &request.title,
                request.collection_id.as_deref(),
            )
            .await?
            .filter(|guid| !guid.is_empty())
            .ok_or(PreparationFailure::MissingVideoGuid)?;

        let expires_at = self.clock.now_epoch_secs() + constants::SIGNATURE_TTL.as_secs();
        let signature = sign_upload(library_id, api_key, expires_at, &remote_video_guid);

        Ok(UploadCredential {
            remote_video_guid,
            signature,
            expires_at,
            library_id: library_id.to_string(),
        })
    }
}

#[async_trait]
impl CredentialSource for CredentialIssuer {
    async fn request_upload_credentials(
        &self,
        request: CredentialRequest,
    ) -> Result<UploadCredential, PreparationFailed> {
        let credential = match self.prepare(&request).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::error!(
                    "Failed to prepare upload credentials for video {}: {e}",
                    request.record_id
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            "Issued upload credentials for video {} (remote {}, expires {})",
            request.record_id,
            credential.remote_video_guid,
            credential.expires_at
        );

        // Bookkeeping only: the credentials stay usable even if linking fails
        if let Err(e) = self
            .store
            .patch_record(
                &request.record_id,
                VideoPatch::link_remote(&credential.library_id, &credential.remote_video_guid),
            )
            .await
        {
            tracing::error!(
                "Failed to link remote video {} to record {}: {e}",
                credential.remote_video_guid,
                request.record_id
            );
        }

        Ok(credential)
    }
}
