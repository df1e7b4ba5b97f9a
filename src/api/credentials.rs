use async_trait::async_trait;

use crate::{
    api::{ApiError, ConvexClient, FunctionKind},
    credentials::{
        CredentialRequest, CredentialSource, PreparationFailed, PreparationFailure,
        UploadCredential,
    },
};

#[async_trait]
impl CredentialSource for ConvexClient {
    async fn request_upload_credentials(
        &self,
        request: CredentialRequest,
    ) -> Result<UploadCredential, PreparationFailed> {
        let mut args = serde_json::json!({
            "title": request.title,
            "videoId": request.record_id,
        });
        if let Some(collection_id) = &request.collection_id {
            args["collectionId"] = serde_json::json!(collection_id);
        }

        let credential: UploadCredential = self
            .call(
                FunctionKind::Action,
                constants::convex::UPLOAD_CREDENTIALS,
                args,
            )
            .await
            .map_err(|e| match e {
                ApiError::Network(message) => PreparationFailure::Network(message),
                ApiError::Function(message) => PreparationFailure::Remote(message),
                other @ (ApiError::Http { .. } | ApiError::Decode(_)) => {
                    tracing::error!("Upload credential request failed: {other}");
                    PreparationFailure::Backend(other.to_string())
                }
            })?;

        if credential.remote_video_guid.is_empty() {
            return Err(PreparationFailure::MissingVideoGuid.into());
        }
        Ok(credential)
    }
}
