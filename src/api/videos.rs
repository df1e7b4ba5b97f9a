use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::{
    api::{ApiError, ConvexClient, FunctionKind},
    store::{MetadataStore, StoreError},
    video::{NewVideo, VideoId, VideoPatch, VideoRecord},
};

/// Translates a failed backend call into the store's error kinds.
fn store_error(error: ApiError, id: Option<&VideoId>) -> StoreError {
    let message = match &error {
        ApiError::Http { status: 401, .. } => return StoreError::Unauthenticated,
        ApiError::Http { status: 403, .. } => return StoreError::Forbidden,
        ApiError::Http { message, .. } | ApiError::Function(message) => message.to_lowercase(),
        ApiError::Network(_) | ApiError::Decode(_) => return StoreError::Backend(error.to_string()),
    };

    if message.contains("unauthenticated") || message.contains("not authenticated") {
        StoreError::Unauthenticated
    } else if message.contains("forbidden") || message.contains("unauthorized") {
        StoreError::Forbidden
    } else if let Some(id) = id.filter(|_| message.contains("not found")) {
        StoreError::NotFound(id.clone())
    } else {
        StoreError::Backend(error.to_string())
    }
}

#[async_trait]
impl MetadataStore for ConvexClient {
    async fn create_record(&self, video: NewVideo) -> Result<VideoId, StoreError> {
        let args = serde_json::to_value(&video)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let id: VideoId = self
            .call(FunctionKind::Mutation, constants::convex::CREATE_VIDEO, args)
            .await
            .map_err(|e| store_error(e, None))?;
        tracing::info!("Created video record {id}");
        Ok(id)
    }

    async fn patch_record(&self, id: &VideoId, patch: VideoPatch) -> Result<(), StoreError> {
        #[derive(Deserialize)]
        struct PatchResponse {
            success: bool,
        }

        let mut args = serde_json::to_value(&patch)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        if let Some(fields) = args.as_object_mut() {
            fields.insert("id".to_string(), json!(id));
        }

        let response: PatchResponse = self
            .call(FunctionKind::Mutation, constants::convex::UPDATE_VIDEO, args)
            .await
            .map_err(|e| store_error(e, Some(id)))?;
        if !response.success {
            return Err(StoreError::Backend(format!("update of video {id} was not applied")));
        }
        Ok(())
    }

    async fn list_for_user(&self) -> Result<Vec<VideoRecord>, StoreError> {
        self.call(
            FunctionKind::Query,
            constants::convex::LIST_USER_VIDEOS,
            json!({}),
        )
        .await
        .map_err(|e| store_error(e, None))
    }

    async fn get_by_id(&self, id: &VideoId) -> Result<Option<VideoRecord>, StoreError> {
        self.call(
            FunctionKind::Query,
            constants::convex::GET_VIDEO,
            json!({ "id": id }),
        )
        .await
        .map_err(|e| store_error(e, Some(id)))
    }
}
