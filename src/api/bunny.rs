use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    api::{ApiError, check_for_response_success},
    credentials::{PreparationFailure, VideoHost},
};

/// Bunny Stream's management API.
pub struct BunnyStreamClient {
    client: reqwest::Client,
    api_base: String,
}
impl BunnyStreamClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VideoHost for BunnyStreamClient {
    async fn create_video(
        &self,
        library_id: &str,
        api_key: &str,
        title: &str,
        collection_id: Option<&str>,
    ) -> Result<Option<String>, PreparationFailure> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateVideoRequest<'a> {
            title: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            collection_id: Option<&'a str>,
        }

        #[derive(Deserialize)]
        struct CreateVideoResponse {
            #[serde(default)]
            guid: Option<String>,
        }

        let result = async {
            let response = self
                .client
                .post(format!("{}/library/{library_id}/videos", self.api_base))
                .header("AccessKey", api_key)
                .header("Accept", "application/json")
                .json(&CreateVideoRequest {
                    title,
                    collection_id,
                })
                .send()
                .await?;
            let response = check_for_response_success(response, "create video").await?;
            Ok::<_, ApiError>(response.json::<CreateVideoResponse>().await?)
        }
        .await;

        match result {
            Ok(created) => Ok(created.guid),
            Err(ApiError::Http {
                status, message, ..
            }) => Err(PreparationFailure::Upstream { status, message }),
            Err(ApiError::Network(message)) => Err(PreparationFailure::Network(message)),
            // A body we cannot read has no GUID in it
            Err(e @ (ApiError::Decode(_) | ApiError::Function(_))) => {
                tracing::error!("Unreadable create video response: {e}");
                Err(PreparationFailure::MissingVideoGuid)
            }
        }
    }
}
