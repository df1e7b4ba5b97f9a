use async_trait::async_trait;

use crate::video::{NewVideo, ProcessingStatus, VideoId, VideoPatch, VideoRecord};

mod memory;
pub use memory::*;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("unauthenticated: sign in to continue")]
    Unauthenticated,
    #[error("forbidden: video belongs to another user")]
    Forbidden,
    #[error("video {0} not found")]
    NotFound(VideoId),
    #[error("invalid video: {0}")]
    Validation(String),
    #[error("video {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: VideoId,
        from: ProcessingStatus,
        to: ProcessingStatus,
    },
    #[error("video {0} is already linked to a remote video")]
    RemoteAlreadyLinked(VideoId),
    #[error("video {id} already has a different {field}")]
    ExternalIdAlreadySet { id: VideoId, field: &'static str },
    #[error("metadata backend error: {0}")]
    Backend(String),
}

/// The metadata store holding video records.
///
/// A store value is always scoped to one caller; ownership and authentication
/// checks are made against that caller.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persists a new record in `pending_upload` and returns its id.
    async fn create_record(&self, video: NewVideo) -> Result<VideoId, StoreError>;

    /// Applies a partial update.
    async fn patch_record(&self, id: &VideoId, patch: VideoPatch) -> Result<(), StoreError>;

    /// All records owned by the caller, newest first.
    async fn list_for_user(&self) -> Result<Vec<VideoRecord>, StoreError>;

    async fn get_by_id(&self, id: &VideoId) -> Result<Option<VideoRecord>, StoreError>;
}
