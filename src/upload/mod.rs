use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    credentials::{CredentialRequest, CredentialSource, PreparationFailed, PreparationFailure},
    store::{MetadataStore, StoreError},
    video::{ProcessingStatus, VideoId},
};

mod driver;
pub use driver::*;

mod form;
pub use form::*;

mod progress_sender;
pub use progress_sender::*;

mod reconciler;
pub use reconciler::*;

mod resume;
pub use resume::*;

mod source;
pub use source::*;

mod tus;
pub use tus::*;

/// Why a submission did not complete. `Display` is the message shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Please fix the highlighted fields: {0}")]
    Validation(FieldErrors),
    #[error("An upload is already in progress")]
    SubmissionInFlight,
    #[error("Please sign in to upload videos")]
    Unauthenticated,
    #[error("You do not have permission to change this video")]
    Forbidden,
    #[error("Video {0} was not found")]
    NotFound(VideoId),
    #[error(
        "Video uploads are temporarily unavailable. Please try again later or contact support."
    )]
    Configuration,
    #[error("{0}")]
    Upstream(String),
    #[error("Failed to prepare the video upload. Please try again or contact support.")]
    PreparationFailed,
    #[error("The upload window has expired. Please submit the video again.")]
    CredentialExpired,
    #[error("Could not read the selected file: {0}")]
    SourceUnavailable(String),
    #[error("Upload cancelled. You can resume it later.")]
    Cancelled,
    #[error("Upload failed: {0}")]
    Upload(UploadError),
    #[error("There is no interrupted upload for video {0}")]
    NothingToResume(VideoId),
    #[error("Failed to save video details: {0}")]
    Store(StoreError),
}
impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unauthenticated => PipelineError::Unauthenticated,
            StoreError::Forbidden => PipelineError::Forbidden,
            StoreError::NotFound(id) => PipelineError::NotFound(id),
            other => PipelineError::Store(other),
        }
    }
}
impl From<PreparationFailed> for PipelineError {
    fn from(PreparationFailed(failure): PreparationFailed) -> Self {
        match failure {
            PreparationFailure::Configuration(_) => PipelineError::Configuration,
            PreparationFailure::Upstream { message, .. } | PreparationFailure::Remote(message) => {
                PipelineError::Upstream(message)
            }
            PreparationFailure::MissingVideoGuid
            | PreparationFailure::Network(_)
            | PreparationFailure::Backend(_) => PipelineError::PreparationFailed,
        }
    }
}
impl From<UploadError> for PipelineError {
    fn from(e: UploadError) -> Self {
        match e.root() {
            UploadError::CredentialExpired { .. } => PipelineError::CredentialExpired,
            UploadError::SourceUnavailable(message) => {
                PipelineError::SourceUnavailable(message.clone())
            }
            UploadError::Cancelled => PipelineError::Cancelled,
            _ => PipelineError::Upload(e),
        }
    }
}

/// A transfer that the video host acknowledged in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub record_id: VideoId,
    pub remote_video_guid: String,
}

/// Form submission through record creation, credential exchange, transfer and status reconciliation.
pub struct UploadPipeline {
    store: Arc<dyn MetadataStore>,
    credentials: Arc<dyn CredentialSource>,
    driver: ResumableUpload,
    collection_id: Option<String>,
    updates: broadcast::Sender<UploadUpdate>,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        credentials: Arc<dyn CredentialSource>,
        driver: ResumableUpload,
        collection_id: Option<String>,
    ) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            store,
            credentials,
            driver,
            collection_id,
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadUpdate> {
        self.updates.subscribe()
    }

    pub async fn submit(
        &self,
        form: &mut UploadForm,
        cancel: CancellationToken,
    ) -> Result<SubmitOutcome, PipelineError> {
        if !form.can_submit() {
            return Err(PipelineError::SubmissionInFlight);
        }
        let upload = match form.validate() {
            Ok(upload) => upload,
            Err(errors) => {
                form.set_field_errors(errors.clone());
                return Err(PipelineError::Validation(errors));
            }
        };
        if !form.begin_submission() {
            return Err(PipelineError::SubmissionInFlight);
        }

        let (session, bytes) = match self.prepare(upload).await {
            Ok(prepared) => prepared,
            Err(e) => {
                form.fail(e.to_string());
                return Err(e);
            }
        };

        self.transfer(session, ByteSource::InMemory(bytes), form, cancel)
            .await
    }

    /// Continues an interrupted upload of `record_id` with its stored credentials.
    pub async fn resume(
        &self,
        record_id: &VideoId,
        file: PickedFile,
        form: &mut UploadForm,
        cancel: CancellationToken,
    ) -> Result<SubmitOutcome, PipelineError> {
        if !form.begin_submission() {
            return Err(PipelineError::SubmissionInFlight);
        }

        let session = match self.resumable_session(record_id, &file).await {
            Ok(session) => session,
            Err(e) => {
                form.fail(e.to_string());
                return Err(e);
            }
        };

        self.transfer(session, file.source, form, cancel).await
    }

    async fn prepare(&self, upload: ValidatedUpload) -> Result<(UploadSession, Bytes), PipelineError> {
        let ValidatedUpload { video, file } = upload;

        // Read the file before anything is created remotely
        let bytes = file.source.materialize().await?;

        let title = video.title.clone();
        let record_id = self.store.create_record(video).await?;
        tracing::info!("Created video {record_id}, requesting upload credentials");

        let credential = self
            .credentials
            .request_upload_credentials(CredentialRequest {
                title: title.clone(),
                collection_id: self.collection_id.clone(),
                record_id: record_id.clone(),
            })
            .await
            .inspect_err(|e| {
                tracing::error!("Could not get upload credentials for video {record_id}: {e}");
            })?;
        self.publish(UploadUpdate::Status(ProcessingStatus::CredentialsGenerated));

        let metadata = self.metadata_for(&file, title);
        Ok((
            UploadSession {
                record_id,
                credential,
                metadata,
            },
            bytes,
        ))
    }

    async fn resumable_session(
        &self,
        record_id: &VideoId,
        file: &PickedFile,
    ) -> Result<UploadSession, PipelineError> {
        let record = self
            .store
            .get_by_id(record_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(record_id.clone()))?;
        if !matches!(
            record.processing_status,
            ProcessingStatus::CredentialsGenerated | ProcessingStatus::Uploading
        ) {
            tracing::warn!(
                "Video {record_id} is {}, not resuming",
                record.processing_status
            );
            return Err(PipelineError::NothingToResume(record_id.clone()));
        }

        let entry = self
            .driver
            .resume_store()
            .find_by_record(record_id)
            .ok_or_else(|| PipelineError::NothingToResume(record_id.clone()))?;

        Ok(UploadSession {
            record_id: record_id.clone(),
            metadata: self.metadata_for(file, record.title),
            credential: entry.credential,
        })
    }

    fn metadata_for(&self, file: &PickedFile, title: String) -> UploadMetadata {
        let filetype = file
            .mime_type
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .or_else(|| mime_type_for(&file.name))
            .unwrap_or("application/octet-stream")
            .to_string();
        UploadMetadata {
            filetype,
            title,
            name: file.name.clone(),
            collection: self.collection_id.clone(),
        }
    }

    /// Runs the driver and reconciles each of its events as it arrives.
    async fn transfer(
        &self,
        session: UploadSession,
        source: ByteSource,
        form: &mut UploadForm,
        cancel: CancellationToken,
    ) -> Result<SubmitOutcome, PipelineError> {
        let reconciler = StatusReconciler::new(
            self.store.clone(),
            session.record_id.clone(),
            self.updates.clone(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let reconcile = async {
            while let Some(event) = rx.recv().await {
                reconciler.apply(&event, form).await;
                if event.is_terminal() {
                    break;
                }
            }
        };
        let (result, ()) = tokio::join!(self.driver.run(&session, &source, tx, cancel), reconcile);

        result.map_err(PipelineError::from)?;
        Ok(SubmitOutcome {
            record_id: session.record_id,
            remote_video_guid: session.credential.remote_video_guid,
        })
    }

    fn publish(&self, update: UploadUpdate) {
        self.updates.send(update).ok();
    }
}
