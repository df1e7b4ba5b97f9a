use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{
    store::MetadataStore,
    upload::{PipelineError, ProgressData, UploadEvent, UploadForm},
    video::{ProcessingStatus, VideoId, VideoPatch},
};

/// Published to observers of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadUpdate {
    /// `None` means no upload is in progress
    Progress(Option<ProgressData>),
    Status(ProcessingStatus),
}

/// Maps driver events onto record status, form state and observer updates.
pub struct StatusReconciler {
    store: Arc<dyn MetadataStore>,
    record_id: VideoId,
    updates: broadcast::Sender<UploadUpdate>,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        record_id: VideoId,
        updates: broadcast::Sender<UploadUpdate>,
    ) -> Self {
        Self {
            store,
            record_id,
            updates,
        }
    }

    pub async fn apply(&self, event: &UploadEvent, form: &mut UploadForm) {
        match event {
            UploadEvent::Started { .. } => {
                self.patch_status(ProcessingStatus::Uploading).await;
            }
            UploadEvent::Progress(data) => {
                form.set_progress(Some(data.clone()));
                self.publish(UploadUpdate::Progress(Some(data.clone())));
            }
            UploadEvent::Succeeded => {
                self.patch_status(ProcessingStatus::Processing).await;
                form.end_submission();
                form.reset();
                self.publish(UploadUpdate::Progress(None));
            }
            UploadEvent::Failed(error) => {
                self.patch_status(ProcessingStatus::FailedUpload).await;
                form.fail(PipelineError::from(error.clone()).to_string());
                self.publish(UploadUpdate::Progress(None));
            }
            UploadEvent::Cancelled => {
                // Stays `uploading` so the session can be resumed
                form.fail(PipelineError::Cancelled.to_string());
                self.publish(UploadUpdate::Progress(None));
            }
        }
    }

    /// Best effort: a failed status write is logged, never raised.
    async fn patch_status(&self, status: ProcessingStatus) {
        match self
            .store
            .patch_record(&self.record_id, VideoPatch::status(status))
            .await
        {
            Ok(()) => self.publish(UploadUpdate::Status(status)),
            Err(e) => {
                tracing::error!(
                    "Failed to set status of video {} to {status}: {e}",
                    self.record_id
                );
            }
        }
    }

    fn publish(&self, update: UploadUpdate) {
        // No subscribers is fine
        self.updates.send(update).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::Identity,
        store::MemoryStore,
        upload::UploadError,
        video::{NewVideo, Visibility},
    };

    async fn linked_record(store: &MemoryStore) -> VideoId {
        let id = store
            .as_user(Identity::new("alice"))
            .create_record(NewVideo {
                title: "clip".to_string(),
                description: None,
                tags: vec![],
                visibility: Visibility::Public,
            })
            .await
            .unwrap();
        store
            .as_system()
            .patch_record(&id, VideoPatch::link_remote("1", "guid"))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_failure_patches_and_releases_lock() {
        let store = MemoryStore::new();
        let id = linked_record(&store).await;
        let (tx, mut rx) = broadcast::channel(16);
        let reconciler =
            StatusReconciler::new(Arc::new(store.as_user(Identity::new("alice"))), id.clone(), tx);

        let mut form = UploadForm::new();
        assert!(form.begin_submission());
        reconciler
            .apply(&UploadEvent::Started { total_bytes: Some(10) }, &mut form)
            .await;
        reconciler
            .apply(
                &UploadEvent::Failed(UploadError::Upstream {
                    status: 400,
                    message: "bad offset".to_string(),
                }),
                &mut form,
            )
            .await;

        assert_eq!(
            store.status_history(&id),
            vec![
                ProcessingStatus::PendingUpload,
                ProcessingStatus::CredentialsGenerated,
                ProcessingStatus::Uploading,
                ProcessingStatus::FailedUpload,
            ]
        );
        assert!(form.can_submit());
        assert!(form.error_banner().unwrap().contains("bad offset"));
        assert!(form.progress().is_none());

        assert_eq!(
            rx.recv().await.unwrap(),
            UploadUpdate::Status(ProcessingStatus::Uploading)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            UploadUpdate::Status(ProcessingStatus::FailedUpload)
        );
        assert_eq!(rx.recv().await.unwrap(), UploadUpdate::Progress(None));
    }

    #[tokio::test]
    async fn test_cancel_leaves_record_uploading() {
        let store = MemoryStore::new();
        let id = linked_record(&store).await;
        let (tx, _) = broadcast::channel(16);
        let reconciler = StatusReconciler::new(Arc::new(store.as_system()), id.clone(), tx);

        let mut form = UploadForm::new();
        form.title = "clip".to_string();
        assert!(form.begin_submission());
        reconciler
            .apply(&UploadEvent::Started { total_bytes: None }, &mut form)
            .await;
        reconciler.apply(&UploadEvent::Cancelled, &mut form).await;

        assert_eq!(
            store.record(&id).unwrap().processing_status,
            ProcessingStatus::Uploading
        );
        assert!(form.can_submit());
        // Cancelling keeps what the user typed
        assert_eq!(form.title, "clip");
    }
}
