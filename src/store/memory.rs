use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    identity::{Caller, Identity},
    store::{MetadataStore, StoreError},
    video::{NewVideo, ProcessingStatus, VideoId, VideoPatch, VideoRecord, Visibility},
};

/// In-process metadata store, optionally persisted to a JSON file.
///
/// Cloning shares the underlying records. Use [`MemoryStore::as_caller`] to get
/// a [`MetadataStore`] scoped to one caller.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Records in creation order
    records: Vec<VideoRecord>,
    /// Every status each record has been in, in order
    history: HashMap<VideoId, Vec<ProcessingStatus>>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by `path`, loading any records already saved there.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let records: Vec<VideoRecord> = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                StoreError::Backend(format!("failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&contents).map_err(|e| {
                StoreError::Backend(format!("failed to parse {}: {e}", path.display()))
            })?
        } else {
            Vec::new()
        };
        tracing::debug!("Loaded {} video records from {}", records.len(), path.display());

        let history = records
            .iter()
            .map(|r| (r.id.clone(), vec![r.processing_status]))
            .collect();

        Ok(Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                records,
                history,
                path: Some(path.to_path_buf()),
            })),
        })
    }

    pub fn as_caller(&self, caller: Caller) -> StoreHandle {
        StoreHandle {
            store: self.clone(),
            caller,
        }
    }

    pub fn as_user(&self, identity: Identity) -> StoreHandle {
        self.as_caller(Caller::User(identity))
    }

    /// A handle for trusted server-side actions, which may patch any record.
    pub fn as_system(&self) -> StoreHandle {
        self.as_caller(Caller::System)
    }

    /// Reads a record without any access check.
    pub fn record(&self, id: &VideoId) -> Option<VideoRecord> {
        let inner = self.inner.lock().unwrap();
        inner.records.iter().find(|r| &r.id == id).cloned()
    }

    /// Every status the record has been observed in, oldest first.
    pub fn status_history(&self, id: &VideoId) -> Vec<ProcessingStatus> {
        let inner = self.inner.lock().unwrap();
        inner.history.get(id).cloned().unwrap_or_default()
    }

    /// Every record, oldest first, without any access check.
    pub fn records(&self) -> Vec<VideoRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryStoreInner {
    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(&self.records)
            .map_err(|e| StoreError::Backend(format!("failed to serialize records: {e}")))?;
        std::fs::write(path, contents)
            .map_err(|e| StoreError::Backend(format!("failed to write {}: {e}", path.display())))
    }
}

/// A [`MemoryStore`] seen through the eyes of one caller.
#[derive(Clone)]
pub struct StoreHandle {
    store: MemoryStore,
    caller: Caller,
}
impl StoreHandle {
    pub fn caller(&self) -> &Caller {
        &self.caller
    }
}

#[async_trait]
impl MetadataStore for StoreHandle {
    async fn create_record(&self, video: NewVideo) -> Result<VideoId, StoreError> {
        let Some(identity) = self.caller.identity() else {
            return Err(StoreError::Unauthenticated);
        };

        let title = video.title.trim();
        if title.is_empty() {
            return Err(StoreError::Validation("title is required".to_string()));
        }

        let record = VideoRecord {
            id: VideoId::generate(),
            creation_time: chrono::Utc::now().timestamp_millis() as f64,
            user_id: identity.subject.clone(),
            title: title.to_string(),
            description: video.description.filter(|d| !d.trim().is_empty()),
            tags: video.tags,
            visibility: video.visibility,
            remote_library_id: None,
            remote_video_guid: None,
            processing_status: ProcessingStatus::PendingUpload,
            playback_url: None,
            thumbnail_url: None,
            duration: None,
            external_entity_id: None,
            external_entity_short_id: None,
            external_foreign_id: None,
        };
        let id = record.id.clone();

        let mut inner = self.store.inner.lock().unwrap();
        inner.records.push(record);
        if let Err(e) = inner.save() {
            inner.records.pop();
            return Err(e);
        }
        inner
            .history
            .insert(id.clone(), vec![ProcessingStatus::PendingUpload]);

        tracing::info!("Created video record {id} for user {}", identity.subject);
        Ok(id)
    }

    async fn patch_record(&self, id: &VideoId, patch: VideoPatch) -> Result<(), StoreError> {
        let mut inner = self.store.inner.lock().unwrap();
        let index = inner
            .records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut record = inner.records[index].clone();

        match &self.caller {
            Caller::User(identity) if identity.subject != record.user_id => {
                return Err(StoreError::Forbidden);
            }
            Caller::User(_) | Caller::System => {}
            Caller::Anonymous => return Err(StoreError::Unauthenticated),
        }

        let current = record.processing_status;
        let next = patch.status.unwrap_or(current);
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: id.clone(),
                from: current,
                to: next,
            });
        }

        // The remote video is linked exactly once, on pending_upload -> credentials_generated
        if let Some(guid) = &patch.remote_video_guid {
            match &record.remote_video_guid {
                Some(existing) if existing != guid => {
                    return Err(StoreError::RemoteAlreadyLinked(id.clone()));
                }
                Some(_) => {}
                None if current != ProcessingStatus::PendingUpload
                    || next != ProcessingStatus::CredentialsGenerated =>
                {
                    return Err(StoreError::Validation(
                        "a remote video can only be linked while moving from pending_upload to credentials_generated"
                            .to_string(),
                    ));
                }
                None => {}
            }
        }
        if next != current
            && next == ProcessingStatus::CredentialsGenerated
            && record.remote_video_guid.is_none()
            && patch.remote_video_guid.is_none()
        {
            return Err(StoreError::Validation(
                "credentials_generated requires a linked remote video".to_string(),
            ));
        }

        let VideoPatch {
            status: _,
            remote_library_id,
            remote_video_guid,
            playback_url,
            thumbnail_url,
            duration,
            external_entity_id,
            external_entity_short_id,
            external_foreign_id,
        } = patch;

        write_once(id, "external_entity_id", &mut record.external_entity_id, external_entity_id)?;
        write_once(
            id,
            "external_entity_short_id",
            &mut record.external_entity_short_id,
            external_entity_short_id,
        )?;
        write_once(id, "external_foreign_id", &mut record.external_foreign_id, external_foreign_id)?;

        record.processing_status = next;
        if remote_library_id.is_some() {
            record.remote_library_id = remote_library_id;
        }
        if remote_video_guid.is_some() {
            record.remote_video_guid = remote_video_guid;
        }
        if playback_url.is_some() {
            record.playback_url = playback_url;
        }
        if thumbnail_url.is_some() {
            record.thumbnail_url = thumbnail_url;
        }
        if duration.is_some() {
            record.duration = duration;
        }

        let previous = std::mem::replace(&mut inner.records[index], record);
        if let Err(e) = inner.save() {
            inner.records[index] = previous;
            return Err(e);
        }

        if next != current {
            tracing::info!("Video {id}: {current} -> {next}");
            inner.history.entry(id.clone()).or_default().push(next);
        }
        Ok(())
    }

    async fn list_for_user(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let Some(identity) = self.caller.identity() else {
            return Err(StoreError::Unauthenticated);
        };
        let inner = self.store.inner.lock().unwrap();
        Ok(inner
            .records
            .iter()
            .rev()
            .filter(|r| r.user_id == identity.subject)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: &VideoId) -> Result<Option<VideoRecord>, StoreError> {
        let inner = self.store.inner.lock().unwrap();
        let Some(record) = inner.records.iter().find(|r| &r.id == id) else {
            return Ok(None);
        };

        let visible = match &self.caller {
            Caller::System => true,
            Caller::User(identity) if identity.subject == record.user_id => true,
            Caller::User(_) | Caller::Anonymous => record.visibility != Visibility::Private,
        };
        Ok(visible.then(|| record.clone()))
    }
}

/// Sets an external id that may only ever hold one value.
fn write_once(
    id: &VideoId,
    field: &'static str,
    slot: &mut Option<String>,
    value: Option<String>,
) -> Result<(), StoreError> {
    let Some(value) = value else {
        return Ok(());
    };
    match slot {
        Some(existing) if *existing != value => {
            Err(StoreError::ExternalIdAlreadySet { id: id.clone(), field })
        }
        _ => {
            *slot = Some(value);
            Ok(())
        }
    }
}
