use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use color_eyre::eyre::{self, Context as _};
use serde::{Deserialize, Serialize};

use crate::{credentials::UploadCredential, video::VideoId};

/// Everything needed to pick an interrupted upload back up.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ResumeEntry {
    pub record_id: VideoId,
    /// Absolute URL of the upload session on the video host
    pub upload_url: String,
    pub total_bytes: u64,
    /// Last offset the video host acknowledged
    pub accepted_offset: u64,
    pub credential: UploadCredential,
}

/// Interrupted uploads keyed by remote video GUID, optionally persisted to a JSON file.
#[derive(Debug, Default)]
pub struct ResumeStore {
    entries: Mutex<BTreeMap<String, ResumeEntry>>,
    path: Option<PathBuf>,
}

impl ResumeStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load progress state from a file, starting empty if it does not exist yet
    pub fn open(path: &Path) -> eyre::Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self, video_guid: &str) -> Option<ResumeEntry> {
        self.entries.lock().unwrap().get(video_guid).cloned()
    }

    pub fn find_by_record(&self, record_id: &VideoId) -> Option<ResumeEntry> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .find(|e| &e.record_id == record_id)
            .cloned()
    }

    pub fn upsert(&self, entry: ResumeEntry) -> eyre::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(entry.credential.remote_video_guid.clone(), entry);
        self.save(&entries)
    }

    /// Records a newly acknowledged offset. Unknown GUIDs are ignored.
    pub fn record_offset(&self, video_guid: &str, offset: u64) -> eyre::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(video_guid) else {
            return Ok(());
        };
        entry.accepted_offset = entry.accepted_offset.max(offset);
        self.save(&entries)
    }

    pub fn remove(&self, video_guid: &str) -> eyre::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(video_guid).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }

    fn save(&self, entries: &BTreeMap<String, ResumeEntry>) -> eyre::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
