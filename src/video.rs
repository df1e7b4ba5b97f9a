use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Opaque identifier of a video record, assigned by the metadata store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);
impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Debug for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VideoId({})", self.0)
    }
}
impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl FromStr for VideoId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("video id cannot be empty".to_string());
        }
        Ok(Self(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Unlisted,
}
impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
            Visibility::Unlisted => write!(f, "unlisted"),
        }
    }
}
impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "unlisted" => Ok(Visibility::Unlisted),
            other => Err(format!(
                "invalid visibility {other:?} (expected public, private or unlisted)"
            )),
        }
    }
}

/// Lifecycle of a video record.
///
/// ```text
/// pending_upload -> credentials_generated -> uploading -> processing -> finished
///                                                     \-> failed_upload
///                                         processing -> failed_processing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    PendingUpload,
    CredentialsGenerated,
    Uploading,
    Processing,
    Finished,
    FailedUpload,
    FailedProcessing,
}
impl ProcessingStatus {
    /// Whether moving from `self` to `next` is an edge of the lifecycle.
    /// Staying in the same status is allowed so that field-only patches can restate it.
    pub fn can_transition_to(self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        self == next
            || matches!(
                (self, next),
                (PendingUpload, CredentialsGenerated)
                    | (CredentialsGenerated, Uploading)
                    | (Uploading, Processing)
                    | (Uploading, FailedUpload)
                    | (Processing, Finished)
                    | (Processing, FailedProcessing)
            )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStatus::Finished
                | ProcessingStatus::FailedUpload
                | ProcessingStatus::FailedProcessing
        )
    }
}
impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingStatus::PendingUpload => "pending_upload",
            ProcessingStatus::CredentialsGenerated => "credentials_generated",
            ProcessingStatus::Uploading => "uploading",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Finished => "finished",
            ProcessingStatus::FailedUpload => "failed_upload",
            ProcessingStatus::FailedProcessing => "failed_processing",
        };
        f.write_str(s)
    }
}

/// A persisted video record. Field names follow the hosted backend's documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: VideoId,
    /// Milliseconds since the unix epoch
    #[serde(rename = "_creationTime", default)]
    pub creation_time: f64,
    pub user_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_library_id: Option<String>,
    #[serde(
        rename = "remoteVideoGUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub remote_video_guid: Option<String>,
    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_entity_short_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_foreign_id: Option<String>,
}

/// Arguments for creating a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVideo {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub visibility: Visibility,
}

/// A partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_library_id: Option<String>,
    #[serde(rename = "remoteVideoGUID", skip_serializing_if = "Option::is_none")]
    pub remote_video_guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_entity_short_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_foreign_id: Option<String>,
}
impl VideoPatch {
    pub fn status(status: ProcessingStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Links the record to the remote video object and advances it to `credentials_generated`.
    pub fn link_remote(library_id: impl Into<String>, video_guid: impl Into<String>) -> Self {
        Self {
            status: Some(ProcessingStatus::CredentialsGenerated),
            remote_library_id: Some(library_id.into()),
            remote_video_guid: Some(video_guid.into()),
            ..Default::default()
        }
    }
}
