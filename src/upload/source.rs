use std::{
    fmt,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _},
    sync::Mutex,
};

use crate::upload::UploadError;

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Where the bytes of a picked file live.
#[derive(Clone)]
pub enum ByteSource {
    /// Already in memory (web `File`-like handles)
    InMemory(Bytes),
    /// A `file://` URI or plain path (native pickers)
    UriReference(String),
    /// A one-shot reader whose length may be unknown
    StreamHandle(StreamHandle),
}

/// A reader that can be materialized exactly once.
#[derive(Clone)]
pub struct StreamHandle {
    reader: Arc<Mutex<Option<BoxedReader>>>,
    len_hint: Option<u64>,
}
impl StreamHandle {
    pub fn new(reader: impl AsyncRead + Send + 'static, len_hint: Option<u64>) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(Box::pin(reader)))),
            len_hint,
        }
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteSource::InMemory(bytes) => write!(f, "InMemory({} bytes)", bytes.len()),
            ByteSource::UriReference(uri) => write!(f, "UriReference({uri})"),
            ByteSource::StreamHandle(handle) => {
                write!(f, "StreamHandle(len_hint={:?})", handle.len_hint)
            }
        }
    }
}

impl ByteSource {
    /// The length, when it can be known without reading.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            ByteSource::InMemory(bytes) => Some(bytes.len() as u64),
            ByteSource::UriReference(uri) => {
                std::fs::metadata(uri_to_path(uri).ok()?).ok().map(|m| m.len())
            }
            ByteSource::StreamHandle(handle) => handle.len_hint,
        }
    }

    /// Reads the whole source into memory so it can be chunked by offset.
    pub async fn materialize(&self) -> Result<Bytes, UploadError> {
        match self {
            ByteSource::InMemory(bytes) => Ok(bytes.clone()),
            ByteSource::UriReference(uri) => {
                let path = uri_to_path(uri)?;
                let data = tokio::fs::read(&path).await.map_err(|e| {
                    UploadError::SourceUnavailable(format!("{}: {e}", path.display()))
                })?;
                Ok(Bytes::from(data))
            }
            ByteSource::StreamHandle(handle) => {
                let Some(mut reader) = handle.reader.lock().await.take() else {
                    return Err(UploadError::SourceUnavailable(
                        "stream has already been consumed".to_string(),
                    ));
                };
                let mut data = Vec::with_capacity(handle.len_hint.unwrap_or(0) as usize);
                reader
                    .read_to_end(&mut data)
                    .await
                    .map_err(|e| UploadError::SourceUnavailable(e.to_string()))?;
                Ok(Bytes::from(data))
            }
        }
    }
}

fn uri_to_path(uri: &str) -> Result<PathBuf, UploadError> {
    if uri.contains("://") {
        let url = reqwest::Url::parse(uri)
            .map_err(|e| UploadError::SourceUnavailable(format!("invalid file URI {uri}: {e}")))?;
        if url.scheme() != "file" {
            return Err(UploadError::SourceUnavailable(format!(
                "unsupported URI scheme {:?}",
                url.scheme()
            )));
        }
        url.to_file_path()
            .map_err(|_| UploadError::SourceUnavailable(format!("invalid file URI {uri}")))
    } else {
        Ok(PathBuf::from(uri))
    }
}

/// A file chosen by the user, normalized across platforms.
#[derive(Debug, Clone)]
pub struct PickedFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub source: ByteSource,
}
impl PickedFile {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let size = std::fs::metadata(path).ok().map(|m| m.len());
        Self {
            mime_type: mime_type_for(&name).map(str::to_string),
            name,
            size,
            source: ByteSource::UriReference(path.to_string_lossy().into_owned()),
        }
    }

    pub fn from_bytes(name: impl Into<String>, mime_type: Option<&str>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.map(str::to_string),
            size: Some(bytes.len() as u64),
            source: ByteSource::InMemory(bytes),
        }
    }

    /// Lowercased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

/// Best-effort MIME type for the video extensions we accept.
pub fn mime_type_for(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name)
        .extension()?
        .to_string_lossy()
        .to_ascii_lowercase();
    Some(match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => return None,
    })
}

/// Presents a platform-appropriate picker. `None` means the user cancelled.
#[async_trait]
pub trait FilePicker: Send + Sync {
    async fn pick(&self) -> Option<PickedFile>;
}

/// Picks a file given on the command line.
pub struct PathPicker {
    path: Option<PathBuf>,
}
impl PathPicker {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}
#[async_trait]
impl FilePicker for PathPicker {
    async fn pick(&self) -> Option<PickedFile> {
        let path = self.path.as_deref()?;
        if !path.is_file() {
            tracing::warn!("{} is not a file", path.display());
            return None;
        }
        Some(PickedFile::from_path(path))
    }
}

/// Native file dialog filtered to video files.
#[cfg(feature = "dialog")]
pub struct DialogPicker;
#[cfg(feature = "dialog")]
#[async_trait]
impl FilePicker for DialogPicker {
    async fn pick(&self) -> Option<PickedFile> {
        let picked = rfd::AsyncFileDialog::new()
            .set_title("Choose a video to upload")
            .add_filter("Video", constants::VIDEO_EXTENSIONS)
            .pick_file()
            .await?;
        Some(PickedFile::from_path(picked.path()))
    }
}
