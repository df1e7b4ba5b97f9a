use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use backoff::{Error as BackoffError, backoff::Backoff, future::retry_notify};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    credentials::UploadCredential,
    upload::{
        ByteSource, ProgressData, ProgressSender, ResumeEntry, ResumeStore, TusTransport,
        UploadHeaders, UploadMetadata,
    },
    video::VideoId,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UploadError {
    #[error("could not read the selected file: {0}")]
    SourceUnavailable(String),
    #[error("upload credentials for video {video_id} expired at {expires_at}")]
    CredentialExpired { video_id: String, expires_at: u64 },
    #[error("video host returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("upload session no longer exists on the video host")]
    SessionNotFound,
    #[error("upload cancelled")]
    Cancelled,
    #[error("unexpected response from video host: {0}")]
    Protocol(String),
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        #[source]
        last_error: Box<UploadError>,
    },
}
impl UploadError {
    /// Whether another attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Network(_) => true,
            UploadError::Upstream { status, .. } => {
                matches!(status, 408 | 409 | 423 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// The underlying error, looking through exhausted retries.
    pub fn root(&self) -> &UploadError {
        match self {
            UploadError::RetriesExhausted { last_error, .. } => last_error.root(),
            other => other,
        }
    }
}

/// Lifecycle of one transfer. `Started` comes first; exactly one of
/// `Succeeded`, `Failed` or `Cancelled` comes last.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Started { total_bytes: Option<u64> },
    Progress(ProgressData),
    Succeeded,
    Failed(UploadError),
    Cancelled,
}
impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::Succeeded | UploadEvent::Failed(_) | UploadEvent::Cancelled
        )
    }
}

/// Walks a fixed list of delays, then gives up.
#[derive(Debug, Clone)]
pub struct ScheduleBackoff {
    delays: Vec<Duration>,
    next: usize,
}
impl ScheduleBackoff {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays, next: 0 }
    }
}
impl Backoff for ScheduleBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.next).copied();
        self.next += 1;
        delay
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub endpoint: String,
    pub chunk_size: u64,
    pub retry_delays: Vec<Duration>,
}
impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            endpoint: constants::bunny::TUS_ENDPOINT.to_string(),
            chunk_size: constants::DEFAULT_CHUNK_SIZE_BYTES,
            retry_delays: constants::RETRY_DELAYS.to_vec(),
        }
    }
}

/// What one transfer is for.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub record_id: VideoId,
    pub credential: UploadCredential,
    pub metadata: UploadMetadata,
}

/// Drives a chunked, resumable transfer of one file to the video host.
pub struct ResumableUpload {
    transport: Arc<dyn TusTransport>,
    resume: Arc<ResumeStore>,
    clock: Arc<dyn Clock>,
    options: UploadOptions,
}

impl ResumableUpload {
    pub fn new(
        transport: Arc<dyn TusTransport>,
        resume: Arc<ResumeStore>,
        clock: Arc<dyn Clock>,
        options: UploadOptions,
    ) -> Self {
        Self {
            transport,
            resume,
            clock,
            options,
        }
    }

    pub fn resume_store(&self) -> &ResumeStore {
        &self.resume
    }

    /// Transfers `source`, reporting on `events`. The returned result mirrors the terminal event.
    pub async fn run(
        &self,
        session: &UploadSession,
        source: &ByteSource,
        events: mpsc::UnboundedSender<UploadEvent>,
        cancel: CancellationToken,
    ) -> Result<(), UploadError> {
        events
            .send(UploadEvent::Started {
                total_bytes: source.len_hint(),
            })
            .ok();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = self.transfer(session, source, &events) => result,
        };

        let guid = &session.credential.remote_video_guid;
        match &result {
            Ok(()) => {
                tracing::info!("Upload of video {} completed", session.record_id);
                self.forget(guid);
                events.send(UploadEvent::Succeeded).ok();
            }
            Err(UploadError::Cancelled) => {
                tracing::info!(
                    "Upload of video {} cancelled; progress kept for resume",
                    session.record_id
                );
                events.send(UploadEvent::Cancelled).ok();
            }
            Err(e) => {
                tracing::error!("Upload of video {} failed: {e}", session.record_id);
                self.forget(guid);
                events.send(UploadEvent::Failed(e.clone())).ok();
            }
        }
        result
    }

    fn forget(&self, video_guid: &str) {
        if let Err(e) = self.resume.remove(video_guid) {
            tracing::error!("Failed to remove resume state for {video_guid}: {e:?}");
        }
    }

    async fn transfer(
        &self,
        session: &UploadSession,
        source: &ByteSource,
        events: &mpsc::UnboundedSender<UploadEvent>,
    ) -> Result<(), UploadError> {
        let data = source.materialize().await?;
        let total_bytes = data.len() as u64;
        let credential = &session.credential;
        let headers = UploadHeaders::from(credential);
        self.check_expiry(credential)?;

        let (location, mut offset) = self.open_session(session, &headers, total_bytes).await?;
        let chunk_size = self.options.chunk_size.max(1);

        tracing::info!(
            "Uploading {total_bytes} bytes for video {} from offset {offset} in chunks of {chunk_size} bytes",
            session.record_id
        );

        let mut progress = ProgressSender::new(events.clone(), Some(total_bytes), offset);
        progress.flush();

        while offset < total_bytes {
            let start = offset;
            let attempts = AtomicUsize::new(0);
            offset = self
                .with_retries("chunk upload", credential, || async {
                    let mut from = start;
                    // A failed attempt may still have been partly accepted
                    if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                        from = self
                            .transport
                            .query_offset(&location, &headers)
                            .await
                            .map_err(|e| self.classify(e, credential))?;
                        if from >= total_bytes {
                            return Ok(from);
                        }
                    }
                    self.check_expiry(credential)
                        .map_err(BackoffError::permanent)?;

                    let end = (from + chunk_size).min(total_bytes);
                    let chunk = data.slice(from as usize..end as usize);
                    let accepted = self
                        .transport
                        .patch(&location, &headers, from, chunk)
                        .await
                        .map_err(|e| self.classify(e, credential))?;
                    if accepted <= from || accepted > total_bytes {
                        return Err(BackoffError::permanent(UploadError::Protocol(format!(
                            "offset {accepted} acknowledged after sending bytes {from}..{end}"
                        ))));
                    }
                    Ok(accepted)
                })
                .await?;

            progress.set_bytes_uploaded(offset);
            if let Err(e) = self.resume.record_offset(&credential.remote_video_guid, offset) {
                tracing::error!("Failed to save upload progress: {e:?}");
            }
            tracing::debug!("Video host accepted {offset}/{total_bytes} bytes");
        }

        progress.flush();
        Ok(())
    }

    /// Reuses a stored session for this remote video if the host still knows it,
    /// otherwise creates a new one.
    async fn open_session(
        &self,
        session: &UploadSession,
        headers: &UploadHeaders,
        total_bytes: u64,
    ) -> Result<(String, u64), UploadError> {
        let credential = &session.credential;
        if let Some(entry) = self
            .resume
            .get(&credential.remote_video_guid)
            .filter(|e| e.total_bytes == total_bytes)
        {
            let status = self
                .with_retries("upload status check", credential, || async {
                    self.transport
                        .query_offset(&entry.upload_url, headers)
                        .await
                        .map_err(|e| self.classify(e, credential))
                })
                .await;
            match status {
                Ok(offset) => {
                    tracing::info!(
                        "Resuming upload of video {} at offset {offset}",
                        session.record_id
                    );
                    return Ok((entry.upload_url, offset.min(total_bytes)));
                }
                Err(UploadError::SessionNotFound) => {
                    tracing::warn!(
                        "Upload session {} is gone, starting a new one",
                        entry.upload_url
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let location = self
            .with_retries("upload session creation", credential, || async {
                self.transport
                    .create(headers, total_bytes, &session.metadata)
                    .await
                    .map_err(|e| self.classify(e, credential))
            })
            .await?;

        let entry = ResumeEntry {
            record_id: session.record_id.clone(),
            upload_url: location.clone(),
            total_bytes,
            accepted_offset: 0,
            credential: credential.clone(),
        };
        if let Err(e) = self.resume.upsert(entry) {
            tracing::error!("Failed to save upload session for resume: {e:?}");
        }
        Ok((location, 0))
    }

    async fn with_retries<T, F, Fut>(
        &self,
        operation: &str,
        credential: &UploadCredential,
        op: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackoffError<UploadError>>>,
    {
        let backoff = ScheduleBackoff::new(self.options.retry_delays.clone());
        let mut retries = 0usize;
        let result = retry_notify(backoff, op, |err: UploadError, dur: Duration| {
            retries += 1;
            tracing::warn!("{operation} failed, retrying in {dur:?}: {err}");
        })
        .await;

        match result {
            Ok(value) => Ok(value),
            // Expiry can also be reached while waiting out the schedule
            Err(e) if e.is_retryable() && self.check_expiry(credential).is_err() => {
                Err(self.expired(credential))
            }
            Err(e) if e.is_retryable() => Err(UploadError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: retries + 1,
                last_error: Box::new(e),
            }),
            Err(e) => Err(e),
        }
    }

    fn classify(&self, error: UploadError, credential: &UploadCredential) -> BackoffError<UploadError> {
        let rejected = matches!(error, UploadError::Upstream { status: 401 | 403, .. });
        if rejected && self.check_expiry(credential).is_err() {
            return BackoffError::permanent(self.expired(credential));
        }
        if error.is_retryable() {
            BackoffError::transient(error)
        } else {
            BackoffError::permanent(error)
        }
    }

    fn check_expiry(&self, credential: &UploadCredential) -> Result<(), UploadError> {
        let now = self.clock.now_epoch_secs();
        if credential.is_expired_at(now) {
            tracing::error!(
                "Upload credentials expired: video={}, client_time={now}, expires_at={}",
                credential.remote_video_guid,
                credential.expires_at
            );
            return Err(self.expired(credential));
        }
        Ok(())
    }

    fn expired(&self, credential: &UploadCredential) -> UploadError {
        UploadError::CredentialExpired {
            video_id: credential.remote_video_guid.clone(),
            expires_at: credential.expires_at,
        }
    }
}
