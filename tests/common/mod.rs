#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use vidream_upload::{
    clock::ManualClock,
    config::ProviderConfig,
    credentials::{CredentialIssuer, PreparationFailure, UploadCredential, VideoHost},
    identity::Identity,
    store::MemoryStore,
    video::VideoRecord,
    upload::{
        PickedFile, ResumableUpload, ResumeStore, TusTransport, UploadError, UploadHeaders,
        UploadMetadata, UploadOptions, UploadPipeline,
    },
};

pub const NOW: u64 = 1_700_000_000;
pub const CHUNK_SIZE: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Connection dropped before the server saw the chunk
    Network,
    /// Server answered with this status without storing anything
    Status(u16),
    /// Server stored the chunk but the response never arrived
    AcceptedButLost,
}

#[derive(Default)]
struct Session {
    length: u64,
    received: Vec<u8>,
}

#[derive(Default)]
struct TransportState {
    next_session: usize,
    sessions: HashMap<String, Session>,
    faults: VecDeque<Fault>,
    always_fail: Option<Fault>,
    headers_seen: Vec<UploadHeaders>,
    metadata_seen: Vec<UploadMetadata>,
}

/// In-memory tus server with scripted faults.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
    pub create_calls: AtomicUsize,
    pub head_calls: AtomicUsize,
    pub patch_calls: AtomicUsize,
    clock_step: Mutex<Option<(Arc<ManualClock>, u64)>>,
    cancel_on_patch: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `count` PATCH requests fail with `fault`.
    pub fn fail_patches(&self, count: usize, fault: Fault) {
        let mut state = self.state.lock().unwrap();
        state.faults.extend(std::iter::repeat_n(fault, count));
    }

    pub fn fail_every_patch(&self, fault: Fault) {
        self.state.lock().unwrap().always_fail = Some(fault);
    }

    /// Moves `clock` forward by `secs` on every PATCH.
    pub fn advance_clock_on_patch(&self, clock: Arc<ManualClock>, secs: u64) {
        *self.clock_step.lock().unwrap() = Some((clock, secs));
    }

    /// Cancels `token` while handling the `nth` PATCH (1-based).
    pub fn cancel_on_patch(&self, nth: usize, token: CancellationToken) {
        *self.cancel_on_patch.lock().unwrap() = Some((nth, token));
    }

    /// Drops every session, as if they had expired server-side.
    pub fn forget_sessions(&self) {
        self.state.lock().unwrap().sessions.clear();
    }

    /// The bytes of the only session that received anything.
    pub fn only_upload(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut uploads = state.sessions.values().filter(|s| !s.received.is_empty());
        let upload = uploads.next().expect("no session received data");
        assert!(uploads.next().is_none(), "more than one session received data");
        upload.received.clone()
    }

    pub fn headers_seen(&self) -> Vec<UploadHeaders> {
        self.state.lock().unwrap().headers_seen.clone()
    }

    pub fn metadata_seen(&self) -> Vec<UploadMetadata> {
        self.state.lock().unwrap().metadata_seen.clone()
    }

    pub fn calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
            + self.head_calls.load(Ordering::SeqCst)
            + self.patch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TusTransport for FakeTransport {
    async fn create(
        &self,
        headers: &UploadHeaders,
        length: u64,
        metadata: &UploadMetadata,
    ) -> Result<String, UploadError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.headers_seen.push(headers.clone());
        state.metadata_seen.push(metadata.clone());
        state.next_session += 1;
        let location = format!("https://tus.test/files/{}", state.next_session);
        state.sessions.insert(
            location.clone(),
            Session {
                length,
                received: Vec::new(),
            },
        );
        Ok(location)
    }

    async fn query_offset(
        &self,
        location: &str,
        headers: &UploadHeaders,
    ) -> Result<u64, UploadError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.headers_seen.push(headers.clone());
        state
            .sessions
            .get(location)
            .map(|s| s.received.len() as u64)
            .ok_or(UploadError::SessionNotFound)
    }

    async fn patch(
        &self,
        location: &str,
        headers: &UploadHeaders,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, UploadError> {
        let call = self.patch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        // Give cancellation a chance to win, like a real request would
        tokio::task::yield_now().await;

        if let Some((clock, secs)) = &*self.clock_step.lock().unwrap() {
            clock.advance(*secs);
        }
        if let Some((nth, token)) = &*self.cancel_on_patch.lock().unwrap()
            && *nth == call
        {
            token.cancel();
        }

        let mut state = self.state.lock().unwrap();
        state.headers_seen.push(headers.clone());
        let fault = state.faults.pop_front().or(state.always_fail);
        let session = state
            .sessions
            .get_mut(location)
            .ok_or(UploadError::SessionNotFound)?;
        if offset != session.received.len() as u64 {
            return Err(UploadError::Upstream {
                status: 409,
                message: format!(
                    "offset mismatch: got {offset}, expected {}",
                    session.received.len()
                ),
            });
        }
        if session.received.len() as u64 + chunk.len() as u64 > session.length {
            return Err(UploadError::Upstream {
                status: 413,
                message: "chunk exceeds upload length".to_string(),
            });
        }

        match fault {
            Some(Fault::Network) => Err(UploadError::Network("connection reset".to_string())),
            Some(Fault::Status(status)) => Err(UploadError::Upstream {
                status,
                message: format!("scripted {status}"),
            }),
            Some(Fault::AcceptedButLost) => {
                session.received.extend_from_slice(&chunk);
                Err(UploadError::Network("response lost".to_string()))
            }
            None => {
                session.received.extend_from_slice(&chunk);
                Ok(session.received.len() as u64)
            }
        }
    }
}

/// Video host that hands out sequential GUIDs.
#[derive(Default)]
pub struct ScriptedHost {
    pub calls: AtomicUsize,
    pub missing_guid: bool,
}
#[async_trait]
impl VideoHost for ScriptedHost {
    async fn create_video(
        &self,
        _library_id: &str,
        _api_key: &str,
        _title: &str,
        _collection_id: Option<&str>,
    ) -> Result<Option<String>, PreparationFailure> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((!self.missing_guid).then(|| format!("guid-{n}")))
    }
}

pub fn configured_provider() -> ProviderConfig {
    ProviderConfig {
        library_id: Some("4242".to_string()),
        api_key: Some("secret-key".to_string()),
        ..ProviderConfig::default()
    }
}

pub fn options() -> UploadOptions {
    UploadOptions {
        endpoint: "https://tus.test/files".to_string(),
        chunk_size: CHUNK_SIZE,
        retry_delays: constants::RETRY_DELAYS.to_vec(),
    }
}

pub fn credential(guid: &str, expires_at: u64) -> UploadCredential {
    UploadCredential {
        remote_video_guid: guid.to_string(),
        signature: "signature".to_string(),
        expires_at,
        library_id: "4242".to_string(),
    }
}

pub fn metadata() -> UploadMetadata {
    UploadMetadata {
        filetype: "video/mp4".to_string(),
        title: "clip".to_string(),
        name: "clip.mp4".to_string(),
        collection: None,
    }
}

/// Deterministic non-repeating-ish payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn video_file(len: usize) -> PickedFile {
    PickedFile::from_bytes("clip.mp4", Some("video/mp4"), Bytes::from(payload(len)))
}

/// A pipeline wired to in-memory collaborators, signed in as `alice`.
pub struct Harness {
    pub store: MemoryStore,
    pub transport: Arc<FakeTransport>,
    pub host: Arc<ScriptedHost>,
    pub clock: Arc<ManualClock>,
    pub resume: Arc<ResumeStore>,
    pub pipeline: UploadPipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(configured_provider(), ScriptedHost::default(), options())
    }

    pub fn build(provider: ProviderConfig, host: ScriptedHost, options: UploadOptions) -> Self {
        let store = MemoryStore::new();
        let transport = FakeTransport::new();
        let host = Arc::new(host);
        let clock = Arc::new(ManualClock::new(NOW));
        let resume = Arc::new(ResumeStore::in_memory());

        let issuer = CredentialIssuer::new(
            provider,
            host.clone(),
            Arc::new(store.as_system()),
            clock.clone(),
        );
        let driver = ResumableUpload::new(transport.clone(), resume.clone(), clock.clone(), options);
        let pipeline = UploadPipeline::new(
            Arc::new(store.as_user(Identity::new("alice"))),
            Arc::new(issuer),
            driver,
            None,
        );

        Self {
            store,
            transport,
            host,
            clock,
            resume,
            pipeline,
        }
    }

    /// The single record in the store.
    pub fn only_record(&self) -> VideoRecord {
        let records = self.store.records();
        assert_eq!(records.len(), 1, "expected exactly one record");
        records.into_iter().next().unwrap()
    }

    pub fn driver(&self) -> ResumableUpload {
        ResumableUpload::new(
            self.transport.clone(),
            self.resume.clone(),
            self.clock.clone(),
            options(),
        )
    }
}
