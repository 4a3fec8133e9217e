//! Shared fakes for the orchestrator integration tests.
//!
//! - [`ChannelTransport`] -- an in-process event transport; the test pushes
//!   frames into the live session and can drop it or refuse connects.
//! - [`FakeExtractionApi`] / [`FakeSocialImportApi`] -- scripted job APIs
//!   that count their calls.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use closet_core::retry::RetryConfig;
use closet_core::types::EventSequence;
use closet_jobs::api::{ApiError, CreatedJob};
use closet_jobs::extraction::{
    CreateExtractionJob, ExtractionApi, ExtractionOrchestrator, ExtractionSnapshot, ImageUpload,
    UploadedImage,
};
use closet_jobs::pointer::{JobPointerStore, MemoryJobPointerStore};
use closet_jobs::social_import::{
    Credentials, OAuthGrant, PhotoItemPatch, SocialImportApi, SocialImportOrchestrator,
    SocialImportSnapshot, StartSocialImport,
};
use closet_jobs::tracker::TrackerConfig;
use closet_stream::{
    EventTransport, FrameStream, ReconnectConfig, StreamError, StreamTarget, TransportFrame,
};
use futures::channel::mpsc;
use tokio::sync::{watch, Notify};

// ---------------------------------------------------------------------------
// Timing helpers
// ---------------------------------------------------------------------------

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Tracker settings with millisecond backoffs.
pub fn fast_config() -> TrackerConfig {
    TrackerConfig {
        reconnect: ReconnectConfig {
            base_delay: Duration::from_millis(1),
            max_attempts: 3,
        },
        retry: RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..Default::default()
        },
        upload_concurrency: 2,
    }
}

/// Wait until the watched value satisfies `pred` and return a copy of it.
pub async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T {
    let value = tokio::time::timeout(WAIT_LIMIT, rx.wait_for(pred))
        .await
        .expect("Timed out waiting for state")
        .expect("State channel closed");
    (*value).clone()
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_LIMIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("Condition never became true");
}

/// A `{type, data, id}` envelope.
pub fn frame(event_type: &str, data: serde_json::Value, id: EventSequence) -> String {
    serde_json::json!({ "type": event_type, "data": data, "id": id }).to_string()
}

/// Holds snapshot fetches until the returned gate is notified.
type FetchGate = Mutex<Option<Arc<Notify>>>;

fn hold(gate: &FetchGate) -> Arc<Notify> {
    let notify = Arc::new(Notify::new());
    *gate.lock().unwrap() = Some(Arc::clone(&notify));
    notify
}

async fn pass_gate(gate: &FetchGate) {
    let notify = gate.lock().unwrap().clone();
    if let Some(notify) = notify {
        notify.notified().await;
    }
}

fn scripted(status: u16) -> ApiError {
    ApiError::Status {
        status,
        body: "scripted failure".into(),
    }
}

// ---------------------------------------------------------------------------
// ChannelTransport
// ---------------------------------------------------------------------------

type FrameSender = mpsc::UnboundedSender<Result<TransportFrame, StreamError>>;

#[derive(Default)]
pub struct ChannelTransport {
    connects: Mutex<Vec<(String, Option<EventSequence>)>>,
    live: Mutex<Option<FrameSender>>,
    refuse: AtomicBool,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(job_id, resume_from)` of every connect attempt.
    pub fn connects(&self) -> Vec<(String, Option<EventSequence>)> {
        self.connects.lock().unwrap().clone()
    }

    /// Deliver a frame to the live session.
    pub fn push(&self, payload: impl Into<String>) {
        let live = self.live.lock().unwrap();
        let tx = live.as_ref().expect("No live session");
        tx.unbounded_send(Ok(TransportFrame::text(payload)))
            .expect("Session receiver dropped");
    }

    /// End the live session as if the server hung up.
    pub fn drop_session(&self) {
        self.live.lock().unwrap().take();
    }

    /// Make subsequent connects fail.
    pub fn refuse_connects(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn connect(
        &self,
        target: &StreamTarget,
        resume_from: Option<EventSequence>,
    ) -> Result<FrameStream, StreamError> {
        self.connects
            .lock()
            .unwrap()
            .push((target.job_id.clone(), resume_from));
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StreamError::Connection("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded();
        *self.live.lock().unwrap() = Some(tx);
        Ok(Box::pin(rx))
    }
}

// ---------------------------------------------------------------------------
// FakeExtractionApi
// ---------------------------------------------------------------------------

/// Uploads return the file name as image id; jobs are always `job-1`.
#[derive(Default)]
pub struct FakeExtractionApi {
    pub failing_uploads: Mutex<HashSet<String>>,
    pub create_failures: Mutex<VecDeque<u16>>,
    /// `None` answers 404.
    pub snapshot: Mutex<Option<Result<ExtractionSnapshot, u16>>>,
    pub cancel_status: Mutex<Option<u16>>,
    fetch_gate: FetchGate,
    uploads: AtomicUsize,
    creates: AtomicUsize,
    fetches: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeExtractionApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_upload(&self, file_name: &str) {
        self.failing_uploads.lock().unwrap().insert(file_name.into());
    }

    pub fn set_snapshot(&self, snapshot: serde_json::Value) {
        let parsed = serde_json::from_value(snapshot).expect("Invalid snapshot fixture");
        *self.snapshot.lock().unwrap() = Some(Ok(parsed));
    }

    /// Make fetches wait until the returned gate is notified.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        hold(&self.fetch_gate)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionApi for FakeExtractionApi {
    async fn upload_image(&self, image: &ImageUpload) -> Result<UploadedImage, ApiError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.failing_uploads.lock().unwrap().contains(&image.file_name) {
            return Err(scripted(415));
        }
        Ok(UploadedImage {
            image_id: image.file_name.clone(),
        })
    }

    async fn create_job(&self, _request: &CreateExtractionJob) -> Result<CreatedJob, ApiError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.create_failures.lock().unwrap().pop_front() {
            return Err(scripted(status));
        }
        Ok(CreatedJob {
            job_id: "job-1".into(),
        })
    }

    async fn fetch_job(&self, _job_id: &str) -> Result<ExtractionSnapshot, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        pass_gate(&self.fetch_gate).await;
        match self.snapshot.lock().unwrap().clone() {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(status)) => Err(scripted(status)),
            None => Err(scripted(404)),
        }
    }

    async fn cancel_job(&self, _job_id: &str) -> Result<(), ApiError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        match *self.cancel_status.lock().unwrap() {
            Some(status) => Err(scripted(status)),
            None => Ok(()),
        }
    }
}

pub fn image(file_name: &str) -> ImageUpload {
    ImageUpload {
        file_name: file_name.into(),
        content_type: "image/jpeg".into(),
        bytes: vec![0xFF, 0xD8, 0xFF],
    }
}

pub struct ExtractionHarness {
    pub orchestrator: Arc<ExtractionOrchestrator>,
    pub api: Arc<FakeExtractionApi>,
    pub transport: Arc<ChannelTransport>,
    pub pointers: Arc<MemoryJobPointerStore>,
}

pub fn extraction_harness() -> ExtractionHarness {
    let api = FakeExtractionApi::new();
    let transport = ChannelTransport::new();
    let pointers = Arc::new(MemoryJobPointerStore::new());
    let orchestrator = ExtractionOrchestrator::new(
        Arc::clone(&api) as Arc<dyn ExtractionApi>,
        Arc::clone(&transport) as Arc<dyn EventTransport>,
        Arc::clone(&pointers) as Arc<dyn JobPointerStore>,
        fast_config(),
    );
    ExtractionHarness {
        orchestrator: Arc::new(orchestrator),
        api,
        transport,
        pointers,
    }
}

// ---------------------------------------------------------------------------
// FakeSocialImportApi
// ---------------------------------------------------------------------------

/// Jobs are always `import-1`; commands pop scripted failures in order.
#[derive(Default)]
pub struct FakeSocialImportApi {
    /// `None` answers 404.
    pub snapshot: Mutex<Option<Result<SocialImportSnapshot, u16>>>,
    pub command_failures: Mutex<VecDeque<u16>>,
    pub cancel_status: Mutex<Option<u16>>,
    fetch_gate: FetchGate,
    calls: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeSocialImportApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_snapshot(&self, snapshot: serde_json::Value) {
        let parsed = serde_json::from_value(snapshot).expect("Invalid snapshot fixture");
        *self.snapshot.lock().unwrap() = Some(Ok(parsed));
    }

    /// Make fetches wait until the returned gate is notified.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        hold(&self.fetch_gate)
    }

    pub fn fail_next_commands(&self, statuses: &[u16]) {
        self.command_failures.lock().unwrap().extend(statuses);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn command(&self, call: String) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call);
        match self.command_failures.lock().unwrap().pop_front() {
            Some(status) => Err(scripted(status)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SocialImportApi for FakeSocialImportApi {
    async fn create_job(&self, request: &StartSocialImport) -> Result<CreatedJob, ApiError> {
        self.command(format!("create:{}:{}", request.platform, request.profile))?;
        Ok(CreatedJob {
            job_id: "import-1".into(),
        })
    }

    async fn fetch_job(&self, _job_id: &str) -> Result<SocialImportSnapshot, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        pass_gate(&self.fetch_gate).await;
        match self.snapshot.lock().unwrap().clone() {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(status)) => Err(scripted(status)),
            None => Err(scripted(404)),
        }
    }

    async fn cancel_job(&self, _job_id: &str) -> Result<(), ApiError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        match *self.cancel_status.lock().unwrap() {
            Some(status) => Err(scripted(status)),
            None => Ok(()),
        }
    }

    async fn submit_oauth_auth(&self, _job_id: &str, grant: &OAuthGrant) -> Result<(), ApiError> {
        self.command(format!("oauth:{}", grant.code))
    }

    async fn submit_credential_auth(
        &self,
        _job_id: &str,
        credentials: &Credentials,
    ) -> Result<(), ApiError> {
        self.command(format!("credentials:{}", credentials.username))
    }

    async fn patch_item(
        &self,
        _job_id: &str,
        photo_id: &str,
        item_id: &str,
        _patch: &PhotoItemPatch,
    ) -> Result<(), ApiError> {
        self.command(format!("patch:{photo_id}:{item_id}"))
    }

    async fn approve_photo(&self, _job_id: &str, photo_id: &str) -> Result<(), ApiError> {
        self.command(format!("approve:{photo_id}"))
    }

    async fn reject_photo(&self, _job_id: &str, photo_id: &str) -> Result<(), ApiError> {
        self.command(format!("reject:{photo_id}"))
    }
}

pub struct SocialImportHarness {
    pub orchestrator: Arc<SocialImportOrchestrator>,
    pub api: Arc<FakeSocialImportApi>,
    pub transport: Arc<ChannelTransport>,
    pub pointers: Arc<MemoryJobPointerStore>,
}

pub fn social_import_harness() -> SocialImportHarness {
    let api = FakeSocialImportApi::new();
    let transport = ChannelTransport::new();
    let pointers = Arc::new(MemoryJobPointerStore::new());
    let orchestrator = SocialImportOrchestrator::new(
        Arc::clone(&api) as Arc<dyn SocialImportApi>,
        Arc::clone(&transport) as Arc<dyn EventTransport>,
        Arc::clone(&pointers) as Arc<dyn JobPointerStore>,
        fast_config(),
    );
    SocialImportHarness {
        orchestrator: Arc::new(orchestrator),
        api,
        transport,
        pointers,
    }
}
