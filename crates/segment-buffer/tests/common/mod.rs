#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use segment_buffer::{
    BufferError, BufferedRanges, ControllerConfig, ControllerHandle, DecodeSink, Manifest,
    Representation, SegmentDownloader, SessionCoordinator, SinkEvent, TimeRange, UrlTemplate,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const SEGMENT_DURATION: f64 = 4.011;

/// Initialize tracing for tests with appropriate settings
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// 890 s at 4.011 s per segment: media segments 1..=222.
pub fn manifest() -> Arc<Manifest> {
    Arc::new(
        Manifest::new(
            Url::parse("https://cdn.example.com/dash/").unwrap(),
            vec![Representation::new("0"), Representation::new("1")],
            UrlTemplate::parse("init-stream$RepresentationID$.m4s").unwrap(),
            UrlTemplate::parse("chunk-stream$RepresentationID$-$Number%05d$.m4s").unwrap(),
            SEGMENT_DURATION,
            890.0,
        )
        .unwrap(),
    )
}

pub fn init_payload(representation: &str) -> String {
    format!("init:{representation}")
}

pub fn media_payload(representation: &str, index: u64) -> String {
    format!("media:{representation}:{index}")
}

// --- Decode sink ---

#[derive(Debug, Default)]
pub struct SinkState {
    pub opened: bool,
    pub mime_type: Option<String>,
    /// Payloads in the order the sink received them
    pub appended: Vec<String>,
    pub appending: bool,
    pub overlapping_appends: usize,
    pub buffered: BufferedRanges,
    pub position: f64,
    /// Payloads whose append completes with a failure
    pub fail_payloads: HashSet<String>,
    pub fail_all: bool,
}

/// Sink that turns appended payloads back into time ranges.
pub struct FakeSink {
    state: Arc<Mutex<SinkState>>,
    events: mpsc::UnboundedSender<SinkEvent>,
    append_delay: Duration,
}

impl FakeSink {
    pub fn new(
        append_delay: Duration,
    ) -> (Self, Arc<Mutex<SinkState>>, mpsc::UnboundedReceiver<SinkEvent>) {
        let state = Arc::new(Mutex::new(SinkState::default()));
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: state.clone(),
                events,
                append_delay,
            },
            state,
            rx,
        )
    }
}

#[async_trait]
impl DecodeSink for FakeSink {
    async fn open(&mut self) -> Result<(), BufferError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.state.lock().opened = true;
        Ok(())
    }

    fn add_source(&mut self, mime_type: &str) -> Result<(), BufferError> {
        self.state.lock().mime_type.get_or_insert_with(|| mime_type.to_owned());
        Ok(())
    }

    fn append(&mut self, data: Bytes) -> Result<(), BufferError> {
        let payload = String::from_utf8_lossy(&data).into_owned();
        {
            let mut state = self.state.lock();
            if state.appending {
                state.overlapping_appends += 1;
                return Err(BufferError::sink("append while updating"));
            }
            state.appending = true;
            state.appended.push(payload.clone());
        }

        let state = self.state.clone();
        let events = self.events.clone();
        let delay = self.append_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let event = {
                let mut state = state.lock();
                state.appending = false;
                if state.fail_all || state.fail_payloads.remove(&payload) {
                    SinkEvent::AppendFailed {
                        reason: format!("cannot decode {payload}"),
                    }
                } else {
                    if let Some(index) = media_index(&payload) {
                        let start = (index - 1) as f64 * SEGMENT_DURATION;
                        let end = index as f64 * SEGMENT_DURATION;
                        state.buffered.insert(TimeRange::new(start, end));
                    }
                    SinkEvent::AppendCompleted
                }
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    fn is_appending(&self) -> bool {
        self.state.lock().appending
    }

    fn buffered(&self) -> BufferedRanges {
        self.state.lock().buffered.clone()
    }

    fn position(&self) -> f64 {
        self.state.lock().position
    }
}

fn media_index(payload: &str) -> Option<u64> {
    payload.strip_prefix("media:")?.rsplit(':').next()?.parse().ok()
}

// --- Downloader ---

/// Downloader returning `init:{rep}` / `media:{rep}:{index}` payloads.
#[derive(Default)]
pub struct FakeDownloader {
    default_delay: Duration,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashSet<String>>,
    /// Payload names in request order
    pub requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeDownloader {
    pub fn new(default_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            default_delay,
            ..Default::default()
        })
    }

    pub fn delay(&self, payload: impl Into<String>, delay: Duration) {
        self.delays.lock().insert(payload.into(), delay);
    }

    /// Makes requests for `payload` fail with 404.
    pub fn fail(&self, payload: impl Into<String>) {
        self.failures.lock().insert(payload.into());
    }

    /// Lets requests for `payload` succeed again.
    pub fn heal(&self, payload: &str) {
        self.failures.lock().remove(payload);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, payload: &str) -> usize {
        self.requests.lock().iter().filter(|r| *r == payload).count()
    }

    async fn serve(&self, payload: String) -> Result<Bytes, BufferError> {
        self.requests.lock().push(payload.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self
            .delays
            .lock()
            .get(&payload)
            .copied()
            .unwrap_or(self.default_delay);
        let guard = InFlightGuard(&self.in_flight);
        tokio::time::sleep(delay).await;
        drop(guard);

        if self.failures.lock().contains(&payload) {
            return Err(BufferError::http_status(StatusCode::NOT_FOUND, payload));
        }
        Ok(Bytes::from(payload))
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SegmentDownloader for FakeDownloader {
    async fn fetch_initialization(&self, representation: &str) -> Result<Bytes, BufferError> {
        self.serve(init_payload(representation)).await
    }

    async fn fetch_segment(&self, representation: &str, index: u64) -> Result<Bytes, BufferError> {
        self.serve(media_payload(representation, index)).await
    }
}

// --- Harness ---

pub struct Harness {
    pub handle: ControllerHandle,
    pub sink: Arc<Mutex<SinkState>>,
    pub downloader: Arc<FakeDownloader>,
    pub token: CancellationToken,
}

impl Harness {
    pub async fn start(config: ControllerConfig, downloader: Arc<FakeDownloader>) -> Self {
        Self::start_with(config, downloader, |_| {}).await
    }

    /// Starts a session after letting the caller prepare the sink state.
    pub async fn start_with(
        config: ControllerConfig,
        downloader: Arc<FakeDownloader>,
        prepare: impl FnOnce(&mut SinkState),
    ) -> Self {
        init_tracing();
        let (sink, state, sink_events) = FakeSink::new(Duration::from_millis(5));
        prepare(&mut state.lock());
        let token = CancellationToken::new();
        let handle = SessionCoordinator::spawn_with(
            config,
            manifest(),
            downloader.clone(),
            Box::new(sink),
            sink_events,
            token.clone(),
        )
        .await
        .unwrap();
        Self {
            handle,
            sink: state,
            downloader,
            token,
        }
    }

    pub fn appended(&self) -> Vec<String> {
        self.sink.lock().appended.clone()
    }

    pub async fn wait_for_appended(&self, count: usize) {
        wait_for(|| self.sink.lock().appended.len() >= count).await;
    }

    pub async fn wait_for_payload(&self, payload: &str) {
        wait_for(|| self.sink.lock().appended.iter().any(|p| p == payload)).await;
    }

    /// Waits until nothing is in flight and the sink is idle.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    pub fn assert_no_overlapping_appends(&self) {
        assert_eq!(self.sink.lock().overlapping_appends, 0);
    }
}

/// Polls `condition` on the (paused) tokio clock.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..4000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn startup_payloads(representation: &str, burst: u64) -> Vec<String> {
    std::iter::once(init_payload(representation))
        .chain((1..=burst).map(|i| media_payload(representation, i)))
        .collect()
}
