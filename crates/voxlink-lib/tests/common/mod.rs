//! Scripted fake providers shared by the integration tests.
//!
//! Fakes record every acquire/release so tests can check ordering, and hold
//! completion senders so tests decide when a playback ends.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use voxlink_lib::feed::TranscriptFeed;
use voxlink_lib::provider::{
    CaptureHandle, ConversationBackend, Playback, PlaybackHandle, PlaybackResult,
    RecognitionProvider, Subscription, SynthesisProvider,
};
use voxlink_lib::voxlink_core::error::{BackendError, CaptureError, SynthesisError};
use voxlink_lib::voxlink_core::types::{Recognition, ReplayPolicy, TranscriptTurn};
use voxlink_lib::VoiceSession;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Let spawned tasks (transcript pump, completion waiters, sends) run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Poll `check` in real time until it holds. For tests against loopback
/// HTTP servers and pollers that run on timers.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Serve `app` on an ephemeral loopback port and return its base URL.
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ─── Recognition ───────────────────────────────────────────────────────────

pub enum Script {
    Result(Recognition),
    Fail(CaptureError),
    OpenFails(CaptureError),
    /// Never completes; only stop_capture or dropping the future ends it.
    Hang,
    /// The device open itself never completes.
    OpenHangs,
}

#[derive(Default)]
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Script>>,
    pub opened: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionProvider for ScriptedRecognizer {
    async fn open(&self) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Result(Recognition::NoMatch));
        match step {
            Script::OpenFails(e) => return Err(e),
            Script::OpenHangs => std::future::pending::<()>().await,
            _ => {}
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCapture {
            step: Some(step),
            released: self.released.clone(),
        }))
    }
}

struct ScriptedCapture {
    step: Option<Script>,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureHandle for ScriptedCapture {
    async fn recognize_once(&mut self) -> Result<Recognition, CaptureError> {
        match self.step.take() {
            Some(Script::Result(r)) => Ok(r),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::OpenFails(_) | Script::OpenHangs) | None => {
                unreachable!("handle used twice")
            }
        }
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ─── Synthesis ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Acquire(usize, String),
    Release(usize),
}

#[derive(Default)]
pub struct RecordingSynth {
    pub events: Arc<Mutex<Vec<Event>>>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    completions: Mutex<Vec<Option<oneshot::Sender<PlaybackResult>>>>,
    pub fail_next: AtomicBool,
}

impl RecordingSynth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Texts handed to synthesis, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Acquire(_, text) => Some(text),
                Event::Release(_) => None,
            })
            .collect()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Finish playback `n` (1-based, in acquisition order).
    pub fn complete(&self, n: usize, result: PlaybackResult) {
        let tx = self.completions.lock().unwrap()[n - 1]
            .take()
            .expect("playback already completed");
        let _ = tx.send(result);
    }
}

impl SynthesisProvider for RecordingSynth {
    fn synthesize(&self, text: &str) -> Result<Playback, SynthesisError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SynthesisError::Provider("voice unavailable".into()));
        }
        let (tx, rx) = oneshot::channel();
        let n = {
            let mut completions = self.completions.lock().unwrap();
            completions.push(Some(tx));
            completions.len()
        };
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(Event::Acquire(n, text.to_string()));
        Ok(Playback {
            handle: Box::new(RecordingHandle {
                n,
                released: AtomicBool::new(false),
                live: self.live.clone(),
                events: self.events.clone(),
            }),
            finished: rx,
        })
    }
}

struct RecordingHandle {
    n: usize,
    released: AtomicBool,
    live: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl PlaybackHandle for RecordingHandle {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.events.lock().unwrap().push(Event::Release(self.n));
        }
    }
}

// ─── Backend ───────────────────────────────────────────────────────────────

pub struct FakeBackend {
    pub feed: TranscriptFeed,
    sent: Mutex<Vec<String>>,
    pub fail_sends: AtomicBool,
    send_gate: Mutex<Option<oneshot::Receiver<()>>>,
    health: watch::Sender<Option<BackendError>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            feed: TranscriptFeed::default(),
            sent: Mutex::default(),
            fail_sends: AtomicBool::new(false),
            send_gate: Mutex::default(),
            health: watch::channel(None).0,
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_history(turns: Vec<TranscriptTurn>) -> Arc<Self> {
        let backend = Self::default();
        backend.feed.append(turns);
        Arc::new(backend)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn push(&self, turn: TranscriptTurn) {
        self.feed.append([turn]);
    }

    /// Hold the next send until the returned sender fires.
    pub fn hold_next_send(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.send_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn set_health(&self, error: Option<BackendError>) {
        self.health.send_replace(error);
    }
}

#[async_trait]
impl ConversationBackend for FakeBackend {
    async fn send(&self, text: &str) -> Result<(), BackendError> {
        let gate = self.send_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("502 Bad Gateway".into()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    fn health(&self) -> watch::Receiver<Option<BackendError>> {
        self.health.subscribe()
    }
}

// ─── Session ───────────────────────────────────────────────────────────────

pub struct Harness {
    pub session: VoiceSession,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub synth: Arc<RecordingSynth>,
    pub backend: Arc<FakeBackend>,
}

pub fn harness(script: impl IntoIterator<Item = Script>) -> Harness {
    harness_with(script, FakeBackend::new(), ReplayPolicy::SkipHistory)
}

pub fn harness_with(
    script: impl IntoIterator<Item = Script>,
    backend: Arc<FakeBackend>,
    policy: ReplayPolicy,
) -> Harness {
    init_tracing();
    let recognizer = ScriptedRecognizer::new(script);
    let synth = RecordingSynth::new();
    let session = VoiceSession::start(
        recognizer.clone(),
        synth.clone(),
        backend.clone(),
        policy,
    );
    Harness {
        session,
        recognizer,
        synth,
        backend,
    }
}
