//! Provider seams consumed by the session: speech recognition, speech
//! synthesis and the conversational backend.
//!
//! ```text
//! RecognitionProvider::open() → CaptureHandle ── recognize_once() → Recognition
//!                                              └─ release()
//! SynthesisProvider::synthesize(text) → Playback { handle, finished }
//! ConversationBackend::send(text) / subscribe() → Subscription
//!                     health() → watch of the current BackendError
//! ```

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use voxlink_core::error::{BackendError, CaptureError, SynthesisError};
use voxlink_core::types::{Recognition, TranscriptTurn};

// ─── Recognition ───────────────────────────────────────────────────────────

/// Source of capture handles. One handle per capture cycle.
#[async_trait]
pub trait RecognitionProvider: Send + Sync + 'static {
    /// Acquire the capture device for one cycle. Must not block the runtime;
    /// the session may drop this future to cancel the open.
    async fn open(&self) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// An open capture device.
#[async_trait]
pub trait CaptureHandle: Send {
    /// Capture a single utterance and convert it to text.
    async fn recognize_once(&mut self) -> Result<Recognition, CaptureError>;

    /// Free the device. Called exactly once per handle by the session.
    fn release(&mut self);
}

// ─── Synthesis ─────────────────────────────────────────────────────────────

/// Completion of a playback: `Ok` on natural end, `Err` on failure or cancel.
pub type PlaybackResult = Result<(), SynthesisError>;

/// A live playback on the output device.
pub trait PlaybackHandle: Send + Sync {
    /// Stop playback and free the device. Safe to call any number of times.
    fn release(&self);
}

/// A started playback and the channel its completion arrives on.
pub struct Playback {
    pub handle: Box<dyn PlaybackHandle>,
    pub finished: oneshot::Receiver<PlaybackResult>,
}

/// Text-to-speech engine.
pub trait SynthesisProvider: Send + Sync + 'static {
    /// Start speaking `text`. Returns once the handle is acquired; audio
    /// plays in the background until `finished` resolves.
    fn synthesize(&self, text: &str) -> Result<Playback, SynthesisError>;
}

// ─── Conversation ──────────────────────────────────────────────────────────

/// Transcript at subscribe time plus every later snapshot, in order.
pub struct Subscription {
    pub current: Vec<TranscriptTurn>,
    pub updates: mpsc::UnboundedReceiver<Vec<TranscriptTurn>>,
}

/// Text conversation the recognized speech is sent to.
#[async_trait]
pub trait ConversationBackend: Send + Sync + 'static {
    async fn send(&self, text: &str) -> Result<(), BackendError>;

    fn subscribe(&self) -> Subscription;

    /// Current backend failure, `None` while healthy. The session mirrors
    /// every change into its status.
    fn health(&self) -> watch::Receiver<Option<BackendError>> {
        watch::channel(None).1
    }
}

/// Backend used when the conversation could not be started. Every send fails
/// with the recorded error; the transcript stays empty.
pub struct UnavailableBackend {
    error: BackendError,
    health: watch::Sender<Option<BackendError>>,
    // Keeps subscriber channels open so the transcript pump idles instead of exiting.
    subscribers: std::sync::Mutex<Vec<mpsc::UnboundedSender<Vec<TranscriptTurn>>>>,
}

impl UnavailableBackend {
    pub fn new(error: BackendError) -> Self {
        Self {
            health: watch::channel(Some(error.clone())).0,
            error,
            subscribers: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConversationBackend for UnavailableBackend {
    async fn send(&self, _text: &str) -> Result<(), BackendError> {
        Err(self.error.clone())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Subscription {
            current: Vec::new(),
            updates: rx,
        }
    }

    fn health(&self) -> watch::Receiver<Option<BackendError>> {
        self.health.subscribe()
    }
}
