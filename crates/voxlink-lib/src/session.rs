//! The voice session object.
//!
//! Owns every piece of coordinator state (capture slot, spoken marker,
//! playback slot, mute flag, status) and two tasks: one feeds backend
//! transcript notifications to the watcher in delivery order, the other
//! mirrors backend health into the status. Cloning is cheap; all clones
//! share one session.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use voxlink_core::error::{BackendError, CaptureError};
use voxlink_core::types::{
    CaptureOutcome, MuteState, ReplayPolicy, SessionStatus, TranscriptTurn,
};

use crate::mute::MuteGate;
use crate::provider::{ConversationBackend, RecognitionProvider, SynthesisProvider};
use crate::recognition::RecognitionController;
use crate::status::StatusReporter;
use crate::synthesis::SynthesisController;
use crate::watcher::{TranscriptWatcher, WatchOutcome};

#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<Inner>,
}

struct Inner {
    recognition: RecognitionController,
    watcher: Arc<TranscriptWatcher>,
    synthesis: SynthesisController,
    gate: MuteGate,
    status: StatusReporter,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        self.synthesis.release_current();
    }
}

impl VoiceSession {
    /// Wire the components together and attach to the backend transcript.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        recognizer: Arc<dyn RecognitionProvider>,
        synthesizer: Arc<dyn SynthesisProvider>,
        backend: Arc<dyn ConversationBackend>,
        policy: ReplayPolicy,
    ) -> Self {
        let status = StatusReporter::new();
        let synthesis = SynthesisController::new(synthesizer, status.clone());
        let gate = MuteGate::new(synthesis.clone(), status.clone());
        let watcher = Arc::new(TranscriptWatcher::new(gate.clone(), status.clone()));
        let recognition = RecognitionController::new(recognizer, backend.clone(), status.clone());

        let mut health = backend.health();
        let current = health.borrow_and_update().clone();
        report_backend(&status, current);

        let subscription = backend.subscribe();
        let attached = watcher.attach(&subscription.current, policy);
        debug!("session attached: {attached:?}");

        let pump = tokio::spawn(pump_transcript(watcher.clone(), subscription.updates));
        let monitor = tokio::spawn(monitor_backend(health, status.clone()));
        info!("voice session started");

        Self {
            inner: Arc::new(Inner {
                recognition,
                watcher,
                synthesis,
                gate,
                status,
                tasks: Mutex::new(vec![pump, monitor]),
            }),
        }
    }

    pub async fn start_capture(&self) -> Result<CaptureOutcome, CaptureError> {
        self.inner.recognition.start_capture().await
    }

    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        self.inner.recognition.stop_capture()
    }

    pub fn toggle_mute(&self) -> MuteState {
        self.inner.gate.toggle()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.gate.is_muted()
    }

    /// Evaluate a transcript snapshot directly, bypassing the backend feed.
    pub fn on_transcript_changed(&self, snapshot: &[TranscriptTurn]) -> WatchOutcome {
        self.inner.watcher.on_transcript_changed(snapshot)
    }

    pub fn last_spoken(&self) -> Option<String> {
        self.inner.watcher.last_spoken()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.snapshot()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Stop watching the transcript and release any playback. Capture in
    /// progress is left to finish through its own release path.
    pub fn shutdown(&self) {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);
        self.inner.synthesis.release_current();
        info!("voice session shut down");
    }
}

async fn pump_transcript(
    watcher: Arc<TranscriptWatcher>,
    mut updates: mpsc::UnboundedReceiver<Vec<TranscriptTurn>>,
) {
    while let Some(snapshot) = updates.recv().await {
        let outcome = watcher.on_transcript_changed(&snapshot);
        debug!("transcript at {} turn(s): {outcome:?}", snapshot.len());
    }
    debug!("transcript feed closed");
}

async fn monitor_backend(
    mut health: watch::Receiver<Option<BackendError>>,
    status: StatusReporter,
) {
    while health.changed().await.is_ok() {
        let current = health.borrow_and_update().clone();
        report_backend(&status, current);
    }
}

fn report_backend(status: &StatusReporter, error: Option<BackendError>) {
    match error {
        Some(e) => {
            warn!("conversation backend unavailable: {e}");
            status.update(|s| {
                s.backend_error = Some(e.to_string());
                s.message = format!("Conversation unavailable: {e}");
            });
        }
        None => status.update(|s| {
            if s.backend_error.take().is_some() {
                info!("conversation backend recovered");
                if s.message.starts_with("Conversation unavailable") {
                    s.message = "Conversation restored".to_string();
                }
            }
        }),
    }
}
