//! Azure text-to-speech: SSML request, RIFF PCM response, rodio playback.
//!
//! ```text
//! synthesize(text) ─► fetch task: POST SSML ─► PlayCmd::Play ─► playback thread
//!        │                                                         │ Sink per playback
//!        └─ AzurePlayback::release ─ cancelled flag + PlayCmd::Stop ┘ finished ◄─ Ok / Cancelled
//! ```
//!
//! rodio's `OutputStream` is !Send, so all audio output lives on one OS
//! thread fed over a std channel.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use voxlink_core::error::SynthesisError;

use crate::config::SpeechConfig;
use crate::provider::{Playback, PlaybackHandle, PlaybackResult, SynthesisProvider};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OUTPUT_FORMAT_HEADER: &str = "X-Microsoft-OutputFormat";

/// How often the playback thread checks for a drained sink.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum PlayCmd {
    Play {
        id: u64,
        audio: Vec<u8>,
        cancelled: Arc<AtomicBool>,
        done: oneshot::Sender<PlaybackResult>,
    },
    Stop {
        id: u64,
    },
}

/// Client for the Azure text-to-speech endpoint.
pub struct SsmlClient {
    client: reqwest::Client,
    url: String,
    key: String,
    voice: String,
    language: String,
    output_format: String,
}

impl SsmlClient {
    pub fn new(config: &SpeechConfig) -> Result<Self, SynthesisError> {
        let key = config
            .key
            .clone()
            .ok_or_else(|| SynthesisError::Provider("speech key not configured".into()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url: config.tts_url(),
            key,
            voice: config.voice.clone(),
            language: config.synthesis_language.clone(),
            output_format: config.output_format.clone(),
        })
    }

    /// Synthesize `text` and return the encoded audio.
    pub async fn fetch(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let resp = self
            .client
            .post(&self.url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .header(CONTENT_TYPE, "application/ssml+xml")
            .header(OUTPUT_FORMAT_HEADER, &self.output_format)
            .header(USER_AGENT, "voxlink")
            .body(build_ssml(&self.language, &self.voice, text))
            .send()
            .await
            .map_err(|e| SynthesisError::Provider(format!("synthesis request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::Provider(format!(
                "synthesis failed ({status}): {body}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::Provider(format!("synthesis response read error: {e}")))?;
        Ok(bytes.to_vec())
    }
}

pub struct AzureSynthesizer {
    speech: Arc<SsmlClient>,
    play_tx: Sender<PlayCmd>,
    next_id: AtomicU64,
}

impl AzureSynthesizer {
    /// Build the provider and start its playback thread.
    pub fn new(config: &SpeechConfig) -> Result<Self, SynthesisError> {
        let speech = Arc::new(SsmlClient::new(config)?);

        let (play_tx, play_rx) = std::sync::mpsc::channel::<PlayCmd>();
        std::thread::Builder::new()
            .name("voxlink-playback".into())
            .spawn(move || playback_thread(play_rx))
            .map_err(|e| SynthesisError::Playback(format!("playback thread: {e}")))?;

        Ok(Self {
            speech,
            play_tx,
            next_id: AtomicU64::new(1),
        })
    }
}

impl SynthesisProvider for AzureSynthesizer {
    fn synthesize(&self, text: &str) -> Result<Playback, SynthesisError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SynthesisError::Provider("no async runtime".into()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();

        let speech = self.speech.clone();
        let text = text.to_string();
        let play_tx = self.play_tx.clone();
        let fetch_cancelled = cancelled.clone();
        let fetch = runtime.spawn(async move {
            let audio = match speech.fetch(&text).await {
                Ok(audio) => audio,
                Err(e) => {
                    let _ = done_tx.send(Err(e));
                    return;
                }
            };
            if fetch_cancelled.load(Ordering::SeqCst) {
                let _ = done_tx.send(Err(SynthesisError::Cancelled));
                return;
            }
            debug!("tts {id}: {} bytes of audio", audio.len());
            let cmd = PlayCmd::Play {
                id,
                audio,
                cancelled: fetch_cancelled,
                done: done_tx,
            };
            if let Err(std::sync::mpsc::SendError(PlayCmd::Play { done, .. })) = play_tx.send(cmd) {
                let _ = done.send(Err(SynthesisError::Playback(
                    "playback thread stopped".into(),
                )));
            }
        });

        Ok(Playback {
            handle: Box::new(AzurePlayback {
                id,
                cancelled,
                fetch: fetch.abort_handle(),
                play_tx: self.play_tx.clone(),
            }),
            finished: done_rx,
        })
    }
}

struct AzurePlayback {
    id: u64,
    cancelled: Arc<AtomicBool>,
    fetch: AbortHandle,
    play_tx: Sender<PlayCmd>,
}

impl PlaybackHandle for AzurePlayback {
    fn release(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.fetch.abort();
        let _ = self.play_tx.send(PlayCmd::Stop { id: self.id });
        debug!("tts {}: released", self.id);
    }
}

/// Escape text for use inside an XML element or single-quoted attribute.
fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn build_ssml(language: &str, voice: &str, text: &str) -> String {
    let language = xml_escape(language);
    format!(
        "<speak version='1.0' xml:lang='{language}'><voice xml:lang='{language}' name='{}'>{}</voice></speak>",
        xml_escape(voice),
        xml_escape(text)
    )
}

// ─── Playback OS thread ───────────────────────────────────────────────────

struct Current {
    id: u64,
    sink: Sink,
    cancelled: Arc<AtomicBool>,
    done: oneshot::Sender<PlaybackResult>,
}

impl Current {
    fn finish(self, result: PlaybackResult) {
        self.sink.stop();
        let _ = self.done.send(result);
    }
}

fn playback_thread(cmd_rx: Receiver<PlayCmd>) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            error!("playback: failed to open audio output: {e}");
            reject_all(cmd_rx, &format!("no audio output: {e}"));
            return;
        }
    };

    let mut current: Option<Current> = None;
    loop {
        match cmd_rx.recv_timeout(POLL_INTERVAL) {
            Ok(PlayCmd::Play {
                id,
                audio,
                cancelled,
                done,
            }) => {
                if let Some(previous) = current.take() {
                    debug!("playback {}: replaced by {id}", previous.id);
                    previous.finish(Err(SynthesisError::Cancelled));
                }
                if cancelled.load(Ordering::SeqCst) {
                    let _ = done.send(Err(SynthesisError::Cancelled));
                    continue;
                }
                match start_sink(&stream_handle, audio) {
                    Ok(sink) => {
                        debug!("playback {id}: started");
                        current = Some(Current {
                            id,
                            sink,
                            cancelled,
                            done,
                        });
                    }
                    Err(e) => {
                        warn!("playback {id}: {e}");
                        let _ = done.send(Err(e));
                    }
                }
            }
            Ok(PlayCmd::Stop { id }) => {
                if current.as_ref().is_some_and(|c| c.id == id) {
                    if let Some(c) = current.take() {
                        debug!("playback {id}: stopped");
                        c.finish(Err(SynthesisError::Cancelled));
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(c) = current.take() {
                    c.finish(Err(SynthesisError::Cancelled));
                }
                break;
            }
        }

        let state = current
            .as_ref()
            .map(|c| (c.cancelled.load(Ordering::SeqCst), c.sink.empty()));
        match state {
            Some((true, _)) => {
                if let Some(c) = current.take() {
                    c.finish(Err(SynthesisError::Cancelled));
                }
            }
            Some((false, true)) => {
                if let Some(c) = current.take() {
                    debug!("playback {}: finished", c.id);
                    c.finish(Ok(()));
                }
            }
            _ => {}
        }
    }
    debug!("playback thread exiting");
}

fn start_sink(handle: &OutputStreamHandle, audio: Vec<u8>) -> Result<Sink, SynthesisError> {
    let source = Decoder::new(Cursor::new(audio))
        .map_err(|e| SynthesisError::Playback(format!("undecodable audio: {e}")))?;
    let sink =
        Sink::try_new(handle).map_err(|e| SynthesisError::Playback(format!("no sink: {e}")))?;
    sink.append(source);
    Ok(sink)
}

/// Without an output device every playback fails immediately.
fn reject_all(cmd_rx: Receiver<PlayCmd>, reason: &str) {
    while let Ok(cmd) = cmd_rx.recv() {
        if let PlayCmd::Play { done, .. } = cmd {
            let _ = done.send(Err(SynthesisError::Playback(reason.to_string())));
        }
    }
}
