//! Azure speech recognition: microphone endpointing plus the short-audio
//! REST endpoint.
//!
//! One [`AzureCapture`] per capture cycle. The microphone is opened in
//! [`RecognitionProvider::open`], an utterance is recorded until trailing
//! silence, and the WAV is posted for a single recognition result through
//! [`ShortAudioClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, warn};

use voxlink_core::error::CaptureError;
use voxlink_core::types::Recognition;
use voxlink_core::wav::{SAMPLE_RATE, compute_rms, duration_ms, wav_content_type, write_wav};

use crate::capture::{CHUNK_SAMPLES, Microphone};
use crate::config::SpeechConfig;
use crate::provider::{CaptureHandle, RecognitionProvider};

// Endpointing
const SILENCE_THRESHOLD: f32 = 0.004;
const MIN_SPEECH_MS: u64 = 180;
const SILENCE_DURATION_MS: u64 = 700;
const MAX_CAPTURE_MS: u64 = 12_000;
const NO_SPEECH_TIMEOUT_MS: u64 = 7_000;
const READ_TIMEOUT: Duration = Duration::from_millis(500);

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

// ---------------------------------------------------------------------------
// Endpointer
// ---------------------------------------------------------------------------

/// What to do with the chunk just fed to the [`Endpointer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Leading silence; discard.
    Skip,
    /// Part of the utterance.
    Keep,
    /// Part of the utterance, and the utterance is complete.
    Done,
    /// Nobody spoke before the timeout.
    NoSpeech,
}

/// Energy-based utterance detector, driven by chunk RMS and chunk length.
#[derive(Debug, Default)]
pub struct Endpointer {
    elapsed_ms: u64,
    speech_ms: Option<u64>,
    silence_ms: u64,
}

impl Endpointer {
    pub fn push(&mut self, rms: f32, chunk_ms: u64) -> Endpoint {
        self.elapsed_ms += chunk_ms;

        let Some(speech_ms) = self.speech_ms.as_mut() else {
            if rms > SILENCE_THRESHOLD {
                self.speech_ms = Some(chunk_ms);
                return self.cap(Endpoint::Keep);
            }
            if self.elapsed_ms >= NO_SPEECH_TIMEOUT_MS {
                return Endpoint::NoSpeech;
            }
            return Endpoint::Skip;
        };

        *speech_ms += chunk_ms;
        if rms > SILENCE_THRESHOLD {
            self.silence_ms = 0;
        } else if *speech_ms >= MIN_SPEECH_MS {
            self.silence_ms += chunk_ms;
            if self.silence_ms >= SILENCE_DURATION_MS {
                return Endpoint::Done;
            }
        }
        self.cap(Endpoint::Keep)
    }

    fn cap(&self, endpoint: Endpoint) -> Endpoint {
        if self.elapsed_ms >= MAX_CAPTURE_MS {
            Endpoint::Done
        } else {
            endpoint
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Client for the short-audio recognition endpoint.
pub struct ShortAudioClient {
    client: reqwest::Client,
    url: String,
    key: String,
    language: String,
}

impl ShortAudioClient {
    pub fn new(config: &SpeechConfig) -> Result<Self, CaptureError> {
        let key = config
            .key
            .clone()
            .ok_or_else(|| CaptureError::Provider("speech key not configured".into()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url: config.stt_url(),
            key,
            language: config.recognition_language.clone(),
        })
    }

    /// Recognize one 16 kHz mono WAV utterance.
    pub async fn recognize(&self, wav: Vec<u8>) -> Result<Recognition, CaptureError> {
        let resp = self
            .client
            .post(&self.url)
            .query(&[("language", self.language.as_str()), ("format", "simple")])
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .header(CONTENT_TYPE, wav_content_type(SAMPLE_RATE))
            .header(ACCEPT, "application/json")
            .body(wav)
            .send()
            .await
            .map_err(|e| CaptureError::Provider(format!("recognition request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CaptureError::Provider(format!(
                "recognition failed ({status}): {body}"
            )));
        }

        let body: ShortAudioResponse = resp
            .json()
            .await
            .map_err(|e| CaptureError::Provider(format!("invalid recognition response: {e}")))?;
        interpret_response(body)
    }
}

pub struct AzureRecognizer {
    speech: Arc<ShortAudioClient>,
}

impl AzureRecognizer {
    pub fn new(config: &SpeechConfig) -> Result<Self, CaptureError> {
        Ok(Self {
            speech: Arc::new(ShortAudioClient::new(config)?),
        })
    }
}

#[async_trait]
impl RecognitionProvider for AzureRecognizer {
    async fn open(&self) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let mic = Microphone::open(SAMPLE_RATE).await?;
        Ok(Box::new(AzureCapture {
            mic: Some(mic),
            speech: self.speech.clone(),
        }))
    }
}

pub struct AzureCapture {
    mic: Option<Microphone>,
    speech: Arc<ShortAudioClient>,
}

#[async_trait]
impl CaptureHandle for AzureCapture {
    async fn recognize_once(&mut self) -> Result<Recognition, CaptureError> {
        let mic = self
            .mic
            .as_mut()
            .ok_or_else(|| CaptureError::Device("capture already released".into()))?;
        let samples = record_utterance(mic).await?;
        // The microphone is not needed while the request is in flight.
        self.mic = None;

        let Some(samples) = samples else {
            debug!("no speech before timeout");
            return Ok(Recognition::NoMatch);
        };
        debug!(
            "recorded {} ms, uploading",
            duration_ms(samples.len(), SAMPLE_RATE)
        );
        self.speech.recognize(write_wav(&samples, SAMPLE_RATE)).await
    }

    fn release(&mut self) {
        if self.mic.take().is_some() {
            debug!("microphone released");
        }
    }
}

/// Record one utterance. `None` when nobody spoke before the timeout.
async fn record_utterance(mic: &mut Microphone) -> Result<Option<Vec<i16>>, CaptureError> {
    let chunk_ms = duration_ms(CHUNK_SAMPLES, SAMPLE_RATE);
    let mut endpointer = Endpointer::default();
    let mut audio = Vec::new();

    loop {
        let chunk = match tokio::time::timeout(READ_TIMEOUT, mic.read_chunk()).await {
            Ok(Ok(chunk)) => chunk,
            Ok(Err(e)) if audio.is_empty() => return Err(e),
            Ok(Err(e)) => {
                warn!("microphone ended mid-utterance: {e}");
                break;
            }
            Err(_) => return Err(CaptureError::Device("microphone read timeout".into())),
        };

        match endpointer.push(compute_rms(&chunk), chunk_ms) {
            Endpoint::Skip => {}
            Endpoint::Keep => audio.extend_from_slice(&chunk),
            Endpoint::Done => {
                audio.extend_from_slice(&chunk);
                break;
            }
            Endpoint::NoSpeech => return Ok(None),
        }
    }

    Ok((!audio.is_empty()).then_some(audio))
}

// ---------------------------------------------------------------------------
// Response mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShortAudioResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: Option<String>,
}

fn interpret_response(resp: ShortAudioResponse) -> Result<Recognition, CaptureError> {
    match resp.recognition_status.as_str() {
        "Success" => {
            let text = resp.display_text.unwrap_or_default().trim().to_string();
            if text.is_empty() {
                Ok(Recognition::NoMatch)
            } else {
                Ok(Recognition::Recognized(text))
            }
        }
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => Ok(Recognition::NoMatch),
        other => Err(CaptureError::Provider(format!(
            "recognition status {other}"
        ))),
    }
}
