//! Microphone input via cpal.
//!
//! `Microphone` opens the default input device and delivers 16 kHz mono i16
//! chunks whatever the device's native format, rate or channel count. Dropping
//! the value signals the capture thread, which closes the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use voxlink_core::error::CaptureError;

/// 100 ms at 16 kHz mono.
pub const CHUNK_SAMPLES: usize = 1_600;

pub struct Microphone {
    rx: mpsc::UnboundedReceiver<Vec<i16>>,
    buf: Vec<i16>,
    stop: Arc<AtomicBool>,
    thread: std::thread::Thread,
}

impl Microphone {
    /// Open the default input device, resampling to `target_rate`.
    ///
    /// Device setup runs on the capture thread; this resolves once the stream
    /// is running so device errors are returned here rather than surfacing as
    /// an empty capture. Dropping the future before then closes the device.
    pub async fn open(target_rate: u32) -> Result<Self, CaptureError> {
        let (tx, rx) = mpsc::unbounded_channel::<Vec<i16>>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        // cpal streams are !Send on some platforms and stay on their own thread.
        let handle = std::thread::Builder::new()
            .name("voxlink-capture".into())
            .spawn(move || {
                let stream = match start_stream(target_rate, tx, stop_thread.clone()) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    debug!("microphone open abandoned");
                    return;
                }

                while !stop_thread.load(Ordering::Relaxed) {
                    std::thread::park();
                }
                drop(stream);
                debug!("microphone closed");
            })
            .map_err(|e| CaptureError::Device(format!("capture thread: {e}")))?;

        let mic = Microphone {
            rx,
            buf: Vec::new(),
            stop,
            thread: handle.thread().clone(),
        };
        match ready_rx.await {
            Ok(Ok(())) => Ok(mic),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Device("capture thread exited".into())),
        }
    }

    /// Read exactly [`CHUNK_SAMPLES`] samples.
    pub async fn read_chunk(&mut self) -> Result<Vec<i16>, CaptureError> {
        while self.buf.len() < CHUNK_SAMPLES {
            match self.rx.recv().await {
                Some(samples) => self.buf.extend_from_slice(&samples),
                None => return Err(CaptureError::Device("capture stream ended".into())),
            }
        }
        Ok(self.buf.drain(..CHUNK_SAMPLES).collect())
    }
}

// Signals the capture thread and returns; the thread drops the stream itself.
impl Drop for Microphone {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.thread.unpark();
    }
}

fn start_stream(
    target_rate: u32,
    tx: mpsc::UnboundedSender<Vec<i16>>,
    stop: Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| CaptureError::Device("no microphone found".into()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Device(format!("no input config: {e}")))?;

    let format = Format {
        native_rate: supported.sample_rate().0,
        channels: supported.channels(),
        target_rate,
    };
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    debug!(
        "microphone: {} Hz, {} ch, {sample_format:?} → {target_rate} Hz mono",
        format.native_rate, format.channels
    );

    let stream = match sample_format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, format, tx, stop, |s| s),
        SampleFormat::F32 => build_stream::<f32>(&device, &config, format, tx, stop, |s| {
            (s.clamp(-1.0, 1.0) * 32767.0) as i16
        }),
        other => Err(CaptureError::Device(format!(
            "unsupported sample format {other:?}"
        ))),
    }?;
    stream
        .play()
        .map_err(|e| CaptureError::Device(format!("failed to start: {e}")))?;
    Ok(stream)
}

#[derive(Clone, Copy)]
struct Format {
    native_rate: u32,
    channels: u16,
    target_rate: u32,
}

fn build_stream<T: SizedSample + 'static>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: Format,
    tx: mpsc::UnboundedSender<Vec<i16>>,
    stop: Arc<AtomicBool>,
    to_i16: fn(T) -> i16,
) -> Result<cpal::Stream, CaptureError> {
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let samples: Vec<i16> = data.iter().map(|&s| to_i16(s)).collect();
                let mono = mix_to_mono(&samples, format.channels);
                let _ = tx.send(resample_linear(&mono, format.native_rate, format.target_rate));
            },
            |err| error!("microphone stream error: {err}"),
            None,
        )
        .map_err(|e| CaptureError::Device(format!("failed to build stream: {e}")))
}

/// Average interleaved channels down to one.
fn mix_to_mono(input: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return input.to_vec();
    }
    let ch = channels as usize;
    input
        .chunks_exact(ch)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / ch as i32) as i16
        })
        .collect()
}

/// Linear interpolation resampler. Adequate for speech.
fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let len = (input.len() as f64 / ratio) as usize;
    (0..len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let s0 = input[idx] as f64;
            let s1 = input.get(idx + 1).map_or(s0, |&s| s as f64);
            (s0 + (pos - idx as f64) * (s1 - s0)) as i16
        })
        .collect()
}
