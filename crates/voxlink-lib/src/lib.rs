//! voxlink-lib: voice session coordinator.
//!
//! One-shot speech capture, transcript watching, single-playback TTS and the
//! mute gate, plus the Azure speech providers, the Direct Line conversation
//! backend, configuration loading and the HTTP control API.
//! Depends on voxlink-core for pure types and text processing.

pub mod capture;
pub mod config;
pub mod directline;
pub mod feed;
pub mod mute;
pub mod provider;
pub mod recognition;
pub mod server;
pub mod session;
pub mod status;
pub mod stt;
pub mod synthesis;
pub mod tts;
pub mod watcher;

// Re-export voxlink-core for convenience
pub use voxlink_core;

pub use session::VoiceSession;
