//! voxlink-core: pure types and text processing.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod error;
pub mod selection;
pub mod text_prep;
pub mod types;
pub mod wav;
