//! # mediasync core
//!
//! Threaded decode-and-synchronize pipeline for audio/video playback.
//!
//! A [`MediaFile`] reads compressed packets through a pluggable
//! [`CodecEngine`], decodes them on a background worker into bounded per-stream
//! frame slots, and hands frames to the caller when the shared playback clock
//! says they are due.

// ============================================================================
// Configuration
// ============================================================================
pub mod config;

// ============================================================================
// Codec Boundary
// ============================================================================
pub mod codec;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_engine;

// ============================================================================
// Media Processing
// ============================================================================
pub mod pixel_convert;
pub mod stream_buffer;

// ============================================================================
// Playback / Synchronization
// ============================================================================
pub mod clock;
pub mod seek;
pub(crate) mod worker;
pub mod media_file;

#[cfg(test)]
mod testing;

pub use clock::{PlaybackState, LOOP_FOREVER};
pub use codec::{CodecEngine, CodecError, Container, MediaKind, Packet, StreamDecoder, StreamDescriptor};
pub use config::{ConfigError, EngineConfig};
pub use media_file::{AudioSpec, MediaError, MediaFile, SampleFormat};
pub use pixel_convert::{ColorSpace, OutputFormat, PixelFormat};
pub use stream_buffer::{AudioFrame, VideoFrame};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
