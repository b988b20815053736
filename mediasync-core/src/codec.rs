//! # Codec Engine Interface
//!
//! The pipeline never parses containers or decodes bitstreams itself. A
//! [`CodecEngine`] opens a [`Container`], which lists its elementary streams,
//! hands out one [`StreamDecoder`] per stream and yields compressed packets
//! in file order. Everything here is only ever touched from one thread at a
//! time: the caller during open, the decode worker afterwards.
//!
//! All timestamps crossing this boundary are milliseconds.

use std::fmt;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pixel_convert::Picture;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Codec engine unavailable: {0}")]
    Init(String),
    #[error("Cannot open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("No decoder for stream {index} ({codec})")]
    NoDecoder { index: usize, codec: String },
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("Seek to {0} ms failed")]
    SeekFailed(i64),
    #[error("Read failed: {0}")]
    Read(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// The stream kind this one is played alongside
    pub fn companion(&self) -> MediaKind {
        match self {
            Self::Audio => Self::Video,
            Self::Video => Self::Audio,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// What the container reports about one elementary stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Index used by packets of this stream
    pub index: usize,
    pub kind: MediaKind,
    pub codec_name: String,
    pub language: Option<String>,
    /// Video only
    pub width: u32,
    pub height: u32,
    /// Audio only
    pub sample_rate: u32,
    pub channels: u16,
    /// Nominal spacing between frames, used when packets carry no timestamps
    pub frame_duration_ms: i64,
}

impl StreamDescriptor {
    pub fn video(index: usize, codec_name: &str, width: u32, height: u32, frame_duration_ms: i64) -> Self {
        Self {
            index,
            kind: MediaKind::Video,
            codec_name: codec_name.to_string(),
            language: None,
            width,
            height,
            sample_rate: 0,
            channels: 0,
            frame_duration_ms,
        }
    }

    pub fn audio(index: usize, codec_name: &str, sample_rate: u32, channels: u16) -> Self {
        Self {
            index,
            kind: MediaKind::Audio,
            codec_name: codec_name.to_string(),
            language: None,
            width: 0,
            height: 0,
            sample_rate,
            channels,
            frame_duration_ms: 0,
        }
    }

    /// Bytes per interleaved S16 sample frame
    pub fn sample_block(&self) -> usize {
        self.channels.max(1) as usize * 2
    }

    /// Playback time covered by `bytes` of S16 audio
    pub fn bytes_to_ms(&self, bytes: usize) -> i64 {
        let per_second = self.sample_block() as i64 * self.sample_rate.max(1) as i64;
        bytes as i64 * 1000 / per_second
    }
}

/// One compressed access unit
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub keyframe: bool,
    pub data: Bytes,
}

impl Packet {
    pub fn new(stream_index: usize, pts: Option<i64>, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            pts,
            dts: pts,
            keyframe: false,
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Best timestamp the container gave us
    pub fn timestamp(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }
}

/// Raw decoder output
#[derive(Debug)]
pub enum FramePayload {
    Video(Picture),
    /// Interleaved signed 16-bit native-endian samples
    Audio(Vec<u8>),
}

#[derive(Debug)]
pub struct DecodedFrame {
    /// Presentation time if the decoder knows better than the packet
    pub pts: Option<i64>,
    pub payload: FramePayload,
}

/// Entry point to a demux/decode backend
pub trait CodecEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn Container>, CodecError>;
}

/// An opened container positioned somewhere in its packet sequence
pub trait Container: Send {
    fn streams(&self) -> Vec<StreamDescriptor>;

    /// Total length in milliseconds
    fn duration_ms(&self) -> i64;

    fn open_decoder(&mut self, stream: &StreamDescriptor) -> Result<Box<dyn StreamDecoder>, CodecError>;

    /// Next packet in file order, `None` at end of stream
    fn read_packet(&mut self) -> Result<Option<Packet>, CodecError>;

    /// Reposition to the nearest random-access point at or before `ms`
    fn seek(&mut self, ms: i64) -> Result<(), CodecError>;
}

pub trait StreamDecoder: Send {
    /// Decode one packet. `hurry` means the output will be thrown away, so
    /// a decoder may skip work it can skip. `Ok(None)` is "no frame yet".
    fn decode(&mut self, packet: &Packet, hurry: bool) -> Result<Option<DecodedFrame>, CodecError>;

    /// End of input: hand back every frame the codec is still holding.
    /// Followed by `flush` before the next packet.
    fn drain(&mut self) -> Vec<DecodedFrame> {
        Vec::new()
    }

    /// Drop any internal reference frames and delayed output
    fn flush(&mut self);
}
