//! Scripted codec engine for tests: a fixed packet list played back in
//! order, with decoders that turn packet payloads straight into frames.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::codec::{
    CodecEngine, CodecError, Container, DecodedFrame, FramePayload, MediaKind, Packet, StreamDecoder,
    StreamDescriptor,
};
use crate::pixel_convert::Picture;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

/// Route log output through the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

pub const VIDEO_PACKET_BYTES: usize = 4000;
/// 20 ms of 48 kHz stereo S16
pub const AUDIO_PACKET_BYTES: usize = 3840;

#[derive(Clone)]
pub struct ScriptedContainer {
    streams: Vec<StreamDescriptor>,
    packets: Vec<Packet>,
    cursor: usize,
    duration_ms: i64,
    decode_calls: Arc<AtomicUsize>,
    broken_decoders: Vec<usize>,
}

impl ScriptedContainer {
    pub fn new(streams: Vec<StreamDescriptor>, duration_ms: i64) -> Self {
        Self {
            streams,
            packets: Vec::new(),
            cursor: 0,
            duration_ms,
            decode_calls: Arc::new(AtomicUsize::new(0)),
            broken_decoders: Vec::new(),
        }
    }

    /// 8x8 video at 25 fps on stream 0, keyframe every second
    pub fn video_only(duration_ms: i64, step_ms: i64) -> Self {
        let mut container = Self::new(vec![StreamDescriptor::video(0, "raw", 8, 8, step_ms)], duration_ms);
        for pts in (0..duration_ms).step_by(step_ms as usize) {
            container.packets.push(video_packet(0, pts));
        }
        container
    }

    /// Video on stream 0 every 40 ms, audio on stream 1 every 20 ms,
    /// interleaved by timestamp
    pub fn av(duration_ms: i64) -> Self {
        let streams = vec![
            StreamDescriptor::video(0, "raw", 8, 8, 40),
            StreamDescriptor::audio(1, "pcm", 48_000, 2),
        ];
        let mut container = Self::new(streams, duration_ms);
        for pts in (0..duration_ms).step_by(20) {
            if pts % 40 == 0 {
                container.packets.push(video_packet(0, pts));
            }
            let mut audio = Packet::new(1, Some(pts), vec![(pts / 20) as u8; AUDIO_PACKET_BYTES]);
            audio.keyframe = true;
            container.packets.push(audio);
        }
        container
    }

    pub fn with_packet(mut self, packet: Packet) -> Self {
        self.packets.push(packet);
        self
    }

    /// Packets at `pts` decode with an error
    pub fn failing_at(mut self, pts: i64) -> Self {
        for packet in self.packets.iter_mut().filter(|p| p.pts == Some(pts)) {
            packet.data = bytes::Bytes::new();
        }
        self
    }

    /// Opening a decoder for stream `index` fails
    pub fn broken_decoder(mut self, index: usize) -> Self {
        self.broken_decoders.push(index);
        self
    }

    pub fn descriptors(&self) -> Vec<StreamDescriptor> {
        self.streams.clone()
    }

    pub fn duration(&self) -> i64 {
        self.duration_ms
    }

    pub fn decode_calls(&self) -> Arc<AtomicUsize> {
        self.decode_calls.clone()
    }

    pub fn max_packet_size(&self) -> usize {
        self.packets.iter().map(Packet::size).max().unwrap_or(0)
    }
}

fn video_packet(stream_index: usize, pts: i64) -> Packet {
    let mut packet = Packet::new(stream_index, Some(pts), vec![0u8; VIDEO_PACKET_BYTES]);
    packet.keyframe = pts % 1000 == 0;
    packet
}

impl Container for ScriptedContainer {
    fn streams(&self) -> Vec<StreamDescriptor> {
        self.streams.clone()
    }

    fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    fn open_decoder(&mut self, stream: &StreamDescriptor) -> Result<Box<dyn StreamDecoder>, CodecError> {
        if self.broken_decoders.contains(&stream.index) {
            return Err(CodecError::NoDecoder {
                index: stream.index,
                codec: stream.codec_name.clone(),
            });
        }
        Ok(Box::new(ScriptedDecoder::new(stream.clone(), self.decode_calls.clone())))
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        let packet = self.packets.get(self.cursor).cloned();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn seek(&mut self, ms: i64) -> Result<(), CodecError> {
        self.cursor = self
            .packets
            .iter()
            .rposition(|p| p.keyframe && p.timestamp().is_some_and(|ts| ts <= ms))
            .unwrap_or(0);
        Ok(())
    }
}

pub struct ScriptedDecoder {
    stream: StreamDescriptor,
    calls: Arc<AtomicUsize>,
    /// Output lags input by one packet, like a codec with reordering
    delayed: bool,
    held: Option<DecodedFrame>,
}

impl ScriptedDecoder {
    pub fn new(stream: StreamDescriptor, calls: Arc<AtomicUsize>) -> Self {
        Self {
            stream,
            calls,
            delayed: false,
            held: None,
        }
    }

    pub fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }
}

impl StreamDecoder for ScriptedDecoder {
    fn decode(&mut self, packet: &Packet, _hurry: bool) -> Result<Option<DecodedFrame>, CodecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if packet.data.is_empty() {
            return Err(CodecError::DecodeFailed("empty packet".into()));
        }

        let payload = match self.stream.kind {
            MediaKind::Video => {
                let luma = 16 + (packet.pts.unwrap_or(0) / 40 % 200) as u8;
                FramePayload::Video(Picture::solid(
                    self.stream.width as usize,
                    self.stream.height as usize,
                    luma,
                    128,
                    128,
                ))
            }
            MediaKind::Audio => FramePayload::Audio(packet.data.to_vec()),
        };
        let frame = DecodedFrame {
            pts: packet.pts,
            payload,
        };
        if self.delayed {
            return Ok(self.held.replace(frame));
        }
        Ok(Some(frame))
    }

    fn drain(&mut self) -> Vec<DecodedFrame> {
        self.held.take().into_iter().collect()
    }

    fn flush(&mut self) {
        self.held = None;
    }
}

/// Hands out one prepared container per `open`
pub struct ScriptedEngine {
    container: Mutex<Option<ScriptedContainer>>,
}

impl ScriptedEngine {
    pub fn new(container: ScriptedContainer) -> Self {
        Self {
            container: Mutex::new(Some(container)),
        }
    }
}

impl CodecEngine for ScriptedEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn Container>, CodecError> {
        match self.container.lock().take() {
            Some(container) => Ok(Box::new(container)),
            None => Err(CodecError::Open {
                path: path.display().to_string(),
                reason: "no such file".into(),
            }),
        }
    }
}
