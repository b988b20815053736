//! # Media File - the public playback handle
//!
//! Ties the pieces together: stream buffers, the playback clock, the seek
//! controller and the decode worker thread. All calls take `&self`, so one
//! `MediaFile` can be shared between an audio callback thread and a render
//! loop.
//!
//! ```text
//!   consumer threads                          decode worker
//!   ────────────────                          ─────────────
//!   get_video_frame ─┐                   ┌─ read_packet ─► enqueue
//!   get_audio_frame ─┼─► StreamBuffer ◄──┤
//!   seek / flush ────┘   (per stream)    └─ dequeue ─► decode ─► commit
//!         │                                      ▲
//!         └────────► SeekController ─────────────┘
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{PlaybackClock, PlaybackState};
use crate::codec::{CodecEngine, CodecError, MediaKind, StreamDescriptor};
use crate::config::{ConfigError, EngineConfig};
use crate::pixel_convert::OutputFormat;
use crate::seek::{SeekController, Wakeup};
use crate::stream_buffer::{AudioFrame, Delivery, StreamBuffer, VideoFrame};
use crate::worker::{Backend, DecodeContext, DecodeWorker};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("No usable streams in {0}")]
    NoStreams(String),
    #[error("Seek target {target} ms outside 0..={duration} ms")]
    SeekOutOfRange { target: i64, duration: i64 },
    #[error("No {kind} stream with id {id}")]
    UnknownStream { kind: MediaKind, id: usize },
    #[error("No active {0} stream")]
    NoActiveStream(MediaKind),
    #[error("Failed to start decode worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Decode worker panicked")]
    WorkerLost,
}

pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit, native endian, interleaved
    S16,
}

/// What an audio device must be opened with to play this file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// Sample frames per device callback
    pub samples: u16,
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct EndFlags {
    audio: bool,
    video: bool,
}

impl EndFlags {
    fn get(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }

    fn set(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::Audio => self.audio = true,
            MediaKind::Video => self.video = true,
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// State reachable from both the consumer and the decode worker
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) streams: Vec<StreamBuffer>,
    pub(crate) clock: PlaybackClock,
    pub(crate) seek: SeekController,
    pub(crate) wakeup: Wakeup,
    pub(crate) running: AtomicBool,
    pub(crate) ends: Mutex<EndFlags>,
    pub(crate) duration_ms: i64,
}

impl Shared {
    pub(crate) fn new(config: EngineConfig, streams: Vec<StreamBuffer>, duration_ms: i64) -> Self {
        Self {
            config,
            streams,
            clock: PlaybackClock::new(),
            seek: SeekController::new(),
            wakeup: Wakeup::new(),
            running: AtomicBool::new(false),
            ends: Mutex::new(EndFlags::default()),
            duration_ms,
        }
    }

    pub(crate) fn active(&self, kind: MediaKind) -> Option<&StreamBuffer> {
        self.streams.iter().find(|s| s.kind() == kind && s.is_active())
    }

    /// Undecoded bytes queued across the active streams
    pub(crate) fn preloaded(&self) -> usize {
        self.streams
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.preloaded_bytes())
            .sum()
    }

    fn flush(&self) {
        for stream in &self.streams {
            stream.flush();
        }
        self.ends.lock().clear();
        self.wakeup.notify();
    }
}

type WorkerBody = Box<dyn FnOnce() -> Option<Backend> + Send>;

enum WorkerSlot {
    Idle(Backend),
    /// The thread hands the backend back when it exits, `None` if it never got it
    Running(JoinHandle<Option<Backend>>),
    /// The worker panicked and took the container with it
    Lost,
}

// ============================================================================
// Media File
// ============================================================================

pub struct MediaFile {
    path: PathBuf,
    shared: Arc<Shared>,
    worker: Mutex<WorkerSlot>,
    selection: Mutex<()>,
}

impl MediaFile {
    /// Open `path` with the FFmpeg backend and default settings
    #[cfg(feature = "ffmpeg")]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let engine = crate::ffmpeg_engine::FfmpegEngine::new()?;
        Self::open_with(&engine, path, EngineConfig::default())
    }

    /// Open `path` through `engine`. Streams whose decoder cannot be opened
    /// are dropped; the first audio and first video stream start out active.
    pub fn open_with(engine: &dyn CodecEngine, path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        config.validate()?;

        let mut container = engine.open(&path)?;
        let mut streams = Vec::new();
        let mut contexts = Vec::new();

        for descriptor in container.streams() {
            match container.open_decoder(&descriptor) {
                Ok(decoder) => {
                    contexts.push(DecodeContext::new(decoder));
                    streams.push(StreamBuffer::new(descriptor, &config));
                }
                Err(e) => {
                    tracing::warn!(
                        "Dropping {} stream {} ({}): {}",
                        descriptor.kind,
                        descriptor.index,
                        descriptor.codec_name,
                        e
                    );
                }
            }
        }

        if streams.is_empty() {
            return Err(MediaError::NoStreams(path.display().to_string()));
        }

        for kind in [MediaKind::Audio, MediaKind::Video] {
            if let Some(stream) = streams.iter().find(|s| s.kind() == kind) {
                stream.set_active(true);
            }
        }

        let duration_ms = container.duration_ms();
        tracing::info!(
            "Opened {} ({} streams, {} ms)",
            path.display(),
            streams.len(),
            duration_ms
        );

        Ok(Self {
            path,
            shared: Arc::new(Shared::new(config, streams, duration_ms)),
            worker: Mutex::new(WorkerSlot::Idle(Backend::new(container, contexts))),
            selection: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // ========================================================================
    // Streams
    // ========================================================================

    fn streams_of(&self, kind: MediaKind) -> impl Iterator<Item = &StreamBuffer> {
        self.shared.streams.iter().filter(move |s| s.kind() == kind)
    }

    pub fn audio_streams(&self) -> Vec<StreamDescriptor> {
        self.streams_of(MediaKind::Audio).map(|s| s.descriptor().clone()).collect()
    }

    pub fn video_streams(&self) -> Vec<StreamDescriptor> {
        self.streams_of(MediaKind::Video).map(|s| s.descriptor().clone()).collect()
    }

    pub fn audio_stream(&self) -> Option<StreamDescriptor> {
        self.shared.active(MediaKind::Audio).map(|s| s.descriptor().clone())
    }

    pub fn video_stream(&self) -> Option<StreamDescriptor> {
        self.shared.active(MediaKind::Video).map(|s| s.descriptor().clone())
    }

    pub fn has_audio(&self) -> bool {
        self.shared.active(MediaKind::Audio).is_some()
    }

    pub fn has_video(&self) -> bool {
        self.shared.active(MediaKind::Video).is_some()
    }

    /// Make the `id`-th audio stream active, or none
    pub fn select_audio_stream(&self, id: Option<usize>) -> Result<()> {
        self.select_stream(MediaKind::Audio, id)
    }

    /// Make the `id`-th video stream active, or none
    pub fn select_video_stream(&self, id: Option<usize>) -> Result<()> {
        self.select_stream(MediaKind::Video, id)
    }

    fn select_stream(&self, kind: MediaKind, id: Option<usize>) -> Result<()> {
        let _guard = self.selection.lock();

        let target = match id {
            Some(id) => Some(
                self.streams_of(kind)
                    .nth(id)
                    .ok_or(MediaError::UnknownStream { kind, id })?,
            ),
            None => None,
        };

        for stream in self.streams_of(kind) {
            let selected = target.is_some_and(|t| std::ptr::eq(t, stream));
            if stream.is_active() && !selected {
                stream.set_active(false);
                stream.flush();
            }
        }
        if let Some(stream) = target {
            if !stream.is_active() {
                stream.flush();
                stream.set_active(true);
            }
        }

        self.shared.ends.lock().clear();
        self.shared.wakeup.notify();
        tracing::debug!("Selected {} stream {:?}", kind, id);
        Ok(())
    }

    // ========================================================================
    // Decode Worker
    // ========================================================================

    pub fn start_decoding(&self) -> Result<()> {
        self.launch(|builder, body| builder.spawn(body))
    }

    /// Start the worker through `spawn`. The backend waits in a handoff cell
    /// until the thread takes it, so a failed spawn leaves the file idle and
    /// restartable.
    fn launch<F>(&self, spawn: F) -> Result<()>
    where
        F: FnOnce(thread::Builder, WorkerBody) -> io::Result<JoinHandle<Option<Backend>>>,
    {
        let mut slot = self.worker.lock();
        match std::mem::replace(&mut *slot, WorkerSlot::Lost) {
            WorkerSlot::Idle(backend) => {
                let handoff = Arc::new(Mutex::new(Some(backend)));
                let theirs = handoff.clone();
                let shared = self.shared.clone();
                let body: WorkerBody = Box::new(move || {
                    let backend = theirs.lock().take()?;
                    Some(DecodeWorker::new(shared, backend).run())
                });

                self.shared.running.store(true, Ordering::Release);
                match spawn(thread::Builder::new().name("mediasync-decode".into()), body) {
                    Ok(handle) => {
                        *slot = WorkerSlot::Running(handle);
                        tracing::info!("Decoding started for {}", self.path.display());
                        Ok(())
                    }
                    Err(e) => {
                        self.shared.running.store(false, Ordering::Release);
                        if let Some(backend) = handoff.lock().take() {
                            *slot = WorkerSlot::Idle(backend);
                        }
                        tracing::error!("Cannot start decode worker for {}: {}", self.path.display(), e);
                        Err(MediaError::Spawn(e))
                    }
                }
            }
            WorkerSlot::Lost => Err(MediaError::WorkerLost),
            running => {
                *slot = running;
                Ok(())
            }
        }
    }

    /// Ask the worker to finish its iteration and wait for it to exit
    pub fn stop_decoding(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        match std::mem::replace(&mut *slot, WorkerSlot::Lost) {
            WorkerSlot::Running(handle) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.wakeup.notify();
                match handle.join() {
                    Ok(Some(backend)) => {
                        *slot = WorkerSlot::Idle(backend);
                        tracing::info!("Decoding stopped for {}", self.path.display());
                        Ok(())
                    }
                    Ok(None) => {
                        tracing::error!("Decode worker for {} never received its backend", self.path.display());
                        Err(MediaError::WorkerLost)
                    }
                    Err(_) => {
                        tracing::error!("Decode worker for {} panicked", self.path.display());
                        Err(MediaError::WorkerLost)
                    }
                }
            }
            other => {
                *slot = other;
                Ok(())
            }
        }
    }

    pub fn is_decoding(&self) -> bool {
        matches!(*self.worker.lock(), WorkerSlot::Running(_))
    }

    // ========================================================================
    // Seek / Flush
    // ========================================================================

    /// Jump to `ms`. Buffered data is dropped right away; the worker
    /// repositions the reader on its next iteration.
    pub fn seek(&self, ms: i64) -> Result<()> {
        let duration = self.shared.duration_ms;
        if !(0..=duration).contains(&ms) {
            return Err(MediaError::SeekOutOfRange { target: ms, duration });
        }

        self.shared.seek.request_with(ms, || {
            self.shared.flush();
            self.shared.clock.set_origin(ms);
        });
        self.shared.wakeup.notify();
        tracing::debug!("Seek to {} ms requested", ms);
        Ok(())
    }

    pub fn seek_relative(&self, delta_ms: i64) -> Result<()> {
        let target = self
            .position()
            .checked_add(delta_ms)
            .ok_or(MediaError::SeekOutOfRange {
                target: if delta_ms > 0 { i64::MAX } else { i64::MIN },
                duration: self.shared.duration_ms,
            })?;
        self.seek(target)
    }

    /// Drop every queued packet and buffered frame except those in use
    pub fn flush(&self) {
        self.shared.flush();
        tracing::debug!("Flushed {}", self.path.display());
    }

    // ========================================================================
    // Playback Clock
    // ========================================================================

    /// `0` pauses, `n > 0` plays n passes, `-1` loops forever
    pub fn play(&self, count: i64) {
        self.shared.clock.play(count);
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.clock.state()
    }

    pub fn loop_count(&self) -> i64 {
        self.shared.clock.loop_count()
    }

    pub fn duration(&self) -> i64 {
        self.shared.duration_ms
    }

    pub fn position(&self) -> i64 {
        self.shared.clock.position()
    }

    pub fn video_size(&self) -> Option<(u32, u32)> {
        self.shared
            .active(MediaKind::Video)
            .map(|s| (s.descriptor().width, s.descriptor().height))
    }

    /// Undecoded bytes currently buffered
    pub fn preloaded(&self) -> usize {
        self.shared.preloaded()
    }

    pub fn buffered_frames(&self, kind: MediaKind) -> usize {
        self.shared.active(kind).map_or(0, |s| s.buffered_frames())
    }

    pub fn dropped_frames(&self, kind: MediaKind) -> u64 {
        self.shared.active(kind).map_or(0, |s| s.dropped_frames())
    }

    /// This stream has played out its pass and waits for its companion
    pub fn end_reached(&self, kind: MediaKind) -> bool {
        self.shared.ends.lock().get(kind)
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Set the active video stream's output format and allocate a frame for it
    pub fn create_video_frame(&self, format: OutputFormat) -> Result<VideoFrame> {
        let stream = self
            .shared
            .active(MediaKind::Video)
            .ok_or(MediaError::NoActiveStream(MediaKind::Video))?;
        stream.set_video_format(format);
        let d = stream.descriptor();
        Ok(VideoFrame::new(format, d.width, d.height))
    }

    /// Set the active audio stream's frame size and allocate a frame for it
    pub fn create_audio_frame(&self, bytes: usize) -> Result<AudioFrame> {
        let stream = self
            .shared
            .active(MediaKind::Audio)
            .ok_or(MediaError::NoActiveStream(MediaKind::Audio))?;
        Ok(AudioFrame::new(stream.set_audio_frame_bytes(bytes)))
    }

    fn may_deliver(&self, kind: MediaKind) -> Option<&StreamBuffer> {
        if self.shared.clock.is_paused() || self.shared.ends.lock().get(kind) {
            return None;
        }
        self.shared.active(kind)
    }

    /// Fill `frame` with the picture due now. Returns false if nothing is due;
    /// `frame` then still holds the previous picture.
    pub fn get_video_frame(&self, frame: &mut VideoFrame) -> bool {
        let Some(stream) = self.may_deliver(MediaKind::Video) else {
            return false;
        };
        let delivery = stream.take_video(self.position(), frame);
        self.settle(MediaKind::Video, delivery);
        delivery.delivered
    }

    /// Fill `frame` with the unplayed part of the audio frame due now. Pair
    /// every successful call with `release_audio`.
    pub fn get_audio_frame(&self, frame: &mut AudioFrame) -> bool {
        let Some(stream) = self.may_deliver(MediaKind::Audio) else {
            frame.buffer.clear();
            return false;
        };
        let delivery = stream.take_audio(self.position(), frame);
        self.settle(MediaKind::Audio, delivery);
        delivery.delivered
    }

    /// `bytes` of the last audio frame were played
    pub fn release_audio(&self, bytes: usize) {
        if let Some(stream) = self.shared.active(MediaKind::Audio) {
            if stream.release_audio(bytes) {
                self.shared.wakeup.notify();
            }
        }
    }

    /// Audio callback helper: copy due audio into `dest`, zero the rest.
    /// Returns the number of bytes that came from the stream.
    pub fn fill_audio_buffer(&self, dest: &mut [u8]) -> usize {
        let mut written = 0;

        while written < dest.len() {
            let Some(stream) = self.may_deliver(MediaKind::Audio) else {
                break;
            };
            let (n, delivery) = stream.read_audio(self.position(), &mut dest[written..]);
            self.settle(MediaKind::Audio, delivery);
            written += n;
            if n == 0 && !delivery.reached_end {
                break;
            }
        }

        dest[written..].fill(0);
        written
    }

    pub fn audio_spec(&self, samples: u16) -> AudioSpec {
        let (channels, sample_rate) = match self.shared.active(MediaKind::Audio) {
            Some(stream) => {
                let d = stream.descriptor();
                (d.channels, d.sample_rate)
            }
            None => (self.shared.config.default_channels, self.shared.config.default_sample_rate),
        };
        AudioSpec {
            format: SampleFormat::S16,
            channels: if channels == 0 { self.shared.config.default_channels } else { channels },
            sample_rate: if sample_rate == 0 { self.shared.config.default_sample_rate } else { sample_rate },
            samples,
        }
    }

    /// Bookkeeping after a selector call: wake the worker for freed slots and
    /// run end-of-pass handling
    fn settle(&self, kind: MediaKind, delivery: Delivery) {
        if delivery.freed {
            self.shared.wakeup.notify();
        }
        if !delivery.reached_end {
            return;
        }

        let companion = kind.companion();
        let mut ends = self.shared.ends.lock();
        if self.shared.active(companion).is_some() && !ends.get(companion) {
            ends.set(kind);
            tracing::debug!("{} reached end of pass, waiting for {}", kind, companion);
            return;
        }
        ends.clear();
        drop(ends);

        let again = self.shared.clock.complete_pass();
        tracing::debug!("Pass complete, {}", if again { "looping" } else { "pausing" });
    }

    /// Consumes the handle. Everything happens in `Drop`: the worker is
    /// stopped and joined, every stream is flushed, then the container and
    /// codec contexts are released.
    pub fn close(self) {}
}

impl Drop for MediaFile {
    fn drop(&mut self) {
        if let Err(e) = self.stop_decoding() {
            tracing::warn!("Closing {}: {}", self.path.display(), e);
        }
        self.shared.flush();
        *self.worker.lock() = WorkerSlot::Lost;
        tracing::info!("Closed {}", self.path.display());
    }
}

// ============================================================================
// Tests
// ============================================================================
