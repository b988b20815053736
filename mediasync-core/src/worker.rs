//! # Decode Worker
//!
//! One background thread per open file. Each iteration it
//!
//! 1. applies a pending seek (user seek or loop restart),
//! 2. reads one packet from the container unless the preload budget is spent,
//! 3. gives every active stream one decode step,
//!
//! and parks on the file's wake signal when none of that made progress.
//! The container, the codec contexts and the reader position bookkeeping
//! belong to the worker while it runs and are handed back through the join
//! handle when it stops, so a restarted worker picks up where this one left.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::codec::{Container, DecodedFrame, FramePayload, MediaKind, Packet, StreamDecoder};
use crate::media_file::Shared;
use crate::pixel_convert::{self, ColorSpace};
use crate::seek::{SeekReason, SeekRequest};
use crate::stream_buffer::{QueueEntry, StreamBuffer};

// ============================================================================
// Per-Stream Decode State
// ============================================================================

/// Codec context plus everything the worker remembers about one stream
pub(crate) struct DecodeContext {
    decoder: Box<dyn StreamDecoder>,
    /// Buffer epoch this context last synchronised with
    seen_epoch: u64,
    /// Passes completed so far
    pass: u64,
    last_timestamp: Option<i64>,
    /// Decoded audio not yet cut into frames
    scratch: Vec<u8>,
    scratch_origin: i64,
    scratch_emitted: usize,
    /// Conversion target, recycled through the slot arena
    pixels: Vec<u8>,
    /// Frames the codec released when drained at end of pass
    drained: VecDeque<DecodedFrame>,
    /// End-of-pass marker seen; the pass closes once `drained` is empty
    closing: bool,
}

impl DecodeContext {
    pub(crate) fn new(decoder: Box<dyn StreamDecoder>) -> Self {
        Self {
            decoder,
            seen_epoch: 0,
            pass: 0,
            last_timestamp: None,
            scratch: Vec::new(),
            scratch_origin: 0,
            scratch_emitted: 0,
            pixels: Vec::new(),
            drained: VecDeque::new(),
            closing: false,
        }
    }

    /// A flush happened since we last looked: whatever the codec holds
    /// belongs to the old position
    fn sync_epoch(&mut self, epoch: u64) {
        if epoch != self.seen_epoch {
            self.decoder.flush();
            self.scratch.clear();
            self.drained.clear();
            self.closing = false;
            self.last_timestamp = None;
            self.seen_epoch = epoch;
        }
    }

    fn scratch_pts(&self, stream: &StreamBuffer) -> i64 {
        self.scratch_origin + stream.descriptor().bytes_to_ms(self.scratch_emitted)
    }

    fn emit_audio(&mut self, stream: &StreamBuffer, len: usize) {
        let len = len.min(self.scratch.len());
        let pts = self.scratch_pts(stream);
        if !stream.commit_audio(self.seen_epoch, self.pass, pts, &self.scratch[..len]) {
            tracing::trace!("audio frame at {} ms discarded (stale epoch)", pts);
        }
        self.scratch.drain(..len);
        self.scratch_emitted += len;
    }

    /// Ask the codec for the frames it still holds back
    fn begin_closing(&mut self, stream: &StreamBuffer) {
        self.drained = self.decoder.drain().into();
        self.closing = true;
        if !self.drained.is_empty() {
            tracing::trace!("{} stream {} drained {} held frames", stream.kind(), stream.index(), self.drained.len());
        }
    }

    fn finish_pass(&mut self, stream: &StreamBuffer) {
        if !self.scratch.is_empty() {
            let len = self.scratch.len();
            self.emit_audio(stream, len);
        }
        stream.mark_end_of_pass(self.seen_epoch, self.pass);
        tracing::debug!("{} stream {} finished pass {}", stream.kind(), stream.index(), self.pass);

        self.pass += 1;
        self.closing = false;
        self.decoder.flush();
        self.last_timestamp = None;
    }

    fn decode_packet(
        &mut self,
        stream: &StreamBuffer,
        packet: Packet,
        epoch: u64,
        gate: Option<i64>,
        color_space: ColorSpace,
    ) {
        let ts = match packet.timestamp() {
            Some(ts) => ts,
            None => self
                .last_timestamp
                .map_or(0, |last| last + stream.descriptor().frame_duration_ms),
        };
        self.last_timestamp = Some(ts);
        let hurry = gate.is_some_and(|gate| ts < gate);

        match self.decoder.decode(&packet, hurry) {
            Ok(Some(frame)) => self.deliver(stream, frame, ts, epoch, gate, color_space),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("{} stream {}: packet at {} ms skipped: {}", stream.kind(), stream.index(), ts, e);
            }
        }
    }

    /// Convert and commit one decoded frame; `ts` stands in when the codec
    /// gave no pts
    fn deliver(
        &mut self,
        stream: &StreamBuffer,
        frame: DecodedFrame,
        ts: i64,
        epoch: u64,
        gate: Option<i64>,
        color_space: ColorSpace,
    ) {
        let pts = frame.pts.unwrap_or(ts);
        if gate.is_some_and(|gate| pts < gate) {
            tracing::trace!("{} frame at {} ms hurried", stream.kind(), pts);
            return;
        }

        match (stream.kind(), frame.payload) {
            (MediaKind::Video, FramePayload::Video(picture)) => {
                let format = stream.video_format();
                pixel_convert::convert(&picture, format, color_space, &mut self.pixels);
                let committed = stream.commit_video(
                    epoch,
                    self.pass,
                    pts,
                    picture.width as u32,
                    picture.height as u32,
                    format,
                    &mut self.pixels,
                );
                if !committed {
                    tracing::trace!("video frame at {} ms discarded (stale epoch)", pts);
                }
            }
            (MediaKind::Audio, FramePayload::Audio(samples)) => {
                if self.scratch.is_empty() {
                    self.scratch_origin = pts;
                    self.scratch_emitted = 0;
                }
                self.scratch.extend_from_slice(&samples);
            }
            (kind, _) => {
                tracing::warn!("{} stream {} decoder produced the wrong frame type", kind, stream.index());
            }
        }
    }
}

/// Everything only the worker may touch: the container reader, one decode
/// context per stream (aligned with `Shared::streams`) and where the reader
/// stands since its last reposition
pub(crate) struct Backend {
    pub(crate) container: Box<dyn Container>,
    pub(crate) contexts: Vec<DecodeContext>,
    /// Minimal timestamp worth presenting; set by user seeks only
    gate: Option<i64>,
    /// Packets routed to an active stream since the last reposition
    routed: u64,
    /// Hit end of stream without routing anything; wait for a seek
    exhausted: bool,
}

impl Backend {
    pub(crate) fn new(container: Box<dyn Container>, contexts: Vec<DecodeContext>) -> Self {
        Self {
            container,
            contexts,
            gate: None,
            routed: 0,
            exhausted: false,
        }
    }
}

// ============================================================================
// Worker Loop
// ============================================================================

pub(crate) struct DecodeWorker {
    shared: Arc<Shared>,
    backend: Backend,
}

impl DecodeWorker {
    pub(crate) fn new(shared: Arc<Shared>, backend: Backend) -> Self {
        Self { shared, backend }
    }

    pub(crate) fn run(mut self) -> Backend {
        tracing::debug!("Decode worker started");
        let idle = self.shared.config.idle_wait();

        while self.shared.running.load(Ordering::Acquire) {
            if !self.step() {
                self.shared.wakeup.wait_for(idle);
            }
        }

        tracing::debug!("Decode worker stopped");
        self.backend
    }

    /// One loop iteration; returns true if anything happened
    pub(crate) fn step(&mut self) -> bool {
        let mut progressed = false;

        if let Some(request) = self.shared.seek.take_pending() {
            self.reposition(request);
            progressed = true;
        }

        let active: Vec<usize> = self
            .shared
            .streams
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active())
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() {
            return progressed;
        }

        if self.shared.preloaded() < self.shared.config.preload_bytes {
            progressed |= self.read_one(&active);
        }

        for idx in active {
            progressed |= self.decode_one(idx);
        }
        progressed
    }

    fn reposition(&mut self, request: SeekRequest) {
        let backend = &mut self.backend;
        if let Err(e) = backend.container.seek(request.target_ms) {
            tracing::warn!("Container seek to {} ms failed: {}", request.target_ms, e);
        }

        match request.reason {
            SeekReason::User => {
                // packets read between the caller's flush and now came from
                // the old position
                for stream in &self.shared.streams {
                    stream.flush();
                }
                self.shared.clock.set_origin(request.target_ms);
                backend.gate = Some(request.target_ms);
            }
            SeekReason::Loop => {
                backend.gate = None;
            }
        }

        backend.routed = 0;
        backend.exhausted = false;
        tracing::debug!("Repositioned to {} ms ({:?})", request.target_ms, request.reason);
    }

    fn read_one(&mut self, active: &[usize]) -> bool {
        if self.backend.exhausted {
            return false;
        }

        // a flush between here and the enqueue means the packet came from
        // before a pending seek
        let epochs: Vec<u64> = active.iter().map(|&i| self.shared.streams[i].epoch()).collect();

        let packet = match self.backend.container.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => return self.end_of_stream(active),
            Err(e) => {
                tracing::warn!("Read error, treating as end of stream: {}", e);
                return self.end_of_stream(active);
            }
        };

        if self.shared.seek.is_pending() {
            tracing::trace!("Dropping packet read before a pending seek");
            return true;
        }

        let target = active
            .iter()
            .zip(&epochs)
            .map(|(&i, &epoch)| (&self.shared.streams[i], epoch))
            .find(|(s, _)| s.index() == packet.stream_index);

        match target {
            Some((stream, epoch)) => {
                if stream.enqueue_at(packet, epoch) {
                    self.backend.routed += 1;
                } else {
                    tracing::trace!("Dropping packet read across a flush");
                }
            }
            None => tracing::trace!("Dropping packet for inactive stream {}", packet.stream_index),
        }
        true
    }

    fn end_of_stream(&mut self, active: &[usize]) -> bool {
        let backend = &mut self.backend;
        if backend.routed == 0 {
            if !backend.exhausted {
                tracing::debug!("End of stream with nothing routed, waiting for a seek");
            }
            backend.exhausted = true;
            return false;
        }

        for &idx in active {
            self.shared.streams[idx].enqueue_end_of_pass();
        }
        self.shared.seek.request_loop();
        backend.routed = 0;
        true
    }

    fn decode_one(&mut self, idx: usize) -> bool {
        let stream = &self.shared.streams[idx];
        let gate = self.backend.gate;
        let color_space = self.shared.config.color_space;
        let ctx = &mut self.backend.contexts[idx];

        ctx.sync_epoch(stream.epoch());
        if !stream.has_free_slot() {
            return false;
        }

        if let Some(frame) = ctx.drained.pop_front() {
            let ts = ctx.last_timestamp.unwrap_or(0);
            let epoch = ctx.seen_epoch;
            ctx.deliver(stream, frame, ts, epoch, gate, color_space);
            return true;
        }

        if stream.kind() == MediaKind::Audio {
            let chunk = stream.audio_frame_bytes();
            if ctx.scratch.len() >= chunk {
                ctx.emit_audio(stream, chunk);
                return true;
            }
        }

        if ctx.closing {
            ctx.finish_pass(stream);
            return true;
        }

        let Some((entry, epoch)) = stream.dequeue_next() else {
            return false;
        };
        ctx.sync_epoch(epoch);

        match entry {
            QueueEntry::EndOfPass => ctx.begin_closing(stream),
            QueueEntry::Packet(packet) => ctx.decode_packet(stream, packet, epoch, gate, color_space),
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
