//! # Stream Buffer - per-stream packet FIFO and decoded frame slots
//!
//! Each elementary stream owns one of these. The decode worker pushes
//! compressed packets in, pops them out again to decode, and commits the
//! results into a fixed arena of frame slots. The consumer pulls due frames
//! back out through the frame selector.
//!
//! ```text
//!  reader ──► [ packet queue ] ──► worker ──► [ slot | slot | slot ... ] ──► consumer
//!                   ▲                                      ▲
//!                   └──────────── flush (epoch++) ─────────┘
//! ```
//!
//! Every slot is tagged `Empty`, `Filled` or `InUse`. Only the worker moves
//! a slot out of `Empty`; only the selector moves one to `InUse`; the slot in
//! use is never written, dropped, or flushed.
//!
//! A *pass* is one run through the file from its start (or a seek point) to
//! end of stream. Frames are only ever selected from the oldest pass still
//! buffered, so a loop restart cannot interleave with the tail of the
//! previous run.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use crate::codec::{MediaKind, Packet, StreamDescriptor};
use crate::config::EngineConfig;
use crate::pixel_convert::OutputFormat;

// ============================================================================
// Consumer Frames
// ============================================================================

/// Caller-owned picture storage filled by `get_video_frame`
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: i64,
    pub ready: bool,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(format: OutputFormat, width: u32, height: u32) -> Self {
        Self {
            pts: 0,
            ready: false,
            width,
            height,
            format,
            data: vec![0u8; format.buffer_size(width as usize, height as usize)],
        }
    }

    /// Bytes per row of `data`
    pub fn pitch(&self) -> usize {
        self.format.row_bytes(self.width as usize)
    }
}

/// Caller-owned sample storage filled by `get_audio_frame`
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: i64,
    /// Most bytes one fetch will hand out
    pub capacity: usize,
    /// Interleaved S16 samples still to be played
    pub buffer: Vec<u8>,
}

impl AudioFrame {
    pub fn new(capacity: usize) -> Self {
        Self {
            pts: 0,
            capacity,
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }
}

// ============================================================================
// Slots
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Empty,
    Filled,
    InUse,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    pts: i64,
    /// Commit order, breaks pts ties
    seq: u64,
    pass: u64,
    data: Vec<u8>,
    /// Audio bytes already handed to the consumer
    offset: usize,
    width: u32,
    height: u32,
    format: OutputFormat,
}

impl Slot {
    fn new(format: OutputFormat) -> Self {
        Self {
            state: SlotState::Empty,
            pts: 0,
            seq: 0,
            pass: 0,
            data: Vec::new(),
            offset: 0,
            width: 0,
            height: 0,
            format,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    fn clear(&mut self) {
        self.state = SlotState::Empty;
        self.offset = 0;
    }
}

/// Something the worker pulls off the packet queue
#[derive(Debug)]
pub(crate) enum QueueEntry {
    Packet(Packet),
    /// The container ran dry; everything queued before this belongs to the
    /// pass that just ended
    EndOfPass,
}

/// Outcome of one frame selector call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub delivered: bool,
    /// At least one slot went back to `Empty`
    pub freed: bool,
    /// The oldest pass has been fully handed out
    pub reached_end: bool,
}

// ============================================================================
// Buffer
// ============================================================================

struct BufferState {
    active: bool,
    queue: VecDeque<QueueEntry>,
    queued_bytes: usize,
    slots: Vec<Slot>,
    in_use: Option<usize>,
    epoch: u64,
    next_seq: u64,
    /// Passes whose end marker the worker has decoded, oldest first
    pending_ends: VecDeque<u64>,
    video_format: OutputFormat,
    audio_frame_bytes: usize,
    dropped: u64,
}

impl BufferState {
    fn is_ready(&self, slot: &Slot) -> bool {
        slot.state == SlotState::Filled && slot.remaining() > 0
    }

    fn oldest_pass(&self) -> Option<u64> {
        self.slots.iter().filter(|s| self.is_ready(s)).map(|s| s.pass).min()
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == SlotState::Empty)
    }

    fn push_packet(&mut self, packet: Packet, epoch: u64) -> bool {
        if !self.active || self.epoch != epoch {
            return false;
        }
        self.queued_bytes += packet.size();
        self.queue.push_back(QueueEntry::Packet(packet));
        true
    }

    fn release_in_use(&mut self) -> bool {
        match self.in_use.take() {
            Some(idx) => {
                self.slots[idx].clear();
                true
            }
            None => false,
        }
    }

    /// Frame selector. Picks the newest due frame of the oldest pass,
    /// discarding every due frame it supersedes.
    fn select_due(&mut self, kind: MediaKind, position: i64) -> (Option<usize>, Delivery) {
        let mut delivery = Delivery::default();

        if kind == MediaKind::Audio {
            if let Some(idx) = self.in_use {
                if self.slots[idx].remaining() > 0 {
                    delivery.delivered = true;
                    return (Some(idx), delivery);
                }
            }
        }

        let oldest = self.oldest_pass();

        if let Some(&end) = self.pending_ends.front() {
            if oldest.map_or(true, |pass| pass > end) {
                self.pending_ends.pop_front();
                delivery.reached_end = true;
                return (None, delivery);
            }
        }

        let Some(pass) = oldest else {
            return (None, delivery);
        };

        let mut due: Vec<usize> = (0..self.slots.len())
            .filter(|&i| {
                let slot = &self.slots[i];
                self.is_ready(slot) && slot.pass == pass && slot.pts <= position
            })
            .collect();
        due.sort_by_key(|&i| (self.slots[i].pts, self.slots[i].seq));

        let Some(chosen) = due.pop() else {
            return (None, delivery);
        };

        for idx in due {
            self.slots[idx].clear();
            self.dropped += 1;
            delivery.freed = true;
        }

        delivery.freed |= self.release_in_use();
        self.slots[chosen].state = SlotState::InUse;
        self.in_use = Some(chosen);
        delivery.delivered = true;

        if let Some(&end) = self.pending_ends.front() {
            let more = self
                .slots
                .iter()
                .any(|s| self.is_ready(s) && s.pass <= end);
            if pass == end && !more {
                self.pending_ends.pop_front();
                delivery.reached_end = true;
            }
        }

        (Some(chosen), delivery)
    }
}

/// Packet queue and frame slots of one elementary stream
pub struct StreamBuffer {
    descriptor: StreamDescriptor,
    state: Mutex<BufferState>,
}

impl StreamBuffer {
    pub fn new(descriptor: StreamDescriptor, config: &EngineConfig) -> Self {
        let count = match descriptor.kind {
            MediaKind::Video => config.video_slots,
            MediaKind::Audio => config.audio_slots,
        };
        let block = descriptor.sample_block();
        let slots = (0..count).map(|_| Slot::new(config.video_format)).collect();

        Self {
            state: Mutex::new(BufferState {
                active: false,
                queue: VecDeque::new(),
                queued_bytes: 0,
                slots,
                in_use: None,
                epoch: 0,
                next_seq: 0,
                pending_ends: VecDeque::new(),
                video_format: config.video_format,
                audio_frame_bytes: (config.audio_frame_bytes / block).max(1) * block,
                dropped: 0,
            }),
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> MediaKind {
        self.descriptor.kind
    }

    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn video_format(&self) -> OutputFormat {
        self.state.lock().video_format
    }

    pub(crate) fn set_video_format(&self, format: OutputFormat) {
        self.state.lock().video_format = format;
    }

    pub fn audio_frame_bytes(&self) -> usize {
        self.state.lock().audio_frame_bytes
    }

    /// Rounds down to whole sample frames; returns the size actually used
    pub(crate) fn set_audio_frame_bytes(&self, bytes: usize) -> usize {
        let block = self.descriptor.sample_block();
        let bytes = (bytes / block).max(1) * block;
        self.state.lock().audio_frame_bytes = bytes;
        bytes
    }

    // ========================================================================
    // Packet Queue
    // ========================================================================

    /// Append a packet; returns false (dropping it) when the stream is inactive
    pub fn enqueue(&self, packet: Packet) -> bool {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        state.push_packet(packet, epoch)
    }

    /// Like `enqueue`, but refuses a packet read before a flush that
    /// happened since `epoch`
    pub(crate) fn enqueue_at(&self, packet: Packet, epoch: u64) -> bool {
        self.state.lock().push_packet(packet, epoch)
    }

    pub(crate) fn enqueue_end_of_pass(&self) -> bool {
        let mut state = self.state.lock();
        if !state.active {
            return false;
        }
        state.queue.push_back(QueueEntry::EndOfPass);
        true
    }

    /// Pop the head entry together with the epoch it was queued in
    pub(crate) fn dequeue_next(&self) -> Option<(QueueEntry, u64)> {
        let mut state = self.state.lock();
        let entry = state.queue.pop_front()?;
        if let QueueEntry::Packet(packet) = &entry {
            state.queued_bytes -= packet.size();
        }
        Some((entry, state.epoch))
    }

    pub fn preloaded_bytes(&self) -> usize {
        self.state.lock().queued_bytes
    }

    pub fn queued_entries(&self) -> usize {
        self.state.lock().queue.len()
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Drop queued packets and every frame except the one in use
    pub fn flush(&self) -> u64 {
        let mut state = self.state.lock();
        state.queue.clear();
        state.queued_bytes = 0;
        state.pending_ends.clear();

        let in_use = state.in_use;
        for (idx, slot) in state.slots.iter_mut().enumerate() {
            if Some(idx) != in_use {
                slot.clear();
            }
        }

        state.epoch += 1;
        state.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    // ========================================================================
    // Producer Side
    // ========================================================================

    pub fn has_free_slot(&self) -> bool {
        self.state.lock().free_slot().is_some()
    }

    /// Store a converted picture in the lowest free slot. The slot's old
    /// allocation is handed back through `pixels` for reuse. Fails when the
    /// stream was flushed since `epoch` or no slot is free.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn commit_video(
        &self,
        epoch: u64,
        pass: u64,
        pts: i64,
        width: u32,
        height: u32,
        format: OutputFormat,
        pixels: &mut Vec<u8>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        let Some(idx) = state.free_slot() else {
            return false;
        };
        let seq = state.next_seq;
        state.next_seq += 1;

        let slot = &mut state.slots[idx];
        debug_assert_eq!(slot.state, SlotState::Empty);
        std::mem::swap(&mut slot.data, pixels);
        slot.offset = 0;
        slot.pts = pts;
        slot.seq = seq;
        slot.pass = pass;
        slot.width = width;
        slot.height = height;
        slot.format = format;
        slot.state = SlotState::Filled;
        true
    }

    pub(crate) fn commit_audio(&self, epoch: u64, pass: u64, pts: i64, samples: &[u8]) -> bool {
        if samples.is_empty() {
            return false;
        }
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        let Some(idx) = state.free_slot() else {
            return false;
        };
        let seq = state.next_seq;
        state.next_seq += 1;

        let slot = &mut state.slots[idx];
        debug_assert_eq!(slot.state, SlotState::Empty);
        slot.data.clear();
        slot.data.extend_from_slice(samples);
        slot.offset = 0;
        slot.pts = pts;
        slot.seq = seq;
        slot.pass = pass;
        slot.state = SlotState::Filled;
        true
    }

    /// The worker has emitted every frame of `pass`
    pub(crate) fn mark_end_of_pass(&self, epoch: u64, pass: u64) {
        let mut state = self.state.lock();
        if state.epoch == epoch {
            state.pending_ends.push_back(pass);
        }
    }

    // ========================================================================
    // Consumer Side
    // ========================================================================

    /// Hand the due picture to `frame`, swapping buffers with the slot
    pub(crate) fn take_video(&self, position: i64, frame: &mut VideoFrame) -> Delivery {
        let mut state = self.state.lock();
        let (chosen, delivery) = state.select_due(MediaKind::Video, position);

        if let Some(idx) = chosen {
            let slot = &mut state.slots[idx];
            std::mem::swap(&mut slot.data, &mut frame.data);
            frame.pts = slot.pts;
            frame.width = slot.width;
            frame.height = slot.height;
            frame.format = slot.format;
            frame.ready = true;
        }
        delivery
    }

    /// Copy the unconsumed part of the due audio frame into `frame`
    pub(crate) fn take_audio(&self, position: i64, frame: &mut AudioFrame) -> Delivery {
        let mut state = self.state.lock();
        let (chosen, delivery) = state.select_due(MediaKind::Audio, position);

        frame.buffer.clear();
        if let Some(idx) = chosen {
            let slot = &state.slots[idx];
            let len = slot.remaining().min(frame.capacity.max(1));
            frame.buffer.extend_from_slice(&slot.data[slot.offset..slot.offset + len]);
            frame.pts = slot.pts + self.descriptor.bytes_to_ms(slot.offset);
        }
        delivery
    }

    /// Mark `bytes` of the in-use audio frame as played; frees the slot once
    /// nothing is left. Returns true when a slot was freed.
    pub(crate) fn release_audio(&self, bytes: usize) -> bool {
        let mut state = self.state.lock();
        let Some(idx) = state.in_use else {
            return false;
        };
        let slot = &mut state.slots[idx];
        slot.offset = (slot.offset + bytes).min(slot.data.len());
        if slot.remaining() == 0 {
            state.release_in_use()
        } else {
            false
        }
    }

    /// Select, copy into `dest` and release in one step
    pub(crate) fn read_audio(&self, position: i64, dest: &mut [u8]) -> (usize, Delivery) {
        let mut state = self.state.lock();
        let (chosen, mut delivery) = state.select_due(MediaKind::Audio, position);

        let Some(idx) = chosen else {
            return (0, delivery);
        };
        let slot = &mut state.slots[idx];
        let len = slot.remaining().min(dest.len());
        dest[..len].copy_from_slice(&slot.data[slot.offset..slot.offset + len]);
        slot.offset += len;
        if slot.remaining() == 0 {
            delivery.freed |= state.release_in_use();
        }
        (len, delivery)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.state.lock().slots.iter().map(|s| s.state).collect()
    }

    /// Frames decoded and waiting to be selected
    pub fn buffered_frames(&self) -> usize {
        let state = self.state.lock();
        state.slots.iter().filter(|s| state.is_ready(s)).count()
    }

    /// Frames discarded by the selector because a newer one was due
    pub fn dropped_frames(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn in_use_pts(&self) -> Option<i64> {
        let state = self.state.lock();
        state.in_use.map(|idx| state.slots[idx].pts)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn video_buffer(slots: usize) -> StreamBuffer {
        let config = EngineConfig {
            video_slots: slots,
            ..Default::default()
        };
        let buffer = StreamBuffer::new(StreamDescriptor::video(0, "test", 2, 2, 33), &config);
        buffer.set_active(true);
        buffer
    }

    fn audio_buffer() -> StreamBuffer {
        let config = EngineConfig {
            audio_slots: 8,
            ..Default::default()
        };
        let buffer = StreamBuffer::new(StreamDescriptor::audio(1, "pcm", 48_000, 2), &config);
        buffer.set_active(true);
        buffer
    }

    fn commit(buffer: &StreamBuffer, pass: u64, pts: i64) -> bool {
        let mut pixels = vec![pts as u8; 16];
        buffer.commit_video(buffer.epoch(), pass, pts, 2, 2, OutputFormat::Rgba32, &mut pixels)
    }

    #[test]
    fn test_queue_accounting() {
        let buffer = video_buffer(4);
        buffer.enqueue(Packet::new(0, Some(0), vec![0u8; 100]));
        buffer.enqueue(Packet::new(0, Some(33), vec![0u8; 50]));
        assert_eq!(buffer.preloaded_bytes(), 150);

        let (entry, epoch) = buffer.dequeue_next().unwrap();
        assert!(matches!(entry, QueueEntry::Packet(p) if p.pts == Some(0)));
        assert_eq!(epoch, 0);
        assert_eq!(buffer.preloaded_bytes(), 50);
    }

    #[test]
    fn test_inactive_stream_drops_packets() {
        let buffer = video_buffer(4);
        buffer.set_active(false);
        assert!(!buffer.enqueue(Packet::new(0, Some(0), vec![1u8; 10])));
        assert_eq!(buffer.preloaded_bytes(), 0);
        assert!(buffer.dequeue_next().is_none());
    }

    #[test]
    fn test_packet_read_across_flush_refused() {
        let buffer = video_buffer(4);
        let epoch = buffer.epoch();
        buffer.flush();

        assert!(!buffer.enqueue_at(Packet::new(0, Some(0), vec![0u8; 10]), epoch));
        assert!(buffer.enqueue_at(Packet::new(0, Some(0), vec![0u8; 10]), buffer.epoch()));
        assert_eq!(buffer.preloaded_bytes(), 10);
    }

    #[test]
    fn test_frame_drop_rule() {
        let buffer = video_buffer(4);
        assert!(commit(&buffer, 0, 100));
        assert!(commit(&buffer, 0, 133));

        let mut frame = VideoFrame::new(OutputFormat::Rgba32, 2, 2);
        let delivery = buffer.take_video(150, &mut frame);

        assert!(delivery.delivered);
        assert_eq!(frame.pts, 133);
        assert_eq!(frame.data[0], 133);
        assert_eq!(
            buffer.slot_states(),
            vec![SlotState::Empty, SlotState::InUse, SlotState::Empty, SlotState::Empty]
        );
        assert_eq!(buffer.dropped_frames(), 1);
    }

    #[test]
    fn test_future_frames_wait() {
        let buffer = video_buffer(4);
        commit(&buffer, 0, 100);
        commit(&buffer, 0, 200);

        let mut frame = VideoFrame::new(OutputFormat::Rgba32, 2, 2);
        assert!(!buffer.take_video(50, &mut frame).delivered);
        assert!(buffer.take_video(150, &mut frame).delivered);
        assert_eq!(frame.pts, 100);
        assert_eq!(buffer.dropped_frames(), 0);

        // previous in-use slot is released once the next frame is selected
        assert!(buffer.take_video(250, &mut frame).delivered);
        assert_eq!(frame.pts, 200);
        assert_eq!(buffer.slot_states()[0], SlotState::Empty);
    }

    #[test]
    fn test_in_use_slot_never_overwritten() {
        let buffer = video_buffer(2);
        commit(&buffer, 0, 0);
        let mut frame = VideoFrame::new(OutputFormat::Rgba32, 2, 2);
        buffer.take_video(0, &mut frame);

        assert!(commit(&buffer, 0, 33));
        // slot 0 in use, slot 1 filled: nothing left to write into
        assert!(!buffer.has_free_slot());
        assert!(!commit(&buffer, 0, 66));
        assert_eq!(buffer.slot_states(), vec![SlotState::InUse, SlotState::Filled]);
    }

    #[test]
    fn test_flush_keeps_in_use_and_is_idempotent() {
        let buffer = video_buffer(3);
        commit(&buffer, 0, 0);
        commit(&buffer, 0, 33);
        let mut frame = VideoFrame::new(OutputFormat::Rgba32, 2, 2);
        buffer.take_video(10, &mut frame);
        buffer.enqueue(Packet::new(0, Some(66), vec![0u8; 40]));

        let first = buffer.flush();
        let states = buffer.slot_states();
        let second = buffer.flush();

        assert_eq!(second, first + 1);
        assert_eq!(buffer.slot_states(), states);
        assert_eq!(states, vec![SlotState::InUse, SlotState::Empty, SlotState::Empty]);
        assert_eq!(buffer.preloaded_bytes(), 0);
        assert_eq!(buffer.queued_entries(), 0);
    }

    #[test]
    fn test_stale_epoch_commit_rejected() {
        let buffer = video_buffer(2);
        let epoch = buffer.epoch();
        buffer.flush();

        let mut pixels = vec![0u8; 16];
        assert!(!buffer.commit_video(epoch, 0, 0, 2, 2, OutputFormat::Rgba32, &mut pixels));
        assert!(!buffer.commit_audio(epoch, 0, 0, &[0u8; 4]));
        assert_eq!(buffer.buffered_frames(), 0);
    }

    #[test]
    fn test_audio_partial_consumption() {
        let buffer = audio_buffer();
        let epoch = buffer.epoch();
        assert!(buffer.commit_audio(epoch, 0, 0, &[1u8; 4096]));
        // 4096 bytes of 48kHz stereo S16 is 21 ms
        assert!(buffer.commit_audio(epoch, 0, 21, &[2u8; 1904]));

        let mut frame = AudioFrame::new(4096);
        assert!(buffer.take_audio(5, &mut frame).delivered);
        assert_eq!(frame.size(), 4096);

        // half played: the same frame comes back shrunk
        buffer.release_audio(2048);
        assert!(buffer.take_audio(10, &mut frame).delivered);
        assert_eq!(frame.size(), 2048);
        assert_eq!(frame.pts, 10);

        assert!(buffer.release_audio(2048));
        assert!(buffer.take_audio(25, &mut frame).delivered);
        assert_eq!(frame.size(), 1904);
        assert!(frame.buffer.iter().all(|&b| b == 2));
    }

    #[test]
    fn test_read_audio_releases_consumed() {
        let buffer = audio_buffer();
        buffer.commit_audio(buffer.epoch(), 0, 0, &[7u8; 100]);

        let mut dest = [0u8; 64];
        let (n, _) = buffer.read_audio(0, &mut dest);
        assert_eq!(n, 64);
        let (n, delivery) = buffer.read_audio(0, &mut dest);
        assert_eq!(n, 36);
        assert!(delivery.freed);
        assert_eq!(buffer.slot_states()[0], SlotState::Empty);
    }

    #[test]
    fn test_audio_frame_bytes_rounded_to_sample_frames() {
        let buffer = audio_buffer();
        assert_eq!(buffer.set_audio_frame_bytes(4099), 4096);
        assert_eq!(buffer.set_audio_frame_bytes(1), 4);
    }

    #[test]
    fn test_end_of_pass_reported_after_last_frame() {
        let buffer = video_buffer(4);
        commit(&buffer, 0, 0);
        commit(&buffer, 0, 33);
        buffer.mark_end_of_pass(buffer.epoch(), 0);
        commit(&buffer, 1, 0);

        let mut frame = VideoFrame::new(OutputFormat::Rgba32, 2, 2);
        let delivery = buffer.take_video(10, &mut frame);
        assert_eq!(frame.pts, 0);
        assert!(!delivery.reached_end);

        // pass 1 frame at pts 0 is due too, but pass 0 still has a frame left
        let delivery = buffer.take_video(40, &mut frame);
        assert_eq!(frame.pts, 33);
        assert!(delivery.reached_end);

        let delivery = buffer.take_video(0, &mut frame);
        assert!(delivery.delivered);
        assert_eq!(frame.pts, 0);
    }

    #[test]
    fn test_end_of_pass_with_nothing_buffered() {
        let buffer = video_buffer(2);
        buffer.mark_end_of_pass(buffer.epoch(), 0);

        let mut frame = VideoFrame::new(OutputFormat::Rgba32, 2, 2);
        assert!(buffer.take_video(0, &mut frame).reached_end);
        assert!(!buffer.take_video(0, &mut frame).reached_end);
    }
}
