//! Playback clock
//!
//! Maps wall-clock time onto the media timeline. Both frame selectors read
//! the same clock, which is the only thing keeping audio and video in step.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Loop count meaning "repeat until told otherwise"
pub const LOOP_FOREVER: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Paused,
    Playing,
}

struct ClockState {
    start: Instant,
    /// Media position (ms) at `start`
    offset_ms: i64,
    /// 0 = paused, negative = forever, positive = passes left
    loop_count: i64,
}

pub struct PlaybackClock {
    state: Mutex<ClockState>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                start: Instant::now(),
                offset_ms: 0,
                loop_count: 0,
            }),
        }
    }

    fn position_of(state: &ClockState) -> i64 {
        if state.loop_count == 0 {
            state.offset_ms
        } else {
            state.offset_ms + state.start.elapsed().as_millis() as i64
        }
    }

    /// Current media position in milliseconds
    pub fn position(&self) -> i64 {
        Self::position_of(&self.state.lock())
    }

    pub fn state(&self) -> PlaybackState {
        if self.state.lock().loop_count == 0 {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }

    pub fn loop_count(&self) -> i64 {
        self.state.lock().loop_count
    }

    /// `0` pauses, anything else plays that many passes (negative: forever)
    pub fn play(&self, count: i64) {
        let mut state = self.state.lock();
        if count == 0 {
            state.offset_ms = Self::position_of(&state);
        } else if state.loop_count == 0 {
            state.start = Instant::now();
        }
        state.loop_count = count;
    }

    /// Jump the timeline to `ms` without changing play/pause
    pub fn set_origin(&self, ms: i64) {
        let mut state = self.state.lock();
        state.offset_ms = ms;
        state.start = Instant::now();
    }

    /// Every active stream has played out the current pass. Returns true if
    /// playback continues with another pass.
    pub fn complete_pass(&self) -> bool {
        let mut state = self.state.lock();
        if state.loop_count > 0 {
            state.loop_count -= 1;
        }
        state.offset_ms = 0;
        state.start = Instant::now();
        state.loop_count != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_starts_paused_at_zero() {
        let clock = PlaybackClock::new();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.position(), 0);
        assert_eq!(clock.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let clock = PlaybackClock::new();
        clock.play(LOOP_FOREVER);
        thread::sleep(Duration::from_millis(30));

        clock.play(0);
        let paused_at = clock.position();
        assert!(paused_at >= 30);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(clock.position(), paused_at);

        clock.play(LOOP_FOREVER);
        let resumed = clock.position();
        assert!(resumed >= paused_at && resumed < paused_at + 20);
    }

    #[test]
    fn test_play_while_playing_keeps_reference() {
        let clock = PlaybackClock::new();
        clock.play(1);
        thread::sleep(Duration::from_millis(20));
        clock.play(3);
        assert!(clock.position() >= 20);
        assert_eq!(clock.loop_count(), 3);
    }

    #[test]
    fn test_set_origin() {
        let clock = PlaybackClock::new();
        clock.set_origin(5000);
        assert_eq!(clock.position(), 5000);
        assert!(clock.is_paused());
    }

    #[test]
    fn test_complete_pass_counts_down() {
        let clock = PlaybackClock::new();
        clock.play(2);
        clock.set_origin(9000);

        assert!(clock.complete_pass());
        assert!(clock.position() < 20);
        assert!(!clock.complete_pass());
        assert_eq!(clock.state(), PlaybackState::Paused);
        assert_eq!(clock.position(), 0);
    }

    #[test]
    fn test_loop_forever_never_runs_out() {
        let clock = PlaybackClock::new();
        clock.play(LOOP_FOREVER);
        for _ in 0..5 {
            assert!(clock.complete_pass());
        }
        assert_eq!(clock.loop_count(), LOOP_FOREVER);
    }
}
