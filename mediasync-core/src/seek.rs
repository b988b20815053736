//! Seek/flush coordination between the consumer and the decode worker
//!
//! The consumer only records where it wants to be; the worker picks the
//! request up at the top of its next iteration and does the repositioning.
//! [`Wakeup`] is how either side gets the worker's attention early.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekReason {
    /// Requested through the public API
    User,
    /// The container ran out and playback restarts from the top
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub target_ms: i64,
    pub reason: SeekReason,
}

#[derive(Default)]
pub struct SeekController {
    pending: Mutex<Option<SeekRequest>>,
}

impl SeekController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A user request replaces whatever was pending
    pub fn request(&self, target_ms: i64) {
        self.request_with(target_ms, || {});
    }

    /// Record a user request and run `then` before the worker can pick it up
    pub fn request_with(&self, target_ms: i64, then: impl FnOnce()) {
        let mut pending = self.pending.lock();
        *pending = Some(SeekRequest {
            target_ms,
            reason: SeekReason::User,
        });
        then();
    }

    /// Restart from zero, unless the user already asked to go elsewhere
    pub fn request_loop(&self) {
        let mut pending = self.pending.lock();
        if pending.is_none() {
            *pending = Some(SeekRequest {
                target_ms: 0,
                reason: SeekReason::Loop,
            });
        }
    }

    pub fn take_pending(&self) -> Option<SeekRequest> {
        self.pending.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

// ============================================================================
// Worker Wakeup
// ============================================================================

/// Level-triggered wake signal: a notify that lands while the worker is
/// busy is not lost, its next wait returns immediately.
#[derive(Default)]
pub struct Wakeup {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        *self.signalled.lock() = true;
        self.cond.notify_one();
    }

    /// Returns true if woken by a notify rather than the timeout
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock();
        if !*signalled {
            self.cond.wait_for(&mut signalled, timeout);
        }
        std::mem::replace(&mut *signalled, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_user_seek_overrides_loop() {
        let seek = SeekController::new();
        seek.request_loop();
        seek.request(4000);
        let req = seek.take_pending().unwrap();
        assert_eq!(req.target_ms, 4000);
        assert_eq!(req.reason, SeekReason::User);
        assert!(seek.take_pending().is_none());
    }

    #[test]
    fn test_loop_does_not_override_user() {
        let seek = SeekController::new();
        seek.request(2500);
        seek.request_loop();
        assert_eq!(seek.take_pending().unwrap().reason, SeekReason::User);
    }

    #[test]
    fn test_latest_user_seek_wins() {
        let seek = SeekController::new();
        seek.request(1000);
        seek.request(3000);
        assert_eq!(seek.take_pending().unwrap().target_ms, 3000);
    }

    #[test]
    fn test_wakeup_not_lost() {
        let wake = Wakeup::new();
        wake.notify();
        let start = Instant::now();
        assert!(wake.wait_for(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!wake.wait_for(Duration::from_millis(5)));
    }

    #[test]
    fn test_wakeup_across_threads() {
        let wake = Arc::new(Wakeup::new());
        let remote = wake.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.notify();
        });
        assert!(wake.wait_for(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
