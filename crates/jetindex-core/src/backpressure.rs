//! Backpressure controller — queue-depth-driven pause/resume signal.
//!
//! Two states with hysteresis: the controller pauses when the pending
//! queue reaches `pause_at` and resumes only once it has drained down to
//! `resume_at`, so the signal cannot thrash around a single threshold.
//! While paused, the connector's reading task stops issuing transport
//! reads — flow control propagates upstream and the in-process queue
//! stays bounded.

use std::sync::Mutex;
use std::time::{Duration, Instant};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Thresholds for the backpressure controller.
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Queue depth at which reads pause.
    pub pause_at: usize,
    /// Queue depth at which reads resume (must be below `pause_at`).
    pub resume_at: usize,
    /// Continuous pause duration after which a stall alert is emitted.
    pub max_paused: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            pause_at: 1_000,
            resume_at: 100,
            max_paused: Duration::from_secs(30),
        }
    }
}

// ─── States ──────────────────────────────────────────────────────────────────

/// Flow state of the ingestion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Flowing,
    Paused,
}

/// A state change returned by [`BackpressureController::observe`], so the
/// caller can count pause/resume events and wake waiting readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTransition {
    Paused,
    Resumed,
}

struct Inner {
    state: FlowState,
    paused_since: Option<Instant>,
    stall_alerted: bool,
}

// ─── Controller ──────────────────────────────────────────────────────────────

/// Queue-depth-driven pause/resume controller.
///
/// Thread-safe; the queue's producer and consumers observe depth changes
/// under one lock so state and depth can never be seen inconsistently.
pub struct BackpressureController {
    config: BackpressureConfig,
    inner: Mutex<Inner>,
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: FlowState::Flowing,
                paused_since: None,
                stall_alerted: false,
            }),
        }
    }

    /// Observe the current queue depth and return a transition if the
    /// state changed.
    pub fn observe(&self, depth: usize) -> Option<FlowTransition> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            FlowState::Flowing if depth >= self.config.pause_at => {
                inner.state = FlowState::Paused;
                inner.paused_since = Some(Instant::now());
                inner.stall_alerted = false;
                Some(FlowTransition::Paused)
            }
            FlowState::Paused if depth <= self.config.resume_at => {
                inner.state = FlowState::Flowing;
                inner.paused_since = None;
                inner.stall_alerted = false;
                Some(FlowTransition::Resumed)
            }
            _ => None,
        }
    }

    /// Current flow state.
    pub fn state(&self) -> FlowState {
        self.inner.lock().unwrap().state
    }

    /// Returns `true` if reads are currently paused.
    pub fn is_paused(&self) -> bool {
        self.state() == FlowState::Paused
    }

    /// Returns `true` exactly once per pause episode when the pause has
    /// lasted longer than `max_paused`. This surfaces sustained downstream
    /// slowness; it does not force a disconnect.
    pub fn check_stall(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.paused_since {
            Some(since) if !inner.stall_alerted && since.elapsed() >= self.config.max_paused => {
                inner.stall_alerted = true;
                true
            }
            _ => false,
        }
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(pause_at: usize, resume_at: usize) -> BackpressureController {
        BackpressureController::new(BackpressureConfig {
            pause_at,
            resume_at,
            max_paused: Duration::from_millis(20),
        })
    }

    #[test]
    fn pauses_at_threshold() {
        let c = controller(10, 2);
        assert_eq!(c.observe(9), None);
        assert_eq!(c.observe(10), Some(FlowTransition::Paused));
        assert!(c.is_paused());
    }

    #[test]
    fn hysteresis_prevents_thrash() {
        let c = controller(10, 2);
        c.observe(10);
        // Draining below pause_at but above resume_at stays paused
        assert_eq!(c.observe(9), None);
        assert_eq!(c.observe(3), None);
        assert!(c.is_paused());
        // Only at resume_at does flow resume
        assert_eq!(c.observe(2), Some(FlowTransition::Resumed));
        assert!(!c.is_paused());
    }

    #[test]
    fn no_duplicate_transitions() {
        let c = controller(10, 2);
        assert_eq!(c.observe(15), Some(FlowTransition::Paused));
        assert_eq!(c.observe(20), None);
        assert_eq!(c.observe(1), Some(FlowTransition::Resumed));
        assert_eq!(c.observe(0), None);
    }

    #[test]
    fn stall_alert_fires_once_per_episode() {
        let c = controller(1, 0);
        c.observe(1);
        assert!(!c.check_stall()); // too early
        std::thread::sleep(Duration::from_millis(25));
        assert!(c.check_stall());
        assert!(!c.check_stall()); // already alerted this episode

        // New episode re-arms the alert
        c.observe(0);
        c.observe(1);
        std::thread::sleep(Duration::from_millis(25));
        assert!(c.check_stall());
    }

    #[test]
    fn no_stall_while_flowing() {
        let c = controller(10, 2);
        std::thread::sleep(Duration::from_millis(25));
        assert!(!c.check_stall());
    }

    #[test]
    fn default_thresholds() {
        let config = BackpressureConfig::default();
        assert_eq!(config.pause_at, 1_000);
        assert_eq!(config.resume_at, 100);
        assert_eq!(config.max_paused, Duration::from_secs(30));
    }
}
