//! Arrival debouncing
//!
//! A composite device re-enumerates several times while its interfaces come
//! up, and each pass fires another arrival signal. The debouncer holds each
//! device until its bus has been quiet for a full window, so the client sees
//! one arrival per physical insertion. Every repeat signal re-arms the
//! timer; a removal cancels it outright.
//!
//! The type keeps no clock of its own. Callers pass `Instant`s in, which
//! keeps the timing deterministic under test.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Quiet period a device must hold before its arrival is reported.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Per-device arrival timers, drained in first-arrival order.
#[derive(Debug)]
pub struct ArrivalDebouncer {
    window: Duration,
    /// Instance ID to the time of its most recent arrival signal.
    pending: HashMap<String, Instant>,
    /// First-arrival order; re-arms do not move a device back.
    order: Vec<String>,
}

impl ArrivalDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Arm or re-arm the timer for `instance_id`.
    pub fn note_arrival(&mut self, instance_id: &str, now: Instant) {
        if self.pending.insert(instance_id.to_string(), now).is_none() {
            self.order.push(instance_id.to_string());
        }
    }

    /// Drop a pending arrival. Returns whether one was armed.
    pub fn cancel(&mut self, instance_id: &str) -> bool {
        if self.pending.remove(instance_id).is_some() {
            self.order.retain(|id| id != instance_id);
            true
        } else {
            false
        }
    }

    /// Remove and return every device whose window has elapsed at `now`,
    /// oldest arrival first.
    pub fn take_due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        let pending = &mut self.pending;
        let window = self.window;
        self.order.retain(|id| {
            let Some(armed) = pending.get(id).copied() else {
                return false;
            };
            if now.duration_since(armed) >= window {
                pending.remove(id);
                due.push(id.clone());
                false
            } else {
                true
            }
        });
        due
    }

    /// Earliest instant at which [`ArrivalDebouncer::take_due`] will yield
    /// something, if anything is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|armed| *armed + self.window).min()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for ArrivalDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}
