//! Trailing-edge update throttle
//!
//! The first [`Throttle::submit`] in a quiet period opens a window; later
//! submits inside that window only replace the stored value. When the
//! window closes, [`Throttle::take_due`] hands out the most recent value
//! once. The owner decides what "now" is and when to poll, which keeps this
//! usable from the engine actor under tokio's paused clock.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Store `value`, replacing anything not yet taken. Returns true if this
    /// call opened a new window.
    pub fn submit(&mut self, value: T, now: Instant) -> bool {
        self.pending = Some(value);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
            true
        } else {
            false
        }
    }

    /// When the pending value becomes due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The latest value, once the window has closed.
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Drop the pending value and close the window.
    pub fn cancel(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(150);

    #[test]
    fn test_burst_yields_latest_value_once() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(WINDOW);

        assert!(throttle.submit(1, t0));
        assert!(!throttle.submit(2, t0 + Duration::from_millis(40)));
        assert!(!throttle.submit(3, t0 + Duration::from_millis(90)));

        assert_eq!(throttle.take_due(t0 + Duration::from_millis(149)), None);
        assert_eq!(throttle.take_due(t0 + WINDOW), Some(3));
        assert_eq!(throttle.take_due(t0 + WINDOW * 2), None);
        assert!(!throttle.is_pending());
    }

    #[test]
    fn test_deadline_does_not_slide() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(WINDOW);
        throttle.submit("a", t0);
        throttle.submit("b", t0 + Duration::from_millis(140));
        assert_eq!(throttle.deadline(), Some(t0 + WINDOW));
    }

    #[test]
    fn test_next_window_starts_at_next_submit() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(WINDOW);
        throttle.submit(1, t0);
        assert_eq!(throttle.take_due(t0 + WINDOW), Some(1));

        let t1 = t0 + Duration::from_secs(1);
        assert!(throttle.submit(2, t1));
        assert_eq!(throttle.deadline(), Some(t1 + WINDOW));
    }

    #[test]
    fn test_cancel_discards() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(WINDOW);
        throttle.submit(1, t0);
        assert_eq!(throttle.cancel(), Some(1));
        assert_eq!(throttle.deadline(), None);
        assert_eq!(throttle.take_due(t0 + WINDOW), None);
    }
}
