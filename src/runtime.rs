//! Runtime ports
//!
//! Time, timers, page visibility and the analytics queue are supplied by the
//! host. The shared-handle implementations below are what tests, the CLI
//! simulator and the FFI layer use; clones of a handle observe the same state.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use chrono::Utc;

use crate::types::{DurationEvent, Visibility};

/// Wall-clock source (ms since epoch)
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// Periodic timer owned by the host.
///
/// While running, the host calls [`crate::SessionTracker::tick`] once per
/// interval. `stop` must be safe to call when not running.
pub trait Scheduler {
    fn start(&mut self, interval: Duration);
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Current page visibility
pub trait VisibilitySource {
    fn current(&self) -> Visibility;
}

/// Append-only analytics queue
pub trait AnalyticsSink {
    fn push(&mut self, event: DurationEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Virtual clock advanced by hand
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<i64>>,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.set(now_ms);
    }

    pub fn advance(&self, by: Duration) {
        let by_ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.set(self.now.get().saturating_add(by_ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}

#[derive(Debug, Default)]
struct TimerState {
    interval: Option<Duration>,
    starts: u32,
    stops: u32,
}

/// Scheduler that only records its state; the driver decides when to tick.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<TimerState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.state.borrow().interval
    }

    /// Number of times the timer went from stopped to running
    pub fn starts(&self) -> u32 {
        self.state.borrow().starts
    }

    /// Number of times a running timer was cancelled
    pub fn stops(&self) -> u32 {
        self.state.borrow().stops
    }
}

impl Scheduler for ManualScheduler {
    fn start(&mut self, interval: Duration) {
        let mut state = self.state.borrow_mut();
        if state.interval.is_none() {
            state.starts += 1;
        }
        state.interval = Some(interval);
    }

    fn stop(&mut self) {
        let mut state = self.state.borrow_mut();
        if state.interval.take().is_some() {
            state.stops += 1;
        }
    }

    fn is_running(&self) -> bool {
        self.state.borrow().interval.is_some()
    }
}

/// Visibility flag toggled by the host or a test
#[derive(Debug, Clone, Default)]
pub struct PageVisibility {
    state: Rc<Cell<Visibility>>,
}

impl PageVisibility {
    pub fn new(initial: Visibility) -> Self {
        Self {
            state: Rc::new(Cell::new(initial)),
        }
    }

    pub fn set(&self, visibility: Visibility) {
        self.state.set(visibility);
    }
}

impl VisibilitySource for PageVisibility {
    fn current(&self) -> Visibility {
        self.state.get()
    }
}

/// In-memory analytics queue, the equivalent of a page's `dataLayer`
#[derive(Debug, Clone, Default)]
pub struct DataLayer {
    events: Rc<RefCell<Vec<DurationEvent>>>,
}

impl DataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event pushed so far
    pub fn events(&self) -> Vec<DurationEvent> {
        self.events.borrow().clone()
    }

    /// Labels in push order
    pub fn labels(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .map(|e| e.session_duration_label.clone())
            .collect()
    }

    /// Remove and return the queued events (for hosts that forward them)
    pub fn drain(&self) -> Vec<DurationEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl AnalyticsSink for DataLayer {
    fn push(&mut self, event: DurationEvent) {
        self.events.borrow_mut().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(1000);
        let handle = clock.clone();
        handle.advance(Duration::from_secs(2));
        assert_eq!(clock.now_ms(), 3000);
        clock.set(10);
        assert_eq!(handle.now_ms(), 10);
    }

    #[test]
    fn test_manual_clock_advance_saturates() {
        let clock = ManualClock::new(1000);
        clock.advance(Duration::MAX);
        assert_eq!(clock.now_ms(), i64::MAX);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_ms(), i64::MAX);
    }

    #[test]
    fn test_scheduler_stop_is_idempotent() {
        let mut scheduler = ManualScheduler::new();
        scheduler.stop();
        assert_eq!(scheduler.stops(), 0);

        scheduler.start(Duration::from_secs(1));
        scheduler.start(Duration::from_secs(1));
        assert_eq!(scheduler.starts(), 1);
        assert!(scheduler.is_running());

        scheduler.stop();
        scheduler.stop();
        assert_eq!(scheduler.stops(), 1);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_data_layer_drain() {
        let layer = DataLayer::new();
        let mut sink = layer.clone();
        sink.push(DurationEvent::storage_blocked("session_duration"));

        assert_eq!(layer.len(), 1);
        assert_eq!(layer.drain().len(), 1);
        assert!(layer.is_empty());
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
