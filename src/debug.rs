//! Read-only diagnostics
//!
//! A point-in-time view of a tracker. Capturing a snapshot never mutates
//! tracker state.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::tracker::{DisableReason, SessionTracker, TrackerPhase};
use crate::types::{Capabilities, MilestoneDescriptor, StorageKind};

#[derive(Debug, Clone, Serialize)]
pub struct DebugSnapshot {
    pub version: &'static str,
    pub phase: TrackerPhase,
    pub disable_reason: Option<DisableReason>,
    pub capabilities: Capabilities,
    /// Backend chosen at start
    pub selected_storage: Option<StorageKind>,
    /// Backend holding the record now (differs once degraded to memory)
    pub active_storage: Option<StorageKind>,
    pub session_start: Option<DateTime<Utc>>,
    pub elapsed_ms: i64,
    /// Includes the hidden period in progress, if any
    pub inactive_ms: i64,
    pub active_ms: i64,
    pub milestones_fired: usize,
    pub milestones_total: usize,
    pub next_milestone: Option<String>,
    pub milestones: Vec<MilestoneDescriptor>,
}

impl DebugSnapshot {
    pub(crate) fn capture(tracker: &SessionTracker, now: i64, paused_at: Option<i64>) -> Self {
        let state = tracker.state();
        let milestones: Vec<MilestoneDescriptor> = tracker
            .schedule()
            .map(|schedule| schedule.as_slice().to_vec())
            .unwrap_or_default();

        let (elapsed_ms, inactive_ms) = match state {
            Some(state) => {
                let current_pause = paused_at.map_or(0, |at| now.saturating_sub(at).max(0));
                (
                    state.age_ms(now),
                    state.inactive_ms().saturating_add(current_pause),
                )
            }
            None => (0, 0),
        };

        let fired = state.map_or(0, |s| s.last_milestone_index);

        Self {
            version: crate::DWELL_VERSION,
            phase: tracker.phase(),
            disable_reason: tracker.disable_reason(),
            capabilities: tracker.capabilities(),
            selected_storage: tracker.persistence().map(|p| p.selected_kind()),
            active_storage: tracker.storage_kind(),
            session_start: state.and_then(|s| Utc.timestamp_millis_opt(s.start_time).single()),
            elapsed_ms,
            inactive_ms,
            active_ms: elapsed_ms.saturating_sub(inactive_ms),
            milestones_fired: fired,
            milestones_total: milestones.len(),
            next_milestone: milestones.get(fired).map(|m| m.label.clone()),
            milestones,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::runtime::{DataLayer, ManualClock, ManualScheduler, PageVisibility};
    use crate::storage::{MemoryStore, StorageEnvironment};
    use crate::tracker::TrackerHost;
    use crate::types::Visibility;
    use std::time::Duration;

    const T: i64 = 1_700_000_000_000;

    fn tracker(clock: &ManualClock, store: &MemoryStore) -> SessionTracker {
        SessionTracker::new(
            TrackerConfig::default().with_milestones("0,5,15,120"),
            TrackerHost {
                clock: Box::new(clock.clone()),
                scheduler: Box::new(ManualScheduler::new()),
                visibility: Box::new(PageVisibility::default()),
                sink: Box::new(DataLayer::new()),
                storage: StorageEnvironment::new("example.com").with_cross_session(store.clone()),
            },
        )
    }

    #[test]
    fn test_snapshot_before_start() {
        let clock = ManualClock::new(T);
        let snapshot = tracker(&clock, &MemoryStore::new()).debug_snapshot();

        assert_eq!(snapshot.phase, TrackerPhase::Uninitialized);
        assert_eq!(snapshot.elapsed_ms, 0);
        assert!(snapshot.milestones.is_empty());
        assert_eq!(snapshot.next_milestone, None);
    }

    #[test]
    fn test_snapshot_counts_current_pause() {
        let clock = ManualClock::new(T);
        let mut tracker = tracker(&clock, &MemoryStore::new());
        tracker.start();

        clock.advance(Duration::from_secs(6));
        tracker.tick();
        tracker.handle_visibility_change(Visibility::Hidden);
        clock.advance(Duration::from_secs(20));

        let snapshot = tracker.debug_snapshot();
        assert_eq!(snapshot.phase, TrackerPhase::Paused);
        assert_eq!(snapshot.elapsed_ms, 26_000);
        assert_eq!(snapshot.inactive_ms, 20_000);
        assert_eq!(snapshot.active_ms, 6_000);
        assert_eq!(snapshot.milestones_fired, 2);
        assert_eq!(snapshot.milestones_total, 4);
        assert_eq!(snapshot.next_milestone.as_deref(), Some("15_seconds"));
        assert_eq!(snapshot.selected_storage, Some(StorageKind::CrossSession));
        assert_eq!(snapshot.session_start.unwrap().timestamp_millis(), T);

        // Capturing did not touch the tracker
        assert_eq!(tracker.state().unwrap().inactive_time, 0);
    }

    #[test]
    fn test_snapshot_json() {
        let clock = ManualClock::new(T);
        let mut tracker = tracker(&clock, &MemoryStore::new());
        tracker.start();

        let value: serde_json::Value =
            serde_json::from_str(&tracker.debug_snapshot().to_json().unwrap()).unwrap();
        assert_eq!(value["phase"], "running");
        assert_eq!(value["active_storage"], "cross_session");
        assert_eq!(value["milestones"][3]["label"], "2_minutes");
        assert_eq!(value["milestones"][3]["reporting_variable"], "session_duration_min");
    }
}
