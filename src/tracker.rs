//! Session clock
//!
//! [`SessionTracker`] loads or creates the session record, fires milestones as
//! active time passes, and stops counting while the page is hidden.
//!
//! ```text
//! Uninitialized ──start──▶ Running ◀──visible── Paused
//!        │                   │  └────hidden────▶  │
//!        ▼                   ▼                    ▼
//!    Disabled             Stopped ◀──shutdown─────┘
//! ```
//!
//! All public entry points absorb their failures: a broken schedule or
//! blocked storage disables tracking, a bad tick is logged and skipped.

use std::time::Duration;

use serde::Serialize;

use crate::config::TrackerConfig;
use crate::debug::DebugSnapshot;
use crate::error::TrackerError;
use crate::persistence::PersistenceAdapter;
use crate::probe::detect_capabilities;
use crate::runtime::{AnalyticsSink, Clock, Scheduler, VisibilitySource};
use crate::schedule::MilestoneSchedule;
use crate::storage::StorageEnvironment;
use crate::types::{Capabilities, DurationEvent, SessionState, StorageKind, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPhase {
    Uninitialized,
    Running,
    Paused,
    /// Every milestone fired, or the host shut the tracker down
    Stopped,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    InvalidSchedule,
    StorageBlocked,
}

/// Everything the tracker needs from the page it runs in
pub struct TrackerHost {
    pub clock: Box<dyn Clock>,
    pub scheduler: Box<dyn Scheduler>,
    pub visibility: Box<dyn VisibilitySource>,
    pub sink: Box<dyn AnalyticsSink>,
    pub storage: StorageEnvironment,
}

pub struct SessionTracker {
    config: TrackerConfig,
    clock: Box<dyn Clock>,
    scheduler: Box<dyn Scheduler>,
    visibility: Box<dyn VisibilitySource>,
    sink: Box<dyn AnalyticsSink>,
    /// Handed to the persistence adapter at start
    storage: Option<StorageEnvironment>,
    schedule: Option<MilestoneSchedule>,
    persistence: Option<PersistenceAdapter>,
    capabilities: Capabilities,
    state: Option<SessionState>,
    phase: TrackerPhase,
    disable_reason: Option<DisableReason>,
    /// When the current hidden period began; never persisted
    paused_at: Option<i64>,
}

impl SessionTracker {
    pub fn new(config: TrackerConfig, host: TrackerHost) -> Self {
        Self {
            config,
            clock: host.clock,
            scheduler: host.scheduler,
            visibility: host.visibility,
            sink: host.sink,
            storage: Some(host.storage),
            schedule: None,
            persistence: None,
            capabilities: Capabilities::default(),
            state: None,
            phase: TrackerPhase::Uninitialized,
            disable_reason: None,
            paused_at: None,
        }
    }

    /// Resolve the schedule and storage, restore the session, and begin
    /// counting. Has no effect unless the tracker is uninitialized.
    pub fn start(&mut self) {
        if self.phase != TrackerPhase::Uninitialized {
            return;
        }

        let schedule = match MilestoneSchedule::parse(
            self.config.milestones.as_deref(),
            &self.config.fallback_milestones,
        ) {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::error!(error = %err, "Session tracking disabled");
                self.disable(DisableReason::InvalidSchedule);
                return;
            }
        };

        let mut storage = self
            .storage
            .take()
            .unwrap_or_else(|| StorageEnvironment::new(""));
        self.capabilities = detect_capabilities(&mut storage);

        if !self.capabilities.any() {
            let err = TrackerError::StorageBlocked;
            tracing::warn!(error = %err, "Session tracking disabled");
            self.sink
                .push(DurationEvent::storage_blocked(&self.config.event_name));
            self.disable(DisableReason::StorageBlocked);
            return;
        }

        let mut persistence =
            PersistenceAdapter::new(storage, self.capabilities.preferred(), &self.config);
        let now = self.clock.now_ms();
        let state = self.restore_or_create(&mut persistence, &schedule, now);
        persistence.write(&state);

        tracing::info!(
            storage = persistence.selected_kind().as_str(),
            start_time = state.start_time,
            next_milestone = state.last_milestone_index,
            milestones = schedule.len(),
            "Session tracking started"
        );

        self.schedule = Some(schedule);
        self.persistence = Some(persistence);
        self.state = Some(state);
        self.phase = TrackerPhase::Running;

        self.run_check(now);
        if self.phase != TrackerPhase::Running {
            return;
        }

        if self.visibility.current() == Visibility::Hidden {
            self.paused_at = Some(now);
            self.phase = TrackerPhase::Paused;
            tracing::info!("Page hidden at start, tracking paused");
        } else {
            let interval = self.check_interval();
            self.scheduler.start(interval);
        }
    }

    /// Periodic check. Ignored unless the tracker is running.
    pub fn tick(&mut self) {
        if self.phase != TrackerPhase::Running {
            return;
        }
        let now = self.clock.now_ms();
        self.run_check(now);
    }

    /// Page visibility transition reported by the host
    pub fn handle_visibility_change(&mut self, visibility: Visibility) {
        let now = self.clock.now_ms();

        match (self.phase, visibility) {
            (TrackerPhase::Running, Visibility::Hidden) => {
                self.scheduler.stop();
                self.paused_at = Some(now);
                self.phase = TrackerPhase::Paused;
                tracing::info!("Page hidden, tracking paused");
            }
            (TrackerPhase::Paused, Visibility::Visible) => {
                let hidden_ms = self.close_pause(now);
                self.phase = TrackerPhase::Running;
                let interval = self.check_interval();
                self.scheduler.start(interval);
                tracing::info!(hidden_ms, "Page visible, tracking resumed");
            }
            _ => {}
        }
    }

    /// Stop tracking for good (page unload). Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.scheduler.stop();
        match self.phase {
            TrackerPhase::Paused => {
                let now = self.clock.now_ms();
                self.close_pause(now);
                self.phase = TrackerPhase::Stopped;
            }
            TrackerPhase::Running | TrackerPhase::Uninitialized => {
                self.phase = TrackerPhase::Stopped;
            }
            TrackerPhase::Stopped | TrackerPhase::Disabled => {}
        }
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn disable_reason(&self) -> Option<DisableReason> {
        self.disable_reason
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn schedule(&self) -> Option<&MilestoneSchedule> {
        self.schedule.as_ref()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Backend currently holding the session record
    pub fn storage_kind(&self) -> Option<StorageKind> {
        self.persistence.as_ref().map(PersistenceAdapter::active_kind)
    }

    pub fn is_timer_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub(crate) fn persistence(&self) -> Option<&PersistenceAdapter> {
        self.persistence.as_ref()
    }

    /// Read-only view for diagnostics
    pub fn debug_snapshot(&self) -> DebugSnapshot {
        DebugSnapshot::capture(self, self.clock.now_ms(), self.paused_at)
    }

    fn check_interval(&self) -> Duration {
        Duration::from_millis(self.config.check_interval_ms.max(1))
    }

    fn run_check(&mut self, now: i64) {
        match self.check_milestones(now) {
            Ok(true) => self.finish(),
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "Milestone check skipped"),
        }
    }

    /// Fire every milestone that is due at `now`. Returns `true` once the
    /// schedule is exhausted.
    fn check_milestones(&mut self, now: i64) -> Result<bool, TrackerError> {
        let (Some(state), Some(schedule)) = (self.state.as_mut(), self.schedule.as_ref()) else {
            return Ok(false);
        };

        let active_ms = state.active_ms(now);
        if active_ms < 0 {
            return Err(TrackerError::ClockAnomaly {
                now,
                start: state.start_time.saturating_add(state.inactive_ms()),
            });
        }
        let active_secs = (active_ms / 1000) as u64;

        while let Some(milestone) = schedule.get(state.last_milestone_index) {
            if active_secs < milestone.seconds {
                break;
            }

            self.sink
                .push(DurationEvent::milestone(&self.config.event_name, milestone));
            state.last_milestone_index += 1;
            if let Some(persistence) = self.persistence.as_mut() {
                persistence.write(state);
            }

            tracing::debug!(
                label = %milestone.label,
                seconds = milestone.seconds,
                active_secs,
                "Milestone fired"
            );
        }

        Ok(state.last_milestone_index >= schedule.len())
    }

    fn finish(&mut self) {
        self.scheduler.stop();
        self.phase = TrackerPhase::Stopped;
        tracing::info!("All milestones fired, tracking stopped");
    }

    /// Add the hidden period ending at `now` to the session's inactive time.
    fn close_pause(&mut self, now: i64) -> u64 {
        let paused_at = self.paused_at.take().unwrap_or(now);
        let hidden_ms = now.saturating_sub(paused_at).max(0) as u64;

        if let Some(state) = self.state.as_mut() {
            state.inactive_time = state.inactive_time.saturating_add(hidden_ms);
            if let Some(persistence) = self.persistence.as_mut() {
                persistence.write(state);
            }
        }
        hidden_ms
    }

    fn disable(&mut self, reason: DisableReason) {
        self.scheduler.stop();
        self.phase = TrackerPhase::Disabled;
        self.disable_reason = Some(reason);
    }

    fn restore_or_create(
        &self,
        persistence: &mut PersistenceAdapter,
        schedule: &MilestoneSchedule,
        now: i64,
    ) -> SessionState {
        let max_age = i64::try_from(self.config.max_session_age_ms).unwrap_or(i64::MAX);

        match persistence.read() {
            Some(state) if !state.is_current_version() => {
                tracing::debug!(
                    version = %state.version,
                    "Discarding session record from another version"
                );
                SessionState::new(now)
            }
            Some(state) if state.age_ms(now) > max_age => {
                tracing::info!(age_ms = state.age_ms(now), "Session expired, starting a new one");
                SessionState::new(now)
            }
            Some(state) if state.age_ms(now) < 0 => {
                let err = TrackerError::ClockAnomaly {
                    now,
                    start: state.start_time,
                };
                tracing::warn!(error = %err, "Discarding session record from the future");
                SessionState::new(now)
            }
            Some(state) if state.inactive_ms() > state.age_ms(now) => {
                tracing::warn!(
                    inactive_ms = state.inactive_time,
                    age_ms = state.age_ms(now),
                    "Discarding session record hidden for longer than its age"
                );
                SessionState::new(now)
            }
            Some(mut state) => {
                state.last_milestone_index = state.last_milestone_index.min(schedule.len());
                state
            }
            None => SessionState::new(now),
        }
    }
}
