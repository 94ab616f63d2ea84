//! Core data types
//!
//! The persisted session record, milestone descriptors derived from the
//! configured schedule, and the records appended to the analytics sink.

use serde::{Deserialize, Serialize};

/// Schema tag written into every persisted [`SessionState`].
pub const STATE_VERSION: &str = "2";

/// Sink field carrying the value of a seconds-unit milestone.
pub const SECONDS_VARIABLE: &str = "session_duration_sec";

/// Sink field carrying the value of a minutes-unit milestone.
pub const MINUTES_VARIABLE: &str = "session_duration_min";

/// Label of the sentinel event emitted when no storage backend is writable.
pub const STORAGE_BLOCKED_LABEL: &str = "storage_blocked";

/// Session record persisted between page loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Session start (ms since epoch)
    pub start_time: i64,
    /// Accumulated hidden-page time in milliseconds
    #[serde(default)]
    pub inactive_time: u64,
    /// Index of the next milestone not yet fired
    #[serde(default)]
    pub last_milestone_index: usize,
    #[serde(default)]
    pub version: String,
}

impl SessionState {
    /// Fresh session starting at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            start_time: now_ms,
            inactive_time: 0,
            last_milestone_index: 0,
            version: STATE_VERSION.to_string(),
        }
    }

    /// Wall-clock age of the session at `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.start_time)
    }

    /// Active (visible) time at `now_ms`. Negative when the clock runs behind the record.
    pub fn active_ms(&self, now_ms: i64) -> i64 {
        self.age_ms(now_ms).saturating_sub(self.inactive_ms())
    }

    /// Accumulated hidden time as a signed duration, saturating at `i64::MAX`.
    pub fn inactive_ms(&self) -> i64 {
        i64::try_from(self.inactive_time).unwrap_or(i64::MAX)
    }

    pub fn is_current_version(&self) -> bool {
        self.version == STATE_VERSION
    }

    /// Parse a persisted record. Returns `None` for anything structurally unsound.
    pub fn from_json(raw: &str) -> Option<Self> {
        let state: SessionState = serde_json::from_str(raw).ok()?;
        if state.start_time <= 0 || i64::try_from(state.inactive_time).is_err() {
            return None;
        }
        Some(state)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Semantic unit of a milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneUnit {
    /// The zero-offset page load milestone
    Special,
    Seconds,
    Minutes,
}

impl MilestoneUnit {
    /// Sink field name used for this unit. The page load milestone reports in seconds.
    pub fn reporting_variable(&self) -> &'static str {
        match self {
            MilestoneUnit::Special | MilestoneUnit::Seconds => SECONDS_VARIABLE,
            MilestoneUnit::Minutes => MINUTES_VARIABLE,
        }
    }
}

/// One entry of the resolved milestone schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneDescriptor {
    /// Active-time offset this milestone fires at
    pub seconds: u64,
    pub unit: MilestoneUnit,
    /// e.g. `page_load`, `15_seconds`, `5_minutes`
    pub label: String,
    pub reporting_variable: &'static str,
    pub reporting_value: u64,
}

/// Persistence mechanisms, in selection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Cookie,
    /// Origin-scoped store that survives the tab (localStorage)
    CrossSession,
    /// Tab-scoped store (sessionStorage)
    PerTab,
    Memory,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Cookie => "cookie",
            StorageKind::CrossSession => "cross_session",
            StorageKind::PerTab => "per_tab",
            StorageKind::Memory => "memory",
        }
    }
}

/// Result of probing the execution environment for writable backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub cookie: bool,
    pub cross_session_store: bool,
    pub per_tab_store: bool,
}

impl Capabilities {
    /// Backend to use: cookie > cross-session store > per-tab store > memory.
    pub fn preferred(&self) -> StorageKind {
        if self.cookie {
            StorageKind::Cookie
        } else if self.cross_session_store {
            StorageKind::CrossSession
        } else if self.per_tab_store {
            StorageKind::PerTab
        } else {
            StorageKind::Memory
        }
    }

    pub fn any(&self) -> bool {
        self.cookie || self.cross_session_store || self.per_tab_store
    }
}

/// Page visibility as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Record appended to the analytics sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationEvent {
    pub event: String,
    pub session_duration_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration_sec: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration_min: Option<u64>,
}

impl DurationEvent {
    /// Event for a fired milestone, carrying exactly one unit-specific field.
    pub fn milestone(event_name: &str, milestone: &MilestoneDescriptor) -> Self {
        let (sec, min) = match milestone.unit {
            MilestoneUnit::Minutes => (None, Some(milestone.reporting_value)),
            MilestoneUnit::Special | MilestoneUnit::Seconds => {
                (Some(milestone.reporting_value), None)
            }
        };

        Self {
            event: event_name.to_string(),
            session_duration_label: milestone.label.clone(),
            session_duration_seconds: Some(milestone.seconds),
            session_duration_sec: sec,
            session_duration_min: min,
        }
    }

    /// Sentinel emitted once when persistence is blocked entirely.
    pub fn storage_blocked(event_name: &str) -> Self {
        Self {
            event: event_name.to_string(),
            session_duration_label: STORAGE_BLOCKED_LABEL.to_string(),
            session_duration_seconds: None,
            session_duration_sec: None,
            session_duration_min: None,
        }
    }

    pub fn is_storage_blocked(&self) -> bool {
        self.session_duration_label == STORAGE_BLOCKED_LABEL
            && self.session_duration_seconds.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_json_uses_camel_case() {
        let state = SessionState {
            start_time: 1_700_000_000_000,
            inactive_time: 2500,
            last_milestone_index: 3,
            version: STATE_VERSION.to_string(),
        };

        let value: serde_json::Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
        assert_eq!(value["startTime"], 1_700_000_000_000i64);
        assert_eq!(value["inactiveTime"], 2500);
        assert_eq!(value["lastMilestoneIndex"], 3);
        assert_eq!(value["version"], "2");
    }

    #[test]
    fn test_state_rejects_non_positive_start() {
        assert!(SessionState::from_json(r#"{"startTime": 0}"#).is_none());
        assert!(SessionState::from_json(r#"{"startTime": -5}"#).is_none());
        assert!(SessionState::from_json(r#"{"startTime": "soon"}"#).is_none());
        assert!(SessionState::from_json("not json").is_none());
    }

    #[test]
    fn test_state_defaults_missing_counters() {
        let state = SessionState::from_json(r#"{"startTime": 1000}"#).unwrap();
        assert_eq!(state.inactive_time, 0);
        assert_eq!(state.last_milestone_index, 0);
        assert!(!state.is_current_version());
    }

    #[test]
    fn test_active_ms_excludes_inactive_time() {
        let mut state = SessionState::new(10_000);
        state.inactive_time = 50_000;
        assert_eq!(state.active_ms(75_000), 15_000);
        assert_eq!(state.age_ms(75_000), 65_000);
    }

    #[test]
    fn test_state_rejects_out_of_range_inactive_time() {
        let past_i64 = r#"{"startTime": 1000, "inactiveTime": 9223372036854775808}"#;
        let max = r#"{"startTime": 1000, "inactiveTime": 18446744073709551615}"#;
        assert!(SessionState::from_json(past_i64).is_none());
        assert!(SessionState::from_json(max).is_none());
    }

    #[test]
    fn test_active_ms_saturates() {
        let mut state = SessionState::new(1000);
        state.inactive_time = u64::MAX;
        assert_eq!(state.inactive_ms(), i64::MAX);
        assert_eq!(state.active_ms(2000), 1000 - i64::MAX);
        assert_eq!(state.age_ms(i64::MIN), i64::MIN);
    }

    #[test]
    fn test_capabilities_priority() {
        let all = Capabilities {
            cookie: true,
            cross_session_store: true,
            per_tab_store: true,
        };
        assert_eq!(all.preferred(), StorageKind::Cookie);

        let no_cookie = Capabilities {
            cookie: false,
            ..all
        };
        assert_eq!(no_cookie.preferred(), StorageKind::CrossSession);

        let tab_only = Capabilities {
            per_tab_store: true,
            ..Default::default()
        };
        assert_eq!(tab_only.preferred(), StorageKind::PerTab);

        assert_eq!(Capabilities::default().preferred(), StorageKind::Memory);
        assert!(!Capabilities::default().any());
    }

    #[test]
    fn test_minutes_event_has_single_unit_field() {
        let milestone = MilestoneDescriptor {
            seconds: 300,
            unit: MilestoneUnit::Minutes,
            label: "5_minutes".to_string(),
            reporting_variable: MINUTES_VARIABLE,
            reporting_value: 5,
        };

        let event = DurationEvent::milestone("session_duration", &milestone);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event"], "session_duration");
        assert_eq!(value["session_duration_label"], "5_minutes");
        assert_eq!(value["session_duration_seconds"], 300);
        assert_eq!(value[MINUTES_VARIABLE], 5);
        assert!(value.get(SECONDS_VARIABLE).is_none());
    }

    #[test]
    fn test_storage_blocked_sentinel() {
        let event = DurationEvent::storage_blocked("session_duration");
        assert!(event.is_storage_blocked());

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["session_duration_label"], STORAGE_BLOCKED_LABEL);
        assert!(value.get("session_duration_seconds").is_none());
    }
}
