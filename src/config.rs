//! Tracker configuration
//!
//! The milestone list arrives from a tag manager as a string and may still be
//! an unresolved template placeholder. Normalization to "absent" happens here,
//! before any of the tracking code sees it.

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Built-in milestone offsets (seconds)
pub const DEFAULT_MILESTONES: &str = "0,5,15,30,60,120,180,240,300,600,900,1200,1500";

/// Event name attached to every sink record
pub const DEFAULT_EVENT_NAME: &str = "session_duration";

/// Key (cookie name or store key) for the persisted session record
pub const DEFAULT_STORAGE_KEY: &str = "dwell_session";

/// Sessions older than this are discarded on load
pub const DEFAULT_MAX_SESSION_AGE_MS: u64 = 30 * 60 * 1000;

/// Cadence of the periodic milestone check
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Configured comma-separated offsets; `None` when absent or unresolved
    pub milestones: Option<String>,
    /// Used when `milestones` is absent or yields no valid offset
    pub fallback_milestones: String,
    pub event_name: String,
    pub storage_key: String,
    /// Scope the cookie to the root domain so subdomains share the session
    pub cross_subdomain: bool,
    pub max_session_age_ms: u64,
    pub check_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            milestones: None,
            fallback_milestones: DEFAULT_MILESTONES.to_string(),
            event_name: DEFAULT_EVENT_NAME.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            cross_subdomain: true,
            max_session_age_ms: DEFAULT_MAX_SESSION_AGE_MS,
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
        }
    }
}

impl TrackerConfig {
    /// Set the configured milestone list, normalizing placeholders to absent.
    pub fn with_milestones(mut self, raw: &str) -> Self {
        self.milestones = normalize_milestone_input(Some(raw));
        self
    }

    /// Load configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, TrackerError> {
        let mut config: TrackerConfig = serde_json::from_str(json)?;
        config.milestones = normalize_milestone_input(config.milestones.as_deref());
        if config.check_interval_ms == 0 {
            config.check_interval_ms = DEFAULT_CHECK_INTERVAL_MS;
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// `{{Variable Name}}` as left behind by a tag manager that could not resolve it.
pub fn is_unresolved_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    (trimmed.starts_with("{{") && trimmed.ends_with("}}")) || trimmed == "undefined"
}

/// Map empty and placeholder inputs to `None`.
pub fn normalize_milestone_input(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() || is_unresolved_placeholder(raw) {
        return None;
    }
    Some(raw.to_string())
}
