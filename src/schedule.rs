//! Milestone schedule
//!
//! Turns the configured list of second offsets into an ordered, deduplicated
//! sequence of milestone descriptors.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::normalize_milestone_input;
use crate::error::TrackerError;
use crate::types::{MilestoneDescriptor, MilestoneUnit};

/// Label of the zero-offset milestone
pub const PAGE_LOAD_LABEL: &str = "page_load";

/// Ordered milestone sequence, immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MilestoneSchedule {
    milestones: Vec<MilestoneDescriptor>,
}

impl MilestoneSchedule {
    /// Parse the configured list, substituting `fallback` when the configured
    /// value is absent, a placeholder, or yields no valid offset.
    ///
    /// Fails with [`TrackerError::EmptySchedule`] if neither produces an offset;
    /// the caller must then disable tracking.
    pub fn parse(raw: Option<&str>, fallback: &str) -> Result<Self, TrackerError> {
        let offsets = normalize_milestone_input(raw)
            .map(|configured| parse_offsets(&configured))
            .filter(|offsets| !offsets.is_empty())
            .unwrap_or_else(|| parse_offsets(fallback));

        if offsets.is_empty() {
            return Err(TrackerError::EmptySchedule);
        }

        Ok(Self {
            milestones: offsets.into_iter().map(describe).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.milestones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.milestones.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MilestoneDescriptor> {
        self.milestones.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MilestoneDescriptor> {
        self.milestones.iter()
    }

    pub fn as_slice(&self) -> &[MilestoneDescriptor] {
        &self.milestones
    }

    /// Offsets in firing order
    pub fn offsets(&self) -> Vec<u64> {
        self.milestones.iter().map(|m| m.seconds).collect()
    }
}

/// Split on commas and keep the tokens that parse as non-negative integers,
/// sorted ascending without duplicates.
fn parse_offsets(raw: &str) -> BTreeSet<u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<u64>().ok())
        .collect()
}

/// Derive the descriptor for one offset
pub fn describe(seconds: u64) -> MilestoneDescriptor {
    let (unit, reporting_value, label) = if seconds == 0 {
        (MilestoneUnit::Special, 0, PAGE_LOAD_LABEL.to_string())
    } else if seconds < 60 {
        (MilestoneUnit::Seconds, seconds, format!("{}_seconds", seconds))
    } else {
        // round(seconds / 60), half away from zero
        let minutes = seconds / 60 + u64::from(seconds % 60 >= 30);
        (MilestoneUnit::Minutes, minutes, format!("{}_minutes", minutes))
    };

    MilestoneDescriptor {
        seconds,
        unit,
        label,
        reporting_variable: unit.reporting_variable(),
        reporting_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MILESTONES;
    use crate::types::{MINUTES_VARIABLE, SECONDS_VARIABLE};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sorted_and_deduplicated() {
        let schedule = MilestoneSchedule::parse(Some("60, 5,0,5 ,30,15,60"), "0").unwrap();
        assert_eq!(schedule.offsets(), vec![0, 5, 15, 30, 60]);
    }

    #[test]
    fn test_invalid_tokens_discarded() {
        let schedule =
            MilestoneSchedule::parse(Some("abc,-5,10,,2.5, 20s,45"), DEFAULT_MILESTONES).unwrap();
        assert_eq!(schedule.offsets(), vec![10, 45]);
    }

    #[test]
    fn test_placeholder_uses_fallback() {
        let schedule = MilestoneSchedule::parse(Some("{{Milestones}}"), "0,30").unwrap();
        assert_eq!(schedule.offsets(), vec![0, 30]);

        let schedule = MilestoneSchedule::parse(None, "0,30").unwrap();
        assert_eq!(schedule.offsets(), vec![0, 30]);

        let schedule = MilestoneSchedule::parse(Some(""), "0,30").unwrap();
        assert_eq!(schedule.offsets(), vec![0, 30]);
    }

    #[test]
    fn test_unusable_configured_list_uses_fallback() {
        let schedule = MilestoneSchedule::parse(Some("x,y,-1"), "5").unwrap();
        assert_eq!(schedule.offsets(), vec![5]);
    }

    #[test]
    fn test_empty_schedule_is_error() {
        let result = MilestoneSchedule::parse(Some("x"), "nope,-3");
        assert!(matches!(result, Err(TrackerError::EmptySchedule)));

        let result = MilestoneSchedule::parse(None, "");
        assert!(matches!(result, Err(TrackerError::EmptySchedule)));
    }

    #[test]
    fn test_default_schedule() {
        let schedule = MilestoneSchedule::parse(None, DEFAULT_MILESTONES).unwrap();
        let labels: Vec<&str> = schedule.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "page_load",
                "5_seconds",
                "15_seconds",
                "30_seconds",
                "1_minutes",
                "2_minutes",
                "3_minutes",
                "4_minutes",
                "5_minutes",
                "10_minutes",
                "15_minutes",
                "20_minutes",
                "25_minutes",
            ]
        );
    }

    #[test]
    fn test_page_load_descriptor() {
        let m = describe(0);
        assert_eq!(m.unit, MilestoneUnit::Special);
        assert_eq!(m.label, PAGE_LOAD_LABEL);
        assert_eq!(m.reporting_variable, SECONDS_VARIABLE);
        assert_eq!(m.reporting_value, 0);
    }

    #[test]
    fn test_unit_boundary() {
        for seconds in 1..60 {
            let m = describe(seconds);
            assert_eq!(m.unit, MilestoneUnit::Seconds);
            assert_eq!(m.reporting_value, seconds);
            assert_eq!(m.reporting_variable, SECONDS_VARIABLE);
        }

        for seconds in [60, 61, 89, 90, 119, 3600] {
            let m = describe(seconds);
            assert_eq!(m.unit, MilestoneUnit::Minutes);
            assert_eq!(m.reporting_value, (seconds as f64 / 60.0).round() as u64);
            assert_eq!(m.reporting_variable, MINUTES_VARIABLE);
        }
    }

    #[test]
    fn test_minutes_rounding() {
        assert_eq!(describe(89).label, "1_minutes");
        assert_eq!(describe(90).label, "2_minutes");
        assert_eq!(describe(600).label, "10_minutes");
        assert_eq!(describe(u64::MAX).reporting_value, u64::MAX / 60);
        assert_eq!(describe(u64::MAX - 45).reporting_value, u64::MAX / 60);
    }

    #[test]
    fn test_huge_offset_parses() {
        let schedule = MilestoneSchedule::parse(Some("0,18446744073709551600"), "0").unwrap();
        assert_eq!(schedule.offsets(), vec![0, 18_446_744_073_709_551_600]);
        assert_eq!(schedule.get(1).unwrap().reporting_value, 307_445_734_561_825_860);
    }

    #[test]
    fn test_strictly_ascending_for_shuffled_input() {
        let inputs = [
            "1500,0,300,5,5,5,60",
            "30,20,10,0",
            "7,7,7,7",
            "999999,1,0,2",
        ];

        for raw in inputs {
            let offsets = MilestoneSchedule::parse(Some(raw), "0").unwrap().offsets();
            assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{:?}", offsets);
        }
    }
}
