//! Dwell - active session duration tracking for web pages
//!
//! Dwell measures how long a visitor stays actively engaged on a page and
//! reports fixed milestones of active time to an analytics queue, once each
//! per session: probe storage → restore session → check milestones → emit.
//!
//! ## Modules
//!
//! - **Schedule**: Parse the configured offsets into ordered milestones
//! - **Probe / Persistence**: Pick a writable backend and keep the session record in it
//! - **Tracker**: The session clock, with hidden-page time excluded
//!
//! The host page is reached only through the ports in [`runtime`] and
//! [`storage`], so the same tracker runs in a browser binding, the CLI
//! simulator, or a test with a virtual clock.

pub mod config;
pub mod debug;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod probe;
pub mod runtime;
pub mod schedule;
pub mod storage;
pub mod tracker;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::TrackerConfig;
pub use debug::DebugSnapshot;
pub use error::{StorageError, TrackerError};
pub use persistence::PersistenceAdapter;
pub use probe::detect_capabilities;
pub use schedule::MilestoneSchedule;
pub use tracker::{DisableReason, SessionTracker, TrackerHost, TrackerPhase};
pub use types::{
    Capabilities, DurationEvent, MilestoneDescriptor, MilestoneUnit, SessionState, StorageKind,
    Visibility,
};

/// Dwell version reported in diagnostics
pub const DWELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for diagnostics
pub const PRODUCER_NAME: &str = "dwell";
