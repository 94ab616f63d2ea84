//! FFI bindings for Dwell
//!
//! C-compatible functions for embedding the tracker in a host that owns the
//! timer and the page events. The host calls `dwell_tracker_tick` while
//! `dwell_tracker_timer_running` reports 1, forwards visibility changes, and
//! drains queued events. The session record lives in an in-memory store the
//! host restores at creation and saves with `dwell_tracker_save_state`.
//!
//! All returned strings are allocated and must be freed with `dwell_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::TrackerConfig;
use crate::runtime::{DataLayer, ManualScheduler, PageVisibility, SystemClock};
use crate::storage::{MemoryStore, StorageEnvironment};
use crate::tracker::{SessionTracker, TrackerHost};
use crate::types::Visibility;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Borrow the handle behind `tracker`, recording an error for NULL.
unsafe fn handle_mut<'a>(tracker: *mut DwellTrackerHandle) -> Option<&'a mut DwellTrackerHandle> {
    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return None;
    }
    Some(&mut *tracker)
}

// ============================================================================
// Tracker lifecycle
// ============================================================================

/// Opaque handle to a SessionTracker and the in-memory host it runs against
pub struct DwellTrackerHandle {
    tracker: SessionTracker,
    store: MemoryStore,
    visibility: PageVisibility,
    events: DataLayer,
    storage_key: String,
}

/// Create a tracker.
///
/// # Safety
/// - `config_json` may be NULL (defaults) or a valid null-terminated JSON config.
/// - `hostname` may be NULL or a valid null-terminated C string.
/// - `stored_state` may be NULL or the string last returned by `dwell_tracker_save_state`.
/// - Returns a pointer that must be freed with `dwell_tracker_free`, or NULL on error.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_new(
    config_json: *const c_char,
    hostname: *const c_char,
    stored_state: *const c_char,
) -> *mut DwellTrackerHandle {
    clear_last_error();

    let config = match cstr_to_string(config_json) {
        Some(json) => match TrackerConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        },
        None => TrackerConfig::default(),
    };

    let hostname = cstr_to_string(hostname).unwrap_or_default();

    let store = MemoryStore::new();
    if let Some(state) = cstr_to_string(stored_state) {
        store.insert(&config.storage_key, &state);
    }

    let visibility = PageVisibility::default();
    let events = DataLayer::new();
    let storage_key = config.storage_key.clone();

    let host = TrackerHost {
        clock: Box::new(SystemClock),
        scheduler: Box::new(ManualScheduler::new()),
        visibility: Box::new(visibility.clone()),
        sink: Box::new(events.clone()),
        storage: StorageEnvironment::new(&hostname).with_cross_session(store.clone()),
    };

    let handle = Box::new(DwellTrackerHandle {
        tracker: SessionTracker::new(config, host),
        store,
        visibility,
        events,
        storage_key,
    });
    Box::into_raw(handle)
}

/// Free a tracker.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_free(tracker: *mut DwellTrackerHandle) {
    if !tracker.is_null() {
        drop(Box::from_raw(tracker));
    }
}

/// Start tracking. Returns 0 on success, -1 on a NULL handle.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_start(tracker: *mut DwellTrackerHandle) -> i32 {
    clear_last_error();
    match handle_mut(tracker) {
        Some(handle) => {
            handle.tracker.start();
            0
        }
        None => -1,
    }
}

/// Run one periodic check. Returns 0 on success, -1 on a NULL handle.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_tick(tracker: *mut DwellTrackerHandle) -> i32 {
    clear_last_error();
    match handle_mut(tracker) {
        Some(handle) => {
            handle.tracker.tick();
            0
        }
        None => -1,
    }
}

/// Report a visibility change (`hidden` non-zero for hidden).
/// Returns 0 on success, -1 on a NULL handle.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_set_hidden(
    tracker: *mut DwellTrackerHandle,
    hidden: i32,
) -> i32 {
    clear_last_error();
    let Some(handle) = handle_mut(tracker) else {
        return -1;
    };

    let visibility = if hidden != 0 {
        Visibility::Hidden
    } else {
        Visibility::Visible
    };
    handle.visibility.set(visibility);
    handle.tracker.handle_visibility_change(visibility);
    0
}

/// Stop tracking for good. Returns 0 on success, -1 on a NULL handle.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_shutdown(tracker: *mut DwellTrackerHandle) -> i32 {
    clear_last_error();
    match handle_mut(tracker) {
        Some(handle) => {
            handle.tracker.shutdown();
            0
        }
        None => -1,
    }
}

/// Whether the host should keep calling `dwell_tracker_tick`.
/// Returns 1 or 0, or -1 on a NULL handle.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_timer_running(tracker: *mut DwellTrackerHandle) -> i32 {
    clear_last_error();
    match handle_mut(tracker) {
        Some(handle) => i32::from(handle.tracker.is_timer_running()),
        None => -1,
    }
}

// ============================================================================
// Output
// ============================================================================

/// Remove queued analytics events and return them as a JSON array.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`.
/// - Returns a newly allocated string that must be freed with `dwell_free_string`.
/// - Returns NULL on error; call `dwell_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_drain_events(tracker: *mut DwellTrackerHandle) -> *mut c_char {
    clear_last_error();
    let Some(handle) = handle_mut(tracker) else {
        return ptr::null_mut();
    };

    match serde_json::to_string(&handle.events.drain()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Diagnostics snapshot as JSON.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`.
/// - Returns a newly allocated string that must be freed with `dwell_free_string`.
/// - Returns NULL on error; call `dwell_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_debug(tracker: *mut DwellTrackerHandle) -> *mut c_char {
    clear_last_error();
    let Some(handle) = handle_mut(tracker) else {
        return ptr::null_mut();
    };

    match handle.tracker.debug_snapshot().to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Persisted session record, for the host to pass back to `dwell_tracker_new`
/// on the next page load.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `dwell_tracker_new`.
/// - Returns a newly allocated string that must be freed with `dwell_free_string`.
/// - Returns NULL when no record exists; call `dwell_last_error` for the reason.
#[no_mangle]
pub unsafe extern "C" fn dwell_tracker_save_state(tracker: *mut DwellTrackerHandle) -> *mut c_char {
    clear_last_error();
    let Some(handle) = handle_mut(tracker) else {
        return ptr::null_mut();
    };

    match handle.store.peek(&handle.storage_key) {
        Some(json) => string_to_cstr(&json),
        None => {
            set_last_error("No session record stored");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Dwell functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Dwell function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn dwell_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Dwell function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn dwell_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Dwell library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn dwell_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
