//! Capability probing
//!
//! A backend counts as available only if a write-read-delete round trip
//! succeeds. Probe failures are absorbed here and reported as `false`.

use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::{CookieJar, CookieOptions, KeyValueStore, StorageEnvironment};
use crate::types::Capabilities;

const PROBE_PREFIX: &str = "__dwell_probe_";
const PROBE_VALUE: &str = "1";

/// Probe every backend present in `env`.
pub fn detect_capabilities(env: &mut StorageEnvironment) -> Capabilities {
    let capabilities = Capabilities {
        cookie: env.cookies.as_mut().map_or(false, |jar| probe_cookies(jar.as_mut())),
        cross_session_store: env
            .cross_session
            .as_mut()
            .map_or(false, |store| probe_store(store.as_mut())),
        per_tab_store: env
            .per_tab
            .as_mut()
            .map_or(false, |store| probe_store(store.as_mut())),
    };

    tracing::debug!(
        cookie = capabilities.cookie,
        cross_session = capabilities.cross_session_store,
        per_tab = capabilities.per_tab_store,
        "Storage capabilities detected"
    );

    capabilities
}

fn probe_key() -> String {
    format!("{}{}", PROBE_PREFIX, Uuid::new_v4().simple())
}

fn probe_store(store: &mut dyn KeyValueStore) -> bool {
    let key = probe_key();
    let result = round_trip_store(store, &key);
    if result.is_err() {
        // Best effort; the probe already failed
        let _ = store.remove(&key);
    }
    result.unwrap_or_else(|err| {
        tracing::debug!(error = %err, "Key-value store probe failed");
        false
    })
}

fn round_trip_store(store: &mut dyn KeyValueStore, key: &str) -> Result<bool, StorageError> {
    store.set(key, PROBE_VALUE)?;
    let read_back = store.get(key)?;
    store.remove(key)?;
    Ok(read_back.as_deref() == Some(PROBE_VALUE))
}

fn probe_cookies(jar: &mut dyn CookieJar) -> bool {
    let name = probe_key();
    let result = round_trip_cookie(jar, &name);
    if result.is_err() {
        let _ = jar.remove(&name, None);
    }
    result.unwrap_or_else(|err| {
        tracing::debug!(error = %err, "Cookie probe failed");
        false
    })
}

fn round_trip_cookie(jar: &mut dyn CookieJar, name: &str) -> Result<bool, StorageError> {
    jar.set(name, PROBE_VALUE, &CookieOptions::new(None, 60))?;
    let read_back = jar.get(name)?;
    jar.remove(name, None)?;
    Ok(read_back.as_deref() == Some(PROBE_VALUE))
}
