//! Persistence adapter
//!
//! Uniform read/write of the [`SessionState`] record over whichever backend
//! was selected at start. Every write is verified by reading the record back.
//! Once a backend raises an error, the adapter switches permanently to an
//! in-memory copy for the rest of the page's lifetime. Nothing here returns
//! an error to the caller.

use crate::config::TrackerConfig;
use crate::domain::root_domain;
use crate::error::{StorageError, TrackerError};
use crate::storage::{CookieJar, CookieOptions, KeyValueStore, StorageEnvironment};
use crate::types::{SessionState, StorageKind};

enum Backend {
    Cookie(Box<dyn CookieJar>),
    Store(Box<dyn KeyValueStore>),
    Memory,
}

pub struct PersistenceAdapter {
    backend: Backend,
    selected: StorageKind,
    key: String,
    /// Domain attribute for cookie writes; cleared after a host-only fallback
    cookie_domain: Option<String>,
    cookie_max_age_secs: u64,
    /// Last written state; the only copy once degraded
    memory: Option<SessionState>,
    degraded: bool,
}

impl PersistenceAdapter {
    /// Adapter over the `kind` backend of `env`.
    ///
    /// Falls back to memory when `env` does not hold that backend.
    pub fn new(mut env: StorageEnvironment, kind: StorageKind, config: &TrackerConfig) -> Self {
        let backend = match kind {
            StorageKind::Cookie => env.cookies.take().map(Backend::Cookie),
            StorageKind::CrossSession => env.cross_session.take().map(Backend::Store),
            StorageKind::PerTab => env.per_tab.take().map(Backend::Store),
            StorageKind::Memory => None,
        };

        let (backend, selected) = match backend {
            Some(backend) => (backend, kind),
            None => (Backend::Memory, StorageKind::Memory),
        };

        let cookie_domain = config
            .cross_subdomain
            .then(|| root_domain(&env.hostname))
            .filter(|domain| !domain.is_empty());

        Self {
            backend,
            selected,
            key: config.storage_key.clone(),
            cookie_domain,
            cookie_max_age_secs: config.max_session_age_ms / 1000,
            memory: None,
            degraded: false,
        }
    }

    /// Memory-only adapter
    pub fn in_memory(key: &str) -> Self {
        Self {
            backend: Backend::Memory,
            selected: StorageKind::Memory,
            key: key.to_string(),
            cookie_domain: None,
            cookie_max_age_secs: 0,
            memory: None,
            degraded: false,
        }
    }

    /// Backend chosen at construction
    pub fn selected_kind(&self) -> StorageKind {
        self.selected
    }

    /// Backend currently answering reads and writes
    pub fn active_kind(&self) -> StorageKind {
        if self.degraded {
            StorageKind::Memory
        } else {
            self.selected
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Domain attribute the next cookie write will carry
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    /// Load the persisted record. Invalid or unparsable records read as absent.
    pub fn read(&mut self) -> Option<SessionState> {
        if self.degraded {
            return self.memory.clone();
        }

        let raw = match &self.backend {
            Backend::Cookie(jar) => jar.get(&self.key),
            Backend::Store(store) => store.get(&self.key),
            Backend::Memory => return self.memory.clone(),
        };

        match raw {
            Ok(Some(raw)) => {
                let state = SessionState::from_json(&raw);
                if state.is_none() {
                    tracing::debug!(key = %self.key, "Ignoring unparsable session record");
                }
                state
            }
            Ok(None) => None,
            Err(err) => {
                self.degrade(&TrackerError::from(err));
                self.memory.clone()
            }
        }
    }

    /// Persist `state`. Returns `false` if the backend failed and the record
    /// is now held in memory only.
    pub fn write(&mut self, state: &SessionState) -> bool {
        self.memory = Some(state.clone());
        if self.degraded {
            return true;
        }

        let result = match self.backend {
            Backend::Memory => Ok(()),
            Backend::Cookie(_) => self.write_cookie(state),
            Backend::Store(_) => self.write_store(state),
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                self.degrade(&err);
                false
            }
        }
    }

    fn write_store(&mut self, state: &SessionState) -> Result<(), TrackerError> {
        let json = state.to_json()?;
        let Backend::Store(store) = &mut self.backend else {
            return Ok(());
        };

        store.set(&self.key, &json)?;
        if !verify(store.get(&self.key)?, state) {
            return Err(TrackerError::InvalidState(
                "read-back did not match written record".to_string(),
            ));
        }
        Ok(())
    }

    fn write_cookie(&mut self, state: &SessionState) -> Result<(), TrackerError> {
        let json = state.to_json()?;
        let Backend::Cookie(jar) = &mut self.backend else {
            return Ok(());
        };

        if let Some(domain) = self.cookie_domain.clone() {
            let options = CookieOptions::new(Some(domain.clone()), self.cookie_max_age_secs);
            jar.set(&self.key, &json, &options)?;
            if verify(jar.get(&self.key)?, state) {
                return Ok(());
            }
            tracing::warn!(
                domain = %domain,
                "Root-domain cookie did not persist, retrying as host-only"
            );
        }

        let options = CookieOptions::new(None, self.cookie_max_age_secs);
        jar.set(&self.key, &json, &options)?;
        if !verify(jar.get(&self.key)?, state) {
            return Err(StorageError::Rejected("cookie did not persist".to_string()).into());
        }

        self.cookie_domain = None;
        Ok(())
    }

    fn degrade(&mut self, err: &TrackerError) {
        if !self.degraded {
            tracing::warn!(
                error = %err,
                backend = self.selected.as_str(),
                "Storage backend failed, continuing in memory"
            );
        }
        self.degraded = true;
    }
}

/// Read-back holds a record with the same start time
fn verify(read_back: Option<String>, expected: &SessionState) -> bool {
    read_back
        .as_deref()
        .and_then(SessionState::from_json)
        .map_or(false, |stored| stored.start_time == expected.start_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryCookieJar, MemoryStore};
    use pretty_assertions::assert_eq;

    fn sample_state() -> SessionState {
        SessionState {
            start_time: 1_700_000_000_000,
            inactive_time: 12_345,
            last_milestone_index: 4,
            version: "2".to_string(),
        }
    }

    fn config() -> TrackerConfig {
        TrackerConfig::default()
    }

    #[test]
    fn test_round_trip_every_backend() {
        let host = "shop.example.com";
        let adapters = vec![
            PersistenceAdapter::new(
                StorageEnvironment::new(host).with_cookies(MemoryCookieJar::new(host)),
                StorageKind::Cookie,
                &config(),
            ),
            PersistenceAdapter::new(
                StorageEnvironment::new(host).with_cross_session(MemoryStore::new()),
                StorageKind::CrossSession,
                &config(),
            ),
            PersistenceAdapter::new(
                StorageEnvironment::new(host).with_per_tab(MemoryStore::new()),
                StorageKind::PerTab,
                &config(),
            ),
            PersistenceAdapter::in_memory("dwell_session"),
        ];

        for mut adapter in adapters {
            let kind = adapter.selected_kind();
            assert!(adapter.write(&sample_state()), "{:?}", kind);
            assert_eq!(adapter.read(), Some(sample_state()));
            assert!(!adapter.is_degraded());
        }
    }

    #[test]
    fn test_cookie_scoped_to_root_domain() {
        let jar = MemoryCookieJar::new("shop.example.com");
        let mut adapter = PersistenceAdapter::new(
            StorageEnvironment::new("shop.example.com").with_cookies(jar.clone()),
            StorageKind::Cookie,
            &config(),
        );

        assert!(adapter.write(&sample_state()));
        assert_eq!(
            jar.domain_of("dwell_session"),
            Some(Some("example.com".to_string()))
        );

        // Visible from a sibling subdomain
        let mut sibling = PersistenceAdapter::new(
            StorageEnvironment::new("blog.example.com")
                .with_cookies(jar.for_host("blog.example.com")),
            StorageKind::Cookie,
            &config(),
        );
        assert_eq!(sibling.read(), Some(sample_state()));
    }

    #[test]
    fn test_cookie_host_only_without_cross_subdomain() {
        let jar = MemoryCookieJar::new("shop.example.com");
        let config = TrackerConfig {
            cross_subdomain: false,
            ..TrackerConfig::default()
        };
        let mut adapter = PersistenceAdapter::new(
            StorageEnvironment::new("shop.example.com").with_cookies(jar.clone()),
            StorageKind::Cookie,
            &config,
        );

        assert!(adapter.write(&sample_state()));
        assert_eq!(jar.domain_of("dwell_session"), Some(None));
        assert_eq!(jar.for_host("blog.example.com").get("dwell_session").unwrap(), None);
    }

    #[test]
    fn test_cookie_falls_back_to_host_only() {
        // Browsers refuse a domain attribute of `localhost`
        let jar = MemoryCookieJar::new("localhost");
        let mut adapter = PersistenceAdapter::new(
            StorageEnvironment::new("localhost").with_cookies(jar.clone()),
            StorageKind::Cookie,
            &config(),
        );
        assert_eq!(adapter.cookie_domain(), Some("localhost"));

        assert!(adapter.write(&sample_state()));
        assert_eq!(jar.domain_of("dwell_session"), Some(None));
        assert_eq!(adapter.cookie_domain(), None);
        assert_eq!(adapter.read(), Some(sample_state()));
        assert!(!adapter.is_degraded());
    }

    #[test]
    fn test_rejected_cookie_degrades_to_memory() {
        let jar = MemoryCookieJar::new("example.com");
        let mut adapter = PersistenceAdapter::new(
            StorageEnvironment::new("example.com").with_cookies(jar.clone()),
            StorageKind::Cookie,
            &config(),
        );

        jar.set_disabled(true);
        assert!(!adapter.write(&sample_state()));
        assert!(adapter.is_degraded());
        assert_eq!(adapter.active_kind(), StorageKind::Memory);
        assert_eq!(adapter.read(), Some(sample_state()));
    }

    #[test]
    fn test_failure_is_permanent() {
        let store = MemoryStore::new();
        let mut adapter = PersistenceAdapter::new(
            StorageEnvironment::new("example.com").with_cross_session(store.clone()),
            StorageKind::CrossSession,
            &config(),
        );

        assert!(adapter.write(&sample_state()));

        store.set_blocked(true);
        let mut next = sample_state();
        next.last_milestone_index = 5;
        assert!(!adapter.write(&next));
        assert!(adapter.is_degraded());

        // Backend recovers, but the adapter stays in memory
        store.set_blocked(false);
        let mut later = next.clone();
        later.last_milestone_index = 6;
        assert!(adapter.write(&later));
        assert_eq!(adapter.read(), Some(later));

        let persisted = SessionState::from_json(&store.peek("dwell_session").unwrap()).unwrap();
        assert_eq!(persisted.last_milestone_index, 4);
    }

    #[test]
    fn test_read_error_degrades() {
        let store = MemoryStore::new();
        let mut adapter = PersistenceAdapter::new(
            StorageEnvironment::new("example.com").with_per_tab(store.clone()),
            StorageKind::PerTab,
            &config(),
        );
        assert!(adapter.write(&sample_state()));

        store.set_blocked(true);
        assert_eq!(adapter.read(), Some(sample_state()));
        assert!(adapter.is_degraded());
    }

    #[test]
    fn test_quota_exceeded_degrades() {
        let mut adapter = PersistenceAdapter::new(
            StorageEnvironment::new("example.com").with_cross_session(MemoryStore::with_quota(16)),
            StorageKind::CrossSession,
            &config(),
        );

        assert!(!adapter.write(&sample_state()));
        assert!(adapter.is_degraded());
        assert_eq!(adapter.read(), Some(sample_state()));
    }

    #[test]
    fn test_invalid_record_reads_as_absent() {
        let store = MemoryStore::new();
        let mut adapter = PersistenceAdapter::new(
            StorageEnvironment::new("example.com").with_cross_session(store.clone()),
            StorageKind::CrossSession,
            &config(),
        );

        store.insert("dwell_session", "{broken");
        assert_eq!(adapter.read(), None);

        store.insert("dwell_session", r#"{"startTime": 0, "inactiveTime": 0}"#);
        assert_eq!(adapter.read(), None);
        assert!(!adapter.is_degraded());
    }

    #[test]
    fn test_missing_backend_selects_memory() {
        let adapter = PersistenceAdapter::new(
            StorageEnvironment::new("example.com"),
            StorageKind::Cookie,
            &config(),
        );
        assert_eq!(adapter.selected_kind(), StorageKind::Memory);
    }
}
