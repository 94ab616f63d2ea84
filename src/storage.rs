//! Storage ports and in-memory backends
//!
//! The tracker never touches browser storage directly. Hosts hand it a
//! [`StorageEnvironment`] holding whichever backends the page exposes; the
//! in-memory implementations here back the tests, the CLI simulator and the
//! FFI surface.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::IpAddr;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Origin- or tab-scoped string store (localStorage / sessionStorage)
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

/// Attributes written with a cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// `None` writes a host-only cookie
    pub domain: Option<String>,
    pub path: String,
    pub max_age_secs: u64,
    pub same_site: SameSite,
}

impl CookieOptions {
    pub fn new(domain: Option<String>, max_age_secs: u64) -> Self {
        Self {
            domain,
            path: "/".to_string(),
            max_age_secs,
            same_site: SameSite::Lax,
        }
    }

    /// `name=value; path=/; max-age=N; SameSite=Lax[; domain=D]`
    pub fn to_cookie_string(&self, name: &str, value: &str) -> String {
        let mut cookie = format!(
            "{}={}; path={}; max-age={}; SameSite={:?}",
            name, value, self.path, self.max_age_secs, self.same_site
        );
        if let Some(domain) = &self.domain {
            cookie.push_str("; domain=");
            cookie.push_str(domain);
        }
        cookie
    }
}

/// Document cookie access.
///
/// Implementations are responsible for any value encoding the host requires.
/// Like `document.cookie`, a jar may silently ignore a write it refuses.
pub trait CookieJar {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, name: &str, value: &str, options: &CookieOptions) -> Result<(), StorageError>;
    fn remove(&mut self, name: &str, domain: Option<&str>) -> Result<(), StorageError>;
}

/// Backends available to one page
pub struct StorageEnvironment {
    pub hostname: String,
    pub cookies: Option<Box<dyn CookieJar>>,
    pub cross_session: Option<Box<dyn KeyValueStore>>,
    pub per_tab: Option<Box<dyn KeyValueStore>>,
}

impl StorageEnvironment {
    /// Environment with no backend at all
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            cookies: None,
            cross_session: None,
            per_tab: None,
        }
    }

    pub fn with_cookies(mut self, jar: impl CookieJar + 'static) -> Self {
        self.cookies = Some(Box::new(jar));
        self
    }

    pub fn with_cross_session(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.cross_session = Some(Box::new(store));
        self
    }

    pub fn with_per_tab(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.per_tab = Some(Box::new(store));
        self
    }
}

/// Shared in-memory key-value store.
///
/// Clones share the same contents, so a test can keep a handle while the
/// tracker owns another, and a "page reload" can reuse the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
    blocked: Rc<Cell<bool>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every operation fails, like storage disabled by policy
    pub fn blocked() -> Self {
        let store = Self::default();
        store.set_blocked(true);
        store
    }

    /// Store that rejects writes once total content exceeds `bytes`
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota_bytes: Some(bytes),
            ..Self::default()
        }
    }

    /// Toggle failure of all operations (shared across clones)
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.set(blocked);
    }

    /// Read without going through the failure toggle
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.blocked.get() {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.peek(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        if let Some(quota) = self.quota_bytes {
            let used: usize = self
                .entries
                .borrow()
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        self.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CookieEntry {
    value: String,
    /// Domain attribute, or `None` for host-only cookies
    domain: Option<String>,
    host: String,
}

impl CookieEntry {
    fn visible_to(&self, host: &str) -> bool {
        match &self.domain {
            Some(domain) => domain_matches(host, domain),
            None => self.host == host,
        }
    }
}

/// In-memory cookie jar modelling browser domain rules.
///
/// Jars created with [`MemoryCookieJar::for_host`] share one cookie store, so
/// two subdomains of the same site see each other's root-domain cookies but
/// not host-only ones. Domain attributes the host may not set (bare
/// hostnames, IP addresses, foreign domains) are ignored without an error,
/// as `document.cookie` does.
#[derive(Debug, Clone)]
pub struct MemoryCookieJar {
    host: String,
    cookies: Rc<RefCell<Vec<(String, CookieEntry)>>>,
    disabled: Rc<Cell<bool>>,
}

impl MemoryCookieJar {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            cookies: Rc::new(RefCell::new(Vec::new())),
            disabled: Rc::new(Cell::new(false)),
        }
    }

    /// A jar for another host sharing this jar's cookies
    pub fn for_host(&self, host: &str) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            cookies: Rc::clone(&self.cookies),
            disabled: Rc::clone(&self.disabled),
        }
    }

    /// Cookies disabled: writes are dropped and reads see nothing
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.set(disabled);
    }

    /// Domain attribute of the visible cookie named `name`
    pub fn domain_of(&self, name: &str) -> Option<Option<String>> {
        self.find(name).map(|entry| entry.domain)
    }

    fn find(&self, name: &str) -> Option<CookieEntry> {
        let cookies = self.cookies.borrow();
        let mut visible: Vec<&CookieEntry> = cookies
            .iter()
            .filter(|(n, entry)| n == name && entry.visible_to(&self.host))
            .map(|(_, entry)| entry)
            .collect();
        // Host-only cookies are the most specific
        visible.sort_by_key(|entry| entry.domain.is_some());
        visible.first().map(|entry| (*entry).clone())
    }

    fn accepts_domain(&self, domain: &str) -> bool {
        domain.contains('.') && domain.parse::<IpAddr>().is_err() && domain_matches(&self.host, domain)
    }

    fn same_slot(entry: &CookieEntry, domain: &Option<String>, host: &str) -> bool {
        match (&entry.domain, domain) {
            (Some(a), Some(b)) => a == b,
            (None, None) => entry.host == host,
            _ => false,
        }
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        if self.disabled.get() {
            return Ok(None);
        }
        Ok(self.find(name).map(|entry| entry.value))
    }

    fn set(&mut self, name: &str, value: &str, options: &CookieOptions) -> Result<(), StorageError> {
        if self.disabled.get() {
            return Ok(());
        }

        let domain = options
            .domain
            .as_deref()
            .map(|d| d.trim_start_matches('.').to_ascii_lowercase());
        if let Some(d) = &domain {
            if !self.accepts_domain(d) {
                return Ok(());
            }
        }

        let mut cookies = self.cookies.borrow_mut();
        cookies.retain(|(n, entry)| !(n == name && Self::same_slot(entry, &domain, &self.host)));
        if options.max_age_secs > 0 {
            cookies.push((
                name.to_string(),
                CookieEntry {
                    value: value.to_string(),
                    domain,
                    host: self.host.clone(),
                },
            ));
        }
        Ok(())
    }

    fn remove(&mut self, name: &str, domain: Option<&str>) -> Result<(), StorageError> {
        let expired = CookieOptions::new(domain.map(str::to_string), 0);
        self.set(name, "", &expired)
    }
}

/// `host` equals `domain` or is a subdomain of it
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}
