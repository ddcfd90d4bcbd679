//! Registrable domain and entity extraction
//!
//! [`DomainResolver`] answers "what is the registrable domain of this
//! hostname" using a loaded Public Suffix List when one is available, and a
//! small built-in heuristic otherwise. Results are memoized in a bounded
//! cache.
//!
//! # Examples
//!
//! ```
//! use veil_core::psl::DomainResolver;
//!
//! let resolver = DomainResolver::new();
//! assert_eq!(resolver.domain_from_hostname("sub.example.com"), "example.com");
//! assert_eq!(resolver.domain_from_hostname("sub.example.co.uk"), "example.co.uk");
//! assert_eq!(resolver.entity_from_hostname("www.example.co.uk"), "www.example");
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;

use publicsuffix::{List, Psl};

use crate::error::Error;

// =============================================================================
// Domain Cache
// =============================================================================

const DOMAIN_CACHE_CAPACITY: usize = 4096;

/// Bounded memo of hostname to domain. Evicts the oldest insertion.
struct DomainCache {
    capacity: usize,
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl DomainCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: String) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
    }
}

// =============================================================================
// Domain Resolver
// =============================================================================

/// Common two-part TLDs for fallback.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Resolves registrable domains and entities for hostnames.
pub struct DomainResolver {
    list: Option<List>,
    cache: Mutex<DomainCache>,
}

impl std::fmt::Debug for DomainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainResolver")
            .field("has_list", &self.list.is_some())
            .finish()
    }
}

impl Default for DomainResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainResolver {
    /// Resolver using only the built-in heuristic.
    pub fn new() -> Self {
        Self {
            list: None,
            cache: Mutex::new(DomainCache::new(DOMAIN_CACHE_CAPACITY)),
        }
    }

    /// Resolver backed by the text of a Public Suffix List.
    pub fn from_list_text(text: &str) -> Result<Self, Error> {
        let list: List = text
            .parse()
            .map_err(|e: publicsuffix::Error| Error::PublicSuffix(e.to_string()))?;
        log::debug!("loaded public suffix list ({} bytes)", text.len());
        Ok(Self {
            list: Some(list),
            cache: Mutex::new(DomainCache::new(DOMAIN_CACHE_CAPACITY)),
        })
    }

    pub fn has_list(&self) -> bool {
        self.list.is_some()
    }

    /// Get the registrable domain (eTLD+1) for a hostname.
    ///
    /// IP addresses and single-label hosts are their own domain.
    pub fn domain_from_hostname(&self, hostname: &str) -> String {
        let host = hostname.trim_end_matches('.');
        if host.is_empty() {
            return String::new();
        }
        if is_ip_address(host) {
            return host.to_string();
        }

        if let Ok(cache) = self.cache.lock() {
            if let Some(cached) = cache.get(host) {
                return cached;
            }
        }

        let result = self.compute_domain(host);

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(host.to_string(), result.clone());
        }

        result
    }

    /// Hostname with its public suffix removed: `www.example.com` gives
    /// `www.example`. This is what `example.*` scopes are compared with.
    pub fn entity_from_hostname(&self, hostname: &str) -> String {
        let domain = self.domain_from_hostname(hostname);
        entity_from_parts(hostname, &domain).to_string()
    }

    fn compute_domain(&self, host: &str) -> String {
        if let Some(list) = &self.list {
            if let Some(domain) = list.domain(host.as_bytes()) {
                if let Ok(domain) = std::str::from_utf8(domain.as_bytes()) {
                    return domain.to_string();
                }
            }
            // Host is itself a public suffix
            return host.to_string();
        }

        let labels: Vec<&str> = host.split('.').collect();
        fallback_domain(&labels)
    }
}

/// Fallback eTLD+1 heuristic.
fn fallback_domain(labels: &[&str]) -> String {
    let n = labels.len();
    if n <= 2 {
        return labels.join(".");
    }

    // Check for common two-part TLDs
    let last_two = format!("{}.{}", labels[n - 2], labels[n - 1]);
    if COMMON_TWO_PART_TLDS.contains(&last_two.as_str()) {
        return labels[n - 3..].join(".");
    }

    // Default: last 2 labels
    labels[n - 2..].join(".")
}

// =============================================================================
// Hostname Helpers
// =============================================================================

/// Strip the public suffix of `domain` from `hostname`.
pub fn entity_from_parts<'a>(hostname: &'a str, domain: &str) -> &'a str {
    let suffix_len = match domain.find('.') {
        Some(pos) => domain.len() - pos - 1,
        None => return hostname,
    };
    if hostname.len() <= suffix_len + 1 {
        return hostname;
    }
    &hostname[..hostname.len() - suffix_len - 1]
}

/// `hostname` equals `domain` or is a dot-separated subdomain of it.
#[inline]
pub fn is_same_or_subdomain(hostname: &str, domain: &str) -> bool {
    if domain.is_empty() || !hostname.ends_with(domain) {
        return false;
    }
    hostname.len() == domain.len() || hostname.as_bytes()[hostname.len() - domain.len() - 1] == b'.'
}

pub fn is_ip_address(hostname: &str) -> bool {
    let trimmed = hostname.trim_start_matches('[').trim_end_matches(']');
    trimmed.parse::<IpAddr>().is_ok()
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// One step broader in the hostname hierarchy: `a.b.c` to `b.c`, a
/// single label or IP address to `*`, and `*` to the empty string.
pub fn to_broader_hostname(hostname: &str) -> &str {
    if hostname == "*" || hostname.is_empty() {
        return "";
    }
    if is_ip_address(hostname) {
        return "*";
    }
    get_parent_domain(hostname).unwrap_or("*")
}
