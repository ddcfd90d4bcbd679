//! Cosmetic filter index
//!
//! Stores `##selector` / `#@#selector` filters in hash buckets keyed by the
//! scope a page lookup will ask for:
//!
//! - hostname filters by the registrable domain of their hostname,
//! - entity filters (`name.*`) by the entity's last label,
//! - id/class generic filters by their leading `#id` or `.class`.
//!
//! A bucket key is only a 16-bit hash; every entry re-checks its own
//! discriminator before it is returned. Remaining generic selectors are
//! staged and split into low and high generics by [`CosmeticFilterIndex::freeze`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::hash::{BucketKey, DONTHIDE_KIND, HIDE_KIND};
use crate::parser::{parse_line, ParsedLine};
use crate::psl::{entity_from_parts, is_same_or_subdomain, DomainResolver};
use crate::types::{FilterKind, FilterRecord, FilteringSwitches};
use crate::url::extract_host;

// =============================================================================
// Filters and Buckets
// =============================================================================

/// One stored cosmetic filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorFilter {
    /// Generic selector that is exactly one id or class.
    Plain(String),
    /// Generic selector starting with the id or class `key`.
    PlainMore { key: String, selector: String },
    /// Applies to `hostname` and its subdomains.
    Hostname { hostname: String, selector: String },
    /// Applies to hostnames whose entity ends with `entity`.
    Entity { entity: String, selector: String },
}

impl SelectorFilter {
    pub fn selector(&self) -> &str {
        match self {
            Self::Plain(selector) => selector,
            Self::PlainMore { selector, .. }
            | Self::Hostname { selector, .. }
            | Self::Entity { selector, .. } => selector,
        }
    }

    /// Check the filter against its real lookup key: a candidate id/class
    /// for generics, the page hostname for hostname filters, the page
    /// entity for entity filters.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Plain(selector) => selector == key,
            Self::PlainMore { key: own, .. } => own == key,
            Self::Hostname { hostname, .. } => is_same_or_subdomain(key, hostname),
            Self::Entity { entity, .. } => is_same_or_subdomain(key, entity),
        }
    }

    fn is_generic(&self) -> bool {
        matches!(self, Self::Plain(_) | Self::PlainMore { .. })
    }
}

#[derive(Debug, Clone)]
enum Bucket {
    One(SelectorFilter),
    Many(Vec<SelectorFilter>),
}

impl Bucket {
    fn push(&mut self, filter: SelectorFilter) {
        *self = match std::mem::replace(self, Bucket::Many(Vec::new())) {
            Bucket::One(first) => Bucket::Many(vec![first, filter]),
            Bucket::Many(mut filters) => {
                filters.push(filter);
                Bucket::Many(filters)
            }
        };
    }

    fn filters(&self) -> &[SelectorFilter] {
        match self {
            Bucket::One(filter) => std::slice::from_ref(filter),
            Bucket::Many(filters) => filters,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of adding one filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CosmeticAddResult {
    Accepted,
    Duplicate,
    Rejected,
    NotCosmetic,
}

impl CosmeticAddResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Counters reported by [`CosmeticFilterIndex::freeze`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CosmeticStats {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub hostname_filters: usize,
    pub entity_filters: usize,
    pub specific_generics: usize,
    pub generic_exceptions: usize,
    pub low_generics: usize,
    pub high_generics: usize,
    pub high_generic_chunks: usize,
    pub buckets: usize,
    pub largest_bucket: usize,
}

/// Generic id/class selectors matching a set of candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenericSelectors {
    pub hide: Vec<String>,
    pub donthide: Vec<String>,
}

/// Everything a page needs to apply cosmetic filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainSelectors<'a> {
    pub hostname: String,
    pub domain: String,
    pub entity: String,
    pub hide: Vec<String>,
    pub donthide: Vec<String>,
    pub low_generics: &'a [String],
    pub high_generics: &'a [String],
}

// =============================================================================
// Index
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    accepted: usize,
    duplicates: usize,
    rejected: usize,
    hostname_filters: usize,
    entity_filters: usize,
    specific_generics: usize,
}

/// Hash-bucketed store of cosmetic filters.
pub struct CosmeticFilterIndex {
    resolver: Arc<DomainResolver>,
    bucket_key: fn(u8, &str) -> BucketKey,
    buckets: HashMap<BucketKey, Bucket>,
    seen: HashSet<String>,
    staged_generics: Vec<String>,
    generic_exceptions: HashSet<String>,
    low_generics: Vec<String>,
    high_generics: Vec<String>,
    frozen: bool,
    min_chunk: usize,
    chunk_divisor: usize,
    counters: Counters,
}

impl CosmeticFilterIndex {
    pub fn new(resolver: Arc<DomainResolver>) -> Self {
        Self::with_config(resolver, &EngineConfig::default())
    }

    pub fn with_config(resolver: Arc<DomainResolver>, config: &EngineConfig) -> Self {
        Self {
            resolver,
            bucket_key: BucketKey::new,
            buckets: HashMap::new(),
            seen: HashSet::new(),
            staged_generics: Vec::new(),
            generic_exceptions: HashSet::new(),
            low_generics: Vec::new(),
            high_generics: Vec::new(),
            frozen: false,
            min_chunk: config.min_generic_chunk.max(1),
            chunk_divisor: config.generic_chunk_divisor.max(1),
            counters: Counters::default(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Parse and add one filter line.
    pub fn add(&mut self, filter_text: &str) -> CosmeticAddResult {
        match parse_line(filter_text) {
            ParsedLine::Cosmetic(rec) => self.add_record(&rec),
            ParsedLine::Invalid(_) if filter_text.contains('#') => {
                self.counters.rejected += 1;
                CosmeticAddResult::Rejected
            }
            _ => CosmeticAddResult::NotCosmetic,
        }
    }

    /// Add an already parsed cosmetic record.
    pub fn add_record(&mut self, rec: &FilterRecord) -> CosmeticAddResult {
        if rec.kind != FilterKind::Cosmetic {
            return CosmeticAddResult::NotCosmetic;
        }
        if self.frozen {
            log::warn!("cosmetic index is frozen, ignoring '{}'", rec.raw);
            self.counters.rejected += 1;
            return CosmeticAddResult::Rejected;
        }
        if !self.seen.insert(rec.raw.trim().to_string()) {
            self.counters.duplicates += 1;
            return CosmeticAddResult::Duplicate;
        }

        let (kind, opposite) = if rec.exception {
            (DONTHIDE_KIND, HIDE_KIND)
        } else {
            (HIDE_KIND, DONTHIDE_KIND)
        };
        let selector = rec.pattern.as_str();

        for hostname in &rec.hostnames {
            self.push_hostname(kind, hostname, selector);
        }
        for entity in &rec.entities {
            self.push_entity(kind, entity, selector);
        }

        // `~host##sel` carves an exception out of the filter's scope
        if !rec.exception {
            for hostname in &rec.excluded_hostnames {
                self.push_hostname(opposite, hostname, selector);
            }
            for entity in &rec.excluded_entities {
                self.push_entity(opposite, entity, selector);
            }
        }

        if rec.hostnames.is_empty() && rec.entities.is_empty() {
            self.add_generic(rec.exception, selector);
        }

        self.counters.accepted += 1;
        CosmeticAddResult::Accepted
    }

    fn push(&mut self, key: BucketKey, filter: SelectorFilter) {
        match self.buckets.get_mut(&key) {
            Some(bucket) => bucket.push(filter),
            None => {
                self.buckets.insert(key, Bucket::One(filter));
            }
        }
    }

    fn push_hostname(&mut self, kind: u8, hostname: &str, selector: &str) {
        let domain = self.resolver.domain_from_hostname(hostname);
        let key = (self.bucket_key)(kind, &domain);
        self.push(
            key,
            SelectorFilter::Hostname {
                hostname: hostname.to_string(),
                selector: selector.to_string(),
            },
        );
        self.counters.hostname_filters += 1;
    }

    fn push_entity(&mut self, kind: u8, entity: &str, selector: &str) {
        let last_label = entity.rsplit('.').next().unwrap_or(entity);
        let key = (self.bucket_key)(kind, last_label);
        self.push(
            key,
            SelectorFilter::Entity {
                entity: entity.to_string(),
                selector: selector.to_string(),
            },
        );
        self.counters.entity_filters += 1;
    }

    fn add_generic(&mut self, exception: bool, selector: &str) {
        if exception {
            self.generic_exceptions.insert(selector.to_string());
        }

        match generic_key(selector) {
            Some(key) => {
                let kind = if exception { DONTHIDE_KIND } else { HIDE_KIND };
                let filter = if key.len() == selector.len() {
                    SelectorFilter::Plain(selector.to_string())
                } else {
                    SelectorFilter::PlainMore {
                        key: key.to_string(),
                        selector: selector.to_string(),
                    }
                };
                let bucket = (self.bucket_key)(kind, key);
                self.push(bucket, filter);
                if !exception {
                    self.counters.specific_generics += 1;
                }
            }
            None if !exception => self.staged_generics.push(selector.to_string()),
            None => {}
        }
    }

    /// One-way switch to query mode: split the staged generic selectors
    /// into low and high generics and chunk the high ones.
    pub fn freeze(&mut self) -> CosmeticStats {
        if !self.frozen {
            let staged = std::mem::take(&mut self.staged_generics);
            let mut low_seen = HashSet::new();
            let mut high = Vec::new();

            for selector in staged {
                if self.generic_exceptions.contains(&selector) {
                    continue;
                }
                if is_low_generic(&selector) {
                    if low_seen.insert(selector.clone()) {
                        self.low_generics.push(selector);
                    }
                } else {
                    high.push(selector);
                }
            }

            let chunk = (high.len() / self.chunk_divisor).max(self.min_chunk);
            self.high_generics = high.chunks(chunk).map(|c| c.join(",\n")).collect();
            self.staged_generics.shrink_to_fit();
            self.frozen = true;
        }

        let stats = self.stats();
        log::debug!(
            "cosmetic index frozen: {} accepted, {} duplicates, {} buckets (largest {}), {} low / {} high generics",
            stats.accepted,
            stats.duplicates,
            stats.buckets,
            stats.largest_bucket,
            stats.low_generics,
            stats.high_generics
        );
        stats
    }

    pub fn stats(&self) -> CosmeticStats {
        let high_generics = self
            .high_generics
            .iter()
            .map(|chunk| chunk.split(",\n").count())
            .sum();
        CosmeticStats {
            accepted: self.counters.accepted,
            duplicates: self.counters.duplicates,
            rejected: self.counters.rejected,
            hostname_filters: self.counters.hostname_filters,
            entity_filters: self.counters.entity_filters,
            specific_generics: self.counters.specific_generics,
            generic_exceptions: self.generic_exceptions.len(),
            low_generics: self.low_generics.len(),
            high_generics,
            high_generic_chunks: self.high_generics.len(),
            buckets: self.buckets.len(),
            largest_bucket: self.buckets.values().map(|b| b.filters().len()).max().unwrap_or(0),
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Id/class selectors that apply to the given candidates, as found on
    /// a page (`#id`, `.class`).
    pub fn retrieve_generic_selectors<S: AsRef<str>>(&self, candidates: &[S]) -> GenericSelectors {
        let mut out = GenericSelectors::default();
        let mut seen = HashSet::new();

        for candidate in candidates {
            let candidate = candidate.as_ref();
            for (kind, target) in [(HIDE_KIND, &mut out.hide), (DONTHIDE_KIND, &mut out.donthide)] {
                let Some(bucket) = self.buckets.get(&(self.bucket_key)(kind, candidate)) else {
                    continue;
                };
                for filter in bucket.filters() {
                    if !filter.is_generic() || !filter.matches(candidate) {
                        continue;
                    }
                    let selector = filter.selector();
                    if kind == HIDE_KIND && self.generic_exceptions.contains(selector) {
                        continue;
                    }
                    if seen.insert((kind, selector)) {
                        target.push(selector.to_string());
                    }
                }
            }
        }

        out
    }

    /// Selectors for a page on `hostname`. `None` unless both net and
    /// cosmetic filtering are enabled for the page.
    pub fn retrieve_domain_selectors(
        &self,
        hostname: &str,
        switches: FilteringSwitches,
    ) -> Option<DomainSelectors<'_>> {
        if !switches.net_filtering || !switches.cosmetic_filtering {
            return None;
        }

        let hostname = hostname.trim_end_matches('.').to_ascii_lowercase();
        let domain = self.resolver.domain_from_hostname(&hostname);
        let entity = entity_from_parts(&hostname, &domain).to_string();
        let domain_entity = entity_from_parts(&domain, &domain);
        let entity_key = domain_entity.rsplit('.').next().unwrap_or(domain_entity);

        let mut hide = Vec::new();
        let mut donthide = Vec::new();
        for (kind, target) in [(HIDE_KIND, &mut hide), (DONTHIDE_KIND, &mut donthide)] {
            self.collect_scoped(kind, &domain, &hostname, target);
            self.collect_scoped(kind, entity_key, &entity, target);
        }

        let donthide_set: HashSet<&str> = donthide.iter().map(String::as_str).collect();
        hide.retain(|s| !donthide_set.contains(s.as_str()) && !self.generic_exceptions.contains(s));

        Some(DomainSelectors {
            hostname,
            domain,
            entity,
            hide,
            donthide,
            low_generics: &self.low_generics,
            high_generics: &self.high_generics,
        })
    }

    /// Same as [`Self::retrieve_domain_selectors`] from a page URL.
    pub fn retrieve_for_url(
        &self,
        location_url: &str,
        switches: FilteringSwitches,
    ) -> Option<DomainSelectors<'_>> {
        let hostname = extract_host(location_url)?;
        self.retrieve_domain_selectors(hostname, switches)
    }

    fn collect_scoped(&self, kind: u8, bucket_key: &str, lookup: &str, out: &mut Vec<String>) {
        let Some(bucket) = self.buckets.get(&(self.bucket_key)(kind, bucket_key)) else {
            return;
        };
        for filter in bucket.filters() {
            if filter.is_generic() || !filter.matches(lookup) {
                continue;
            }
            let selector = filter.selector();
            if !out.iter().any(|s| s == selector) {
                out.push(selector.to_string());
            }
        }
    }
}

/// Leading `#id` or `.class` of a selector.
fn generic_key(selector: &str) -> Option<&str> {
    let bytes = selector.as_bytes();
    if !matches!(bytes.first(), Some(b'#') | Some(b'.')) {
        return None;
    }
    let end = bytes[1..]
        .iter()
        .position(|&b| !(b.is_ascii_alphanumeric() || b == b'_' || b == b'-'))
        .map_or(bytes.len(), |p| p + 1);
    if end == 1 {
        return None;
    }
    Some(&selector[..end])
}

/// `tag[alt="..."]` or `tag[title="..."]`, tag optional.
fn is_low_generic(selector: &str) -> bool {
    let Some(open) = selector.find('[') else {
        return false;
    };
    if !selector[..open].bytes().all(|b| b.is_ascii_lowercase()) {
        return false;
    }
    let attr = &selector[open + 1..];
    let Some(value) = attr.strip_prefix("alt=\"").or_else(|| attr.strip_prefix("title=\"")) else {
        return false;
    };
    match value.find('"') {
        Some(close) => close > 0 && &value[close..] == "\"]",
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> CosmeticFilterIndex {
        CosmeticFilterIndex::new(Arc::new(DomainResolver::new()))
    }

    fn on() -> FilteringSwitches {
        FilteringSwitches::default()
    }

    #[test]
    fn test_hostname_filter_scenario() {
        let mut idx = index();
        assert!(idx.add("example.com##.ad-unit").is_accepted());
        idx.freeze();

        let sel = idx.retrieve_domain_selectors("www.example.com", on()).unwrap();
        assert_eq!(sel.hide, vec![".ad-unit"]);
        assert_eq!(sel.domain, "example.com");

        let sel = idx.retrieve_domain_selectors("other.com", on()).unwrap();
        assert!(sel.hide.is_empty());
    }

    #[test]
    fn test_switches_gate_lookups() {
        let mut idx = index();
        idx.add("example.com##.ad-unit");
        idx.freeze();

        let net_off = FilteringSwitches { net_filtering: false, cosmetic_filtering: true };
        let cosmetic_off = FilteringSwitches { net_filtering: true, cosmetic_filtering: false };
        assert!(idx.retrieve_domain_selectors("example.com", net_off).is_none());
        assert!(idx.retrieve_domain_selectors("example.com", cosmetic_off).is_none());
    }

    #[test]
    fn test_entity_filter() {
        let mut idx = index();
        idx.add("google.*##.g-ad");
        idx.freeze();

        assert_eq!(idx.retrieve_domain_selectors("www.google.co.uk", on()).unwrap().hide, vec![".g-ad"]);
        assert_eq!(idx.retrieve_domain_selectors("google.com", on()).unwrap().hide, vec![".g-ad"]);
        assert!(idx.retrieve_domain_selectors("googles.com", on()).unwrap().hide.is_empty());
        assert!(idx.retrieve_domain_selectors("google.example.com", on()).unwrap().hide.is_empty());
    }

    #[test]
    fn test_exceptions_remove_hide() {
        let mut idx = index();
        idx.add("example.com##.ad");
        idx.add("sub.example.com#@#.ad");
        idx.add("example.com,~shop.example.com##.promo");
        idx.freeze();

        let sub = idx.retrieve_domain_selectors("sub.example.com", on()).unwrap();
        assert!(sub.hide.iter().all(|s| s != ".ad"));
        assert_eq!(sub.donthide, vec![".ad"]);

        let shop = idx.retrieve_domain_selectors("shop.example.com", on()).unwrap();
        assert_eq!(shop.hide, vec![".ad"]);
        assert_eq!(shop.donthide, vec![".promo"]);

        let www = idx.retrieve_domain_selectors("www.example.com", on()).unwrap();
        assert_eq!(www.hide, vec![".ad", ".promo"]);
        assert!(www.donthide.is_empty());
    }

    #[test]
    fn test_duplicates_are_counted_once() {
        let mut idx = index();
        assert_eq!(idx.add("example.com##.ad"), CosmeticAddResult::Accepted);
        assert_eq!(idx.add("example.com##.ad"), CosmeticAddResult::Duplicate);
        assert_eq!(idx.add("||example.com^"), CosmeticAddResult::NotCosmetic);
        assert_eq!(idx.add("example.com#?#div:has(a)"), CosmeticAddResult::Rejected);
        let stats = idx.freeze();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(idx.retrieve_domain_selectors("example.com", on()).unwrap().hide.len(), 1);
    }

    #[test]
    fn test_specific_generics() {
        let mut idx = index();
        idx.add("##.banner");
        idx.add("##.banner > img");
        idx.add("###sidebar-ad");
        idx.add("#@##sidebar-ad");
        idx.freeze();

        let found = idx.retrieve_generic_selectors(&[".banner", "#sidebar-ad", ".nothing"]);
        assert_eq!(found.hide, vec![".banner", ".banner > img"]);
        assert_eq!(found.donthide, vec!["#sidebar-ad"]);
    }

    #[test]
    fn test_freeze_splits_generics() {
        let mut idx = index();
        idx.add("##img[alt=\"advertisement\"]");
        idx.add("##a[title=\"Sponsored\"]");
        idx.add("##[title=\"ad\"]");
        for i in 0..20 {
            idx.add(&format!("##div.x{i} > span"));
        }
        idx.add("##div.x3 > span");
        idx.add("#@#div.x4 > span");
        let stats = idx.freeze();

        assert_eq!(stats.low_generics, 3);
        assert_eq!(stats.high_generics, 19);
        // chunk size is max(19 / 8, 8) = 8
        assert_eq!(stats.high_generic_chunks, 3);

        let sel = idx.retrieve_domain_selectors("any.com", on()).unwrap();
        assert_eq!(sel.low_generics.len(), 3);
        assert!(sel.high_generics[0].starts_with("div.x0 > span,\ndiv.x1 > span"));
        assert!(sel.high_generics.iter().all(|c| !c.contains("div.x4 ")));
    }

    #[test]
    fn test_add_after_freeze_is_rejected() {
        let mut idx = index();
        idx.freeze();
        assert!(idx.is_frozen());
        assert_eq!(idx.add("example.com##.late"), CosmeticAddResult::Rejected);
        assert!(idx.retrieve_domain_selectors("example.com", on()).unwrap().hide.is_empty());
    }

    #[test]
    fn test_forced_collisions_never_leak() {
        fn same_bucket(kind: u8, _key: &str) -> BucketKey {
            BucketKey { kind, hash: 7 }
        }

        let mut idx = index();
        idx.bucket_key = same_bucket;
        idx.add("a.com##.only-a");
        idx.add("b.com##.only-b");
        idx.add("shop.*##.only-shop");
        idx.add("##.generic-one");
        idx.add("##.generic-two span");
        idx.freeze();

        let a = idx.retrieve_domain_selectors("www.a.com", on()).unwrap();
        assert_eq!(a.hide, vec![".only-a"]);

        let shop = idx.retrieve_domain_selectors("shop.de", on()).unwrap();
        assert_eq!(shop.hide, vec![".only-shop"]);

        let generic = idx.retrieve_generic_selectors(&[".generic-two"]);
        assert_eq!(generic.hide, vec![".generic-two span"]);
        assert!(idx.stats().largest_bucket >= 5);
    }

    #[test]
    fn test_retrieve_for_url() {
        let mut idx = index();
        idx.add("example.com##.ad-unit");
        idx.freeze();
        let sel = idx.retrieve_for_url("https://www.example.com/page", on()).unwrap();
        assert_eq!(sel.hide, vec![".ad-unit"]);
        assert!(idx.retrieve_for_url("about:blank", on()).is_none());
    }

    #[test]
    fn test_generic_key_and_low_generic_shapes() {
        assert_eq!(generic_key(".ad-box"), Some(".ad-box"));
        assert_eq!(generic_key("#main > .ad"), Some("#main"));
        assert_eq!(generic_key("div.ad"), None);
        assert_eq!(generic_key("."), None);

        assert!(is_low_generic("img[alt=\"ad\"]"));
        assert!(is_low_generic("[title=\"x\"]"));
        assert!(!is_low_generic("img[alt=\"\"]"));
        assert!(!is_low_generic("img[src=\"ad\"]"));
        assert!(!is_low_generic("Img[alt=\"ad\"]"));
        assert!(!is_low_generic("img[alt=\"ad\"] > span"));
    }
}
