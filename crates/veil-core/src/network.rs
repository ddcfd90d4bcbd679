//! Static network filters
//!
//! Filters are split into three groups that are consulted in a fixed order:
//! important blocks, blocks, then exceptions. Inside a group, plain
//! `||hostname^` filters live in hostname tries (one per type/party
//! combination); everything else is a compiled [`Pattern`] bucketed by one
//! token that every matching URL must contain.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use log::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::hash::hash_token_bytes;
use crate::hntrie::{HnTrieManager, TrieRef, TrieStats};
use crate::parser::{parse_line, ParsedLine};
use crate::psl::{entity_from_parts, get_parent_domain, is_same_or_subdomain};
use crate::types::{AnchorType, FilterKind, FilterRecord, PartyMask, RequestContext, RequestType};
use crate::url::{get_host_position, is_boundary_char, tokenize_url, MIN_TOKEN_LEN};

// =============================================================================
// Patterns
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Vec<u8>),
    /// `^`: one separator character or the end of the URL
    Separator,
    /// `*`
    Wildcard,
}

/// A compiled network pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
    anchor: AnchorType,
    right_anchor: bool,
}

impl Pattern {
    pub fn new(pattern: &str, anchor: AnchorType, right_anchor: bool) -> Self {
        let mut segments = Vec::new();
        let mut literal = Vec::new();

        for &b in pattern.as_bytes() {
            match b {
                b'*' | b'^' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    if b == b'^' {
                        segments.push(Segment::Separator);
                    } else if segments.last() != Some(&Segment::Wildcard) {
                        segments.push(Segment::Wildcard);
                    }
                }
                _ => literal.push(b.to_ascii_lowercase()),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            segments,
            anchor,
            right_anchor,
        }
    }

    /// Match against a lowercased URL. `host` is the hostname span of the
    /// URL, needed by `||` patterns.
    pub fn matches(&self, url: &[u8], host: Option<(usize, usize)>) -> bool {
        match self.anchor {
            AnchorType::Left => match_segments(&self.segments, url, 0, false, self.right_anchor),
            AnchorType::Hostname => {
                let Some((start, end)) = host else {
                    return false;
                };
                std::iter::once(start)
                    .chain((start..end).filter(|&i| url[i] == b'.').map(|i| i + 1))
                    .any(|pos| match_segments(&self.segments, url, pos, false, self.right_anchor))
            }
            AnchorType::None => match_segments(&self.segments, url, 0, true, self.right_anchor),
        }
    }
}

/// Glob match of `segments` against `url[pos..]`.
///
/// Only the most recent `*` is retried on a mismatch, so the cost is bounded
/// by `url.len()` times the pattern length whatever the number of
/// wildcards. `floating` behaves as if the pattern started with `*`.
fn match_segments(segments: &[Segment], url: &[u8], pos: usize, floating: bool, right_anchor: bool) -> bool {
    let mut si = 0;
    let mut pos = pos;
    // (segment after the last `*`, URL position that segment is tried from)
    let mut retry = floating.then_some((0, pos));

    loop {
        let advanced = match segments.get(si) {
            None => {
                if !right_anchor || pos == url.len() {
                    return true;
                }
                false
            }
            Some(Segment::Wildcard) => {
                if si + 1 == segments.len() {
                    return true;
                }
                si += 1;
                retry = Some((si, pos));
                continue;
            }
            Some(Segment::Literal(lit)) => {
                if url[pos..].starts_with(lit) {
                    pos += lit.len();
                    true
                } else {
                    false
                }
            }
            Some(Segment::Separator) => {
                if pos == url.len() {
                    true
                } else if is_boundary_char(url[pos]) {
                    pos += 1;
                    true
                } else {
                    false
                }
            }
        };

        if advanced {
            si += 1;
            continue;
        }
        match retry {
            Some((next, from)) if from < url.len() => {
                retry = Some((next, from + 1));
                si = next;
                pos = from + 1;
            }
            _ => return false,
        }
    }
}

/// Longest alphanumeric run of the pattern that a matching URL is
/// guaranteed to contain as a whole token.
fn best_token(rec: &FilterRecord) -> Option<u32> {
    let p = rec.pattern.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;

    while i < p.len() {
        if !p[i].is_ascii_alphanumeric() {
            i += 1;
            continue;
        }
        let start = i;
        while i < p.len() && p[i].is_ascii_alphanumeric() {
            i += 1;
        }
        if i - start < MIN_TOKEN_LEN {
            continue;
        }

        let left_ok = if start == 0 {
            rec.anchor != AnchorType::None
        } else {
            p[start - 1] != b'*'
        };
        let right_ok = if i == p.len() { rec.right_anchor } else { p[i] != b'*' };

        if left_ok && right_ok && best.map_or(true, |(s, e)| i - start > e - s) {
            best = Some((start, i));
        }
    }

    best.map(|(s, e)| hash_token_bytes(&p[s..e]))
}

// =============================================================================
// Filters
// =============================================================================

/// `$domain=` restriction of a filter.
#[derive(Debug, Clone, Default)]
struct DomainScope {
    hostnames: Vec<String>,
    excluded_hostnames: Vec<String>,
    entities: Vec<String>,
    excluded_entities: Vec<String>,
    include: TrieRef,
    exclude: TrieRef,
}

impl DomainScope {
    fn from_record(rec: &FilterRecord) -> Self {
        Self {
            hostnames: rec.hostnames.clone(),
            excluded_hostnames: rec.excluded_hostnames.clone(),
            entities: rec.entities.clone(),
            excluded_entities: rec.excluded_entities.clone(),
            include: TrieRef::EMPTY,
            exclude: TrieRef::EMPTY,
        }
    }

    fn build(&mut self, tries: &mut HnTrieManager) {
        tries.add_all(&self.hostnames);
        self.include = tries.finish();
        tries.add_all(&self.excluded_hostnames);
        self.exclude = tries.finish();
    }

    fn matches(&self, req: &PreparedRequest<'_>, tries: &HnTrieManager) -> bool {
        let page = req.page_hostname;
        if tries.matches(self.exclude, page)
            || self.excluded_entities.iter().any(|e| is_same_or_subdomain(req.page_entity, e))
        {
            return false;
        }
        if self.hostnames.is_empty() && self.entities.is_empty() {
            return true;
        }
        tries.matches(self.include, page)
            || self.entities.iter().any(|e| is_same_or_subdomain(req.page_entity, e))
    }
}

#[derive(Debug, Clone)]
struct NetFilter {
    pattern: Pattern,
    type_mask: RequestType,
    party: PartyMask,
    scope: Option<DomainScope>,
    important: bool,
    raw: String,
}

impl NetFilter {
    fn matches(&self, req: &PreparedRequest<'_>, tries: &HnTrieManager) -> bool {
        self.type_mask.applies_to(req.request_type)
            && self.party.applies_to(req.third_party)
            && self.scope.as_ref().map_or(true, |s| s.matches(req, tries))
            && self.pattern.matches(req.url, req.host_pos)
    }
}

/// Plain hostname filters sharing one type/party combination.
#[derive(Debug, Clone)]
struct HostBucket {
    type_mask: RequestType,
    party: PartyMask,
    important: bool,
    trie: TrieRef,
    raws: HashMap<String, String>,
}

/// A filter that matched a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterHit<'a> {
    pub allow: bool,
    pub important: bool,
    pub type_mask: RequestType,
    pub party: PartyMask,
    pub raw: &'a str,
}

/// Request fields computed once per match.
struct PreparedRequest<'a> {
    url: &'a [u8],
    host_pos: Option<(usize, usize)>,
    hostname: &'a str,
    page_hostname: &'a str,
    page_entity: &'a str,
    tokens: &'a [u32],
    request_type: RequestType,
    third_party: bool,
}

#[derive(Debug, Default)]
struct FilterGroup {
    allow: bool,
    host_buckets: Vec<HostBucket>,
    filters: Vec<NetFilter>,
    tokened: HashMap<u32, Vec<u32>>,
    untokened: Vec<u32>,
}

impl FilterGroup {
    fn new(allow: bool) -> Self {
        Self {
            allow,
            ..Self::default()
        }
    }

    fn add_host(&mut self, host: &str, rec: &FilterRecord) {
        let important = rec.important && !rec.exception;
        let bucket = match self
            .host_buckets
            .iter_mut()
            .position(|b| b.type_mask == rec.type_mask && b.party == rec.party)
        {
            Some(i) => &mut self.host_buckets[i],
            None => {
                self.host_buckets.push(HostBucket {
                    type_mask: rec.type_mask,
                    party: rec.party,
                    important,
                    trie: TrieRef::EMPTY,
                    raws: HashMap::new(),
                });
                let last = self.host_buckets.len() - 1;
                &mut self.host_buckets[last]
            }
        };
        bucket
            .raws
            .entry(host.to_string())
            .or_insert_with(|| rec.raw.clone());
    }

    /// Returns whether the filter got a token bucket.
    fn add_pattern(&mut self, rec: &FilterRecord) -> bool {
        let id = self.filters.len() as u32;
        self.filters.push(NetFilter {
            pattern: Pattern::new(&rec.pattern, rec.anchor, rec.right_anchor),
            type_mask: rec.type_mask,
            party: rec.party,
            scope: rec.has_scope().then(|| DomainScope::from_record(rec)),
            important: rec.important && !rec.exception,
            raw: rec.raw.clone(),
        });

        match best_token(rec) {
            Some(token) => {
                self.tokened.entry(token).or_default().push(id);
                true
            }
            None => {
                self.untokened.push(id);
                false
            }
        }
    }

    fn build(&mut self, tries: &mut HnTrieManager) {
        for bucket in &mut self.host_buckets {
            tries.add_all(bucket.raws.keys());
            bucket.trie = tries.finish();
        }
        for filter in &mut self.filters {
            if let Some(scope) = &mut filter.scope {
                scope.build(tries);
            }
        }
    }

    fn find<'a>(&'a self, req: &PreparedRequest<'_>, tries: &HnTrieManager) -> Option<FilterHit<'a>> {
        for bucket in &self.host_buckets {
            if !bucket.type_mask.applies_to(req.request_type)
                || !bucket.party.applies_to(req.third_party)
                || !tries.matches(bucket.trie, req.hostname)
            {
                continue;
            }
            let mut host = req.hostname;
            loop {
                if let Some(raw) = bucket.raws.get(host) {
                    return Some(FilterHit {
                        allow: self.allow,
                        important: bucket.important,
                        type_mask: bucket.type_mask,
                        party: bucket.party,
                        raw,
                    });
                }
                match get_parent_domain(host) {
                    Some(parent) => host = parent,
                    None => break,
                }
            }
        }

        let tokened = req
            .tokens
            .iter()
            .filter_map(|token| self.tokened.get(token))
            .flatten();
        tokened
            .chain(self.untokened.iter())
            .map(|&id| &self.filters[id as usize])
            .find(|filter| filter.matches(req, tries))
            .map(|filter| FilterHit {
                allow: self.allow,
                important: filter.important,
                type_mask: filter.type_mask,
                party: filter.party,
                raw: &filter.raw,
            })
    }

    fn len(&self) -> usize {
        self.filters.len() + self.host_buckets.iter().map(|b| b.raws.len()).sum::<usize>()
    }
}

// =============================================================================
// Static Filter Set
// =============================================================================

/// Counters for the static filter set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetFilterStats {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub important: usize,
    pub block: usize,
    pub allow: usize,
    pub host_filters: usize,
    pub tokened: usize,
    pub untokened: usize,
    pub trie: TrieStats,
}

/// The static network filter set.
pub struct StaticNetFilters {
    tries: HnTrieManager,
    important: FilterGroup,
    block: FilterGroup,
    allow: FilterGroup,
    seen: HashSet<String>,
    frozen: bool,
    stats: NetFilterStats,
}

impl Default for StaticNetFilters {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticNetFilters {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            tries: HnTrieManager::new(config.matcher_kind()),
            important: FilterGroup::new(false),
            block: FilterGroup::new(false),
            allow: FilterGroup::new(true),
            seen: HashSet::new(),
            frozen: false,
            stats: NetFilterStats::default(),
        }
    }

    /// Parse and add one filter line. Returns true if it was stored.
    pub fn add(&mut self, filter_text: &str) -> bool {
        match parse_line(filter_text) {
            ParsedLine::Network(rec) => self.add_record(&rec),
            ParsedLine::Invalid(reason) => {
                trace!("rejected '{}': {}", filter_text, reason.as_str());
                self.stats.rejected += 1;
                false
            }
            _ => false,
        }
    }

    pub fn add_record(&mut self, rec: &FilterRecord) -> bool {
        if rec.kind != FilterKind::Network {
            return false;
        }
        if rec.badfilter {
            // only meaningful against a whole list, see the compiler's optimizer
            trace!("skipping badfilter '{}'", rec.raw);
            return false;
        }
        if self.frozen {
            warn!("static filters are frozen, ignoring '{}'", rec.raw);
            self.stats.rejected += 1;
            return false;
        }
        if !self.seen.insert(rec.raw.trim().to_string()) {
            self.stats.duplicates += 1;
            return false;
        }

        let group = if rec.exception {
            self.stats.allow += 1;
            &mut self.allow
        } else if rec.important {
            self.stats.important += 1;
            &mut self.important
        } else {
            self.stats.block += 1;
            &mut self.block
        };

        match rec.pure_hostname().filter(|_| !rec.has_scope()) {
            Some(host) => {
                group.add_host(host, rec);
                self.stats.host_filters += 1;
            }
            None => {
                if group.add_pattern(rec) {
                    self.stats.tokened += 1;
                } else {
                    self.stats.untokened += 1;
                }
            }
        }

        self.stats.accepted += 1;
        true
    }

    /// Build every hostname trie. Filters cannot be added afterwards.
    pub fn freeze(&mut self) -> NetFilterStats {
        if !self.frozen {
            for group in [&mut self.important, &mut self.block, &mut self.allow] {
                group.build(&mut self.tries);
            }
            self.frozen = true;
            debug!(
                "static filters frozen: {} important, {} block, {} allow ({} hostname, {} untokened)",
                self.important.len(),
                self.block.len(),
                self.allow.len(),
                self.stats.host_filters,
                self.stats.untokened
            );
        }
        self.stats()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn stats(&self) -> NetFilterStats {
        NetFilterStats {
            trie: self.tries.stats(),
            ..self.stats
        }
    }

    /// Evaluate a request: important block, block, exception, and a block
    /// only stands when no exception matches.
    pub fn match_request(&self, ctx: &RequestContext<'_>) -> Option<FilterHit<'_>> {
        self.with_prepared(ctx, |req| {
            if let Some(hit) = self.important.find(req, &self.tries) {
                return Some(hit);
            }
            let block = self.block.find(req, &self.tries)?;
            self.allow.find(req, &self.tries).or(Some(block))
        })
    }

    /// Whether an `$elemhide` exception covers the page in `ctx`. Only
    /// exceptions naming that type apply.
    pub fn elemhide_excepted(&self, ctx: &RequestContext<'_>) -> bool {
        let ctx = ctx.with_type(RequestType::ELEMHIDE);
        self.with_prepared(&ctx, |req| self.allow.find(req, &self.tries).is_some())
    }

    fn with_prepared<R>(
        &self,
        ctx: &RequestContext<'_>,
        f: impl FnOnce(&PreparedRequest<'_>) -> R,
    ) -> R {
        let url = lowercase(ctx.request_url);
        let hostname = lowercase(ctx.request_hostname);
        let page_hostname = lowercase(ctx.page_hostname);
        let page_domain = lowercase(ctx.page_domain);
        let mut tokens = Vec::new();
        tokenize_url(&url, &mut tokens);

        let req = PreparedRequest {
            url: url.as_bytes(),
            host_pos: get_host_position(&url),
            hostname: &hostname,
            page_hostname: &page_hostname,
            page_entity: entity_from_parts(&page_hostname, &page_domain),
            tokens: &tokens,
            request_type: ctx.request_type,
            third_party: ctx.is_third_party(),
        };
        f(&req)
    }
}

fn lowercase(s: &str) -> Cow<'_, str> {
    if s.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(s.to_ascii_lowercase())
    } else {
        Cow::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psl::DomainResolver;
    use crate::types::Request;

    fn filters(lines: &[&str]) -> StaticNetFilters {
        let mut set = StaticNetFilters::new();
        for line in lines {
            set.add(line);
        }
        set.freeze();
        set
    }

    fn check<'a>(set: &'a StaticNetFilters, url: &str, page: &str, ty: &str) -> Option<FilterHit<'a>> {
        let resolver = DomainResolver::new();
        let request = Request::new(&resolver, url, page, ty);
        set.match_request(&request.context())
    }

    #[test]
    fn test_hostname_filter() {
        let set = filters(&["||ads.example.com^"]);
        let hit = check(&set, "https://ads.example.com/banner.js", "https://news.com/", "script").unwrap();
        assert!(!hit.allow);
        assert_eq!(hit.raw, "||ads.example.com^");

        assert!(check(&set, "https://cdn.ads.example.com/x.png", "https://news.com/", "image").is_some());
        assert!(check(&set, "https://notads.example.com/", "https://news.com/", "script").is_none());
        assert!(check(&set, "https://example.com/", "https://news.com/", "script").is_none());
    }

    #[test]
    fn test_exception_overrides_block() {
        let set = filters(&["||ads.example.com^", "@@||ads.example.com/allowed/"]);
        let hit = check(&set, "https://ads.example.com/allowed/x.js", "https://news.com/", "script").unwrap();
        assert!(hit.allow);
        assert_eq!(hit.raw, "@@||ads.example.com/allowed/");

        let hit = check(&set, "https://ads.example.com/other.js", "https://news.com/", "script").unwrap();
        assert!(!hit.allow);
    }

    #[test]
    fn test_important_beats_exception() {
        let set = filters(&["||ads.example.com^$important", "@@||ads.example.com^"]);
        let hit = check(&set, "https://ads.example.com/x.js", "https://news.com/", "script").unwrap();
        assert!(!hit.allow);
        assert!(hit.important);
    }

    #[test]
    fn test_exception_alone_is_no_match() {
        let set = filters(&["@@||example.com^"]);
        assert!(check(&set, "https://example.com/", "https://news.com/", "script").is_none());
    }

    #[test]
    fn test_separator_semantics() {
        let set = filters(&["||tracker.com^"]);
        assert!(check(&set, "https://tracker.com", "", "image").is_some());
        assert!(check(&set, "https://tracker.com:8080/p", "", "image").is_some());
        assert!(check(&set, "https://tracker.com.evil.net/", "", "image").is_none());

        let set = filters(&["/pixel.gif^"]);
        assert!(check(&set, "https://a.com/pixel.gif?x=1", "", "image").is_some());
        assert!(check(&set, "https://a.com/pixel.gif", "", "image").is_some());
        assert!(check(&set, "https://a.com/pixel.gif.bak", "", "image").is_none());
    }

    #[test]
    fn test_anchors_and_wildcards() {
        let set = filters(&["|https://evil.", "ads.js|", "/ads/*/banner"]);
        assert!(check(&set, "https://evil.org/x", "", "script").is_some());
        assert!(check(&set, "http://evil.org/x", "", "script").is_none());
        assert!(check(&set, "https://a.com/static/ads.js", "", "script").is_some());
        assert!(check(&set, "https://a.com/ads.js?v=2", "", "script").is_none());
        assert!(check(&set, "https://a.com/ads/x/y/banner.png", "", "image").is_some());
        assert!(check(&set, "https://a.com/ads/banner.png", "", "image").is_none());
    }

    #[test]
    fn test_many_wildcards_stay_linear() {
        let set = filters(&["/x*/x*/x*/x*/y"]);
        let url = format!("https://a.com{}", "/x".repeat(4000));

        let started = std::time::Instant::now();
        assert!(check(&set, &url, "", "script").is_none());
        assert!(check(&set, &format!("{url}/y"), "", "script").is_some());
        assert!(started.elapsed() < std::time::Duration::from_secs(1), "{:?}", started.elapsed());
    }

    #[test]
    fn test_wildcard_retries_after_partial_match() {
        let set = filters(&["/ab*abc^", "|https://*.js|"]);
        assert!(check(&set, "https://a.com/ab/ababc/x", "", "script").is_some());
        assert!(check(&set, "https://a.com/ab/ababcd", "", "script").is_none());
        assert!(check(&set, "https://a.com/ab/abc", "", "script").is_some());

        assert!(check(&set, "https://cdn.io/app.js", "", "script").is_some());
        assert!(check(&set, "https://cdn.io/app.js.map", "", "script").is_none());
    }

    #[test]
    fn test_hostname_label_prefix() {
        let set = filters(&["||ads.", "||ad-"]);
        assert_eq!(set.stats().host_filters, 0);

        let hit = check(&set, "https://ads.example.com/x.js", "https://news.com/", "script").unwrap();
        assert_eq!(hit.raw, "||ads.");
        assert!(check(&set, "https://cdn.ads.example.com/x.js", "", "script").is_some());
        assert!(check(&set, "https://ad-server.net/p.gif", "", "image").is_some());
        assert!(check(&set, "https://bads.example.com/x.js", "", "script").is_none());
        assert!(check(&set, "https://example.com/ads.js", "", "script").is_none());
    }

    #[test]
    fn test_separator_before_right_anchor() {
        let set = filters(&["||tracker.com^|", "|https://beacon.io^"]);
        assert!(check(&set, "https://tracker.com", "", "image").is_some());
        assert!(check(&set, "https://tracker.com/", "", "image").is_some());
        assert!(check(&set, "https://tracker.com/x", "", "image").is_none());

        assert!(check(&set, "https://beacon.io", "", "ping").is_some());
        assert!(check(&set, "https://beacon.io/p", "", "ping").is_some());
        assert!(check(&set, "https://beacon.iot/p", "", "ping").is_none());
    }

    #[test]
    fn test_important_with_excluded_domain() {
        let set = filters(&["||ads.net^$important,domain=news.com|~live.news.com", "@@||ads.net^"]);
        let hit = check(&set, "https://ads.net/a.js", "https://www.news.com/", "script").unwrap();
        assert!(hit.important);
        assert!(!hit.allow);

        // excluded page: the important filter does not apply and the
        // exception alone decides nothing
        assert!(check(&set, "https://ads.net/a.js", "https://live.news.com/", "script").is_none());

        let set = filters(&[
            "||ads.net^$important,domain=news.com|~live.news.com",
            "||ads.net^",
            "@@||ads.net^",
        ]);
        let hit = check(&set, "https://ads.net/a.js", "https://live.news.com/", "script").unwrap();
        assert!(hit.allow);
        assert!(!hit.important);
        assert!(!check(&set, "https://ads.net/a.js", "https://news.com/", "script").unwrap().allow);
    }

    #[test]
    fn test_untokened_pattern() {
        let set = filters(&["&ad_"]);
        assert_eq!(set.stats().untokened, 1);
        assert!(check(&set, "https://a.com/q?x=1&ad_slot=2", "", "xmlhttprequest").is_some());
    }

    #[test]
    fn test_type_and_party_options() {
        let set = filters(&["||cdn.net^$third-party,image"]);
        assert!(check(&set, "https://cdn.net/a.png", "https://example.com/", "image").is_some());
        assert!(check(&set, "https://cdn.net/a.js", "https://example.com/", "script").is_none());
        assert!(check(&set, "https://cdn.net/a.png", "https://www.cdn.net/", "image").is_none());

        let set = filters(&["/banner/ads$~stylesheet"]);
        assert!(check(&set, "https://a.com/banner/ads.js", "", "script").is_some());
        assert!(check(&set, "https://a.com/banner/ads.css", "", "stylesheet").is_none());
    }

    #[test]
    fn test_domain_option() {
        let set = filters(&["||tracker.net^$domain=news.com|~sports.news.com", "/promo.$domain=shop.*"]);
        assert!(check(&set, "https://tracker.net/t", "https://www.news.com/", "script").is_some());
        assert!(check(&set, "https://tracker.net/t", "https://sports.news.com/", "script").is_none());
        assert!(check(&set, "https://tracker.net/t", "https://other.com/", "script").is_none());

        assert!(check(&set, "https://cdn.io/promo.js", "https://shop.de/", "script").is_some());
        assert!(check(&set, "https://cdn.io/promo.js", "https://www.shop.co.uk/", "script").is_some());
        assert!(check(&set, "https://cdn.io/promo.js", "https://shopping.com/", "script").is_none());
    }

    #[test]
    fn test_elemhide_exception() {
        let set = filters(&["@@||example.com^$elemhide", "@@||other.com^"]);
        let resolver = DomainResolver::new();

        let req = Request::new(&resolver, "https://www.example.com/", "https://www.example.com/", "main_frame");
        assert!(set.elemhide_excepted(&req.context()));
        // elemhide exceptions do not allow network requests
        assert!(set.match_request(&req.context()).is_none());

        let req = Request::new(&resolver, "https://other.com/", "https://other.com/", "main_frame");
        assert!(!set.elemhide_excepted(&req.context()));
    }

    #[test]
    fn test_duplicates_and_frozen() {
        let mut set = StaticNetFilters::new();
        assert!(set.add("||a.com^"));
        assert!(!set.add("||a.com^"));
        assert!(!set.add("example.com##.ad"));
        assert!(!set.add("/regex[0-9]/"));
        let stats = set.freeze();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.rejected, 1);
        assert!(!set.add("||b.com^"));
    }

    #[test]
    fn test_hosts_file_entries() {
        let set = filters(&["0.0.0.0 telemetry.example.org", "127.0.0.1 localhost"]);
        let hit = check(&set, "https://telemetry.example.org/v1", "", "xmlhttprequest").unwrap();
        assert_eq!(hit.raw, "0.0.0.0 telemetry.example.org");
        assert!(check(&set, "http://localhost/", "", "other").is_none());
    }

    #[test]
    fn test_uppercase_request_is_lowercased() {
        let set = filters(&["||ads.example.com^"]);
        let ctx = RequestContext {
            root_hostname: "",
            root_domain: "",
            page_hostname: "",
            page_domain: "",
            request_url: "HTTPS://ADS.Example.com/X",
            request_hostname: "ADS.Example.com",
            request_type: RequestType::SCRIPT,
        };
        assert!(set.match_request(&ctx).is_some());
    }

    #[test]
    fn test_best_token() {
        let rec = match parse_line("||example.com^") {
            ParsedLine::Network(rec) => rec,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(best_token(&rec), Some(hash_token_bytes(b"example")));

        let rec = match parse_line("ads") {
            ParsedLine::Network(rec) => rec,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(best_token(&rec), None);
    }
}
