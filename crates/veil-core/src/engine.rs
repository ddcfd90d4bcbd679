//! Filtering engine
//!
//! [`EngineBuilder`] collects filters and dynamic rules, then freezes them
//! into a read-only [`FilteringEngine`]. A list reload builds a new engine
//! and swaps it into an [`EngineHandle`].

use std::sync::{Arc, RwLock};

use log::debug;

use crate::cache::Clock;
use crate::config::EngineConfig;
use crate::cosmetic::{CosmeticAddResult, CosmeticFilterIndex, CosmeticStats, DomainSelectors, GenericSelectors};
use crate::dynamic::DynamicRules;
use crate::error::Error;
use crate::matcher::{Matcher, NetFilterResult};
use crate::network::{NetFilterStats, StaticNetFilters};
use crate::page::PageFilteringContext;
use crate::parser::{parse_line, ParseStats, ParsedLine};
use crate::psl::DomainResolver;
use crate::types::{FilterKind, FilterRecord, Request, RequestContext, RequestType};
use crate::url::extract_host;

/// Counters gathered while building an engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub parse: ParseStats,
    pub network: NetFilterStats,
    pub cosmetic: CosmeticStats,
    pub dynamic_pairs: usize,
}

// =============================================================================
// Builder
// =============================================================================

pub struct EngineBuilder {
    config: EngineConfig,
    resolver: Arc<DomainResolver>,
    network: StaticNetFilters,
    cosmetic: CosmeticFilterIndex,
    dynamic: DynamicRules,
    parse: ParseStats,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig, resolver: Arc<DomainResolver>) -> Self {
        Self {
            network: StaticNetFilters::with_config(&config),
            cosmetic: CosmeticFilterIndex::with_config(resolver.clone(), &config),
            dynamic: DynamicRules::new(resolver.clone()),
            config,
            resolver,
            parse: ParseStats::default(),
        }
    }

    /// Add one filter line of either kind. Returns true if it was stored.
    pub fn add_filter_line(&mut self, line: &str) -> bool {
        self.parse.lines += 1;
        match parse_line(line) {
            ParsedLine::Network(rec) | ParsedLine::Cosmetic(rec) => self.add_record(&rec),
            ParsedLine::Skipped => {
                self.parse.skipped += 1;
                false
            }
            ParsedLine::Invalid(reason) => {
                log::trace!("rejected '{}': {}", line, reason.as_str());
                self.parse.rejected += 1;
                false
            }
        }
    }

    /// Add a whole filter list.
    pub fn add_filter_list(&mut self, text: &str) -> usize {
        text.lines().filter(|line| self.add_filter_line(line)).count()
    }

    pub fn add_record(&mut self, rec: &FilterRecord) -> bool {
        match rec.kind {
            FilterKind::Network => {
                self.parse.network += 1;
                self.network.add_record(rec)
            }
            FilterKind::Cosmetic => {
                self.parse.cosmetic += 1;
                self.cosmetic.add_record(rec) == CosmeticAddResult::Accepted
            }
        }
    }

    /// Load `src des type action` dynamic rules.
    pub fn add_dynamic_rules(&mut self, text: &str) -> Result<usize, Error> {
        self.dynamic.from_text(text)
    }

    /// Freeze everything into a query-only engine.
    pub fn build(mut self) -> FilteringEngine {
        let network = self.network.freeze();
        let cosmetic = self.cosmetic.freeze();
        let stats = EngineStats {
            parse: self.parse,
            network,
            cosmetic,
            dynamic_pairs: self.dynamic.len(),
        };
        debug!(
            "engine built: {} network, {} cosmetic, {} dynamic pairs, {} lines rejected",
            network.accepted, cosmetic.accepted, stats.dynamic_pairs, stats.parse.rejected
        );

        FilteringEngine {
            config: self.config,
            resolver: self.resolver,
            matcher: Matcher::new(self.network, self.dynamic),
            cosmetic: self.cosmetic,
            stats,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Frozen filters and rules. All queries take `&self`.
pub struct FilteringEngine {
    config: EngineConfig,
    resolver: Arc<DomainResolver>,
    matcher: Matcher,
    cosmetic: CosmeticFilterIndex,
    stats: EngineStats,
}

impl FilteringEngine {
    pub fn builder(config: EngineConfig, resolver: Arc<DomainResolver>) -> EngineBuilder {
        EngineBuilder::new(config, resolver)
    }

    /// Engine over one filter list with the built-in domain heuristic.
    pub fn from_filter_list(text: &str, config: EngineConfig) -> Self {
        let mut builder = EngineBuilder::new(config, Arc::new(DomainResolver::new()));
        builder.add_filter_list(text);
        builder.build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<DomainResolver> {
        &self.resolver
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn cosmetic(&self) -> &CosmeticFilterIndex {
        &self.cosmetic
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Describe a request issued by the page at `page_url`.
    pub fn request(&self, url: &str, page_url: &str, request_type: &str) -> Request {
        Request::new(&self.resolver, url, page_url, request_type)
    }

    pub fn match_request(&self, ctx: &RequestContext<'_>) -> NetFilterResult {
        self.matcher.match_request(ctx)
    }

    /// Uncached verdict for a request given by URLs.
    pub fn match_url(&self, url: &str, page_url: &str, request_type: &str) -> NetFilterResult {
        let request = self.request(url, page_url, request_type);
        self.matcher.match_request(&request.context())
    }

    /// Fresh page context for `page_url`.
    pub fn new_page(&self, page_url: &str) -> PageFilteringContext {
        let mut page = PageFilteringContext::new(&self.config);
        page.reuse(page_url, &self.resolver, &self.matcher);
        page
    }

    /// Verdict for a request of `page`, through the page cache.
    pub fn filter_page_request<C: Clock>(
        &self,
        page: &mut PageFilteringContext<C>,
        url: &str,
        request_type: &str,
    ) -> NetFilterResult {
        let url = url.trim().to_ascii_lowercase();
        let hostname = extract_host(&url).unwrap_or_default().to_string();
        let root_hostname = page.root_hostname().to_string();
        let root_domain = page.root_domain().to_string();
        let ctx = RequestContext {
            root_hostname: &root_hostname,
            root_domain: &root_domain,
            page_hostname: &root_hostname,
            page_domain: &root_domain,
            request_url: &url,
            request_hostname: &hostname,
            request_type: RequestType::from_str(request_type),
        };
        page.filter_request(&ctx, &self.matcher)
    }

    /// Cosmetic selectors for the page, honoring its switches.
    pub fn cosmetic_selectors<C: Clock>(&self, page: &PageFilteringContext<C>) -> Option<DomainSelectors<'_>> {
        self.cosmetic
            .retrieve_domain_selectors(page.root_hostname(), page.switches())
    }

    pub fn generic_selectors<S: AsRef<str>>(&self, candidates: &[S]) -> GenericSelectors {
        self.cosmetic.retrieve_generic_selectors(candidates)
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Shared slot holding the current engine.
pub struct EngineHandle {
    current: RwLock<Arc<FilteringEngine>>,
}

impl EngineHandle {
    pub fn new(engine: FilteringEngine) -> Self {
        Self {
            current: RwLock::new(Arc::new(engine)),
        }
    }

    /// The engine queries should use right now.
    pub fn current(&self) -> Arc<FilteringEngine> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install a new engine and return the previous one. Holders of the old
    /// `Arc` keep a complete engine until they drop it.
    pub fn replace(&self, engine: FilteringEngine) -> Arc<FilteringEngine> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
! Title: test list
||ads.example.com^
@@||ads.example.com/allowed/
example.com##.ad-unit
##.banner
not a filter $$$ bogus=1
";

    #[test]
    fn test_build_and_query() {
        let engine = FilteringEngine::from_filter_list(LIST, EngineConfig::default());
        let stats = engine.stats();
        assert_eq!(stats.network.accepted, 2);
        assert_eq!(stats.cosmetic.accepted, 2);
        assert_eq!(stats.parse.skipped, 1);
        assert_eq!(stats.parse.rejected, 1);

        assert!(engine
            .match_url("https://ads.example.com/banner.js", "https://news.com/", "script")
            .is_blocked());
        assert!(engine
            .match_url("https://ads.example.com/allowed/x.js", "https://news.com/", "script")
            .is_allowed());
    }

    #[test]
    fn test_page_flow() {
        let engine = FilteringEngine::from_filter_list(LIST, EngineConfig::default());
        let mut page = engine.new_page("https://www.example.com/");
        assert!(engine
            .filter_page_request(&mut page, "https://ads.example.com/a.png", "image")
            .is_blocked());
        assert_eq!(page.cache().len(), 1);

        let selectors = engine.cosmetic_selectors(&page).unwrap();
        assert_eq!(selectors.hide, vec![".ad-unit"]);
        assert_eq!(engine.generic_selectors(&[".banner"]).hide, vec![".banner"]);

        page.toggle_net_filtering(false);
        assert!(engine.cosmetic_selectors(&page).is_none());
    }

    #[test]
    fn test_dynamic_rules_through_builder() {
        let mut builder = FilteringEngine::builder(EngineConfig::default(), Arc::new(DomainResolver::new()));
        builder.add_filter_list(LIST);
        builder.add_dynamic_rules("news.com ads.example.com * allow").unwrap();
        assert!(builder.add_dynamic_rules("news.com ads.example.com image allow").is_err());
        let engine = builder.build();

        let result = engine.match_url("https://ads.example.com/banner.js", "https://news.com/", "script");
        assert!(result.is_allowed());
        assert_eq!(result.to_string(), "da:");
    }

    #[test]
    fn test_handle_swaps_whole_engines() {
        let handle = EngineHandle::new(FilteringEngine::from_filter_list("||a.com^", EngineConfig::default()));
        let before = handle.current();
        assert!(before.match_url("https://a.com/", "", "script").is_blocked());

        let old = handle.replace(FilteringEngine::from_filter_list("||b.com^", EngineConfig::default()));
        let after = handle.current();
        assert!(!after.match_url("https://a.com/", "", "script").is_match());
        assert!(after.match_url("https://b.com/", "", "script").is_blocked());

        // the old engine stays complete for its holders
        assert!(old.match_url("https://a.com/", "", "script").is_blocked());
        assert!(before.match_url("https://a.com/", "", "script").is_blocked());
    }
}
