//! Page filtering contexts
//!
//! One context per open page: its root hostname, its verdict cache and its
//! switches. Closed pages go back to a bounded [`PagePool`].

use crate::cache::{Clock, NetFilteringResultCache, SystemClock};
use crate::config::EngineConfig;
use crate::matcher::{Matcher, NetFilterResult};
use crate::psl::DomainResolver;
use crate::types::{FilteringSwitches, RequestContext, RequestType};
use crate::url::extract_host;

/// Filtering state of one page.
#[derive(Debug)]
pub struct PageFilteringContext<C: Clock = SystemClock> {
    page_url: String,
    root_hostname: String,
    root_domain: String,
    cache: NetFilteringResultCache<C>,
    net_filtering: bool,
    skip_cosmetic_filtering: bool,
    collapsible: RequestType,
}

impl PageFilteringContext<SystemClock> {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_clock(SystemClock, config)
    }
}

impl<C: Clock> PageFilteringContext<C> {
    /// Blank context; call [`Self::reuse`] to point it at a page.
    pub fn with_clock(clock: C, config: &EngineConfig) -> Self {
        Self {
            page_url: String::new(),
            root_hostname: String::new(),
            root_domain: String::new(),
            cache: NetFilteringResultCache::with_clock(clock, config.shelf_life()),
            net_filtering: true,
            skip_cosmetic_filtering: false,
            collapsible: config.collapsible_mask(),
        }
    }

    /// Point the context at a (re)loaded page: new root, empty cache, net
    /// filtering back on, cosmetic eligibility recomputed.
    pub fn reuse(&mut self, page_url: &str, resolver: &DomainResolver, matcher: &Matcher) {
        self.page_url = page_url.trim().to_ascii_lowercase();
        self.root_hostname = extract_host(&self.page_url).unwrap_or_default().to_string();
        self.root_domain = resolver.domain_from_hostname(&self.root_hostname);
        self.cache.empty();
        self.net_filtering = true;

        let ctx = RequestContext {
            root_hostname: &self.root_hostname,
            root_domain: &self.root_domain,
            page_hostname: &self.root_hostname,
            page_domain: &self.root_domain,
            request_url: &self.page_url,
            request_hostname: &self.root_hostname,
            request_type: RequestType::MAIN_FRAME,
        };
        self.skip_cosmetic_filtering = matcher.elemhide_excepted(&ctx);
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn root_hostname(&self) -> &str {
        &self.root_hostname
    }

    pub fn root_domain(&self) -> &str {
        &self.root_domain
    }

    pub fn cache(&self) -> &NetFilteringResultCache<C> {
        &self.cache
    }

    pub fn net_filtering(&self) -> bool {
        self.net_filtering
    }

    pub fn skip_cosmetic_filtering(&self) -> bool {
        self.skip_cosmetic_filtering
    }

    pub fn switches(&self) -> FilteringSwitches {
        FilteringSwitches {
            net_filtering: self.net_filtering,
            cosmetic_filtering: !self.skip_cosmetic_filtering,
        }
    }

    /// Turn net filtering on or off for this page. Cached verdicts were
    /// computed under the old setting and are dropped.
    pub fn toggle_net_filtering(&mut self, enabled: bool) {
        if self.net_filtering != enabled {
            self.net_filtering = enabled;
            self.cache.empty();
        }
    }

    /// Verdict for a request issued by this page. Collapsible types are
    /// cached.
    pub fn filter_request(&mut self, ctx: &RequestContext<'_>, matcher: &Matcher) -> NetFilterResult {
        let collapsible = self.collapsible.intersects(ctx.request_type);

        if !self.net_filtering {
            let result = NetFilterResult::no_match();
            if collapsible {
                self.cache.add(ctx, result.clone());
            }
            return result;
        }

        if let Some(entry) = self.cache.lookup(ctx) {
            return entry.result.clone();
        }

        let result = matcher.match_request(ctx);
        if collapsible {
            self.cache.add(ctx, result.clone());
        }
        result
    }

    /// Run a due prune pass of the page cache.
    pub fn tick(&mut self) -> usize {
        self.cache.tick()
    }

    fn dispose(&mut self) {
        self.cache.empty();
        self.page_url.clear();
        self.root_hostname.clear();
        self.root_domain.clear();
        self.skip_cosmetic_filtering = false;
        self.net_filtering = true;
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Bounded pool of disposed page contexts.
#[derive(Debug)]
pub struct PagePool<C: Clock + Clone = SystemClock> {
    clock: C,
    config: EngineConfig,
    free: Vec<PageFilteringContext<C>>,
}

impl PagePool<SystemClock> {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(SystemClock, config)
    }
}

impl<C: Clock + Clone> PagePool<C> {
    pub fn with_clock(clock: C, config: EngineConfig) -> Self {
        Self {
            clock,
            config,
            free: Vec::new(),
        }
    }

    /// Number of contexts waiting for reuse.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// A context for `page_url`, recycled when one is available.
    pub fn acquire(
        &mut self,
        page_url: &str,
        resolver: &DomainResolver,
        matcher: &Matcher,
    ) -> PageFilteringContext<C> {
        let mut page = self
            .free
            .pop()
            .unwrap_or_else(|| PageFilteringContext::with_clock(self.clock.clone(), &self.config));
        page.reuse(page_url, resolver, matcher);
        page
    }

    /// Give back a closed page. Returns false when the pool is full and
    /// the context was dropped.
    pub fn release(&mut self, mut page: PageFilteringContext<C>) -> bool {
        if self.free.len() >= self.config.page_pool_max {
            return false;
        }
        page.dispose();
        self.free.push(page);
        true
    }
}
