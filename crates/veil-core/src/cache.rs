//! Per-page result cache
//!
//! Verdicts are cached per page, keyed by request URL and type, and expire
//! after a shelf life. Expired entries are dropped by a prune pass that is
//! only armed while the cache holds entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;

use crate::matcher::NetFilterResult;
use crate::types::{RequestContext, RequestType};

// =============================================================================
// Clocks
// =============================================================================

/// Time source of a cache.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: Instant,
    elapsed_ms: Arc<AtomicU64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed_ms.fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed))
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub result: NetFilterResult,
    pub request_type: RequestType,
    pub time: Instant,
}

/// Time-limited verdict cache of one page.
#[derive(Debug)]
pub struct NetFilteringResultCache<C: Clock = SystemClock> {
    clock: C,
    shelf_life: Duration,
    entries: HashMap<String, Vec<CacheEntry>>,
    count: usize,
    prune_deadline: Option<Instant>,
}

impl NetFilteringResultCache<SystemClock> {
    pub fn new(shelf_life: Duration) -> Self {
        Self::with_clock(SystemClock, shelf_life)
    }
}

impl<C: Clock> NetFilteringResultCache<C> {
    pub fn with_clock(clock: C, shelf_life: Duration) -> Self {
        Self {
            clock,
            shelf_life,
            entries: HashMap::new(),
            count: 0,
            prune_deadline: None,
        }
    }

    pub fn shelf_life(&self) -> Duration {
        self.shelf_life
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// When the next prune pass is due, if one is armed.
    pub fn prune_deadline(&self) -> Option<Instant> {
        self.prune_deadline
    }

    /// Cache `result` for the request in `ctx`, replacing any entry for the
    /// same URL and type.
    pub fn add(&mut self, ctx: &RequestContext<'_>, result: NetFilterResult) {
        self.tick();

        let now = self.clock.now();
        let entry = CacheEntry {
            result,
            request_type: ctx.request_type,
            time: now,
        };
        let slot = self.entries.entry(ctx.request_url.to_string()).or_default();
        match slot.iter_mut().find(|e| e.request_type == ctx.request_type) {
            Some(existing) => *existing = entry,
            None => {
                slot.push(entry);
                self.count += 1;
            }
        }

        if self.count == 1 && self.prune_deadline.is_none() {
            self.prune_deadline = Some(now + self.shelf_life * 2);
        }
    }

    /// Live entry for the request in `ctx`. Expired entries are never
    /// returned, even before the prune pass removes them.
    pub fn lookup(&self, ctx: &RequestContext<'_>) -> Option<&CacheEntry> {
        let now = self.clock.now();
        self.entries
            .get(ctx.request_url)?
            .iter()
            .find(|e| e.request_type == ctx.request_type)
            .filter(|e| now.saturating_duration_since(e.time) < self.shelf_life)
    }

    /// Drop every entry and disarm the prune timer.
    pub fn empty(&mut self) {
        self.entries.clear();
        self.count = 0;
        self.prune_deadline = None;
    }

    /// Run the prune pass if it is due. Returns how many entries it removed.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        match self.prune_deadline {
            Some(deadline) if now >= deadline => self.prune(now),
            _ => 0,
        }
    }

    fn prune(&mut self, now: Instant) -> usize {
        let shelf_life = self.shelf_life;
        let before = self.count;

        self.entries.retain(|_, slot| {
            slot.retain(|e| now.saturating_duration_since(e.time) < shelf_life);
            !slot.is_empty()
        });
        self.count = self.entries.values().map(Vec::len).sum();

        self.prune_deadline = if self.count == 0 {
            None
        } else {
            Some(now + shelf_life * 2)
        };
        trace!(
            "result cache pruned {} of {} entries",
            before - self.count,
            before
        );
        before - self.count
    }
}
