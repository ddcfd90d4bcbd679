//! Request verdicts
//!
//! Combines dynamic rules and static filters into one [`NetFilterResult`]
//! per request. Dynamic `block`/`allow` cells are conclusive; a `noop` cell
//! or no cell falls through to the static filters, and a static hit
//! replaces the noop.

use std::fmt;

use crate::dynamic::{DynamicAction, DynamicRules};
use crate::network::{FilterHit, StaticNetFilters};
use crate::types::RequestContext;

// =============================================================================
// Results
// =============================================================================

/// Which engine produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultSource {
    #[default]
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Verdict {
    #[default]
    NoMatch,
    Block,
    Allow,
    Noop,
}

impl Verdict {
    fn letter(self) -> char {
        match self {
            Self::NoMatch => ' ',
            Self::Block => 'b',
            Self::Allow => 'a',
            Self::Noop => 'n',
        }
    }
}

/// Outcome of filtering one request.
///
/// `filter` is the original filter text for static results and
/// `src des type action` for dynamic ones. `category` packs the static
/// filter's type mask, party mask, importance and action:
/// `type << 4 | party << 2 | important << 1 | allow`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetFilterResult {
    pub source: ResultSource,
    pub verdict: Verdict,
    pub important: bool,
    pub filter: String,
    pub category: u32,
}

impl NetFilterResult {
    pub fn no_match() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        self.verdict != Verdict::NoMatch
    }

    pub fn is_blocked(&self) -> bool {
        self.verdict == Verdict::Block
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }

    pub fn is_important(&self) -> bool {
        self.important
    }

    fn from_hit(hit: FilterHit<'_>) -> Self {
        let category = (hit.type_mask.bits() << 4)
            | ((hit.party.bits() as u32) << 2)
            | ((hit.important as u32) << 1)
            | hit.allow as u32;
        Self {
            source: ResultSource::Static,
            verdict: if hit.allow { Verdict::Allow } else { Verdict::Block },
            important: hit.important,
            filter: hit.raw.to_string(),
            category,
        }
    }

    /// Result string: `""` for no match, else `sb:`, `sa:`, `db:`, `da:`
    /// or `dn:`. The verbose form appends the hex category, `\v` and the
    /// filter.
    pub fn to_result_string(&self, verbose: bool) -> String {
        if !self.is_match() {
            return String::new();
        }
        let source = match self.source {
            ResultSource::Static => 's',
            ResultSource::Dynamic => 'd',
        };
        let mut out = format!("{source}{}:", self.verdict.letter());
        if verbose {
            out.push_str(&format!("{:x}\u{b}{}", self.category, self.filter));
        }
        out
    }

    /// Read back a string produced by [`Self::to_result_string`].
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return Some(Self::no_match());
        }

        let bytes = s.as_bytes();
        if bytes.len() < 3 || bytes[2] != b':' {
            return None;
        }
        let source = match bytes[0] {
            b's' => ResultSource::Static,
            b'd' => ResultSource::Dynamic,
            _ => return None,
        };
        let verdict = match (source, bytes[1]) {
            (_, b'b') => Verdict::Block,
            (_, b'a') => Verdict::Allow,
            (ResultSource::Dynamic, b'n') => Verdict::Noop,
            _ => return None,
        };

        let rest = &s[3..];
        let (category, filter) = if rest.is_empty() {
            (0, "")
        } else {
            let (hex, filter) = rest.split_once('\u{b}')?;
            (u32::from_str_radix(hex, 16).ok()?, filter)
        };

        Some(Self {
            source,
            verdict,
            important: category & 0b10 != 0,
            filter: filter.to_string(),
            category,
        })
    }
}

impl fmt::Display for NetFilterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_result_string(false))
    }
}

// =============================================================================
// Matcher
// =============================================================================

/// Dynamic rules in front of the static filter set.
pub struct Matcher {
    static_filters: StaticNetFilters,
    dynamic: DynamicRules,
}

impl Matcher {
    pub fn new(static_filters: StaticNetFilters, dynamic: DynamicRules) -> Self {
        Self {
            static_filters,
            dynamic,
        }
    }

    pub fn static_filters(&self) -> &StaticNetFilters {
        &self.static_filters
    }

    pub fn dynamic_rules(&self) -> &DynamicRules {
        &self.dynamic
    }

    /// Match a request and return the verdict.
    pub fn match_request(&self, ctx: &RequestContext<'_>) -> NetFilterResult {
        let dynamic = self.match_dynamic(ctx);
        if matches!(dynamic.verdict, Verdict::Block | Verdict::Allow) {
            return dynamic;
        }

        let static_result = self.match_static(ctx);
        if static_result.is_match() {
            static_result
        } else {
            dynamic
        }
    }

    pub fn match_static(&self, ctx: &RequestContext<'_>) -> NetFilterResult {
        self.static_filters
            .match_request(ctx)
            .map_or_else(NetFilterResult::no_match, NetFilterResult::from_hit)
    }

    /// Dynamic verdict with the page's root hostname as source.
    pub fn match_dynamic(&self, ctx: &RequestContext<'_>) -> NetFilterResult {
        let verdict = self
            .dynamic
            .evaluate_cell_zy(ctx.root_hostname, ctx.request_hostname, ctx.request_type);
        let mapped = match verdict.action {
            DynamicAction::None => return NetFilterResult::no_match(),
            DynamicAction::Block => Verdict::Block,
            DynamicAction::Allow => Verdict::Allow,
            DynamicAction::Noop => Verdict::Noop,
        };
        NetFilterResult {
            source: ResultSource::Dynamic,
            verdict: mapped,
            important: false,
            filter: verdict.rule_text(),
            category: 0,
        }
    }

    /// Whether an `$elemhide` exception turns cosmetic filtering off for
    /// the page described by `ctx`.
    pub fn elemhide_excepted(&self, ctx: &RequestContext<'_>) -> bool {
        self.static_filters.elemhide_excepted(ctx)
    }
}
