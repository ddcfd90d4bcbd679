//! Veil Core Library
//!
//! The decision engine of the Veil content filter: given filter lists, it
//! answers "block or allow" for network requests and "which selectors to
//! hide" for pages.
//!
//! # Architecture
//!
//! Filter lines are parsed into [`FilterRecord`]s and indexed by an
//! [`EngineBuilder`]. Network filters go to hostname tries and token
//! buckets, cosmetic filters to hash buckets keyed by hostname, entity or
//! id/class. Freezing the builder yields a read-only [`FilteringEngine`];
//! per-page state (switches, verdict cache) lives in a
//! [`PageFilteringContext`].
//!
//! # Modules
//!
//! - `hntrie`: hostname tries in one flat buffer
//! - `parser`: filter line parser
//! - `cosmetic`: cosmetic filter index
//! - `network`: static network filters
//! - `dynamic`: dynamic (per-site) rules
//! - `matcher`: combined verdicts and result strings
//! - `cache` / `page`: per-page verdict cache and page contexts
//! - `engine`: builder, frozen engine, swappable handle
//! - `hash`, `url`, `psl`, `types`, `config`, `error`: shared pieces

pub mod cache;
pub mod config;
pub mod cosmetic;
pub mod dynamic;
pub mod engine;
pub mod error;
pub mod hash;
pub mod hntrie;
pub mod matcher;
pub mod network;
pub mod page;
pub mod parser;
pub mod psl;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use cache::{Clock, ManualClock, NetFilteringResultCache, SystemClock};
pub use config::EngineConfig;
pub use cosmetic::{CosmeticAddResult, CosmeticFilterIndex, DomainSelectors, GenericSelectors};
pub use dynamic::{DynamicAction, DynamicRules};
pub use engine::{EngineBuilder, EngineHandle, FilteringEngine};
pub use error::Error;
pub use hntrie::{HnTrieManager, MatcherKind, TrieRef};
pub use matcher::{Matcher, NetFilterResult, ResultSource, Verdict};
pub use page::{PageFilteringContext, PagePool};
pub use parser::{parse_filter_list, parse_line, ParsedLine};
pub use psl::DomainResolver;
pub use types::{FilterKind, FilterRecord, FilteringSwitches, Request, RequestContext, RequestType};
