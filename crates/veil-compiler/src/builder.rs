//! List compilation and engine loading
//!
//! `compile_filter_lists` parses and optimizes raw lists into the compiled
//! text form; `build_engine` loads that form into a frozen engine without
//! reparsing any filter text.

use std::sync::Arc;

use veil_core::parser::{parse_filter_list, ParseStats};
use veil_core::{DomainResolver, EngineBuilder, EngineConfig, FilteringEngine};

use crate::compiled::{read_compiled, write_compiled, CompiledFormatError};
use crate::optimizer::{optimize_records, OptimizeStats};

/// What happened to the input lists during compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub lists: usize,
    pub parse: ParseStats,
    pub optimize: OptimizeStats,
}

/// Parse, merge and optimize filter lists into one compiled buffer.
pub fn compile_filter_lists<S: AsRef<str>>(lists: &[S]) -> (String, CompileReport) {
    let mut records = Vec::new();
    let mut parse = ParseStats::default();

    for list in lists {
        let (mut parsed, stats) = parse_filter_list(list.as_ref());
        records.append(&mut parsed);
        parse.lines += stats.lines;
        parse.network += stats.network;
        parse.cosmetic += stats.cosmetic;
        parse.skipped += stats.skipped;
        parse.rejected += stats.rejected;
    }

    let optimize = optimize_records(&mut records);
    let compiled = write_compiled(&records);
    log::info!(
        "compiled {} lists: {} lines, {} records kept, {} rejected",
        lists.len(),
        parse.lines,
        optimize.after,
        parse.rejected
    );

    (
        compiled,
        CompileReport {
            lists: lists.len(),
            parse,
            optimize,
        },
    )
}

/// Load a compiled buffer into a frozen engine.
pub fn build_engine(
    compiled: &str,
    config: EngineConfig,
    resolver: Arc<DomainResolver>,
) -> Result<FilteringEngine, CompiledFormatError> {
    let mut builder = EngineBuilder::new(config, resolver);
    let loaded = read_compiled(compiled, |rec| {
        builder.add_record(&rec);
    })?;
    log::debug!("loaded {} compiled records", loaded);
    Ok(builder.build())
}

/// Compile raw lists and load the result in one step.
pub fn build_engine_from_lists<S: AsRef<str>>(
    lists: &[S],
    config: EngineConfig,
    resolver: Arc<DomainResolver>,
) -> (FilteringEngine, CompileReport) {
    let (compiled, report) = compile_filter_lists(lists);
    let engine = build_engine(&compiled, config.clone(), resolver.clone()).unwrap_or_else(|e| {
        // our own writer produced the buffer
        log::error!("compiled buffer did not load: {e}");
        EngineBuilder::new(config, resolver).build()
    });
    (engine, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EASYLIST: &str = "\
[Adblock Plus 2.0]
! Title: sample
||ads.example.com^
||tracker.net^$third-party
/banner/*/ad^
##.ad-banner
example.com##.sidebar-ad
";

    const FIXES: &str = "\
||tracker.net^$third-party,badfilter
@@||ads.example.com/ok/
##.ad-banner
";

    #[test]
    fn test_compile_merges_lists() {
        let (compiled, report) = compile_filter_lists(&[EASYLIST, FIXES]);
        assert_eq!(report.lists, 2);
        assert_eq!(report.parse.skipped, 2);
        assert_eq!(report.optimize.badfiltered_rules, 1);
        assert_eq!(report.optimize.deduped, 1);
        assert_eq!(report.optimize.after, 5);
        assert!(!compiled.contains("tracker.net"));
    }

    #[test]
    fn test_engine_from_compiled_buffer() {
        let (compiled, _) = compile_filter_lists(&[EASYLIST, FIXES]);
        let engine = build_engine(&compiled, EngineConfig::default(), Arc::new(DomainResolver::new())).unwrap();

        assert!(engine
            .match_url("https://ads.example.com/x.js", "https://news.com/", "script")
            .is_blocked());
        assert!(engine
            .match_url("https://ads.example.com/ok/x.js", "https://news.com/", "script")
            .is_allowed());
        assert!(!engine
            .match_url("https://tracker.net/p.gif", "https://news.com/", "image")
            .is_match());
        assert_eq!(engine.stats().cosmetic.accepted, 2);
    }

    #[test]
    fn test_bad_buffer_is_an_error() {
        let err = build_engine("nope", EngineConfig::default(), Arc::new(DomainResolver::new()));
        assert!(err.is_err());
    }
}
