//! Filter line parser
//!
//! Turns one line of filter-list text into a [`FilterRecord`]. Lines the
//! engine cannot represent are rejected with a reason rather than failing
//! the whole list.

use crate::types::{is_hostname_byte, AnchorType, FilterKind, FilterRecord, PartyMask, RequestType};

/// Outcome of parsing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Network(FilterRecord),
    Cosmetic(FilterRecord),
    /// Blank line, comment or list header.
    Skipped,
    Invalid(RejectReason),
}

/// Why a line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    EmptySelector,
    UnsupportedCosmetic,
    BadHostname,
    RegexPattern,
    MatchesEverything,
    UnknownOption,
    EmptyTypeMask,
    ElemhideOnBlock,
    Whitespace,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptySelector => "empty selector",
            Self::UnsupportedCosmetic => "unsupported cosmetic syntax",
            Self::BadHostname => "bad hostname",
            Self::RegexPattern => "regex pattern",
            Self::MatchesEverything => "pattern matches everything",
            Self::UnknownOption => "unknown option",
            Self::EmptyTypeMask => "options exclude every type",
            Self::ElemhideOnBlock => "elemhide on a block filter",
            Self::Whitespace => "whitespace in pattern",
        }
    }
}

/// Counters for a parsed list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: usize,
    pub network: usize,
    pub cosmetic: usize,
    pub skipped: usize,
    pub rejected: usize,
}

/// Parse a whole list. Invalid lines are counted and dropped.
pub fn parse_filter_list(text: &str) -> (Vec<FilterRecord>, ParseStats) {
    let mut records = Vec::new();
    let mut stats = ParseStats::default();

    for line in text.lines() {
        stats.lines += 1;
        match parse_line(line) {
            ParsedLine::Network(rec) => {
                stats.network += 1;
                records.push(rec);
            }
            ParsedLine::Cosmetic(rec) => {
                stats.cosmetic += 1;
                records.push(rec);
            }
            ParsedLine::Skipped => stats.skipped += 1,
            ParsedLine::Invalid(reason) => {
                log::trace!("rejected '{}': {}", line, reason.as_str());
                stats.rejected += 1;
            }
        }
    }

    (records, stats)
}

/// Parse one filter line.
pub fn parse_line(raw_line: &str) -> ParsedLine {
    let line = raw_line.trim();
    if line.is_empty() {
        return ParsedLine::Skipped;
    }

    if let Some((pos, exception)) = find_cosmetic_separator(line) {
        return parse_cosmetic(line, pos, exception);
    }

    if is_comment_line(line) {
        return ParsedLine::Skipped;
    }

    parse_network(line)
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || line.starts_with('#')
}

// =============================================================================
// Cosmetic Filters
// =============================================================================

/// Position of `##` or `#@#` and whether it is an exception.
fn find_cosmetic_separator(line: &str) -> Option<(usize, bool)> {
    let pos = line.find('#')?;
    let rest = &line[pos..];
    if rest.starts_with("##") {
        // hosts-file comments: `## note`, `####...`
        let run = rest.bytes().take_while(|&b| b == b'#').count();
        let after = rest[run..].chars().next();
        if run > 3 || (run == 2 && after.map_or(pos == 0, char::is_whitespace)) {
            return None;
        }
        Some((pos, false))
    } else if rest.starts_with("#@#") {
        Some((pos, true))
    } else if rest.starts_with("#?#") || rest.starts_with("#$#") || rest.starts_with("#%#") {
        // extended syntaxes share the hostname prefix but are not supported
        Some((pos, false))
    } else {
        None
    }
}

fn parse_cosmetic(line: &str, pos: usize, exception: bool) -> ParsedLine {
    let sep_len = if exception { 3 } else { 2 };
    if !exception && !line[pos..].starts_with("##") {
        return ParsedLine::Invalid(RejectReason::UnsupportedCosmetic);
    }

    let selector = line[pos + sep_len..].trim();
    if selector.is_empty() {
        return ParsedLine::Invalid(RejectReason::EmptySelector);
    }
    if selector.starts_with('+')
        || selector.contains(":style(")
        || selector.starts_with('^')
        || selector.contains(char::is_control)
    {
        return ParsedLine::Invalid(RejectReason::UnsupportedCosmetic);
    }

    let mut rec = FilterRecord::new(FilterKind::Cosmetic, line);
    rec.exception = exception;
    rec.pattern = selector.to_string();

    let prefix = line[..pos].trim();
    if !prefix.is_empty() {
        for raw in prefix.split(',') {
            if let Err(reason) = push_scope(&mut rec, raw) {
                return ParsedLine::Invalid(reason);
            }
        }
    }

    ParsedLine::Cosmetic(rec)
}

/// Add one hostname or `name.*` entity, possibly `~`-negated, to the scope
/// of `rec`.
fn push_scope(rec: &mut FilterRecord, raw: &str) -> Result<(), RejectReason> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }

    let (negated, name) = match raw.strip_prefix('~') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    if let Some(entity) = name.strip_suffix(".*") {
        let entity = normalize_domain(entity).ok_or(RejectReason::BadHostname)?;
        if negated {
            rec.excluded_entities.push(entity);
        } else {
            rec.entities.push(entity);
        }
        return Ok(());
    }

    let hostname = normalize_domain(name).ok_or(RejectReason::BadHostname)?;
    if negated {
        rec.excluded_hostnames.push(hostname);
    } else {
        rec.hostnames.push(hostname);
    }
    Ok(())
}

pub(crate) fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() || !trimmed.bytes().all(is_hostname_byte) {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

// =============================================================================
// Network Filters
// =============================================================================

fn parse_network(line: &str) -> ParsedLine {
    let mut rec = FilterRecord::new(FilterKind::Network, line);

    let mut body = line;
    if let Some(rest) = body.strip_prefix("@@") {
        rec.exception = true;
        body = rest.trim_start();
    }

    // hosts file syntax: "0.0.0.0 example.com"
    if let Some(entry) = parse_hosts_file_entry(body) {
        return match entry {
            Some(host) if !rec.exception => {
                rec.anchor = AnchorType::Hostname;
                rec.pattern = format!("{host}^");
                ParsedLine::Network(rec)
            }
            _ => ParsedLine::Skipped,
        };
    }

    let (pattern_part, options_text) = split_rule_options(body);
    if let Some(options_text) = options_text {
        if let Err(reason) = parse_options(options_text, &mut rec) {
            return ParsedLine::Invalid(reason);
        }
    }

    let mut pattern = pattern_part.trim();
    if pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/') {
        return ParsedLine::Invalid(RejectReason::RegexPattern);
    }

    if let Some(rest) = pattern.strip_prefix("||") {
        rec.anchor = AnchorType::Hostname;
        pattern = rest;
    } else if let Some(rest) = pattern.strip_prefix('|') {
        rec.anchor = AnchorType::Left;
        pattern = rest;
    }
    if let Some(rest) = pattern.strip_suffix('|') {
        rec.right_anchor = true;
        pattern = rest;
    }

    // leading and trailing wildcards are implied
    if rec.anchor == AnchorType::None {
        pattern = pattern.trim_start_matches('*');
    }
    if !rec.right_anchor {
        pattern = pattern.trim_end_matches('*');
    }

    if pattern.contains(char::is_whitespace) {
        return ParsedLine::Invalid(RejectReason::Whitespace);
    }

    let pattern = pattern.to_ascii_lowercase();
    if pattern.is_empty() && !rec.has_scope() && rec.type_mask.is_empty() {
        return ParsedLine::Invalid(RejectReason::MatchesEverything);
    }
    if rec.anchor == AnchorType::Hostname && pattern.starts_with(|c: char| !is_hostname_byte(c as u8)) {
        return ParsedLine::Invalid(RejectReason::BadHostname);
    }
    rec.pattern = pattern;

    ParsedLine::Network(rec)
}

/// Split the `$options` suffix off a network filter. The last `$` wins so
/// patterns may contain one.
fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    match line.rfind('$') {
        Some(pos) if pos + 1 < line.len() => (&line[..pos], Some(&line[pos + 1..])),
        _ => (line, None),
    }
}

fn parse_options(text: &str, rec: &mut FilterRecord) -> Result<(), RejectReason> {
    let mut type_include = 0u32;
    let mut type_exclude = 0u32;
    let mut party_include = 0u8;
    let mut party_exclude = 0u8;

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if raw_lower == "important" {
            rec.important = true;
            continue;
        }

        if raw_lower == "badfilter" {
            rec.badfilter = true;
            continue;
        }

        if raw_lower == "match-case" || raw_lower == "match_case" {
            // matching is always case-insensitive
            continue;
        }

        if raw_lower == "elemhide" || raw_lower == "ehide" {
            if !rec.exception {
                return Err(RejectReason::ElemhideOnBlock);
            }
            type_include |= RequestType::ELEMHIDE.bits();
            continue;
        }

        if let Some(domain_value) = raw_lower.strip_prefix("domain=") {
            for entry in domain_value.split('|') {
                push_scope(rec, entry)?;
            }
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        if let Some(mask) = request_type_mask(name) {
            if negated {
                type_exclude |= mask;
            } else {
                type_include |= mask;
            }
            continue;
        }

        if let Some(mask) = party_mask(name) {
            if negated {
                party_exclude |= mask;
            } else {
                party_include |= mask;
            }
            continue;
        }

        return Err(RejectReason::UnknownOption);
    }

    let all_types = RequestType::ALL.bits() | (type_include & RequestType::ELEMHIDE.bits());
    let type_bits = finalize_mask_u32(type_include, type_exclude, all_types)
        .ok_or(RejectReason::EmptyTypeMask)?;
    let party_bits = finalize_mask_u8(party_include, party_exclude, PartyMask::ALL.bits())
        .ok_or(RejectReason::EmptyTypeMask)?;

    rec.type_mask = RequestType::from_bits_truncate(type_bits);
    rec.party = PartyMask::from_bits_truncate(party_bits);
    Ok(())
}

/// Combine include/exclude bits. `Some(0)` means "any"; `None` means the
/// options exclude everything.
fn finalize_mask_u32(include: u32, exclude: u32, all: u32) -> Option<u32> {
    let include = include & all;
    let exclude = exclude & all;
    let mut mask = if include != 0 { include & !exclude } else { all & !exclude };
    if mask == 0 {
        return None;
    }
    if mask == all && include == 0 {
        mask = 0;
    }
    Some(mask)
}

fn finalize_mask_u8(include: u8, exclude: u8, all: u8) -> Option<u8> {
    let include = include & all;
    let exclude = exclude & all;
    let mut mask = if include != 0 { include & !exclude } else { all & !exclude };
    if mask == 0 {
        return None;
    }
    if mask == all {
        mask = 0;
    }
    Some(mask)
}

fn request_type_mask(name: &str) -> Option<u32> {
    match name {
        "script" => Some(RequestType::SCRIPT.bits()),
        "image" => Some(RequestType::IMAGE.bits()),
        "stylesheet" | "css" => Some(RequestType::STYLESHEET.bits()),
        "object" => Some(RequestType::OBJECT.bits()),
        "subdocument" | "frame" => Some(RequestType::SUBDOCUMENT.bits()),
        "document" | "doc" => Some(RequestType::MAIN_FRAME.bits()),
        "xmlhttprequest" | "xhr" => Some(RequestType::XMLHTTPREQUEST.bits()),
        "media" => Some(RequestType::MEDIA.bits()),
        "font" => Some(RequestType::FONT.bits()),
        "ping" => Some(RequestType::PING.bits()),
        "websocket" => Some(RequestType::WEBSOCKET.bits()),
        "other" => Some(RequestType::OTHER.bits()),
        _ => None,
    }
}

fn party_mask(name: &str) -> Option<u8> {
    match name {
        "third-party" | "thirdparty" | "3p" => Some(PartyMask::THIRD_PARTY.bits()),
        "first-party" | "firstparty" | "1p" => Some(PartyMask::FIRST_PARTY.bits()),
        _ => None,
    }
}

/// `Some(None)` is a hosts line that blocks nothing (`localhost` and
/// friends) or names an invalid host.
fn parse_hosts_file_entry(line: &str) -> Option<Option<String>> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;

    if !matches!(first, "0.0.0.0" | "127.0.0.1" | "::" | "::1") || parts.next().is_some() {
        return None;
    }
    if matches!(second, "localhost" | "localhost.localdomain" | "local" | "0.0.0.0") {
        return Some(None);
    }
    Some(normalize_domain(second))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(line: &str) -> FilterRecord {
        match parse_line(line) {
            ParsedLine::Network(rec) => rec,
            other => panic!("expected network filter for {line:?}, got {other:?}"),
        }
    }

    fn cosmetic(line: &str) -> FilterRecord {
        match parse_line(line) {
            ParsedLine::Cosmetic(rec) => rec,
            other => panic!("expected cosmetic filter for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_comments_and_blank_lines() {
        assert_eq!(parse_line(""), ParsedLine::Skipped);
        assert_eq!(parse_line("! Title: list"), ParsedLine::Skipped);
        assert_eq!(parse_line("[Adblock Plus 2.0]"), ParsedLine::Skipped);
        assert_eq!(parse_line("# hosts comment"), ParsedLine::Skipped);
        assert_eq!(parse_line("## comment"), ParsedLine::Skipped);
        assert_eq!(parse_line("##\tblock list below"), ParsedLine::Skipped);
        assert_eq!(parse_line("######## section ########"), ParsedLine::Skipped);
        assert_eq!(parse_line("##"), ParsedLine::Skipped);

        // still cosmetic
        assert_eq!(cosmetic("##.banner").pattern, ".banner");
        assert_eq!(cosmetic("###ad-slot").pattern, "#ad-slot");
    }

    #[test]
    fn test_host_anchor_rule() {
        let rec = network("||Example.NET^");
        assert_eq!(rec.anchor, AnchorType::Hostname);
        assert_eq!(rec.pure_hostname(), Some("example.net"));
        assert!(!rec.exception);
        assert!(!rec.important);
    }

    #[test]
    fn test_exception_and_important() {
        assert!(network("@@||example.net^").exception);
        let rec = network("||example.net^$important");
        assert!(rec.important);
        assert_eq!(rec.pure_hostname(), Some("example.net"));
    }

    #[test]
    fn test_type_and_party_options() {
        let rec = network("||ads.example.com^$script,third-party");
        assert_eq!(rec.type_mask, RequestType::SCRIPT);
        assert_eq!(rec.party, PartyMask::THIRD_PARTY);

        let rec = network("/banner/ads$~stylesheet");
        assert!(!rec.type_mask.contains(RequestType::STYLESHEET));
        assert!(rec.type_mask.contains(RequestType::IMAGE));
        assert!(!rec.type_mask.contains(RequestType::ELEMHIDE));

        let rec = network("/banner/ads$~third-party");
        assert_eq!(rec.party, PartyMask::FIRST_PARTY);
    }

    #[test]
    fn test_domain_option() {
        let rec = network("/ads.js$domain=example.com|~sub.example.com|shop.*");
        assert_eq!(rec.hostnames, vec!["example.com"]);
        assert_eq!(rec.excluded_hostnames, vec!["sub.example.com"]);
        assert_eq!(rec.entities, vec!["shop"]);
        assert_eq!(rec.pattern, "/ads.js");
    }

    #[test]
    fn test_elemhide() {
        let rec = network("@@||example.com^$elemhide");
        assert_eq!(rec.type_mask, RequestType::ELEMHIDE);
        assert_eq!(parse_line("||example.com^$elemhide"), ParsedLine::Invalid(RejectReason::ElemhideOnBlock));
    }

    #[test]
    fn test_rejects() {
        assert_eq!(parse_line("/ad[0-9]+/"), ParsedLine::Invalid(RejectReason::RegexPattern));
        assert_eq!(parse_line("||example.com^$redirect=noop.js"), ParsedLine::Invalid(RejectReason::UnknownOption));
        assert_eq!(parse_line("*"), ParsedLine::Invalid(RejectReason::MatchesEverything));
        assert_eq!(parse_line("||x.com^$script,~script"), ParsedLine::Invalid(RejectReason::EmptyTypeMask));
        assert_eq!(parse_line("example.com##"), ParsedLine::Invalid(RejectReason::EmptySelector));
        assert_eq!(
            parse_line("example.com##.a\u{b}b"),
            ParsedLine::Invalid(RejectReason::UnsupportedCosmetic)
        );
        assert_eq!(parse_line("example.com#?#div:has(a)"), ParsedLine::Invalid(RejectReason::UnsupportedCosmetic));
        assert_eq!(parse_line("bad host##.x"), ParsedLine::Invalid(RejectReason::BadHostname));
    }

    #[test]
    fn test_pattern_anchors() {
        let rec = network("|https://ads.");
        assert_eq!(rec.anchor, AnchorType::Left);
        assert_eq!(rec.pattern, "https://ads.");

        let rec = network("*/ad.gif|");
        assert_eq!(rec.anchor, AnchorType::None);
        assert!(rec.right_anchor);
        assert_eq!(rec.pattern, "/ad.gif");

        let rec = network("||cdn.example.com/ads/*");
        assert_eq!(rec.anchor, AnchorType::Hostname);
        assert_eq!(rec.pattern, "cdn.example.com/ads/");
        assert_eq!(rec.pure_hostname(), None);
    }

    #[test]
    fn test_hosts_file_line() {
        let rec = network("0.0.0.0 tracker.example.org");
        assert_eq!(rec.pure_hostname(), Some("tracker.example.org"));
        assert_eq!(parse_line("127.0.0.1 localhost"), ParsedLine::Skipped);
        assert_eq!(parse_line("ads banner"), ParsedLine::Invalid(RejectReason::Whitespace));
    }

    #[test]
    fn test_cosmetic_scopes() {
        let rec = cosmetic("example.com,~sub.example.com,google.*##.ad-unit");
        assert!(!rec.exception);
        assert_eq!(rec.pattern, ".ad-unit");
        assert_eq!(rec.hostnames, vec!["example.com"]);
        assert_eq!(rec.excluded_hostnames, vec!["sub.example.com"]);
        assert_eq!(rec.entities, vec!["google"]);

        let rec = cosmetic("#@#.sponsored");
        assert!(rec.exception);
        assert!(!rec.has_scope());

        let rec = cosmetic("##div[title=\"ad\"]");
        assert_eq!(rec.pattern, "div[title=\"ad\"]");
    }

    #[test]
    fn test_parse_filter_list_counts() {
        let text = "! comment\n||a.com^\nexample.com##.ad\n/re+/\n\n";
        let (records, stats) = parse_filter_list(text);
        assert_eq!(records.len(), 2);
        assert_eq!(stats.lines, 5);
        assert_eq!(stats.network, 1);
        assert_eq!(stats.cosmetic, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.skipped, 2);
    }
}
