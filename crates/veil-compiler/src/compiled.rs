//! Compiled filter format
//!
//! A line-oriented text form of parsed filters that loads without going
//! through the filter parser again. The first line is [`COMPILED_HEADER`];
//! every other line is one record, fields separated by `\v`:
//!
//! ```text
//! n \v <bits hex> \v <anchor> \v <pattern> \v <domains> \v <raw>
//! c \v <h|#|@>    \v <scope>  \v <selector> \v <raw>
//! ```
//!
//! Network `bits` pack [`FilterBits`], the party mask (`<< 8`) and the type
//! mask (`<< 12`). The anchor is `-`, `|` or `||`. Domain and scope lists
//! are `|`-joined, `~` marks exclusions and `.*` marks entities. The
//! cosmetic kind is `h` for a scoped hide, `#` for a generic hide and `@`
//! for an exception.

use log::warn;
use thiserror::Error;

use veil_core::types::{AnchorType, FilterKind, FilterRecord, PartyMask, RequestType};

pub const COMPILED_HEADER: &str = "veil-compiled/1";

const SEP: char = '\u{b}';

bitflags::bitflags! {
    /// Boolean properties of a compiled network filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FilterBits: u32 {
        const EXCEPTION = 1 << 0;
        const IMPORTANT = 1 << 1;
        const RIGHT_ANCHOR = 1 << 2;
        const BADFILTER = 1 << 3;
    }
}

const PARTY_SHIFT: u32 = 8;
const TYPE_SHIFT: u32 = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompiledFormatError {
    #[error("not a compiled filter buffer (header '{found}')")]
    BadHeader { found: String },

    #[error("bad compiled record on line {line}: {reason}")]
    BadRecord { line: usize, reason: &'static str },
}

// =============================================================================
// Writing
// =============================================================================

/// Serialize records. Network records come first so each kind forms one
/// contiguous run.
pub fn write_compiled(records: &[FilterRecord]) -> String {
    let mut out = String::with_capacity(records.len() * 48 + COMPILED_HEADER.len() + 1);
    out.push_str(COMPILED_HEADER);
    out.push('\n');

    for kind in [FilterKind::Network, FilterKind::Cosmetic] {
        for rec in records.iter().filter(|r| r.kind == kind) {
            // fields are `\v`-separated and records are lines
            if rec.raw.contains([SEP, '\n', '\r']) {
                warn!("not compiling filter with a control separator: {:?}", rec.raw);
                continue;
            }
            write_record(&mut out, rec);
            out.push('\n');
        }
    }
    out
}

fn write_record(out: &mut String, rec: &FilterRecord) {
    match rec.kind {
        FilterKind::Network => {
            let mut bits = FilterBits::empty();
            bits.set(FilterBits::EXCEPTION, rec.exception);
            bits.set(FilterBits::IMPORTANT, rec.important);
            bits.set(FilterBits::RIGHT_ANCHOR, rec.right_anchor);
            bits.set(FilterBits::BADFILTER, rec.badfilter);
            let packed = bits.bits()
                | ((rec.party.bits() as u32) << PARTY_SHIFT)
                | (rec.type_mask.bits() << TYPE_SHIFT);
            let anchor = match rec.anchor {
                AnchorType::None => "-",
                AnchorType::Left => "|",
                AnchorType::Hostname => "||",
            };
            out.push_str(&format!(
                "n{SEP}{packed:x}{SEP}{anchor}{SEP}{}{SEP}{}{SEP}{}",
                rec.pattern,
                join_scope(rec),
                rec.raw
            ));
        }
        FilterKind::Cosmetic => {
            let kind = if rec.exception {
                '@'
            } else if rec.hostnames.is_empty() && rec.entities.is_empty() {
                '#'
            } else {
                'h'
            };
            out.push_str(&format!(
                "c{SEP}{kind}{SEP}{}{SEP}{}{SEP}{}",
                join_scope(rec),
                rec.pattern,
                rec.raw
            ));
        }
    }
}

fn join_scope(rec: &FilterRecord) -> String {
    let included = rec.hostnames.iter().cloned();
    let entities = rec.entities.iter().map(|e| format!("{e}.*"));
    let excluded = rec.excluded_hostnames.iter().map(|h| format!("~{h}"));
    let excluded_entities = rec.excluded_entities.iter().map(|e| format!("~{e}.*"));
    included
        .chain(entities)
        .chain(excluded)
        .chain(excluded_entities)
        .collect::<Vec<_>>()
        .join("|")
}

// =============================================================================
// Reading
// =============================================================================

/// Stream one contiguous run of same-kind records starting at byte
/// `offset`, handing each to `sink`. Returns the offset where the run
/// stopped: the start of the first line of another kind, or the end of
/// the buffer. Offset 0 checks and skips the header.
pub fn from_compiled_content<F>(buffer: &str, offset: usize, mut sink: F) -> Result<usize, CompiledFormatError>
where
    F: FnMut(FilterRecord),
{
    let mut pos = offset.min(buffer.len());
    let mut line_no = buffer[..pos].matches('\n').count() + 1;

    if pos == 0 {
        let (header, next) = next_line(buffer, 0);
        if header != COMPILED_HEADER {
            return Err(CompiledFormatError::BadHeader {
                found: header.chars().take(32).collect(),
            });
        }
        pos = next;
        line_no += 1;
    }

    let mut run_kind: Option<char> = None;
    while pos < buffer.len() {
        let (line, next) = next_line(buffer, pos);
        if line.is_empty() {
            pos = next;
            line_no += 1;
            continue;
        }

        let kind = line.chars().next().unwrap_or(' ');
        match run_kind {
            None => run_kind = Some(kind),
            Some(k) if k != kind => break,
            Some(_) => {}
        }

        let rec = read_record(line).map_err(|reason| CompiledFormatError::BadRecord { line: line_no, reason })?;
        sink(rec);
        pos = next;
        line_no += 1;
    }

    Ok(pos)
}

/// Load every record of a compiled buffer.
pub fn read_compiled<F>(buffer: &str, mut sink: F) -> Result<usize, CompiledFormatError>
where
    F: FnMut(FilterRecord),
{
    let mut count = 0;
    let mut offset = 0;
    loop {
        offset = from_compiled_content(buffer, offset, |rec| {
            count += 1;
            sink(rec);
        })?;
        if offset >= buffer.len() {
            return Ok(count);
        }
    }
}

fn next_line(buffer: &str, pos: usize) -> (&str, usize) {
    match buffer[pos..].find('\n') {
        Some(n) => (buffer[pos..pos + n].trim_end_matches('\r'), pos + n + 1),
        None => (&buffer[pos..], buffer.len()),
    }
}

fn read_record(line: &str) -> Result<FilterRecord, &'static str> {
    if let Some(rest) = line.strip_prefix("n\u{b}") {
        let mut fields = rest.splitn(5, SEP);
        let bits = fields.next().ok_or("missing bits")?;
        let anchor = fields.next().ok_or("missing anchor")?;
        let pattern = fields.next().ok_or("missing pattern")?;
        let domains = fields.next().ok_or("missing domains")?;
        let raw = fields.next().ok_or("missing raw text")?;

        let packed = u32::from_str_radix(bits, 16).map_err(|_| "bits are not hex")?;
        let flags = FilterBits::from_bits_truncate(packed & 0xff);

        let mut rec = FilterRecord::new(FilterKind::Network, raw);
        rec.exception = flags.contains(FilterBits::EXCEPTION);
        rec.important = flags.contains(FilterBits::IMPORTANT);
        rec.right_anchor = flags.contains(FilterBits::RIGHT_ANCHOR);
        rec.badfilter = flags.contains(FilterBits::BADFILTER);
        rec.party = PartyMask::from_bits_truncate(((packed >> PARTY_SHIFT) & 0xf) as u8);
        rec.type_mask = RequestType::from_bits_truncate(packed >> TYPE_SHIFT);
        rec.anchor = match anchor {
            "-" => AnchorType::None,
            "|" => AnchorType::Left,
            "||" => AnchorType::Hostname,
            _ => return Err("unknown anchor"),
        };
        rec.pattern = pattern.to_string();
        split_scope(domains, &mut rec);
        return Ok(rec);
    }

    if let Some(rest) = line.strip_prefix("c\u{b}") {
        let mut fields = rest.splitn(4, SEP);
        let kind = fields.next().ok_or("missing cosmetic kind")?;
        let scope = fields.next().ok_or("missing scope")?;
        let selector = fields.next().ok_or("missing selector")?;
        let raw = fields.next().ok_or("missing raw text")?;
        if selector.is_empty() {
            return Err("empty selector");
        }

        let mut rec = FilterRecord::new(FilterKind::Cosmetic, raw);
        rec.exception = match kind {
            "@" => true,
            "h" | "#" => false,
            _ => return Err("unknown cosmetic kind"),
        };
        rec.pattern = selector.to_string();
        split_scope(scope, &mut rec);
        if kind == "h" && rec.hostnames.is_empty() && rec.entities.is_empty() {
            return Err("scoped filter without hostnames");
        }
        return Ok(rec);
    }

    Err("unknown record kind")
}

fn split_scope(list: &str, rec: &mut FilterRecord) {
    for entry in list.split('|').filter(|e| !e.is_empty()) {
        let (negated, name) = match entry.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, entry),
        };
        match (negated, name.strip_suffix(".*")) {
            (false, Some(entity)) => rec.entities.push(entity.to_string()),
            (true, Some(entity)) => rec.excluded_entities.push(entity.to_string()),
            (false, None) => rec.hostnames.push(name.to_string()),
            (true, None) => rec.excluded_hostnames.push(name.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::parser::{parse_filter_list, parse_line, ParsedLine};

    fn records(text: &str) -> Vec<FilterRecord> {
        parse_filter_list(text).0
    }

    #[test]
    fn test_records_survive_compilation() {
        let list = "\
||ads.example.com^$third-party,image,important
@@|https://cdn.net/lib.js|$domain=news.com|~sports.news.com|shop.*
/banner/*/ad^$~stylesheet,badfilter
example.com,~www.example.com,google.*##.ad-unit
##div[title=\"ad\"]
#@#.sponsored";
        let parsed = records(list);
        let compiled = write_compiled(&parsed);
        assert!(compiled.starts_with("veil-compiled/1\n"));

        let mut loaded = Vec::new();
        assert_eq!(read_compiled(&compiled, |rec| loaded.push(rec)).unwrap(), parsed.len());
        assert_eq!(loaded, parsed);
    }

    #[test]
    fn test_runs_stop_at_kind_change() {
        let compiled = write_compiled(&records("||a.com^\n||b.com^\nexample.com##.x\n##.y"));

        let mut network = Vec::new();
        let offset = from_compiled_content(&compiled, 0, |rec| network.push(rec)).unwrap();
        assert_eq!(network.len(), 2);
        assert!(compiled[offset..].starts_with("c\u{b}h"));

        let mut cosmetic = Vec::new();
        let end = from_compiled_content(&compiled, offset, |rec| cosmetic.push(rec)).unwrap();
        assert_eq!(cosmetic.len(), 2);
        assert_eq!(end, compiled.len());
        assert!(cosmetic.iter().all(|r| r.kind == FilterKind::Cosmetic));
    }

    #[test]
    fn test_separator_in_filter_is_not_written() {
        let mut parsed = records("||a.com^\n##.ok");
        let mut smuggled = parsed[1].clone();
        smuggled.pattern = ".x\u{b}y".to_string();
        smuggled.raw = "##.x\u{b}y".to_string();
        parsed.push(smuggled);

        let compiled = write_compiled(&parsed);
        assert_eq!(compiled.matches('\n').count(), 3);

        let mut loaded = Vec::new();
        assert_eq!(read_compiled(&compiled, |rec| loaded.push(rec)).unwrap(), 2);
        assert_eq!(loaded, parsed[..2]);
    }

    #[test]
    fn test_bad_header() {
        let err = from_compiled_content("veil-compiled/9\n", 0, |_| {}).unwrap_err();
        assert!(matches!(err, CompiledFormatError::BadHeader { .. }));
        assert!(read_compiled("", |_| {}).is_err());
    }

    #[test]
    fn test_bad_records_report_line() {
        let buffer = "veil-compiled/1\nn\u{b}zz\u{b}-\u{b}ads\u{b}\u{b}ads\n";
        let err = read_compiled(buffer, |_| {}).unwrap_err();
        assert_eq!(err, CompiledFormatError::BadRecord { line: 2, reason: "bits are not hex" });

        let buffer = "veil-compiled/1\nn\u{b}0\u{b}-\u{b}ads\u{b}\u{b}ads\nx\u{b}oops\n";
        let err = read_compiled(buffer, |_| {}).unwrap_err();
        assert_eq!(err, CompiledFormatError::BadRecord { line: 3, reason: "unknown record kind" });
    }

    #[test]
    fn test_header_only_buffer() {
        let mut count = 0;
        assert_eq!(read_compiled("veil-compiled/1\n", |_| count += 1).unwrap(), 0);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_raw_text_keeps_separator() {
        let rec = match parse_line("example.com##.a") {
            ParsedLine::Cosmetic(rec) => rec,
            other => panic!("unexpected {other:?}"),
        };
        let mut line = String::new();
        write_record(&mut line, &FilterRecord { raw: "odd\u{b}raw".into(), ..rec });
        let back = read_record(&line).unwrap();
        assert_eq!(back.raw, "odd\u{b}raw");
        assert_eq!(back.pattern, ".a");
    }
}
