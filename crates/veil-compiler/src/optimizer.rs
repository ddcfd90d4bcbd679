use std::collections::HashSet;

use veil_core::types::FilterRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    pub badfilter_rules: usize,
    pub badfiltered_rules: usize,
}

/// Apply `$badfilter` cancellations and drop duplicate records. The first
/// occurrence of a duplicate wins, so list order is preserved.
pub fn optimize_records(records: &mut Vec<FilterRecord>) -> OptimizeStats {
    let before = records.len();
    let mut badfilter_keys: HashSet<RecordKey> = HashSet::new();
    let mut badfilter_rules = 0usize;

    for rec in records.iter() {
        if rec.badfilter {
            badfilter_rules += 1;
            badfilter_keys.insert(RecordKey::from(rec));
        }
    }

    let mut badfiltered_rules = 0usize;
    if !badfilter_keys.is_empty() {
        records.retain(|rec| {
            if rec.badfilter {
                return false;
            }
            if badfilter_keys.contains(&RecordKey::from(rec)) {
                badfiltered_rules += 1;
                return false;
            }
            true
        });
    }

    let mut seen: HashSet<RecordKey> = HashSet::new();
    let mut deduped = 0usize;
    records.retain(|rec| {
        if seen.insert(RecordKey::from(rec)) {
            true
        } else {
            deduped += 1;
            false
        }
    });

    let after = records.len();
    log::debug!(
        "optimized {} records into {} ({} duplicates, {} cancelled by {} badfilters)",
        before,
        after,
        deduped,
        badfiltered_rules,
        badfilter_rules
    );

    OptimizeStats {
        before,
        after,
        deduped,
        badfilter_rules,
        badfiltered_rules,
    }
}

/// Everything that affects matching. The raw text and the badfilter flag
/// are left out so `x` and `x$badfilter` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    record: FilterRecord,
}

impl From<&FilterRecord> for RecordKey {
    fn from(rec: &FilterRecord) -> Self {
        Self {
            record: FilterRecord {
                raw: String::new(),
                badfilter: false,
                ..rec.clone()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::parser::parse_filter_list;

    fn raws(records: &[FilterRecord]) -> Vec<&str> {
        records.iter().map(|r| r.raw.as_str()).collect()
    }

    #[test]
    fn test_badfilter_cancels_twin() {
        let (mut records, _) = parse_filter_list(
            "||ads.example.com^$script\n||ads.example.com^$script,badfilter\n||ads.example.com^\n",
        );
        let stats = optimize_records(&mut records);
        assert_eq!(raws(&records), vec!["||ads.example.com^"]);
        assert_eq!(stats.badfilter_rules, 1);
        assert_eq!(stats.badfiltered_rules, 1);
        assert_eq!(stats.before, 3);
        assert_eq!(stats.after, 1);
    }

    #[test]
    fn test_orphan_badfilter_is_dropped() {
        let (mut records, _) = parse_filter_list("||a.com^$badfilter\n||b.com^\n");
        let stats = optimize_records(&mut records);
        assert_eq!(raws(&records), vec!["||b.com^"]);
        assert_eq!(stats.badfiltered_rules, 0);
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let (mut records, _) = parse_filter_list("##.ad\n||a.com^\n##.ad\n||A.com^\nexample.com##.ad\n");
        let stats = optimize_records(&mut records);
        assert_eq!(stats.deduped, 2);
        assert_eq!(raws(&records), vec!["##.ad", "||a.com^", "example.com##.ad"]);
    }
}
