//! Dynamic filtering rules
//!
//! A rule is a cell addressed by source hostname, destination hostname and
//! a dynamic type. Cells sharing a source/destination pair are packed into
//! one `u32`, two bits per type. Evaluation broadens the source up to `*`
//! and, for the destination, walks from the most specific cell to `* * *`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::Error;
use crate::psl::{to_broader_hostname, DomainResolver};
use crate::types::RequestType;

/// Dynamic types and the bit offset of their two-bit field.
const TYPE_BIT_OFFSETS: [(&str, u32); 7] = [
    ("*", 0),
    ("inline-script", 2),
    ("1p-script", 4),
    ("3p-script", 6),
    ("3p-frame", 8),
    ("image", 10),
    ("3p", 12),
];

fn type_bit_offset(type_name: &str) -> Option<u32> {
    TYPE_BIT_OFFSETS
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, offset)| *offset)
}

fn static_type_name(type_name: &str) -> Option<&'static str> {
    TYPE_BIT_OFFSETS
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(name, _)| *name)
}

/// Action stored in a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DynamicAction {
    #[default]
    None = 0,
    Block = 1,
    Allow = 2,
    Noop = 3,
}

impl DynamicAction {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            1 => Self::Block,
            2 => Self::Allow,
            3 => Self::Noop,
            _ => Self::None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "block" => Some(Self::Block),
            "allow" => Some(Self::Allow),
            "noop" => Some(Self::Noop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Block => "block",
            Self::Allow => "allow",
            Self::Noop => "noop",
        }
    }
}

/// The cell that decided an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DynamicVerdict {
    pub action: DynamicAction,
    /// Source hostname of the deciding cell (`z`)
    pub src: String,
    /// Destination hostname of the deciding cell (`y`)
    pub des: String,
    pub type_name: &'static str,
}

impl DynamicVerdict {
    pub fn is_match(&self) -> bool {
        self.action != DynamicAction::None
    }

    /// The deciding cell as `src des type action`; empty when nothing matched.
    pub fn rule_text(&self) -> String {
        if !self.is_match() {
            return String::new();
        }
        format!("{} {} {} {}", self.src, self.des, self.type_name, self.action.as_str())
    }
}

/// Dynamic filtering rule matrix.
#[derive(Clone)]
pub struct DynamicRules {
    resolver: Arc<DomainResolver>,
    rules: HashMap<String, u32>,
}

impl fmt::Debug for DynamicRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicRules").field("cells", &self.rules.len()).finish()
    }
}

impl DynamicRules {
    pub fn new(resolver: Arc<DomainResolver>) -> Self {
        Self {
            resolver,
            rules: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of source/destination pairs holding at least one rule.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Store `action` in a cell. Returns true when the cell changed.
    ///
    /// Unknown types are refused, as are typed cells with a specific
    /// destination: only `*` applies there.
    pub fn set_cell(&mut self, src: &str, des: &str, type_name: &str, action: DynamicAction) -> bool {
        let Some(offset) = type_bit_offset(type_name) else {
            return false;
        };
        if des != "*" && type_name != "*" {
            return false;
        }

        let key = format!("{src} {des}");
        let old = self.rules.get(&key).copied().unwrap_or(0);
        let new = (old & !(3 << offset)) | ((action as u32) << offset);
        if new == old {
            return false;
        }
        if new == 0 {
            self.rules.remove(&key);
        } else {
            self.rules.insert(key, new);
        }
        true
    }

    pub fn unset_cell(&mut self, src: &str, des: &str, type_name: &str) -> bool {
        self.set_cell(src, des, type_name, DynamicAction::None)
    }

    /// Exact cell lookup, no broadening.
    pub fn evaluate_cell(&self, src: &str, des: &str, type_name: &str) -> DynamicAction {
        let Some(offset) = type_bit_offset(type_name) else {
            return DynamicAction::None;
        };
        self.rules
            .get(&format!("{src} {des}"))
            .map_or(DynamicAction::None, |bits| DynamicAction::from_bits(bits >> offset))
    }

    /// Evaluate with the source broadened up to `*`. Returns the action
    /// and the source of the deciding cell.
    pub fn evaluate_cell_z<'s>(&self, src: &'s str, des: &str, type_name: &str) -> (DynamicAction, &'s str) {
        let Some(offset) = type_bit_offset(type_name) else {
            return (DynamicAction::None, "");
        };

        let mut key = String::with_capacity(src.len() + des.len() + 1);
        let mut s = src;
        loop {
            key.clear();
            key.push_str(s);
            key.push(' ');
            key.push_str(des);
            if let Some(bits) = self.rules.get(&key) {
                let action = DynamicAction::from_bits(bits >> offset);
                if action != DynamicAction::None {
                    return (action, s);
                }
            }
            s = to_broader_hostname(s);
            if s.is_empty() {
                return (DynamicAction::None, "");
            }
        }
    }

    /// Full evaluation for a request from `src` to `des`:
    ///
    /// 1. destination cells of type `*`, from `des` up to its last label,
    /// 2. party-specific cells (`3p-script`, `3p-frame`, `3p`, `1p-script`),
    /// 3. the request's own type when it is a dynamic type,
    /// 4. `* * *`.
    pub fn evaluate_cell_zy(&self, src: &str, des: &str, request_type: RequestType) -> DynamicVerdict {
        if des.is_empty() || self.rules.is_empty() {
            return DynamicVerdict::default();
        }

        let mut d = des;
        while d != "*" && !d.is_empty() {
            if let Some(verdict) = self.probe(src, d, "*") {
                return verdict;
            }
            d = to_broader_hostname(d);
        }

        let is_script = request_type == RequestType::SCRIPT;
        if self.is_third_party(src, des) {
            if is_script {
                if let Some(verdict) = self.probe(src, "*", "3p-script") {
                    return verdict;
                }
            } else if request_type == RequestType::SUBDOCUMENT {
                if let Some(verdict) = self.probe(src, "*", "3p-frame") {
                    return verdict;
                }
            }
            if let Some(verdict) = self.probe(src, "*", "3p") {
                return verdict;
            }
        } else if is_script {
            if let Some(verdict) = self.probe(src, "*", "1p-script") {
                return verdict;
            }
        }

        if let Some(type_name) = static_type_name(request_type.as_str()) {
            if let Some(verdict) = self.probe(src, "*", type_name) {
                return verdict;
            }
        }

        self.probe(src, "*", "*").unwrap_or_default()
    }

    fn probe(&self, src: &str, des: &str, type_name: &'static str) -> Option<DynamicVerdict> {
        let (action, z) = self.evaluate_cell_z(src, des, type_name);
        (action != DynamicAction::None).then(|| DynamicVerdict {
            action,
            src: z.to_string(),
            des: des.to_string(),
            type_name,
        })
    }

    /// A destination is third-party unless it sits under the source's
    /// registrable domain. Wildcards are never third-party.
    pub fn is_third_party(&self, src: &str, des: &str) -> bool {
        if des == "*" || src == "*" || src.is_empty() {
            return false;
        }
        let domain = self.resolver.domain_from_hostname(src);
        let src_domain = if domain.is_empty() { src } else { domain.as_str() };
        if !des.ends_with(src_domain) {
            return true;
        }
        des.len() != src_domain.len() && des.as_bytes()[des.len() - src_domain.len() - 1] != b'.'
    }

    // -------------------------------------------------------------------------
    // Text form
    // -------------------------------------------------------------------------

    /// Add rules from `src des type action` lines. Blank lines and lines
    /// starting with `#` are skipped. Stops at the first bad line.
    pub fn from_text(&mut self, text: &str) -> Result<usize, Error> {
        let mut added = 0;
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |reason| Error::InvalidDynamicRule { line: index + 1, reason };

            let fields: Vec<&str> = line.split_whitespace().collect();
            let [src, des, type_name, action] = fields[..] else {
                return Err(bad("expected 4 fields"));
            };
            let action = DynamicAction::from_name(action).ok_or_else(|| bad("unknown action"))?;
            if type_bit_offset(type_name).is_none() {
                return Err(bad("unknown type"));
            }
            if des != "*" && type_name != "*" {
                return Err(bad("a specific destination only takes type *"));
            }
            if self.set_cell(&src.to_ascii_lowercase(), &des.to_ascii_lowercase(), type_name, action) {
                added += 1;
            }
        }
        debug!("dynamic rules: {added} cells set, {} pairs stored", self.rules.len());
        Ok(added)
    }

    /// One `src des type action` line per rule, sorted.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        for (key, &bits) in &self.rules {
            let Some((src, des)) = key.split_once(' ') else {
                continue;
            };
            for (type_name, offset) in TYPE_BIT_OFFSETS {
                let action = DynamicAction::from_bits(bits >> offset);
                if action != DynamicAction::None {
                    lines.push(format!("{src} {des} {type_name} {}", action.as_str()));
                }
            }
        }
        lines.sort();
        lines.join("\n")
    }
}
