//! Core type definitions for Veil
//!
//! Filter records produced by the parser, request descriptions consumed by
//! the matchers, and the bit masks shared between them.

use crate::psl::{is_same_or_subdomain, DomainResolver};
use crate::url::extract_host;

// =============================================================================
// Request Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;  // iframe/frame
        const MAIN_FRAME = 1 << 6;   // main document
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        /// Pseudo type used to ask whether cosmetic filtering is excepted
        /// on a page (`$elemhide`). Never part of `ALL`.
        const ELEMHIDE = 1 << 12;

        /// All network request types
        const ALL = 0x0FFF;
    }
}

impl RequestType {
    /// Parse from browser request type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "main_frame" | "document" => Self::MAIN_FRAME,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "font" => Self::FONT,
            "object" => Self::OBJECT,
            "xmlhttprequest" => Self::XMLHTTPREQUEST,
            "ping" => Self::PING,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            "elemhide" => Self::ELEMHIDE,
            _ => Self::OTHER,
        }
    }

    /// Browser name of a single request type.
    pub fn as_str(&self) -> &'static str {
        const NAMES: [(RequestType, &str); 12] = [
            (RequestType::MAIN_FRAME, "main_frame"),
            (RequestType::SUBDOCUMENT, "sub_frame"),
            (RequestType::STYLESHEET, "stylesheet"),
            (RequestType::SCRIPT, "script"),
            (RequestType::IMAGE, "image"),
            (RequestType::FONT, "font"),
            (RequestType::OBJECT, "object"),
            (RequestType::XMLHTTPREQUEST, "xmlhttprequest"),
            (RequestType::PING, "ping"),
            (RequestType::MEDIA, "media"),
            (RequestType::WEBSOCKET, "websocket"),
            (RequestType::ELEMHIDE, "elemhide"),
        ];
        NAMES
            .iter()
            .find(|(ty, _)| ty == self)
            .map_or("other", |(_, name)| name)
    }

    /// Whether a filter carrying `self` as its type mask applies to a
    /// request of type `request`. An empty mask means any network type.
    #[inline]
    pub fn applies_to(&self, request: RequestType) -> bool {
        if self.is_empty() {
            Self::ALL.intersects(request)
        } else {
            self.intersects(request)
        }
    }
}

// =============================================================================
// Party Masks
// =============================================================================

bitflags::bitflags! {
    /// Party (first-party / third-party) mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartyMask: u8 {
        /// Matches first-party requests
        const FIRST_PARTY = 1 << 0;
        /// Matches third-party requests
        const THIRD_PARTY = 1 << 1;
        /// Matches both
        const ALL = Self::FIRST_PARTY.bits() | Self::THIRD_PARTY.bits();
    }
}

impl PartyMask {
    /// Whether a filter with this party mask applies. Empty means either.
    #[inline]
    pub fn applies_to(&self, third_party: bool) -> bool {
        if self.is_empty() {
            return true;
        }
        if third_party {
            self.contains(Self::THIRD_PARTY)
        } else {
            self.contains(Self::FIRST_PARTY)
        }
    }
}

// =============================================================================
// Filter Records
// =============================================================================

/// Which engine a parsed filter feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Network,
    Cosmetic,
}

/// How the start of a network pattern is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnchorType {
    #[default]
    None,
    /// `|` - start of the URL
    Left,
    /// `||` - start of a hostname label
    Hostname,
}

/// One parsed filter line.
///
/// `hostnames`/`entities` hold the cosmetic scope or the `$domain=` include
/// list of a network filter; the `excluded_*` fields hold `~` negations.
/// Entities are stored without their `.*` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterRecord {
    pub kind: FilterKind,
    pub exception: bool,
    pub important: bool,
    /// `$badfilter`: cancels the identical filter without this option.
    pub badfilter: bool,
    pub hostnames: Vec<String>,
    pub excluded_hostnames: Vec<String>,
    pub entities: Vec<String>,
    pub excluded_entities: Vec<String>,
    /// Network pattern (lowercased, anchors stripped) or CSS selector.
    pub pattern: String,
    pub anchor: AnchorType,
    pub right_anchor: bool,
    pub type_mask: RequestType,
    pub party: PartyMask,
    /// Original line, kept for display and duplicate detection.
    pub raw: String,
}

impl FilterRecord {
    pub fn new(kind: FilterKind, raw: &str) -> Self {
        Self {
            kind,
            exception: false,
            important: false,
            badfilter: false,
            hostnames: Vec::new(),
            excluded_hostnames: Vec::new(),
            entities: Vec::new(),
            excluded_entities: Vec::new(),
            pattern: String::new(),
            anchor: AnchorType::None,
            right_anchor: false,
            type_mask: RequestType::empty(),
            party: PartyMask::empty(),
            raw: raw.to_string(),
        }
    }

    /// True when the filter is scoped by hostnames or entities.
    pub fn has_scope(&self) -> bool {
        !self.hostnames.is_empty()
            || !self.entities.is_empty()
            || !self.excluded_hostnames.is_empty()
            || !self.excluded_entities.is_empty()
    }

    /// The hostname of a plain `||hostname^` network filter.
    pub fn pure_hostname(&self) -> Option<&str> {
        if self.kind != FilterKind::Network || self.anchor != AnchorType::Hostname || self.right_anchor {
            return None;
        }
        let host = self.pattern.strip_suffix('^').unwrap_or(&self.pattern);
        // `||ads.` or `||ad-` are label prefixes, not hostnames
        let bytes = host.as_bytes();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) if first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric() => {}
            _ => return None,
        }
        if !bytes.iter().all(|&b| is_hostname_byte(b)) {
            return None;
        }
        Some(host)
    }
}

#[inline]
pub(crate) fn is_hostname_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_'
}

// =============================================================================
// Request Context
// =============================================================================

/// Context for a request being matched.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Hostname of the top-level document
    pub root_hostname: &'a str,
    /// Registrable domain of the top-level document
    pub root_domain: &'a str,
    /// Hostname of the document issuing the request
    pub page_hostname: &'a str,
    /// Registrable domain of the document issuing the request
    pub page_domain: &'a str,
    /// Full request URL
    pub request_url: &'a str,
    /// Request hostname (extracted from URL)
    pub request_hostname: &'a str,
    /// Request type
    pub request_type: RequestType,
}

impl<'a> RequestContext<'a> {
    /// A request is third-party when its hostname is outside the page's
    /// registrable domain. Requests with no page are first-party.
    pub fn is_third_party(&self) -> bool {
        if self.page_domain.is_empty() {
            return false;
        }
        !is_same_or_subdomain(self.request_hostname, self.page_domain)
    }

    /// Same request with a different type, used for exact-type probes.
    pub fn with_type(&self, request_type: RequestType) -> Self {
        Self { request_type, ..*self }
    }
}

/// Owned request description that a host builds from URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub hostname: String,
    pub page_hostname: String,
    pub page_domain: String,
    pub request_type: RequestType,
}

impl Request {
    /// Build a request from its URL, the URL of the page issuing it and the
    /// browser type name. The page is treated as the root document.
    pub fn new(resolver: &DomainResolver, url: &str, page_url: &str, request_type: &str) -> Self {
        let url = url.trim().to_ascii_lowercase();
        let hostname = extract_host(&url).unwrap_or_default().to_string();
        let page_url = page_url.trim().to_ascii_lowercase();
        let page_hostname = extract_host(&page_url).unwrap_or_default().to_string();
        let page_domain = resolver.domain_from_hostname(&page_hostname);
        Self {
            url,
            hostname,
            page_hostname,
            page_domain,
            request_type: RequestType::from_str(request_type),
        }
    }

    pub fn context(&self) -> RequestContext<'_> {
        RequestContext {
            root_hostname: &self.page_hostname,
            root_domain: &self.page_domain,
            page_hostname: &self.page_hostname,
            page_domain: &self.page_domain,
            request_url: &self.url,
            request_hostname: &self.hostname,
            request_type: self.request_type,
        }
    }
}

// =============================================================================
// Filtering Switches
// =============================================================================

/// Per-page switches that gate every lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilteringSwitches {
    pub net_filtering: bool,
    pub cosmetic_filtering: bool,
}

impl Default for FilteringSwitches {
    fn default() -> Self {
        Self {
            net_filtering: true,
            cosmetic_filtering: true,
        }
    }
}
