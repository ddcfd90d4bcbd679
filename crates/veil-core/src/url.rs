//! Fast URL parsing utilities for the hot path
//!
//! These functions avoid allocations and work directly on string slices.

use crate::hash::hash_token_bytes;

// =============================================================================
// Scheme
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    // Find ':'
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    // Check for "://"
    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/' {
        return Some(colon_pos + 3);
    }

    None
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Fast host extraction without allocations.
/// Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' || b == b'?' || b == b'#' {
            break;
        }
    }

    // IPv6 literal keeps its brackets
    if bytes.get(host_start) == Some(&b'[') {
        let close = bytes[host_start..].iter().position(|&b| b == b']')?;
        return Some((host_start, host_start + close + 1));
    }

    // Find host end
    let host_end = bytes[host_start..]
        .iter()
        .position(|&b| b == b'/' || b == b'?' || b == b'#' || b == b':')
        .map_or(bytes.len(), |i| host_start + i);

    Some((host_start, host_end))
}

// =============================================================================
// URL Tokenization
// =============================================================================

pub const MIN_TOKEN_LEN: usize = 3;

/// Tokenize a lowercased URL for filter bucket lookup.
///
/// Every maximal alphanumeric run of at least [`MIN_TOKEN_LEN`] bytes is
/// hashed, scheme included. Duplicate hashes are dropped.
pub fn tokenize_url(url: &str, tokens: &mut Vec<u32>) {
    tokens.clear();
    let bytes = url.as_bytes();
    let mut token_start = None;

    for i in 0..=bytes.len() {
        let is_alpha = i < bytes.len() && bytes[i].is_ascii_alphanumeric();

        if is_alpha {
            if token_start.is_none() {
                token_start = Some(i);
            }
        } else if let Some(ts) = token_start.take() {
            if i - ts >= MIN_TOKEN_LEN {
                let hash = hash_token_bytes(&bytes[ts..i]);
                if !tokens.contains(&hash) {
                    tokens.push(hash);
                }
            }
        }
    }
}

// =============================================================================
// Boundary Check
// =============================================================================

/// Check if a character is a separator (`^` in filter syntax).
/// `^` matches any non-alphanumeric character except `_ - . %`.
#[inline]
pub fn is_boundary_char(c: u8) -> bool {
    !(c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b'.' || c == b'%')
}

/// Check if position in string is at a boundary. End of input counts.
#[inline]
pub fn is_at_boundary(s: &[u8], pos: usize) -> bool {
    match s.get(pos) {
        Some(&c) => is_boundary_char(c),
        None => true,
    }
}
