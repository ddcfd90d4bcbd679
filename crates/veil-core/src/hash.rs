//! Hash functions for Veil
//!
//! Two unrelated hashes live here:
//!
//! - Murmur3 32-bit for URL tokens, which key the network filter buckets.
//! - A sampled FNV-1a mix for cosmetic bucket keys. It reads at most eight
//!   characters of the key so it stays cheap on long selectors. It only
//!   narrows candidates: every bucket entry is compared against the real key.
//!
//! # Sentinel Handling
//!
//! Token hash `0` is reserved; `hash_token` never returns it.

/// Murmur3 32-bit hash implementation.
/// Optimized for short strings (typical token lengths).
#[inline]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let len = data.len();
    let mut h = seed;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);

        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    // Process remaining bytes
    let tail = chunks.remainder();
    let mut k: u32 = 0;
    if tail.len() >= 3 {
        k ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k ^= tail[0] as u32;
        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);
        h ^= k;
    }

    // Finalization
    h ^= len as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;

    h
}

const TOKEN_SEED: u32 = 0x811c9dc5;

/// Compute a 32-bit hash for tokens.
/// Ensures result is never 0 (sentinel value).
#[inline]
pub fn hash_token(token: &str) -> u32 {
    hash_token_bytes(token.as_bytes())
}

/// Same as [`hash_token`] over raw bytes; callers pass lowercased input.
#[inline]
pub fn hash_token_bytes(token: &[u8]) -> u32 {
    let h = murmur3_32(token, TOKEN_SEED);
    if h == 0 {
        1
    } else {
        h
    }
}

// =============================================================================
// Cosmetic Bucket Keys
// =============================================================================

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;

/// Bucket kind for hide filters.
pub const HIDE_KIND: u8 = b'#';
/// Bucket kind for exception (don't hide) filters.
pub const DONTHIDE_KIND: u8 = b'@';

/// Key of a cosmetic selector bucket: filter type plus a 16-bit hash of
/// the scope key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub kind: u8,
    pub hash: u16,
}

impl BucketKey {
    #[inline]
    pub fn new(kind: u8, key: &str) -> Self {
        Self {
            kind,
            hash: (sampled_fnv(key.as_bytes()) & 0xFFFF) as u16,
        }
    }
}

/// FNV-1a over eight sampled positions of `key`, with the FNV prime
/// multiplication expanded into shifts. Positions past the end read as 0.
#[inline]
pub fn sampled_fnv(key: &[u8]) -> u32 {
    let i1 = key.len();
    let i2 = i1 >> 1;
    let i4 = i1 >> 2;
    let i8 = i1 >> 3;
    let offsets = [0, i8, i4, i4 + i8, i2, i2 + i8, i2 + i4, i1.saturating_sub(1)];

    let mut h = FNV_OFFSET_BASIS;
    for off in offsets {
        h ^= key.get(off).copied().unwrap_or(0) as u32;
        h = h
            .wrapping_add(h << 1)
            .wrapping_add(h << 4)
            .wrapping_add(h << 7)
            .wrapping_add(h << 8)
            .wrapping_add(h << 24);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_murmur3_consistent() {
        let h1 = murmur3_32(b"example.com", 0);
        let h2 = murmur3_32(b"example.com", 0);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_murmur3_different_strings() {
        let h1 = murmur3_32(b"example.com", 0);
        let h2 = murmur3_32(b"example.org", 0);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_murmur3_different_seeds() {
        let h1 = murmur3_32(b"example.com", 0);
        let h2 = murmur3_32(b"example.com", 1);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_hash_token_never_zero() {
        assert_ne!(hash_token("script"), 0);
        assert_ne!(hash_token(""), 0);
        assert_eq!(hash_token("ads"), hash_token_bytes(b"ads"));
    }

    #[test]
    fn test_bucket_key_kinds_differ() {
        let hide = BucketKey::new(HIDE_KIND, "example.com");
        let donthide = BucketKey::new(DONTHIDE_KIND, "example.com");
        assert_eq!(hide.hash, donthide.hash);
        assert_ne!(hide, donthide);
    }

    #[test]
    fn test_sampled_fnv_empty_and_short() {
        assert_eq!(sampled_fnv(b""), sampled_fnv(b""));
        assert_ne!(sampled_fnv(b"a"), sampled_fnv(b"b"));
    }

    #[test]
    fn test_bucket_load_factor_stays_small() {
        // xorshift keeps the fixture deterministic
        let mut state: u32 = 0x2545_f491;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-_";

        let mut buckets: HashMap<BucketKey, usize> = HashMap::new();
        let total = 20_000;
        for i in 0..total {
            let len = 4 + (next() % 18) as usize;
            let mut key: String = (0..len)
                .map(|_| ALPHABET[(next() as usize) % ALPHABET.len()] as char)
                .collect();
            match i % 3 {
                0 => key.insert(0, '.'),
                1 => key.insert(0, '#'),
                _ => key.push_str(".com"),
            }
            *buckets.entry(BucketKey::new(HIDE_KIND, &key)).or_default() += 1;
        }

        let average = total as f64 / buckets.len() as f64;
        assert!(average < 4.0, "average bucket size too high: {average:.2}");
    }
}
