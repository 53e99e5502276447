//! Shared key/value machinery for query strings, cookies, and form bodies.
//!
//! Parsing is zero-copy: pairs are spans into the request buffer, decoded
//! in place where the grammar calls for it, then sorted by key so lookups
//! can binary search.

use crate::{
    http::types::Span,
    limits::MAX_KV_PAIRS,
};
use memchr::memchr;
use std::cmp::Ordering;

/// In-place decoder applied to both the key and the value of each pair.
/// Returns the decoded length; `None` means the pair (and the whole
/// parse) is malformed.
pub(crate) type ValueDecoder = fn(&mut [u8]) -> Option<usize>;

/// Identity decoder used for cookies: no transformation, but an empty
/// slice still aborts the parse.
#[inline(always)]
pub(crate) fn identity_decode(bytes: &mut [u8]) -> Option<usize> {
    Some(bytes.len())
}

/// Splits `region` of `buf` into up to [`MAX_KV_PAIRS`] `key=value`
/// pairs separated by `separator`, decoding each side in place.
///
/// Leading spaces and stray separators are skipped before each pair. A
/// pair without `=`, an empty key, or an empty or failed decode abandons
/// the parse entirely and returns no pairs. The surviving pairs are
/// sorted by key so [`lookup`] can binary search them.
pub(crate) fn parse_key_values(
    buf: &mut [u8],
    region: Span,
    separator: u8,
    decode: ValueDecoder,
) -> Vec<(Span, Span)> {
    if region.is_empty() {
        return Vec::new();
    }

    let mut pairs: Vec<(Span, Span)> = Vec::with_capacity(MAX_KV_PAIRS);
    let end = region.end();
    let mut ptr = region.start;

    while pairs.len() < MAX_KV_PAIRS {
        while ptr < end && (buf[ptr] == b' ' || buf[ptr] == separator) {
            ptr += 1;
        }
        if ptr >= end {
            break;
        }

        let key_start = ptr;
        let Some(eq) = memchr(b'=', &buf[ptr..end]) else {
            return Vec::new();
        };
        let value_start = key_start + eq + 1;
        let value_end = match memchr(separator, &buf[value_start..end]) {
            Some(pos) => value_start + pos,
            None => end,
        };

        let key_len = match decode(&mut buf[key_start..key_start + eq]) {
            Some(len) if len > 0 => len,
            _ => return Vec::new(),
        };
        let value_len = match decode(&mut buf[value_start..value_end]) {
            Some(len) if len > 0 => len,
            _ => return Vec::new(),
        };

        pairs.push((
            Span::new(key_start, key_len),
            Span::new(value_start, value_len),
        ));

        if value_end >= end {
            break;
        }
        ptr = value_end + 1;
    }

    let view: &[u8] = buf;
    pairs.sort_by(|a, b| a.0.of(view).cmp(b.0.of(view)));

    pairs
}

// `strncmp(key, stored, key.len())` ordering: the stored key is only
// compared up to the caller's key length, and a stored key that ends
// early sorts below the search key.
#[inline]
fn compare_prefix(key: &[u8], stored: &[u8]) -> Ordering {
    if stored.len() >= key.len() {
        key.cmp(&stored[..key.len()])
    } else {
        key.cmp(stored)
    }
}

/// Binary-searches sorted `pairs` for `key` and returns the value slice.
///
/// Matching uses prefix equality under the caller-supplied key length,
/// so callers must pass the exact key.
#[inline]
pub(crate) fn lookup<'b>(pairs: &[(Span, Span)], base: &'b [u8], key: &[u8]) -> Option<&'b [u8]> {
    if pairs.is_empty() {
        return None;
    }

    pairs
        .binary_search_by(|(stored, _)| compare_prefix(key, stored.of(base)).reverse())
        .ok()
        .map(|index| pairs[index].1.of(base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::bytes::url_decode;
    use crate::tools::*;

    fn parse(input: &str, separator: u8, decode: ValueDecoder) -> (Vec<u8>, Vec<(Span, Span)>) {
        let mut buf = input.as_bytes().to_vec();
        let region = Span::new(0, buf.len());
        let pairs = parse_key_values(&mut buf, region, separator, decode);
        (buf, pairs)
    }

    fn resolved<'b>(buf: &'b [u8], pairs: &[(Span, Span)]) -> Vec<(&'b str, &'b str)> {
        pairs
            .iter()
            .map(|(k, v)| (str_op(k.of(buf)), str_op(v.of(buf))))
            .collect()
    }

    #[test]
    fn basic() {
        let (buf, pairs) = parse("b=2&a=1", b'&', url_decode);

        assert_eq!(resolved(&buf, &pairs), [("a", "1"), ("b", "2")]);
    }

    #[test]
    fn sorted_for_bsearch() {
        let (buf, pairs) = parse("zeta=1&alpha=2&mid=3", b'&', url_decode);

        assert_eq!(
            resolved(&buf, &pairs),
            [("alpha", "2"), ("mid", "3"), ("zeta", "1")]
        );

        assert_eq!(lookup(&pairs, &buf, b"alpha"), Some(b"2" as &[u8]));
        assert_eq!(lookup(&pairs, &buf, b"mid"), Some(b"3" as &[u8]));
        assert_eq!(lookup(&pairs, &buf, b"zeta"), Some(b"1" as &[u8]));
        assert_eq!(lookup(&pairs, &buf, b"none"), None);
        assert_eq!(lookup(&pairs, &buf, b"zzz"), None);
    }

    #[test]
    fn bsearch_matches_linear_scan() {
        let (buf, pairs) = parse("d=4&b=2&e=5&a=1&c=3", b'&', url_decode);

        for key in [b"a", b"b", b"c", b"d", b"e"] {
            let linear = pairs
                .iter()
                .find(|(k, _)| k.of(&buf) == key)
                .map(|(_, v)| v.of(&buf));

            assert_eq!(lookup(&pairs, &buf, key), linear);
        }
    }

    #[test]
    fn decodes_both_sides() {
        let (buf, pairs) = parse("na%6De=jo%68n&q=a+b", b'&', url_decode);

        assert_eq!(resolved(&buf, &pairs), [("name", "john"), ("q", "a b")]);
    }

    #[test]
    fn cookie_separator() {
        let (buf, pairs) = parse("session=abc123; theme=dark; lang=en", b';', identity_decode);

        assert_eq!(
            resolved(&buf, &pairs),
            [("lang", "en"), ("session", "abc123"), ("theme", "dark")]
        );
    }

    #[test]
    fn malformed_aborts_whole_parse() {
        #[rustfmt::skip]
        let cases = [
            "a=1&novalue",    // missing '='
            "a=1&=2",         // empty key
            "a=1&b=",         // empty value
            "flag",           // bare token
            "a=1&b=%00",      // decode failure
        ];

        for input in cases {
            let (_, pairs) = parse(input, b'&', url_decode);
            assert!(pairs.is_empty(), "input: {input:?}");
        }
    }

    #[test]
    fn pair_limit() {
        let query = (0..40).map(|i| format!("k{i:02}=v")).collect::<Vec<_>>().join("&");
        let (_, pairs) = parse(&query, b'&', url_decode);

        assert_eq!(pairs.len(), MAX_KV_PAIRS);
    }

    #[test]
    fn prefix_equality_semantics() {
        let (buf, pairs) = parse("abc=1", b'&', url_decode);

        // A truncated key still matches under strncmp semantics; callers
        // are expected to pass the exact key.
        assert_eq!(lookup(&pairs, &buf, b"abc"), Some(b"1" as &[u8]));
        assert_eq!(lookup(&pairs, &buf, b"ab"), Some(b"1" as &[u8]));
        assert_eq!(lookup(&pairs, &buf, b"abcd"), None);
    }

    #[test]
    fn empty_region() {
        let mut buf = *b"irrelevant";
        let pairs = parse_key_values(&mut buf, Span::EMPTY, b'&', url_decode);
        assert!(pairs.is_empty());
    }
}
