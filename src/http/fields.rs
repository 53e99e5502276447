//! Decoders for the individual request headers the core understands.
//!
//! These run lazily: the request driver only calls the ones the matched
//! route asked for.

use crate::http::types::slice_to_u64;
use memchr::memchr;
use std::time::UNIX_EPOCH;

/// Decoded `Range` header endpoints.
///
/// `from == None` means the header was present but unparseable; the
/// handler decides whether that is `416` or "serve everything".
/// `to == None` with a valid `from` is an open-ended `bytes=N-` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRange {
    pub from: Option<u64>,
    pub to: Option<u64>,
}

impl RequestRange {
    const INVALID: Self = RequestRange { from: None, to: None };
}

/// Parses an RFC 1123 `If-Modified-Since` value into unix seconds.
/// Anything `httpdate` rejects (including trailing bytes) is ignored.
#[inline]
pub(crate) fn parse_if_modified_since(value: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(value).ok()?;
    let time = httpdate::parse_http_date(text).ok()?;

    Some(time.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64)
}

/// Parses a `Range` header value.
///
/// Only the `bytes=` unit with a single range is supported: `from-to`,
/// `-to` (suffix, from pinned to 0) and `from-` (open-ended). Any other
/// shape collapses to the invalid sentinel.
pub(crate) fn parse_range(value: &[u8]) -> RequestRange {
    const PREFIX: &[u8] = b"bytes=";

    if value.len() <= PREFIX.len() || &value[..PREFIX.len()] != PREFIX {
        return RequestRange::INVALID;
    }

    let range = &value[PREFIX.len()..];
    let Some(dash) = memchr(b'-', range) else {
        return RequestRange::INVALID;
    };

    let (head, tail) = (&range[..dash], &range[dash + 1..]);

    match (head.is_empty(), tail.is_empty()) {
        // bytes=from-to
        (false, false) => match (slice_to_u64(head), slice_to_u64(tail)) {
            (Some(from), Some(to)) => RequestRange {
                from: Some(from),
                to: Some(to),
            },
            _ => RequestRange::INVALID,
        },
        // bytes=-to
        (true, false) => match slice_to_u64(tail) {
            Some(to) => RequestRange {
                from: Some(0),
                to: Some(to),
            },
            None => RequestRange::INVALID,
        },
        // bytes=from-
        (false, true) => match slice_to_u64(head) {
            Some(from) => RequestRange {
                from: Some(from),
                to: None,
            },
            None => RequestRange::INVALID,
        },
        (true, true) => RequestRange::INVALID,
    }
}

/// Scans a comma-separated `Accept-Encoding` value; returns
/// `(gzip, deflate)`.
pub(crate) fn parse_accept_encoding(value: &[u8]) -> (bool, bool) {
    let mut gzip = false;
    let mut deflate = false;

    for token in value.split(|&b| b == b',') {
        let token = match token.iter().position(|&b| b != b' ') {
            Some(skip) => &token[skip..],
            None => continue,
        };

        if token.starts_with(b"gzip") {
            gzip = true;
        } else if token.starts_with(b"defl") {
            deflate = true;
        }
    }

    (gzip, deflate)
}

/// The only POST content type the form decoder accepts.
pub(crate) const FORM_URLENCODED: &[u8] = b"application/x-www-form-urlencoded";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_modified_since() {
        // 2015-10-21 07:28:00 UTC
        assert_eq!(
            parse_if_modified_since(b"Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(1_445_412_480)
        );
        assert_eq!(
            parse_if_modified_since(b"Thu, 01 Jan 1970 00:00:00 GMT"),
            Some(0)
        );

        #[rustfmt::skip]
        let rejected: [&[u8]; 5] = [
            b"Wed, 21 Oct 2015 07:28:00 GMT trailing",
            b"21 Oct 2015",
            b"not a date",
            b"",
            b"\xff\xfe",
        ];

        for value in rejected {
            assert_eq!(parse_if_modified_since(value), None);
        }
    }

    #[test]
    fn range() {
        #[rustfmt::skip]
        let cases: [(&[u8], (Option<u64>, Option<u64>)); 10] = [
            (b"bytes=100-199",  (Some(100), Some(199))),
            (b"bytes=0-0",      (Some(0),   Some(0))),
            (b"bytes=-50",      (Some(0),   Some(50))),
            (b"bytes=500-",     (Some(500), None)),

            (b"foo",            (None, None)),
            (b"bytes=",         (None, None)),
            (b"bytes=-",        (None, None)),
            (b"bytes=abc-def",  (None, None)),
            (b"bytes=1-2-3",    (None, None)),
            (b"items=0-10",     (None, None)),
        ];

        for (value, (from, to)) in cases {
            let range = parse_range(value);
            assert_eq!((range.from, range.to), (from, to), "value: {value:?}");
        }
    }

    #[test]
    fn accept_encoding() {
        #[rustfmt::skip]
        let cases: [(&[u8], (bool, bool)); 8] = [
            (b"gzip",                      (true,  false)),
            (b"deflate",                   (false, true)),
            (b"gzip, deflate",             (true,  true)),
            (b"deflate, gzip",             (true,  true)),
            (b"br, gzip;q=0.8",            (true,  false)),
            (b"identity",                  (false, false)),
            (b"",                          (false, false)),
            (b"gzipped-nonsense",          (true,  false)),
        ];

        for (value, expected) in cases {
            assert_eq!(parse_accept_encoding(value), expected, "value: {value:?}");
        }
    }
}
