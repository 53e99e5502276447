//! Core HTTP protocol types shared by the parser and the request driver.

// SPAN

/// A region inside a request buffer.
///
/// The parser never copies header or URL bytes out of the connection's
/// read buffer; every parsed field is a `Span` resolved against the
/// buffer it was cut from. An empty span doubles as "header absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Span {
    pub(crate) start: usize,
    pub(crate) len: usize,
}

impl Span {
    pub(crate) const EMPTY: Self = Span { start: 0, len: 0 };

    #[inline(always)]
    pub(crate) const fn new(start: usize, len: usize) -> Self {
        Span { start, len }
    }

    #[inline(always)]
    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub(crate) const fn end(&self) -> usize {
        self.start + self.len
    }

    #[inline(always)]
    pub(crate) fn of<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        &buf[self.start..self.start + self.len]
    }
}

// SOURCE

/// Which buffer a URL-derived span points into.
///
/// The URL normally lives in the connection's read buffer. After an
/// internal rewrite it lives in the per-request scratch buffer instead,
/// and the query-string and fragment spans move with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Read,
    Scratch,
}

// METHOD

/// HTTP request methods understood by the parser.
///
/// Anything else on the wire is answered with `405 Method Not Allowed`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET method - transfer a current representation of the target resource
    /// [[RFC7231, Section 4.3.1](https://tools.ietf.org/html/rfc7231#section-4.3.1)]
    Get,
    /// HEAD method - same as GET but without response body
    /// [[RFC7231, Section 4.3.2](https://tools.ietf.org/html/rfc7231#section-4.3.2)]
    Head,
    /// POST method - perform resource-specific processing on the request payload
    /// [[RFC7231, Section 4.3.3](https://tools.ietf.org/html/rfc7231#section-4.3.3)]
    Post,
}

impl Method {
    // The returned length includes the trailing space, so the caller
    // lands directly on the request path.
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Option<(Self, usize)> {
        match src {
            [b'G', b'E', b'T', b' ', ..] => Some((Method::Get, 4)),
            [b'H', b'E', b'A', b'D', ..] => Some((Method::Head, 5)),
            [b'P', b'O', b'S', b'T', ..] => Some((Method::Post, 5)),
            _ => None,
        }
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 - keep-alive only when the client asks for it
    ///
    /// [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,

    /// HTTP/1.1 - keep-alive by default
    ///
    /// [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
}

// REQUEST FLAGS

/// Per-request flag bits.
///
/// `ALLOW_PROXY_REQS` is an input set by the connection driver before
/// parsing; `URL_REWRITTEN` is an output observed after a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ReqFlags(u16);

impl ReqFlags {
    pub(crate) const EMPTY: ReqFlags = ReqFlags(0);

    pub(crate) const ACCEPT_GZIP: ReqFlags = ReqFlags(1 << 0);
    pub(crate) const ACCEPT_DEFLATE: ReqFlags = ReqFlags(1 << 1);
    pub(crate) const PROXIED: ReqFlags = ReqFlags(1 << 2);
    pub(crate) const ALLOW_PROXY_REQS: ReqFlags = ReqFlags(1 << 3);
    pub(crate) const URL_REWRITTEN: ReqFlags = ReqFlags(1 << 4);
    pub(crate) const IS_HTTP_1_0: ReqFlags = ReqFlags(1 << 5);

    #[inline(always)]
    pub(crate) const fn contains(self, other: ReqFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub(crate) fn insert(&mut self, other: ReqFlags) {
        self.0 |= other.0;
    }

    #[inline(always)]
    pub(crate) fn remove(&mut self, other: ReqFlags) {
        self.0 &= !other.0;
    }
}

// NUMERIC PARSING

#[inline(always)]
pub(crate) fn slice_to_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: u64 = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as u64)?;
    }

    Some(result)
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])+
        $name:ident = ($num:expr, $str:expr, $len:expr);
    )+) => {
        /// HTTP status codes produced by the request-ingestion core.
        ///
        /// Represents the subset of
        /// [RFC 7231](https://tools.ietf.org/html/rfc7231#section-6)
        /// status codes this server emits on its own; handlers return one
        /// of these to pick the response.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])+
            $name = $num,
        )+ }

        impl StatusCode {
            // Minimal status-line + headers + reason-phrase body. The
            // `connection` header reflects the keep-alive decision the
            // driver already made; HTTP/1.0 clients need the keep-alive
            // variant spelled out.
            #[inline]
            pub(crate) const fn default_response(
                &self,
                version: Version,
                keep_alive: bool,
            ) -> &'static [u8] {
                match (self, version, keep_alive) { $(
                    (StatusCode::$name, Version::Http11, true) => concat!(
                        "HTTP/1.1 ", $num, " ", $str, "\r\n",
                        "content-type: text/plain\r\n",
                        "content-length: ", $len, "\r\n",
                        "\r\n",
                        $str
                    ),
                    (StatusCode::$name, Version::Http11, false) => concat!(
                        "HTTP/1.1 ", $num, " ", $str, "\r\n",
                        "content-type: text/plain\r\n",
                        "content-length: ", $len, "\r\n",
                        "connection: close\r\n",
                        "\r\n",
                        $str
                    ),
                    (StatusCode::$name, Version::Http10, true) => concat!(
                        "HTTP/1.0 ", $num, " ", $str, "\r\n",
                        "content-type: text/plain\r\n",
                        "content-length: ", $len, "\r\n",
                        "connection: keep-alive\r\n",
                        "\r\n",
                        $str
                    ),
                    (StatusCode::$name, Version::Http10, false) => concat!(
                        "HTTP/1.0 ", $num, " ", $str, "\r\n",
                        "content-type: text/plain\r\n",
                        "content-length: ", $len, "\r\n",
                        "connection: close\r\n",
                        "\r\n",
                        $str
                    ),
                )+ }.as_bytes()
            }
        }
    }
}

set_status_codes! {
    /// [[RFC9110, Section 15.3.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.1)]
    Ok = (200, "OK", "2");

    /// [[RFC9110, Section 15.5.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.1)]
    BadRequest = (400, "Bad Request", "11");
    /// [[RFC9110, Section 15.5.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.2)]
    Unauthorized = (401, "Unauthorized", "12");
    /// [[RFC9110, Section 15.5.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.5)]
    NotFound = (404, "Not Found", "9");
    /// [[RFC9110, Section 15.5.6](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.6)]
    MethodNotAllowed = (405, "Method Not Allowed", "18");
    /// [[RFC9110, Section 15.5.9](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.9)]
    RequestTimeout = (408, "Request Timeout", "15");
    /// [[RFC9110, Section 15.5.14](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.14)]
    PayloadTooLarge = (413, "Payload Too Large", "17");

    /// [[RFC9110, Section 15.6.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.1)]
    InternalServerError = (500, "Internal Server Error", "21");
    /// [[RFC9110, Section 15.6.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.2)]
    NotImplemented = (501, "Not Implemented", "15");
    /// [[RFC9110, Section 15.6.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.4)]
    ServiceUnavailable = (503, "Service Unavailable", "19");
}
