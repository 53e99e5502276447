//! Single-pass HTTP/1.x request parsing.
//!
//! The parser walks the connection's read buffer exactly once: request
//! line, header block, then (for POST) the buffered body. Known headers
//! are recognized by a four-byte prefix dispatch and recorded as spans;
//! nothing is copied and the expensive field decoders only run later if
//! the matched route asks for them.

use crate::{
    errors::ErrorKind,
    http::{
        bytes, fields, kv,
        proxy::{self, ProxyHeader, ProxyInfo},
        types::{slice_to_u64, Method, ReqFlags, Source, Span, Version},
    },
    limits::ReqLimits,
    routing::{Route, RouteFlags},
    server::connection::HttpConnection,
};
use memchr::{memchr, memrchr};
use std::net::SocketAddr;

// READ BUFFER

/// The connection's one read buffer. Reused across keep-alive requests;
/// `len` tracks how much of it currently holds socket bytes, which may
/// already include the head of the next pipelined request.
#[derive(Debug)]
pub(crate) struct ReadBuf {
    pub(crate) buf: Box<[u8]>,
    pub(crate) len: usize,
}

impl ReadBuf {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        ReadBuf {
            buf: vec![0; limits.buffer_size].into_boxed_slice(),
            len: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut parser = Self::new(limits);
        let value = value.as_ref();

        parser.buf[..value.len()].copy_from_slice(value);
        parser.len = value.len();
        parser
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline(always)]
    pub(crate) fn filled(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

// PARSE HELPER

/// Transient per-request parse state: spans of the known headers, the
/// pipelining handoff, and the rewrite scratch space.
///
/// Every span is either empty (header absent) or points inside the
/// buffer named by `url_source` / the read buffer.
#[derive(Debug)]
pub(crate) struct ParseHelper {
    /// Offset just past the current request's header terminator when the
    /// buffer still holds pipelined bytes.
    pub(crate) next_request: Option<usize>,

    pub(crate) accept_encoding: Span,
    pub(crate) if_modified_since: Span,
    pub(crate) range: Span,
    pub(crate) cookie: Span,

    pub(crate) query_string: Span,
    pub(crate) fragment: Span,
    pub(crate) content_length: Span,
    pub(crate) post_data: Span,

    pub(crate) content_type: Span,
    pub(crate) authorization: Span,

    pub(crate) urls_rewritten: u8,
    /// Lowercased first letter of the `Connection` header value
    /// (`b'k'` for keep-alive, `b'c'` for close, `0` when absent).
    pub(crate) connection: u8,

    /// Which buffer the URL, query string, and fragment spans point
    /// into; flips to `Scratch` after an internal rewrite.
    pub(crate) url_source: Source,
    pub(crate) scratch: Vec<u8>,
}

impl ParseHelper {
    #[inline]
    pub(crate) fn new() -> Self {
        ParseHelper {
            next_request: None,
            accept_encoding: Span::EMPTY,
            if_modified_since: Span::EMPTY,
            range: Span::EMPTY,
            cookie: Span::EMPTY,
            query_string: Span::EMPTY,
            fragment: Span::EMPTY,
            content_length: Span::EMPTY,
            post_data: Span::EMPTY,
            content_type: Span::EMPTY,
            authorization: Span::EMPTY,
            urls_rewritten: 0,
            connection: 0,
            url_source: Source::Read,
            scratch: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self, next_request: Option<usize>) {
        let scratch = std::mem::take(&mut self.scratch);
        *self = ParseHelper::new();
        self.scratch = scratch;
        self.scratch.clear();
        self.next_request = next_request;
    }
}

// REQUEST

/// A fully parsed request, spans resolved lazily against the buffers.
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) method: Method,
    pub(crate) flags: ReqFlags,
    pub(crate) url: Span,
    pub(crate) original_url: Span,
    pub(crate) if_modified_since: Option<i64>,
    pub(crate) range: Option<fields::RequestRange>,
    pub(crate) query_params: Vec<(Span, Span)>,
    pub(crate) post_params: Vec<(Span, Span)>,
    pub(crate) cookies: Vec<(Span, Span)>,
    pub(crate) proxy: Option<ProxyInfo>,
}

impl Request {
    #[inline]
    pub(crate) fn new() -> Self {
        Request {
            method: Method::Get,
            flags: ReqFlags::EMPTY,
            url: Span::EMPTY,
            original_url: Span::EMPTY,
            if_modified_since: None,
            range: None,
            query_params: Vec::new(),
            post_params: Vec::new(),
            cookies: Vec::new(),
            proxy: None,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self, allow_proxy: bool) {
        self.method = Method::Get;
        self.flags = ReqFlags::EMPTY;
        if allow_proxy {
            self.flags.insert(ReqFlags::ALLOW_PROXY_REQS);
        }
        self.url = Span::EMPTY;
        self.original_url = Span::EMPTY;
        self.if_modified_since = None;
        self.range = None;
        self.query_params.clear();
        self.post_params.clear();
        self.cookies.clear();
        self.proxy = None;
    }

    #[inline(always)]
    pub(crate) fn version(&self) -> Version {
        if self.flags.contains(ReqFlags::IS_HTTP_1_0) {
            Version::Http10
        } else {
            Version::Http11
        }
    }
}

// FRAGMENT / QUERY SPLIT

/// Splits `#fragment` and `?query` off the URL target, shrinking the
/// URL span in place. Also re-run on the rewritten URL after a handler
/// asked for re-dispatch.
pub(crate) fn split_fragment_and_query(
    buf: &[u8],
    url: &mut Span,
    query: &mut Span,
    fragment: &mut Span,
) {
    *query = Span::EMPTY;
    *fragment = Span::EMPTY;

    let target_end = url.end();

    // Fragments are usually short, search backwards
    let hash = memrchr(b'#', url.of(buf)).map(|pos| url.start + pos);
    if let Some(hash) = hash {
        *fragment = Span::new(hash + 1, target_end - hash - 1);
        url.len -= fragment.len + 1;
    }

    // Query strings are often longer than the path, search forwards
    if let Some(question) = memchr(b'?', &buf[url.start..url.start + url.len]) {
        let question = url.start + question;
        let stop = hash.unwrap_or(target_end);
        *query = Span::new(question + 1, stop - question - 1);
        url.len -= query.len + 1;
    }
}

// HEADER DISPATCH

#[derive(Debug, Clone, Copy)]
enum Known {
    AcceptEncoding,
    ContentType,
    ContentLength,
    Authorization,
    Connection,
    Cookie,
    IfModifiedSince,
    Range,
}

impl Known {
    // Bytes to skip from the dispatch position to reach the `": "`:
    // the part of the canonical name not yet consumed by a re-dispatch.
    #[inline(always)]
    const fn name_len(self) -> usize {
        match self {
            Known::AcceptEncoding => "-Encoding".len(),
            Known::ContentType => "-Type".len(),
            Known::ContentLength => "-Length".len(),
            Known::Authorization => "Authorization".len(),
            Known::Connection => "Connection".len(),
            Known::Cookie => "Cookie".len(),
            Known::IfModifiedSince => "If-Modified-Since".len(),
            Known::Range => "Range".len(),
        }
    }
}

enum HeaderMatch {
    Value(Span),
    Skip,
    Overrun,
}

// PARSING

impl HttpConnection {
    /// Parses the assembled request: optional PROXY preamble, request
    /// line, header block, in-place URL decode, keep-alive policy, and
    /// the buffered POST body.
    pub(crate) fn parse_request(&mut self) -> Result<(), ErrorKind> {
        let mut pos = 0;

        if self.request.flags.contains(ReqFlags::ALLOW_PROXY_REQS) {
            match proxy::parse_proxy_protocol(self.parser.filled()) {
                Some(ProxyHeader::Absent) => {}
                Some(ProxyHeader::Present { info, consumed }) => {
                    self.request.proxy = Some(info);
                    self.request.flags.insert(ReqFlags::PROXIED);
                    pos = consumed;
                }
                None => return Err(ErrorKind::InvalidProxyHeader),
            }
        }

        pos = bytes::ignore_leading_whitespace(self.parser.filled(), pos);

        let (method, advance) = match Method::from_bytes(&self.parser.filled()[pos..]) {
            Some(parsed) => parsed,
            None if pos >= self.parser.len => return Err(ErrorKind::InvalidRequestLine),
            None => return Err(ErrorKind::MethodNotAllowed),
        };
        self.request.method = method;
        pos += advance;

        pos = self.identify_http_path(pos)?;
        self.parse_headers(pos)?;

        let url = self.request.url;
        let decoded_len = bytes::url_decode(&mut self.parser.buf[url.start..url.end()])
            .ok_or(ErrorKind::InvalidUrlEncoding)?;
        self.request.url.len = decoded_len;
        self.request.original_url.len = decoded_len;

        self.compute_keep_alive();

        if self.request.method == Method::Post {
            self.read_post_data()?;
        }

        Ok(())
    }

    /// Identifies the path and HTTP version on the request line and
    /// splits off fragment and query string. Returns the offset just
    /// past the terminating CR.
    pub(crate) fn identify_http_path(&mut self, pos: usize) -> Result<usize, ErrorKind> {
        const MINIMAL_REQUEST_LINE: usize = "/ HTTP/1.0".len();
        // The version token occupies the 8 bytes before the CR, with
        // one separating space: " HTTP/X.Y"
        const VERSION_AND_SPACE: usize = " HTTP/X.Y".len();

        let filled = self.parser.filled();
        let end_of_line = memchr(b'\r', &filled[pos..])
            .map(|cr| pos + cr)
            .ok_or(ErrorKind::InvalidRequestLine)?;

        if end_of_line - pos < MINIMAL_REQUEST_LINE {
            return Err(ErrorKind::InvalidRequestLine);
        }

        // Assume HTTP/X.Y and check the anchor bytes only
        if filled[end_of_line - 8] != b'H' || filled[end_of_line - 3] != b'1' {
            return Err(ErrorKind::InvalidRequestLine);
        }
        if filled[end_of_line - 1] == b'0' {
            self.request.flags.insert(ReqFlags::IS_HTTP_1_0);
        }

        if filled[pos] != b'/' {
            return Err(ErrorKind::InvalidRequestLine);
        }

        let mut url = Span::new(pos, end_of_line - VERSION_AND_SPACE - pos);
        split_fragment_and_query(
            filled,
            &mut url,
            &mut self.helper.query_string,
            &mut self.helper.fragment,
        );

        self.request.url = url;
        self.request.original_url = url;

        Ok(end_of_line + 1)
    }

    /// Walks header lines until the blank line. Known headers are
    /// dispatched on their first four bytes; everything else is skipped
    /// to the next LF. When more buffered bytes follow the blank line,
    /// `next_request` records where they start.
    pub(crate) fn parse_headers(&mut self, start: usize) -> Result<(), ErrorKind> {
        let end = self.parser.len;
        let mut p = start;

        'lines: while p + 4 < end {
            if &self.parser.buf[p..p + 2] == b"\r\n" {
                self.helper.next_request = Some(p + 2);
                return Ok(());
            }

            let mut q = p;
            let matched = loop {
                match &self.parser.buf[q..q + 4] {
                    // Re-dispatch after the shared prefixes
                    b"Acce" => {
                        q += "Accept".len();
                        if q + 4 >= end {
                            return Ok(());
                        }
                    }
                    b"Cont" => {
                        q += "Content".len();
                        if q + 4 >= end {
                            return Ok(());
                        }
                    }

                    b"-Enc" => break Some(Known::AcceptEncoding),
                    b"-Typ" => break Some(Known::ContentType),
                    b"-Len" => break Some(Known::ContentLength),
                    b"Auth" => break Some(Known::Authorization),
                    b"Conn" => break Some(Known::Connection),
                    b"Cook" => break Some(Known::Cookie),
                    b"If-M" => break Some(Known::IfModifiedSince),
                    b"Rang" => break Some(Known::Range),
                    _ => break None,
                }
            };

            if let Some(known) = matched {
                match self.match_header_value(q, known.name_len()) {
                    HeaderMatch::Value(value) => {
                        self.store_header(known, value);
                        p = value.end() + 2;
                        continue 'lines;
                    }
                    HeaderMatch::Skip => {}
                    HeaderMatch::Overrun => return Err(ErrorKind::InvalidHeader),
                }
            }

            // Unknown or malformed line: scan to the next LF
            match memchr(b'\n', &self.parser.buf[p..end]) {
                Some(lf) => p = p + lf + 1,
                None => break,
            }
        }

        Ok(())
    }

    // After the header name: require `": "`, then the value runs to the
    // next CR, which must be followed by LF.
    fn match_header_value(&self, name_start: usize, name_len: usize) -> HeaderMatch {
        let end = self.parser.len;
        let p = name_start + name_len;

        if p >= end {
            return HeaderMatch::Overrun;
        }
        if p + 2 > end || &self.parser.buf[p..p + 2] != b": " {
            return HeaderMatch::Skip;
        }

        let value_start = p + 2;
        let Some(cr) = memchr(b'\r', &self.parser.buf[value_start..end]) else {
            return HeaderMatch::Skip;
        };
        let cr = value_start + cr;
        if cr + 1 >= end || self.parser.buf[cr + 1] != b'\n' {
            return HeaderMatch::Skip;
        }

        HeaderMatch::Value(Span::new(value_start, cr - value_start))
    }

    fn store_header(&mut self, known: Known, value: Span) {
        let helper = &mut self.helper;

        match known {
            Known::AcceptEncoding => helper.accept_encoding = value,
            Known::ContentType => helper.content_type = value,
            Known::ContentLength => helper.content_length = value,
            Known::Authorization => helper.authorization = value,
            Known::Connection => {
                if !value.is_empty() {
                    helper.connection = self.parser.buf[value.start] | 0x20;
                }
            }
            Known::Cookie => helper.cookie = value,
            Known::IfModifiedSince => helper.if_modified_since = value,
            Known::Range => helper.range = value,
        }
    }

    /// HTTP/1.0 requires the client to opt in to keep-alive; HTTP/1.1
    /// keeps the connection unless the client opts out.
    pub(crate) fn compute_keep_alive(&mut self) {
        self.keep_alive = if self.request.flags.contains(ReqFlags::IS_HTTP_1_0) {
            self.helper.connection == b'k'
        } else {
            self.helper.connection != b'c'
        };
    }

    /// Locates the POST body in the already-read buffer. Streaming
    /// bodies and bodies interleaved with a pipelined request are not
    /// supported and answer `501`.
    pub(crate) fn read_post_data(&mut self) -> Result<(), ErrorKind> {
        let next = self.helper.next_request.ok_or(ErrorKind::BodyMissing)?;

        if self.helper.content_length.is_empty() {
            return Err(ErrorKind::MissingContentLength);
        }
        let declared = slice_to_u64(self.helper.content_length.of(self.parser.filled()))
            .ok_or(ErrorKind::InvalidContentLength)?;
        if declared > self.parser.capacity() as u64 {
            return Err(ErrorKind::BodyTooLarge);
        }

        let declared = declared as usize;
        let have = self.parser.len - next;

        if have != declared {
            return Err(ErrorKind::BodyNotBuffered);
        }

        self.helper.post_data = Span::new(next, declared);
        self.helper.next_request = Some(next + declared);
        Ok(())
    }

    /// Resolves the current URL against whichever buffer owns it.
    pub(crate) fn url_slice(&self) -> &[u8] {
        match self.helper.url_source {
            Source::Read => self.request.url.of(&self.parser.buf),
            Source::Scratch => self.request.url.of(&self.helper.scratch),
        }
    }

    /// Performs the route-gated work between lookup and handler: prefix
    /// strip, lazy field decoding, authorization, slash trimming.
    pub(crate) fn prepare_for_response(&mut self, route: &Route) -> Result<(), ErrorKind> {
        self.request.url.start += route.prefix.len();
        self.request.url.len -= route.prefix.len();

        if route.flags.contains(RouteFlags::PARSE_QUERY_STRING) {
            let region = self.helper.query_string;
            self.request.query_params = match self.helper.url_source {
                Source::Read => {
                    kv::parse_key_values(&mut self.parser.buf, region, b'&', bytes::url_decode)
                }
                Source::Scratch => {
                    kv::parse_key_values(&mut self.helper.scratch, region, b'&', bytes::url_decode)
                }
            };
        }

        if route.flags.contains(RouteFlags::PARSE_IF_MODIFIED_SINCE) {
            let value = self.helper.if_modified_since;
            self.request.if_modified_since =
                fields::parse_if_modified_since(value.of(self.parser.filled()));
        }

        if route.flags.contains(RouteFlags::PARSE_RANGE) && !self.helper.range.is_empty() {
            let value = self.helper.range;
            self.request.range = Some(fields::parse_range(value.of(self.parser.filled())));
        }

        if route.flags.contains(RouteFlags::PARSE_ACCEPT_ENCODING) {
            let value = self.helper.accept_encoding;
            let (gzip, deflate) = fields::parse_accept_encoding(value.of(self.parser.filled()));
            if gzip {
                self.request.flags.insert(ReqFlags::ACCEPT_GZIP);
            }
            if deflate {
                self.request.flags.insert(ReqFlags::ACCEPT_DEFLATE);
            }
        }

        if route.flags.contains(RouteFlags::PARSE_COOKIES) {
            let region = self.helper.cookie;
            self.request.cookies =
                kv::parse_key_values(&mut self.parser.buf, region, b';', kv::identity_decode);
        }

        if self.request.method == Method::Post {
            if !route.flags.contains(RouteFlags::PARSE_POST_DATA) {
                return Err(ErrorKind::MethodNotAllowed);
            }

            let content_type = self.helper.content_type;
            if content_type.of(self.parser.filled()) == fields::FORM_URLENCODED {
                let region = self.helper.post_data;
                self.request.post_params =
                    kv::parse_key_values(&mut self.parser.buf, region, b'&', bytes::url_decode);
            }
        }

        if route.flags.contains(RouteFlags::MUST_AUTHORIZE) {
            let authorized = route.auth.as_ref().is_some_and(|policy| {
                let credentials = (!self.helper.authorization.is_empty())
                    .then(|| self.helper.authorization.of(self.parser.filled()));
                policy.authorizer.authorize(credentials, &policy.realm)
            });

            if !authorized {
                return Err(ErrorKind::NotAuthorized);
            }
        }

        if route.flags.contains(RouteFlags::REMOVE_LEADING_SLASH) {
            while self.request.url.len > 0 && self.url_slice()[0] == b'/' {
                self.request.url.start += 1;
                self.request.url.len -= 1;
            }
        }

        Ok(())
    }
}

// REQUEST CONTEXT

/// The view of a parsed request handed to route handlers.
///
/// All accessors borrow straight from the connection's buffers; nothing
/// is copied. A rewrite-capable handler calls [`rewrite_url`
/// ](RequestCtx::rewrite_url) and returns; the driver re-dispatches the
/// new URL through the route table (bounded, to keep handler bugs from
/// looping forever).
pub struct RequestCtx<'r> {
    pub(crate) request: &'r Request,
    pub(crate) read_buf: &'r [u8],
    pub(crate) scratch: &'r [u8],
    pub(crate) url_source: Source,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) rewrite: Option<String>,
}

impl<'r> RequestCtx<'r> {
    #[inline(always)]
    fn url_base(&self) -> &'r [u8] {
        match self.url_source {
            Source::Read => self.read_buf,
            Source::Scratch => self.scratch,
        }
    }

    #[inline(always)]
    pub fn method(&self) -> Method {
        self.request.method
    }

    #[inline(always)]
    pub fn version(&self) -> Version {
        self.request.version()
    }

    /// The percent-decoded URL path, trimmed per the matched route
    /// (prefix stripped, optional leading slashes removed).
    #[inline(always)]
    pub fn url(&self) -> &'r [u8] {
        self.request.url.of(self.url_base())
    }

    /// The URL as it looked right after parsing, before route trimming
    /// and rewrites; intended for logging.
    #[inline(always)]
    pub fn original_url(&self) -> &'r [u8] {
        self.request.original_url.of(self.read_buf)
    }

    #[inline(always)]
    pub fn accepts_gzip(&self) -> bool {
        self.request.flags.contains(ReqFlags::ACCEPT_GZIP)
    }

    #[inline(always)]
    pub fn accepts_deflate(&self) -> bool {
        self.request.flags.contains(ReqFlags::ACCEPT_DEFLATE)
    }

    /// Whether the connection arrived through a PROXY-protocol preamble.
    #[inline(always)]
    pub fn proxied(&self) -> bool {
        self.request.flags.contains(ReqFlags::PROXIED)
    }

    #[inline(always)]
    pub fn proxy(&self) -> Option<&ProxyInfo> {
        self.request.proxy.as_ref()
    }

    /// `If-Modified-Since` as unix seconds, when the route asked for it
    /// and the client sent a well-formed date.
    #[inline(always)]
    pub fn if_modified_since(&self) -> Option<i64> {
        self.request.if_modified_since
    }

    #[inline(always)]
    pub fn range(&self) -> Option<fields::RequestRange> {
        self.request.range
    }

    /// Looks up a query parameter by exact key.
    #[inline(always)]
    pub fn query_param(&self, key: &[u8]) -> Option<&'r [u8]> {
        kv::lookup(&self.request.query_params, self.url_base(), key)
    }

    /// Looks up a decoded form-body parameter by exact key.
    #[inline(always)]
    pub fn post_param(&self, key: &[u8]) -> Option<&'r [u8]> {
        kv::lookup(&self.request.post_params, self.read_buf, key)
    }

    /// Looks up a cookie by exact name.
    #[inline(always)]
    pub fn cookie(&self, key: &[u8]) -> Option<&'r [u8]> {
        kv::lookup(&self.request.cookies, self.read_buf, key)
    }

    /// The client's address: the PROXY-protocol source when present,
    /// otherwise the socket peer. `None` when a forwarding proxy
    /// declared the peer unspecified.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        if self.proxied() {
            self.request.proxy.and_then(|info| info.from)
        } else {
            self.peer
        }
    }

    /// Replaces the URL and asks the driver to dispatch it again. Only
    /// honored on routes flagged [`RouteFlags::CAN_REWRITE_URL`
    /// ](crate::RouteFlags::CAN_REWRITE_URL).
    #[inline]
    pub fn rewrite_url(&mut self, url: impl Into<String>) {
        self.rewrite = Some(url.into());
    }

    #[inline(always)]
    pub fn url_rewritten(&self) -> bool {
        self.rewrite.is_some()
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn parse_simple_get() {
        let mut t = HttpConnection::from_req("GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");

        assert_eq!(t.parse_request(), Ok(()));
        assert_eq!(t.request.method, Method::Get);
        assert_eq!(str_op(t.url_slice()), "/hello");
        assert_eq!(t.request.version(), Version::Http11);
        assert!(t.keep_alive);
        assert!(t.helper.query_string.is_empty());
        assert!(t.helper.fragment.is_empty());
        assert!(t.helper.next_request.is_none());
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",    Ok(Method::Get)),
            ("HEAD / HTTP/1.1\r\n\r\n",   Ok(Method::Head)),
            ("POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc", Ok(Method::Post)),

            ("PUT / HTTP/1.1\r\n\r\n",    Err(ErrorKind::MethodNotAllowed)),
            ("DELETE / HTTP/1.1\r\n\r\n", Err(ErrorKind::MethodNotAllowed)),
            ("get / HTTP/1.1\r\n\r\n",    Err(ErrorKind::MethodNotAllowed)),
            ("",                          Err(ErrorKind::InvalidRequestLine)),
            ("   \r\n",                   Err(ErrorKind::InvalidRequestLine)),
        ];

        for (req, expected) in cases {
            let mut t = HttpConnection::from_req(req);

            match expected {
                Ok(method) => {
                    assert_eq!(t.parse_request(), Ok(()), "req: {req:?}");
                    assert_eq!(t.request.method, method);
                }
                Err(e) => assert_eq!(t.parse_request(), Err(e), "req: {req:?}"),
            }
        }
    }

    #[test]
    fn parse_request_line() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",          Ok(("/", Version::Http11))),
            ("GET /a/b/c HTTP/1.1\r\n\r\n",     Ok(("/a/b/c", Version::Http11))),
            ("GET / HTTP/1.0\r\n\r\n",          Ok(("/", Version::Http10))),
            ("GET /old HTTP/1.0\r\n\r\n",       Ok(("/old", Version::Http10))),

            ("GET x HTTP/1.1\r\n\r\n",          Err(ErrorKind::InvalidRequestLine)),
            ("GET nope/ HTTP/1.1\r\n\r\n",      Err(ErrorKind::InvalidRequestLine)),
            ("GET / JUNK/1.1\r\n\r\n",          Err(ErrorKind::InvalidRequestLine)),
            ("GET / HTTP/2.0\r\n\r\n",          Err(ErrorKind::InvalidRequestLine)),
            ("GET /\r\n\r\n",                   Err(ErrorKind::InvalidRequestLine)),
            ("GET / HTTP/1.1",                  Err(ErrorKind::InvalidRequestLine)),
        ];

        for (req, expected) in cases {
            let mut t = HttpConnection::from_req(req);

            match expected {
                Ok((url, version)) => {
                    assert_eq!(t.parse_request(), Ok(()), "req: {req:?}");
                    assert_eq!(str_op(t.url_slice()), url);
                    assert_eq!(t.request.version(), version);
                }
                Err(e) => assert_eq!(t.parse_request(), Err(e), "req: {req:?}"),
            }
        }
    }

    #[test]
    fn fragment_and_query_split() {
        #[rustfmt::skip]
        let cases = [
            ("GET /page HTTP/1.1\r\n\r\n",                ("/page", "",          "")),
            ("GET /page?a=1&b=2 HTTP/1.1\r\n\r\n",        ("/page", "a=1&b=2",   "")),
            ("GET /page#top HTTP/1.1\r\n\r\n",            ("/page", "",          "top")),
            ("GET /page?a=1#top HTTP/1.1\r\n\r\n",        ("/page", "a=1",       "top")),
            ("GET /page?a=1&b=2#sec-2 HTTP/1.1\r\n\r\n",  ("/page", "a=1&b=2",   "sec-2")),
            ("GET /? HTTP/1.1\r\n\r\n",                   ("/",     "",          "")),
            ("GET /?# HTTP/1.1\r\n\r\n",                  ("/",     "",          "")),
        ];

        for (req, (url, query, fragment)) in cases {
            let mut t = HttpConnection::from_req(req);

            assert_eq!(t.parse_request(), Ok(()), "req: {req:?}");
            assert_eq!(str_op(t.url_slice()), url, "req: {req:?}");
            assert_eq!(
                str_op(t.helper.query_string.of(t.parser.filled())),
                query,
                "req: {req:?}"
            );
            assert_eq!(
                str_op(t.helper.fragment.of(t.parser.filled())),
                fragment,
                "req: {req:?}"
            );
        }
    }

    #[test]
    fn url_decoded_in_place() {
        let mut t = HttpConnection::from_req("GET /a%20b/c+d HTTP/1.1\r\n\r\n");

        assert_eq!(t.parse_request(), Ok(()));
        assert_eq!(str_op(t.url_slice()), "/a b/c d");
        assert_eq!(t.request.original_url.len, t.request.url.len);
    }

    #[test]
    fn url_with_encoded_nul_rejected() {
        let mut t = HttpConnection::from_req("GET /a%00b HTTP/1.1\r\n\r\n");

        assert_eq!(t.parse_request(), Err(ErrorKind::InvalidUrlEncoding));
    }

    #[test]
    fn known_headers_recorded() {
        let mut t = HttpConnection::from_req(concat!(
            "GET /x HTTP/1.1\r\n",
            "Accept-Encoding: gzip, deflate\r\n",
            "Authorization: Basic dXNlcjpwYXNz\r\n",
            "Cookie: a=1; b=2\r\n",
            "If-Modified-Since: Wed, 21 Oct 2015 07:28:00 GMT\r\n",
            "Range: bytes=0-99\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Length: 0\r\n",
            "X-Unknown: skipped\r\n",
            "\r\n",
            "tail"
        ));

        assert_eq!(t.parse_request(), Ok(()));

        let filled = t.parser.filled();
        #[rustfmt::skip]
        let spans = [
            (t.helper.accept_encoding,   "gzip, deflate"),
            (t.helper.authorization,     "Basic dXNlcjpwYXNz"),
            (t.helper.cookie,            "a=1; b=2"),
            (t.helper.if_modified_since, "Wed, 21 Oct 2015 07:28:00 GMT"),
            (t.helper.range,             "bytes=0-99"),
            (t.helper.content_type,      "text/plain"),
            (t.helper.content_length,    "0"),
        ];

        for (span, expected) in spans {
            assert_eq!(str_op(span.of(filled)), expected);
        }

        // Pipelined tail recorded
        let next = t.helper.next_request.unwrap();
        assert_eq!(str_op(&filled[next..]), "tail");
    }

    #[test]
    fn header_matching_is_case_sensitive() {
        let mut t = HttpConnection::from_req(
            "GET /x HTTP/1.1\r\ncookie: a=1\r\nRANGE: bytes=0-1\r\n\r\n",
        );

        assert_eq!(t.parse_request(), Ok(()));
        assert!(t.helper.cookie.is_empty());
        assert!(t.helper.range.is_empty());
    }

    #[test]
    fn malformed_header_is_skipped_not_fatal() {
        let mut t = HttpConnection::from_req(
            "GET /x HTTP/1.1\r\nCookie:nospace\r\nRange: bytes=5-9\r\n\r\n",
        );

        assert_eq!(t.parse_request(), Ok(()));
        assert!(t.helper.cookie.is_empty());
        assert_eq!(str_op(t.helper.range.of(t.parser.filled())), "bytes=5-9");
    }

    #[test]
    fn connection_header_letter() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n", b'k'),
            ("GET / HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n", b'k'),
            ("GET / HTTP/1.1\r\nConnection: close\r\n\r\n",      b'c'),
            ("GET / HTTP/1.1\r\nConnection: Close\r\n\r\n",      b'c'),
            ("GET / HTTP/1.1\r\nConnection: upgrade\r\n\r\n",    b'u'),
            ("GET / HTTP/1.1\r\n\r\n",                           0),
        ];

        for (req, letter) in cases {
            let mut t = HttpConnection::from_req(req);

            assert_eq!(t.parse_request(), Ok(()), "req: {req:?}");
            assert_eq!(t.helper.connection, letter, "req: {req:?}");
        }
    }

    #[test]
    fn keep_alive_policy() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",                           true),
            ("GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n", true),
            ("GET / HTTP/1.1\r\nConnection: close\r\n\r\n",      false),
            ("GET / HTTP/1.0\r\n\r\n",                           false),
            ("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", true),
            ("GET / HTTP/1.0\r\nConnection: close\r\n\r\n",      false),
        ];

        for (req, keep_alive) in cases {
            let mut t = HttpConnection::from_req(req);

            assert_eq!(t.parse_request(), Ok(()), "req: {req:?}");
            assert_eq!(t.keep_alive, keep_alive, "req: {req:?}");
        }
    }

    #[test]
    fn pipelined_requests_recorded() {
        let mut t = HttpConnection::from_req("GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");

        assert_eq!(t.parse_request(), Ok(()));
        assert_eq!(str_op(t.url_slice()), "/a");

        let next = t.helper.next_request.unwrap();
        assert!(t.parser.filled()[next..].starts_with(b"GET /b"));
    }

    #[test]
    fn well_formed_request_then_garbage() {
        let mut t = HttpConnection::from_req("GET /ok HTTP/1.1\r\n\r\n<<<garbage>>>");

        assert_eq!(t.parse_request(), Ok(()));
        let next = t.helper.next_request.unwrap();
        assert_eq!(str_op(&t.parser.filled()[next..]), "<<<garbage>>>");
    }

    #[test]
    fn post_body_located() {
        let mut t = HttpConnection::from_req(concat!(
            "POST /p HTTP/1.1\r\n",
            "Content-Length: 7\r\n",
            "Content-Type: application/x-www-form-urlencoded\r\n",
            "\r\n",
            "a=1&b=2"
        ));

        assert_eq!(t.parse_request(), Ok(()));
        assert_eq!(str_op(t.helper.post_data.of(t.parser.filled())), "a=1&b=2");
        // The body was consumed; the handoff points past it
        assert_eq!(t.helper.next_request, Some(t.parser.len));
    }

    #[test]
    fn post_body_errors() {
        #[rustfmt::skip]
        let cases = [
            (
                "POST /p HTTP/1.1\r\n\r\nabcdefgh",
                ErrorKind::MissingContentLength,
            ),
            (
                "POST /p HTTP/1.1\r\nContent-Length: nope\r\n\r\nabcdefgh",
                ErrorKind::InvalidContentLength,
            ),
            (
                "POST /p HTTP/1.1\r\nContent-Length: -1\r\n\r\nabcdefgh",
                ErrorKind::InvalidContentLength,
            ),
            (
                "POST /p HTTP/1.1\r\nContent-Length: 99999\r\n\r\nabcdefgh",
                ErrorKind::BodyTooLarge,
            ),
            (
                // Fewer bytes than declared: streaming bodies unsupported
                "POST /p HTTP/1.1\r\nContent-Length: 64\r\n\r\nabcdefgh",
                ErrorKind::BodyNotBuffered,
            ),
            (
                // More bytes than declared: body would cross requests
                "POST /p HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcdefgh",
                ErrorKind::BodyNotBuffered,
            ),
        ];

        for (req, expected) in cases {
            let mut t = HttpConnection::from_req(req);
            assert_eq!(t.parse_request(), Err(expected), "req: {req:?}");
        }
    }

    #[test]
    fn proxy_preamble_gated_by_flag() {
        let req = "PROXY TCP4 1.2.3.4 5.6.7.8 11111 22222\r\nGET /x HTTP/1.1\r\n\r\n";

        // Flag off: "PROXY ..." is not a method
        let mut t = HttpConnection::from_req(req);
        assert_eq!(t.parse_request(), Err(ErrorKind::MethodNotAllowed));

        // Flag on: preamble consumed, peer recorded
        let mut t = HttpConnection::from_req(req);
        t.request.flags.insert(ReqFlags::ALLOW_PROXY_REQS);

        assert_eq!(t.parse_request(), Ok(()));
        assert!(t.request.flags.contains(ReqFlags::PROXIED));
        assert_eq!(str_op(t.url_slice()), "/x");

        let info = t.request.proxy.unwrap();
        assert_eq!(info.from, Some("1.2.3.4:11111".parse().unwrap()));
    }

    #[test]
    fn malformed_proxy_preamble() {
        let mut t = HttpConnection::from_req("PROXY TCP9 x y 1 2\r\nGET /x HTTP/1.1\r\n\r\n");
        t.request.flags.insert(ReqFlags::ALLOW_PROXY_REQS);

        assert_eq!(t.parse_request(), Err(ErrorKind::InvalidProxyHeader));
    }

    #[test]
    fn leading_whitespace_ignored() {
        let mut t = HttpConnection::from_req("\r\n  GET /x HTTP/1.1\r\n\r\n");

        assert_eq!(t.parse_request(), Ok(()));
        assert_eq!(str_op(t.url_slice()), "/x");
    }
}
