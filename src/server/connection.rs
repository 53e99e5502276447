//! Per-connection driving: the bounded read loop that assembles
//! requests from partial socket reads, and the request driver that
//! walks parse → route lookup → handler → response.
//!
//! Each connection is one cooperative task. Suspension happens only
//! while waiting for socket readiness; everything between two waits runs
//! to completion on the worker, so no locking exists on the request
//! path.

use crate::{
    errors::ErrorKind,
    http::{
        request::{split_fragment_and_query, ParseHelper, ReadBuf, Request, RequestCtx},
        types::{Method, ReqFlags, Source, Span},
    },
    limits::{ConnLimits, ReqLimits, MAX_PACKETS_PER_REQUEST, MAX_URL_REWRITES},
    routing::{RouteFlags, Router},
    StatusCode,
};
use memchr::memrchr;
use std::{io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Why a connection is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Close {
    /// Orderly shutdown from the client.
    Shutdown,
    /// The transport failed mid-request; no response is possible.
    TransportError,
    /// The read deadline expired while waiting for the socket.
    Deadline,
    /// A request was answered with a connection-fatal status.
    Fatal,
}

/// Verdict of the request finalizer after each socket read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finalize {
    /// The buffer holds a complete request.
    Done,
    /// Read more; this counts against the packet budget.
    TryAgain,
    /// Too little data to even judge; wait for readiness first, without
    /// spending a packet.
    YieldTryAgain,
    /// The request cannot fit the buffer.
    TooLarge,
}

enum ReadError {
    /// The read loop failed in a way that maps to a status code.
    Status(ErrorKind),
    /// The connection is beyond responding.
    Close(Close),
}

pub(crate) struct HttpConnection {
    pub(crate) router: Arc<Router>,

    pub(crate) parser: ReadBuf,
    pub(crate) helper: ParseHelper,
    pub(crate) request: Request,

    pub(crate) keep_alive: bool,
    pub(crate) allow_proxy_requests: bool,
    pub(crate) peer: Option<SocketAddr>,

    pub(crate) conn_limits: ConnLimits,

    created: Instant,
    request_count: usize,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(
        router: Arc<Router>,
        req_limits: &ReqLimits,
        conn_limits: ConnLimits,
        allow_proxy_requests: bool,
    ) -> Self {
        Self {
            router,

            parser: ReadBuf::new(req_limits),
            helper: ParseHelper::new(),
            request: Request::new(),

            keep_alive: true,
            allow_proxy_requests,
            peer: None,

            conn_limits,

            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    fn reset_for_request(&mut self, next_request: Option<usize>) {
        self.helper.reset(next_request);
        self.request.reset(self.allow_proxy_requests);

        // The tail of the read buffer still belongs to the pipeline;
        // only discard it when nothing is carried over.
        if next_request.is_none() {
            self.parser.len = 0;
        }
    }

    #[inline(always)]
    fn is_expired(&self) -> bool {
        self.request_count >= self.conn_limits.max_requests_per_connection
            || self.created.elapsed() > self.conn_limits.connection_lifetime
    }
}

// CONNECTION LOOP

impl HttpConnection {
    /// Serves requests off one accepted stream until the client goes
    /// away, keep-alive ends, or a connection limit fires.
    pub(crate) async fn run(&mut self, stream: &mut TcpStream) {
        self.created = Instant::now();
        self.request_count = 0;
        self.keep_alive = true;
        self.parser.len = 0;
        self.peer = stream.peer_addr().ok();

        let mut next_request = None;
        loop {
            match self.process_request(stream, next_request).await {
                Ok(next) => next_request = next,
                Err(reason) => {
                    debug!(?reason, "connection closed");
                    return;
                }
            }

            self.request_count += 1;
            if !self.keep_alive || self.is_expired() {
                return;
            }
        }
    }

    /// Drives one request end to end. Returns the offset of pipelined
    /// bytes still in the buffer, to be carried into the next call.
    pub(crate) async fn process_request(
        &mut self,
        stream: &mut TcpStream,
        next_request: Option<usize>,
    ) -> Result<Option<usize>, Close> {
        self.reset_for_request(next_request);

        match self.read_request(stream).await {
            Ok(()) => {}
            Err(ReadError::Close(reason)) => return Err(reason),
            Err(ReadError::Status(kind)) => {
                // This request was bad, but a pipelined successor may
                // still be fine; skip the response and move on.
                if matches!(kind, ErrorKind::ReadFailure) && self.helper.next_request.is_some() {
                    return Ok(self.helper.next_request);
                }

                self.keep_alive = false;
                self.send_default_response(stream, kind.status()).await?;
                return Err(Close::Fatal);
            }
        }

        if let Err(kind) = self.parse_request() {
            debug!(error = ?kind, "request rejected");
            self.keep_alive = false;
            self.send_default_response(stream, kind.status()).await?;
            return Ok(self.helper.next_request);
        }

        self.dispatch(stream).await?;

        Ok(self.helper.next_request)
    }
}

// READ LOOP

impl HttpConnection {
    /// Assembles a complete request from at most
    /// [`MAX_PACKETS_PER_REQUEST`] socket reads.
    ///
    /// Reads are non-blocking: `WouldBlock` waits for readiness (the
    /// cooperative yield point) and retries without spending a packet.
    /// Exhausting the packet budget means the client is dribbling bytes
    /// and earns `408`.
    async fn read_request(&mut self, stream: &TcpStream) -> Result<(), ReadError> {
        let mut total_read = 0;
        let mut packets_remaining = MAX_PACKETS_PER_REQUEST;

        // Pipeline fast path: the buffer tail already holds the next
        // request's bytes. Move them to the front and try to finalize
        // before touching the socket.
        let mut skip_read = self.helper.next_request.is_some();
        if let Some(next) = self.helper.next_request {
            let tail = self.parser.len - next;
            self.parser.buf.copy_within(next..self.parser.len, 0);
            self.parser.len = tail;
            total_read = tail;
        }

        while packets_remaining > 0 {
            if !skip_read {
                match stream.try_read(&mut self.parser.buf[total_read..]) {
                    // Orderly shutdown; nothing else to do.
                    Ok(0) => return Err(ReadError::Close(Close::Shutdown)),
                    Ok(n) => {
                        total_read += n;
                        self.parser.len = total_read;
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                        ) =>
                    {
                        self.wait_readable(stream).await.map_err(ReadError::Close)?;
                        continue;
                    }
                    // Unexpected error before reading anything
                    Err(_) if total_read == 0 => {
                        return Err(ReadError::Status(ErrorKind::ReadFailure))
                    }
                    // Unexpected error mid-request
                    Err(_) => return Err(ReadError::Close(Close::TransportError)),
                }
            }
            skip_read = false;

            match self.finalize(total_read) {
                Finalize::Done => return Ok(()),
                Finalize::TryAgain => packets_remaining -= 1,
                Finalize::YieldTryAgain => {
                    self.wait_readable(stream).await.map_err(ReadError::Close)?;
                }
                Finalize::TooLarge => return Err(ReadError::Status(ErrorKind::RequestTooLarge)),
            }
        }

        Err(ReadError::Status(ErrorKind::SlowClient))
    }

    async fn wait_readable(&self, stream: &TcpStream) -> Result<(), Close> {
        tokio::time::timeout(self.conn_limits.socket_read_timeout, stream.readable())
            .await
            .map_err(|_| Close::Deadline)?
            .map_err(|_| Close::TransportError)
    }

    /// Decides whether the buffer now holds a complete request.
    fn finalize(&mut self, total_read: usize) -> Finalize {
        if total_read < 4 {
            return Finalize::YieldTryAgain;
        }

        // A pipelined tail of useful size is taken as-is; the parser
        // sorts out whether it really is complete.
        if self.helper.next_request.take().is_some() {
            return Finalize::Done;
        }

        let filled = self.parser.filled();
        if &filled[total_read - 4..total_read] == b"\r\n\r\n" {
            return Finalize::Done;
        }

        // POST may have pulled (part of) the body in the same read:
        // accept a buffer whose last line break closes the header block.
        if matches!(Method::from_bytes(filled), Some((Method::Post, _))) {
            if let Some(lf) = memrchr(b'\n', filled) {
                if lf >= 3 && &filled[lf - 3..lf] == b"\r\n\r" {
                    return Finalize::Done;
                }
            }
        }

        if total_read == self.parser.capacity() {
            return Finalize::TooLarge;
        }

        Finalize::TryAgain
    }
}

// REQUEST DRIVER

impl HttpConnection {
    /// Resolves the parsed request against the route table and runs the
    /// matched handler, honoring bounded internal rewrites.
    async fn dispatch(&mut self, stream: &mut TcpStream) -> Result<(), Close> {
        let router = Arc::clone(&self.router);

        loop {
            let Some(route) = router.lookup_prefix(self.url_slice()) else {
                self.send_default_response(stream, ErrorKind::NotFound.status())
                    .await?;
                return Ok(());
            };

            if let Err(kind) = self.prepare_for_response(route) {
                self.send_default_response(stream, kind.status()).await?;
                return Ok(());
            }

            let mut ctx = RequestCtx {
                request: &self.request,
                read_buf: self.parser.filled(),
                scratch: &self.helper.scratch,
                url_source: self.helper.url_source,
                peer: self.peer,
                rewrite: None,
            };
            let status = (route.handler)(&mut ctx);
            let rewrite = ctx.rewrite;

            if route.flags.contains(RouteFlags::CAN_REWRITE_URL) {
                if let Some(new_url) = rewrite {
                    self.request.flags.insert(ReqFlags::URL_REWRITTEN);

                    if !self.apply_rewrite(new_url) {
                        warn!(
                            url = %String::from_utf8_lossy(self.url_slice()),
                            "url rewrite loop detected"
                        );
                        self.send_default_response(stream, ErrorKind::RewriteLoop.status())
                            .await?;
                        return Ok(());
                    }
                    continue;
                }
            }

            self.send_default_response(stream, status).await?;
            return Ok(());
        }
    }

    /// Installs a handler-provided URL into the scratch buffer and
    /// re-splits fragment and query string. Returns `false` once the
    /// rewrite budget is spent.
    fn apply_rewrite(&mut self, new_url: String) -> bool {
        self.helper.urls_rewritten += 1;
        if self.helper.urls_rewritten > MAX_URL_REWRITES {
            return false;
        }

        self.helper.scratch.clear();
        self.helper.scratch.extend_from_slice(new_url.as_bytes());
        self.helper.url_source = Source::Scratch;

        let mut url = Span::new(0, self.helper.scratch.len());
        split_fragment_and_query(
            &self.helper.scratch,
            &mut url,
            &mut self.helper.query_string,
            &mut self.helper.fragment,
        );
        self.request.url = url;
        self.request.flags.remove(ReqFlags::URL_REWRITTEN);

        true
    }

    async fn send_default_response(
        &self,
        stream: &mut TcpStream,
        status: StatusCode,
    ) -> Result<(), Close> {
        let bytes = status.default_response(self.request.version(), self.keep_alive);

        writer::write_bytes(stream, &self.conn_limits, bytes)
            .await
            .map_err(|_| Close::TransportError)
    }
}

pub(crate) mod writer {
    use crate::limits::ConnLimits;
    use std::io;
    use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};

    #[inline(always)]
    pub(crate) async fn write_bytes(
        stream: &mut TcpStream,
        limits: &ConnLimits,
        response: &[u8],
    ) -> Result<(), io::Error> {
        timeout(limits.socket_write_timeout, stream.write_all(response)).await?
    }
}

#[cfg(test)]
impl HttpConnection {
    pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
        let mut conn = Self::new(
            Arc::new(Router::new()),
            &ReqLimits::default(),
            ConnLimits::default(),
            false,
        );
        conn.parser = ReadBuf::from(&ReqLimits::default(), value);
        conn
    }
}

#[cfg(test)]
mod finalizer {
    use super::*;

    fn finalize_req<V: AsRef<[u8]>>(value: V) -> Finalize {
        let mut t = HttpConnection::from_req(value);
        t.finalize(t.parser.len)
    }

    #[test]
    fn too_little_data_yields() {
        assert_eq!(finalize_req("GE"), Finalize::YieldTryAgain);
        assert_eq!(finalize_req(""), Finalize::YieldTryAgain);
    }

    #[test]
    fn header_terminator_completes() {
        assert_eq!(finalize_req("GET / HTTP/1.1\r\n\r\n"), Finalize::Done);
        assert_eq!(
            finalize_req("GET / HTTP/1.1\r\nHost: x\r\n\r\n"),
            Finalize::Done
        );
    }

    #[test]
    fn incomplete_request_tries_again() {
        assert_eq!(finalize_req("GET / HTTP/1.1\r\n"), Finalize::TryAgain);
        assert_eq!(finalize_req("GET / HTTP/1.1\r\nHos"), Finalize::TryAgain);
    }

    #[test]
    fn pipelined_tail_taken_as_is() {
        let mut t = HttpConnection::from_req("GET /b HTTP/1.1\r\n");
        t.helper.next_request = Some(0);

        assert_eq!(t.finalize(t.parser.len), Finalize::Done);
        assert!(t.helper.next_request.is_none());
    }

    #[test]
    fn post_with_buffered_body_completes() {
        assert_eq!(
            finalize_req("POST /p HTTP/1.1\r\nContent-Length: 3\r\n\r\nab"),
            Finalize::Done
        );
        // Same bytes under GET keep reading
        assert_eq!(
            finalize_req("GET /p HTTP/1.1\r\nContent-Length: 3\r\n\r\nab"),
            Finalize::TryAgain
        );
    }

    #[test]
    fn full_buffer_without_terminator_is_too_large() {
        let limits = ReqLimits::default();
        let flood = "A".repeat(limits.buffer_size);

        assert_eq!(finalize_req(&flood), Finalize::TooLarge);
    }

    #[test]
    fn exact_fit_request_still_completes() {
        let limits = ReqLimits::default();
        let frame = "GET / HTTP/1.1\r\n\r\n";
        let request = format!(
            "GET /{} HTTP/1.1\r\n\r\n",
            "a".repeat(limits.buffer_size - frame.len())
        );
        assert_eq!(request.len(), limits.buffer_size);

        assert_eq!(finalize_req(&request), Finalize::Done);
    }
}
