//! Server configuration limits and timeouts.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Slowloris attacks
//! - Pipelined-request floods
//!
//! Each connection pre-allocates a single read buffer of
//! [`ReqLimits::buffer_size`] bytes which is reused across keep-alive
//! requests; total steady-state memory is linear in
//! [`ServerLimits::max_connections`].

use std::time::Duration;

/// Key/value pairs retained per collection (query string, cookies, form
/// body). Pairs past this count are dropped.
pub const MAX_KV_PAIRS: usize = 32;

/// Internal URL rewrite iterations allowed per request before the
/// driver declares divergence and answers `500`.
pub const MAX_URL_REWRITES: u8 = 4;

/// Socket reads allowed while assembling one request. A client that
/// dribbles bytes slower than this earns `408 Request Timeout`.
pub const MAX_PACKETS_PER_REQUEST: u32 = 16;

/// Controls server-level concurrency and queueing behavior.
///
/// The accept loop pushes connections into a queue; exactly
/// `max_connections` long-lived worker tasks pop from it. When the queue
/// overflows, new connections receive an immediate `503`.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks, each processing one connection at a time
    /// (default: `100`).
    pub max_connections: usize,

    /// Maximum number of accepted connections waiting for a worker
    /// (default: `250`). Overflow is answered with `503`.
    pub max_pending_connections: usize,

    /// How idle workers wait for the queue to fill (default:
    /// `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]. Burns CPU for
    /// the lowest possible pickup latency.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`].
    Sleep(Duration),
}

/// Connection-level limits and timeouts.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time to wait for the socket to become readable while a
    /// request is incomplete (default: `2 seconds`). Expiry tears the
    /// connection down without a response.
    pub socket_read_timeout: Duration,

    /// Maximum duration for writing one response (default: `3 seconds`).
    pub socket_write_timeout: Duration,

    /// Requests served before a keep-alive connection is closed
    /// (default: `100`).
    pub max_requests_per_connection: usize,

    /// Hard ceiling on connection lifetime (default: `2 minutes`).
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            max_requests_per_connection: 100,
            connection_lifetime: Duration::from_secs(120),

            _priv: (),
        }
    }
}

/// Request parsing limits and buffer allocation.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Read buffer size per connection in bytes (default: `4096`).
    ///
    /// One request - line, headers, and any buffered POST body - must
    /// fit here or the client receives `413 Payload Too Large`. The
    /// buffer also holds the head of the next pipelined request.
    pub buffer_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            buffer_size: 4096,

            _priv: (),
        }
    }
}
