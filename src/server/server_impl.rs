//! Server assembly: the accept loop, the fixed worker pool, and the
//! builder that wires routes and limits together.
//!
//! Workers are long-lived tasks created once at startup. Each owns one
//! pre-allocated [`HttpConnection`] and pulls accepted streams from a
//! shared queue, so steady-state request handling allocates nothing.

use crate::{
    http::types::Version,
    limits::{ConnLimits, ReqLimits, ServerLimits, WaitStrategy},
    routing::Router,
    server::connection::{writer, HttpConnection},
    StatusCode,
};
use crossbeam::queue::SegQueue;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};
use tracing::{debug, info};

/// A pipelined HTTP/1.x server.
///
/// # Examples
///
/// ```no_run
/// use stride_web::{Route, RouteFlags, Router, Server, StatusCode};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() {
///     let router = Router::new().route(
///         Route::new("/hello", |_| StatusCode::Ok)
///             .flags(RouteFlags::PARSE_QUERY_STRING),
///     );
///
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .router(router)
///         .build()
///         .launch()
///         .await;
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            router: None,
            allow_proxy_requests: false,

            server_limits: None,
            request_limits: None,
            connection_limits: None,
        }
    }

    /// Starts accepting connections. Runs forever.
    #[inline]
    pub async fn launch(self) {
        info!(
            workers = self.server_limits.max_connections,
            "server started"
        );

        loop {
            let Ok(value) = self.listener.accept().await else {
                continue;
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push(value),
                false => self.error_queue.push(value),
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    router: Option<Arc<Router>>,
    allow_proxy_requests: bool,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    connection_limits: Option<ConnLimits>,
}

impl ServerBuilder {
    /// Sets the TCP listener the server accepts connections from.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the route table requests are dispatched against.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Accepts the HAProxy PROXY protocol preamble (v1 and v2) on
    /// incoming connections. Only enable this behind a load balancer
    /// you trust; the preamble lets any client claim any peer address.
    #[inline(always)]
    pub fn allow_proxy_requests(mut self, allow: bool) -> Self {
        self.allow_proxy_requests = allow;
        self
    }

    /// Configures worker-pool and queueing limits.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures per-connection limits and timeouts.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Panics when the `listener` or `router` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");
        let router = self
            .router
            .expect("The `router` method must be called to create");

        let server_limits = self.server_limits.unwrap_or_default();
        let request_limits = self.request_limits.unwrap_or_default();
        let connection_limits = self.connection_limits.unwrap_or_default();

        let stream_queue: TcpQueue = Arc::new(SegQueue::new());
        let error_queue: TcpQueue = Arc::new(SegQueue::new());

        for _ in 0..server_limits.max_connections {
            Self::spawn_worker(
                &stream_queue,
                &router,
                &server_limits,
                &request_limits,
                &connection_limits,
                self.allow_proxy_requests,
            );
        }
        Self::spawn_alarmist(&error_queue, &server_limits, &connection_limits);

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits,
        }
    }

    #[inline]
    fn spawn_worker(
        queue: &TcpQueue,
        router: &Arc<Router>,
        server_limits: &ServerLimits,
        request_limits: &ReqLimits,
        connection_limits: &ConnLimits,
        allow_proxy_requests: bool,
    ) {
        let queue = queue.clone();
        let wait = server_limits.wait_strategy.clone();
        let mut conn = HttpConnection::new(
            router.clone(),
            request_limits,
            connection_limits.clone(),
            allow_proxy_requests,
        );

        tokio::spawn(async move {
            loop {
                let (mut stream, addr) = Server::get_stream(&queue, &wait).await;

                debug!(peer = %addr, "connection accepted");
                conn.run(&mut stream).await;
            }
        });
    }

    // Overflow connections get an immediate 503 instead of silence.
    #[inline]
    fn spawn_alarmist(
        queue: &TcpQueue,
        server_limits: &ServerLimits,
        connection_limits: &ConnLimits,
    ) {
        let queue = queue.clone();
        let wait = server_limits.wait_strategy.clone();
        let limits = connection_limits.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = Server::get_stream(&queue, &wait).await;

                let response =
                    StatusCode::ServiceUnavailable.default_response(Version::Http11, false);
                let _ = writer::write_bytes(&mut stream, &limits, response).await;
            }
        });
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
