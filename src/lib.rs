//! stride_web - Small, high-performance pipelined HTTP/1.x server core
//!
//! A performance-oriented HTTP server built around a single-pass,
//! allocation-stingy request parser and a bounded, non-blocking read
//! loop. Designed for microservices that want predictable memory and
//! latency rather than a full framework.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections by default, pipelining
//! - **HTTP/1.0**: opt-in keep-alive for legacy clients
//! - **PROXY protocol v1/v2**: real peer addresses behind a load
//!   balancer (opt-in)
//!
//! # Design
//!
//! - **One buffer per connection** - requests are parsed in place;
//!   headers, URL, query parameters, and cookies are spans into the
//!   read buffer, never copies.
//! - **Lazy field decoding** - `Range`, `If-Modified-Since`, cookies,
//!   query strings, and form bodies are only decoded when the matched
//!   route asks for them.
//! - **Bounded everything** - 16 socket reads per request, 32 key/value
//!   pairs per collection, 4 internal rewrites; slow or abusive clients
//!   get a status code, not a resource leak.
//! - **Prefix routing with internal rewrites** - handlers can rewrite
//!   the URL and have it re-dispatched through the route table.
//!
//! # Quick Start
//!
//! ```no_run
//! use stride_web::{Route, RouteFlags, Router, Server, StatusCode};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::new().route(
//!         Route::new("/hello", |_| StatusCode::Ok)
//!             .flags(RouteFlags::PARSE_QUERY_STRING),
//!     );
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .router(router)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
pub(crate) mod http {
    pub(crate) mod bytes;
    pub(crate) mod fields;
    pub(crate) mod kv;
    pub(crate) mod proxy;
    pub(crate) mod request;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;
pub mod routing;

pub use crate::{
    http::{
        fields::RequestRange,
        proxy::ProxyInfo,
        request::RequestCtx,
        types::{Method, StatusCode, Version},
    },
    routing::{Authorizer, Route, RouteFlags, Router},
    server::server_impl::{Server, ServerBuilder},
};

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }
}
