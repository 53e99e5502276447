//! URL-prefix routing and the authorization seam.
//!
//! The request driver resolves every parsed URL against a [`Router`];
//! the matched [`Route`] tells it which optional fields to decode, how
//! to trim the URL, whether to demand credentials, and which handler to
//! run.

use crate::{http::request::RequestCtx, StatusCode};
use std::{ops::BitOr, sync::Arc};

/// Synchronous per-route handler. Handlers run inline on the worker
/// task; concurrency comes from the number of workers, not from the
/// handler itself.
pub type RouteHandler = Box<dyn Fn(&mut RequestCtx<'_>) -> StatusCode + Send + Sync>;

// ROUTE FLAGS

/// Opt-in work the driver performs before invoking a route's handler.
///
/// Field decoding is lazy by design: a route that never reads cookies
/// should not pay for parsing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteFlags(u16);

impl RouteFlags {
    pub const EMPTY: RouteFlags = RouteFlags(0);

    /// Decode the query string into sorted key/value pairs.
    pub const PARSE_QUERY_STRING: RouteFlags = RouteFlags(1 << 0);
    /// Decode `If-Modified-Since` into unix seconds.
    pub const PARSE_IF_MODIFIED_SINCE: RouteFlags = RouteFlags(1 << 1);
    /// Decode the `Range` header.
    pub const PARSE_RANGE: RouteFlags = RouteFlags(1 << 2);
    /// Scan `Accept-Encoding` for gzip/deflate.
    pub const PARSE_ACCEPT_ENCODING: RouteFlags = RouteFlags(1 << 3);
    /// Split the `Cookie` header into sorted key/value pairs.
    pub const PARSE_COOKIES: RouteFlags = RouteFlags(1 << 4);
    /// Decode a form-encoded POST body. A POST to a route without this
    /// flag is answered with `405`.
    pub const PARSE_POST_DATA: RouteFlags = RouteFlags(1 << 5);
    /// Run the route's [`Authorizer`] before the handler.
    pub const MUST_AUTHORIZE: RouteFlags = RouteFlags(1 << 6);
    /// Strip `/` prefixes from the URL after the route prefix is
    /// removed; useful for filesystem-backed handlers.
    pub const REMOVE_LEADING_SLASH: RouteFlags = RouteFlags(1 << 7);
    /// The handler may rewrite the URL and have the driver re-dispatch.
    pub const CAN_REWRITE_URL: RouteFlags = RouteFlags(1 << 8);

    #[inline(always)]
    pub(crate) const fn contains(self, other: RouteFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RouteFlags {
    type Output = RouteFlags;

    #[inline(always)]
    fn bitor(self, rhs: RouteFlags) -> RouteFlags {
        RouteFlags(self.0 | rhs.0)
    }
}

// AUTHORIZATION

/// Credential check consulted for routes flagged
/// [`RouteFlags::MUST_AUTHORIZE`].
///
/// Receives the raw `Authorization` header value (if any) and the
/// route's realm; the backing store - password file, token service - is
/// up to the implementation.
pub trait Authorizer: Send + Sync + 'static {
    fn authorize(&self, authorization: Option<&[u8]>, realm: &str) -> bool;
}

pub(crate) struct AuthPolicy {
    pub(crate) realm: String,
    pub(crate) authorizer: Arc<dyn Authorizer>,
}

// ROUTE

/// One registered URL prefix with its handler and dispatch options.
pub struct Route {
    pub(crate) prefix: Box<[u8]>,
    pub(crate) flags: RouteFlags,
    pub(crate) handler: RouteHandler,
    pub(crate) auth: Option<AuthPolicy>,
}

impl Route {
    /// Creates a route matching every URL that starts with `prefix`.
    /// The matched prefix is stripped from the URL before the handler
    /// sees it.
    pub fn new<H>(prefix: &str, handler: H) -> Self
    where
        H: Fn(&mut RequestCtx<'_>) -> StatusCode + Send + Sync + 'static,
    {
        Route {
            prefix: prefix.as_bytes().into(),
            flags: RouteFlags::EMPTY,
            handler: Box::new(handler),
            auth: None,
        }
    }

    #[inline(always)]
    pub fn flags(mut self, flags: RouteFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Demands credentials for this route. Implies
    /// [`RouteFlags::MUST_AUTHORIZE`].
    pub fn authorize(mut self, realm: &str, authorizer: Arc<dyn Authorizer>) -> Self {
        self.flags = self.flags | RouteFlags::MUST_AUTHORIZE;
        self.auth = Some(AuthPolicy {
            realm: realm.to_owned(),
            authorizer,
        });
        self
    }
}

// ROUTER

/// Longest-prefix route table shared read-only by all workers.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    #[inline]
    pub fn new() -> Self {
        Router { routes: Vec::new() }
    }

    #[inline]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Returns the route with the longest prefix matching `url`, or
    /// `None`; a miss becomes `404 Not Found`.
    pub fn lookup_prefix(&self, url: &[u8]) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| url.starts_with(&route.prefix))
            .max_by_key(|route| route.prefix.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_route(prefix: &str) -> Route {
        Route::new(prefix, |_| StatusCode::Ok)
    }

    #[test]
    fn longest_prefix_wins() {
        let router = Router::new()
            .route(ok_route("/"))
            .route(ok_route("/api"))
            .route(ok_route("/api/users"));

        #[rustfmt::skip]
        let cases: [(&[u8], Option<&[u8]>); 6] = [
            (b"/api/users/42",  Some(b"/api/users")),
            (b"/api/users",     Some(b"/api/users")),
            (b"/api/health",    Some(b"/api")),
            (b"/index.html",    Some(b"/")),
            (b"/",              Some(b"/")),
            (b"favicon.ico",    None),
        ];

        for (url, expected) in cases {
            let found = router.lookup_prefix(url).map(|r| &*r.prefix);
            assert_eq!(found, expected, "url: {url:?}");
        }
    }

    #[test]
    fn empty_router_misses() {
        assert!(Router::new().lookup_prefix(b"/anything").is_none());
    }

    #[test]
    fn flags_combine() {
        let flags = RouteFlags::PARSE_QUERY_STRING | RouteFlags::PARSE_COOKIES;

        assert!(flags.contains(RouteFlags::PARSE_QUERY_STRING));
        assert!(flags.contains(RouteFlags::PARSE_COOKIES));
        assert!(!flags.contains(RouteFlags::PARSE_RANGE));
        assert!(flags.contains(RouteFlags::EMPTY));
    }

    #[test]
    fn authorize_implies_flag() {
        struct DenyAll;
        impl Authorizer for DenyAll {
            fn authorize(&self, _: Option<&[u8]>, _: &str) -> bool {
                false
            }
        }

        let route = ok_route("/admin").authorize("admin", Arc::new(DenyAll));

        assert!(route.flags.contains(RouteFlags::MUST_AUTHORIZE));
        assert_eq!(route.auth.as_ref().unwrap().realm, "admin");
    }
}
