//! Request dispatch: URL-prefix lookup and authorization gate.

/// Route flags carried alongside a matched prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteFlags {
    pub allow_post: bool,
    pub strip_leading_slashes: bool,
    pub require_auth: bool,
    pub parse_accept_encoding: bool,
    pub allow_rewrite: bool,
}

/// The result of a successful [`UrlMap::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch {
    pub prefix_len: usize,
    pub flags: RouteFlags,
}

/// Looks up the handler configuration for a request path.
///
/// Implementations are shared read-only across all connection workers,
/// so must be `Sync`.
pub trait UrlMap: Sync + Send {
    fn lookup(&self, path: &[u8]) -> Option<RouteMatch>;
}

/// A single registered route in a [`PrefixMap`].
#[derive(Debug, Clone)]
pub struct Route {
    pub prefix: Vec<u8>,
    pub flags: RouteFlags,
}

/// Reference [`UrlMap`] implementation: routes sorted by prefix length
/// (longest first) and linear-scanned for the longest byte-prefix match.
///
/// Grounded in the same sorted-`Vec`-plus-scan idiom the query/cookie
/// key-value splitter uses rather than a from-scratch trie engine.
#[derive(Debug, Clone, Default)]
pub struct PrefixMap {
    routes: Vec<Route>,
}

impl PrefixMap {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn insert(&mut self, prefix: impl Into<Vec<u8>>, flags: RouteFlags) {
        self.routes.push(Route {
            prefix: prefix.into(),
            flags,
        });
        self.routes.sort_unstable_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
    }
}

impl UrlMap for PrefixMap {
    fn lookup(&self, path: &[u8]) -> Option<RouteMatch> {
        self.routes
            .iter()
            .find(|route| path.starts_with(route.prefix.as_slice()))
            .map(|route| RouteMatch {
                prefix_len: route.prefix.len(),
                flags: route.flags,
            })
    }
}

/// Authorizes a request's `Authorization` header value against a realm.
pub trait Authorizer: Sync + Send {
    fn authorize(&self, auth_header: Option<&[u8]>, realm: &str) -> bool;
}

impl Authorizer for () {
    #[inline(always)]
    fn authorize(&self, _: Option<&[u8]>, _: &str) -> bool {
        true
    }
}

/// Maximum number of handler-triggered URL rewrites before dispatch
/// gives up and surfaces an error.
pub(crate) const MAX_REWRITES: u8 = 4;
