use crate::{
    body::BodyBuffer,
    dispatch::{Authorizer, UrlMap, MAX_REWRITES},
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
        types::{Method, Version},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::server_impl::{AllLimits, Handler},
    Handled,
};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,

    url_map: Option<Arc<dyn UrlMap>>,
    authorizer: Option<Arc<dyn Authorizer>>,

    body_buffer: Option<BodyBuffer>,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,

            url_map: limits.4,
            authorizer: limits.5,

            body_buffer: None,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
        self.body_buffer = None;
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        self.request.set_addrs(client_addr, server_addr);

        match self.impl_run(stream).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                self.conn_limits
                    .send_error(
                        stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired()? {
            self.reset_request_response();

            if self
                .parser
                .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                .await?
                == 0
            {
                break;
            }

            if self.req_limits.allow_proxy {
                if let Some((addresses, consumed)) = crate::proxy::decode(self.parser.filled())? {
                    self.parser.skip_preamble(consumed);

                    if let Some(source) = addresses.source {
                        let destination = addresses.destination.unwrap_or(self.request.server_addr());
                        self.request.set_addrs(source, destination);
                    }
                }
            }

            self.response.version = match self.parse() {
                Ok(version) => version,
                Err(ErrorKind::BodyMismatch { expected, available }) if available < expected => {
                    self.read_overflow_body(stream, expected, available).await?;
                    self.request.version()
                }
                Err(error) => return Err(error),
            };

            self.dispatch().await?;

            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;

            if !self.response.keep_alive {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Finishes reading a body that exceeded what the parser's one-shot
    /// read already buffered, spilling it into a [`BodyBuffer`].
    #[inline]
    async fn read_overflow_body(
        &mut self,
        stream: &mut TcpStream,
        expected: usize,
        available: usize,
    ) -> Result<(), ErrorKind> {
        let mut buffer = BodyBuffer::allocate(
            expected,
            self.parser.filled(),
            self.req_limits.allow_post_temp_file,
        )?;

        let mut filled = available;
        while filled < expected {
            let read = tokio::select! {
                biased;

                result = stream.read(&mut buffer.as_mut_slice()[filled..]) => result?,
                _ = sleep(self.conn_limits.socket_read_timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "body read timeout").into());
                },
            };

            if read == 0 {
                return Err(ErrorKind::BodyMismatch {
                    expected,
                    available: filled,
                });
            }
            filled += read;
        }

        // SAFETY: `buffer` is retained on `self` until the next
        // `reset_request_response`, matching the parser buffer's own
        // 'static span convention.
        let slice = unsafe { Parser::into_static(buffer.as_slice()) };
        self.request.set_body(slice);
        self.body_buffer = Some(buffer);

        Ok(())
    }

    /// Routes the current request through the URL map and authorizer,
    /// then invokes the handler, following handler-triggered rewrites
    /// up to [`MAX_REWRITES`] before giving up.
    ///
    /// Without a configured [`UrlMap`], dispatch degenerates to a single
    /// unconditional handler invocation: rewrites and auth gating only
    /// apply to routes the map actually matches.
    #[inline]
    async fn dispatch(&mut self) -> Result<(), ErrorKind> {
        let Some(url_map) = self.url_map.clone() else {
            self.handler
                .handle(&mut self.connection_data, &self.request, &mut self.response)
                .await;
            return Ok(());
        };

        let mut rewrites = 0u8;

        loop {
            let route = url_map
                .lookup(self.request.url().path())
                .ok_or(ErrorKind::NotFound)?;

            self.request
                .set_route_match(route.prefix_len, route.flags.strip_leading_slashes);

            if self.request.method() == Method::Post && !route.flags.allow_post {
                return Err(ErrorKind::NotAllowed);
            }

            if route.flags.require_auth {
                let realm = String::from_utf8_lossy(&self.request.url().path()[..route.prefix_len]);
                let authorized = match &self.authorizer {
                    Some(authorizer) => {
                        authorizer.authorize(self.request.header(b"authorization"), &realm)
                    }
                    None => false,
                };

                if !authorized {
                    return Err(ErrorKind::NotAuthorized);
                }
            }

            if route.flags.parse_accept_encoding {
                self.request.accept_encoding();
            }

            self.handler
                .handle(&mut self.connection_data, &self.request, &mut self.response)
                .await;

            if !self.response.rewritten {
                return Ok(());
            }
            self.response.rewritten = false;
            let target = self.response.rewrite_target.take();

            if !route.flags.allow_rewrite {
                return Ok(());
            }

            rewrites += 1;
            if rewrites > MAX_REWRITES {
                return Err(ErrorKind::RewriteLoopExceeded);
            }

            let target = target.ok_or(ErrorKind::InternalError)?;
            self.apply_rewrite(&target)?;

            self.response.rewind();
        }
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> Result<bool, ErrorKind> {
        Ok(!self.response.keep_alive
            || self.connection.request_count >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime)
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use corehttpd::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use corehttpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use corehttpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use corehttpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds.Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,

                url_map: None,
                authorizer: None,

                body_buffer: None,
            }
        }
    }

    pub(crate) struct RewriteHandler;

    impl Handler<()> for RewriteHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).rewrite("/").body("again")
        }
    }

    pub(crate) struct RewriteOnceHandler;

    impl Handler<()> for RewriteOnceHandler {
        async fn handle(&self, _: &mut (), req: &Request, r: &mut Response) -> Handled {
            if req.url().path() == b"/start" {
                return r.status(StatusCode::Ok).rewrite("/end?from=start").body("");
            }

            r.status(StatusCode::Ok).body("final")
        }
    }

    impl HttpConnection<RewriteHandler, ()> {
        #[inline]
        pub(crate) fn rewriting_from_req<V: AsRef<[u8]>>(
            value: V,
            url_map: Arc<dyn UrlMap>,
        ) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(RewriteHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,

                url_map: Some(url_map),
                authorizer: None,

                body_buffer: None,
            }
        }
    }

    impl HttpConnection<RewriteOnceHandler, ()> {
        #[inline]
        pub(crate) fn rewrite_once_from_req<V: AsRef<[u8]>>(
            value: V,
            url_map: Arc<dyn UrlMap>,
        ) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(RewriteOnceHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,

                url_map: Some(url_map),
                authorizer: None,

                body_buffer: None,
            }
        }
    }
}

#[cfg(test)]
mod dispatch_tests {
    use super::def_handler::{DefHandler, RewriteHandler, RewriteOnceHandler};
    use super::*;
    use crate::{AcceptEncoding, PrefixMap, RouteFlags};

    #[tokio::test]
    async fn no_url_map_skips_routing() {
        let mut t = HttpConnection::<DefHandler, ()>::from_req("GET / HTTP/1.1\r\n\r\n");
        t.parse().unwrap();

        t.dispatch().await.unwrap();
        assert!(t.response.buffer().starts_with(b"HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn unmatched_route_is_not_found() {
        let mut t = HttpConnection::<DefHandler, ()>::from_req("GET /missing HTTP/1.1\r\n\r\n");
        t.parse().unwrap();
        t.url_map = Some(Arc::new(PrefixMap::new()));

        assert_eq!(t.dispatch().await, Err(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn require_auth_without_authorizer_fails_closed() {
        let mut map = PrefixMap::new();
        map.insert(
            "/admin",
            RouteFlags {
                require_auth: true,
                ..RouteFlags::default()
            },
        );

        let mut t = HttpConnection::<DefHandler, ()>::from_req("GET /admin HTTP/1.1\r\n\r\n");
        t.parse().unwrap();
        t.url_map = Some(Arc::new(map));

        assert_eq!(t.dispatch().await, Err(ErrorKind::NotAuthorized));
    }

    #[tokio::test]
    async fn require_auth_with_default_authorizer_passes() {
        let mut map = PrefixMap::new();
        map.insert(
            "/admin",
            RouteFlags {
                require_auth: true,
                ..RouteFlags::default()
            },
        );

        let mut t = HttpConnection::<DefHandler, ()>::from_req("GET /admin HTTP/1.1\r\n\r\n");
        t.parse().unwrap();
        t.url_map = Some(Arc::new(map));
        t.authorizer = Some(Arc::new(()));

        t.dispatch().await.unwrap();
        assert!(t.response.buffer().starts_with(b"HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn strip_leading_slashes_sets_route_tail() {
        let mut map = PrefixMap::new();
        map.insert(
            "/api",
            RouteFlags {
                strip_leading_slashes: true,
                ..RouteFlags::default()
            },
        );

        let mut t = HttpConnection::<DefHandler, ()>::from_req("GET /api/users HTTP/1.1\r\n\r\n");
        t.parse().unwrap();
        t.url_map = Some(Arc::new(map));

        t.dispatch().await.unwrap();
        assert_eq!(t.request.route_tail(), b"users");
    }

    #[tokio::test]
    async fn parse_accept_encoding_flag_primes_accessor() {
        let mut map = PrefixMap::new();
        map.insert(
            "/",
            RouteFlags {
                parse_accept_encoding: true,
                ..RouteFlags::default()
            },
        );

        let mut t =
            HttpConnection::<DefHandler, ()>::from_req("GET / HTTP/1.1\r\nAccept-Encoding: gzip\r\n\r\n");
        t.parse().unwrap();
        t.url_map = Some(Arc::new(map));

        t.dispatch().await.unwrap();
        assert!(t.request.accept_encoding().contains(AcceptEncoding::GZIP));
    }

    #[tokio::test]
    async fn rewrite_loop_exceeds_cap() {
        let mut map = PrefixMap::new();
        map.insert(
            "/",
            RouteFlags {
                allow_rewrite: true,
                ..RouteFlags::default()
            },
        );

        let mut t = HttpConnection::<RewriteHandler, ()>::rewriting_from_req(
            "GET / HTTP/1.1\r\n\r\n",
            Arc::new(map),
        );
        t.parse().unwrap();

        assert_eq!(t.dispatch().await, Err(ErrorKind::RewriteLoopExceeded));
    }

    #[tokio::test]
    async fn rewrite_changes_the_dispatched_url() {
        let mut map = PrefixMap::new();
        map.insert(
            "/",
            RouteFlags {
                allow_rewrite: true,
                ..RouteFlags::default()
            },
        );

        let mut t = HttpConnection::<RewriteOnceHandler, ()>::rewrite_once_from_req(
            "GET /start HTTP/1.1\r\n\r\n",
            Arc::new(map),
        );
        t.parse().unwrap();

        t.dispatch().await.unwrap();

        assert!(t.response.buffer().ends_with(b"final"));
        assert_eq!(t.request.url().path(), b"/end");
        assert_eq!(t.request.url().query(b"from"), Some(b"start" as &[u8]));
    }

    #[tokio::test]
    async fn rewrite_without_allow_flag_is_a_no_op() {
        let mut map = PrefixMap::new();
        map.insert("/", RouteFlags::default());

        let mut t = HttpConnection::<RewriteOnceHandler, ()>::rewrite_once_from_req(
            "GET /start HTTP/1.1\r\n\r\n",
            Arc::new(map),
        );
        t.parse().unwrap();

        t.dispatch().await.unwrap();

        assert_eq!(t.request.url().path(), b"/start");
    }

    #[test]
    fn proxy_v2_get_sets_remote_from_preamble() {
        let mut input = b"\r\n\r\n\x00\r\n\x51\x55\x49\x54\x0A".to_vec();
        input.extend_from_slice(&[0x21, 0x11, 0x00, 0x0C]);
        input.extend_from_slice(&[127, 0, 0, 1]);
        input.extend_from_slice(&[10, 0, 0, 1]);
        input.extend_from_slice(&4444u16.to_be_bytes());
        input.extend_from_slice(&80u16.to_be_bytes());
        input.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");

        let mut t = HttpConnection::<DefHandler, ()>::from_req(&input);
        t.req_limits.allow_proxy = true;

        let (addresses, consumed) = crate::proxy::decode(t.parser.filled())
            .unwrap()
            .unwrap();
        t.parser.skip_preamble(consumed);
        t.request
            .set_addrs(addresses.source.unwrap(), addresses.destination.unwrap());

        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.request.client_addr(), "127.0.0.1:4444".parse().unwrap());
        assert_eq!(t.request.server_addr(), "10.0.0.1:80".parse().unwrap());
    }
}
