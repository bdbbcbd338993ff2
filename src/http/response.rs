//! A highly efficient, zero-allocation HTTP response builder for embedded web servers.

use crate::{
    http::types::{StatusCode, Version},
    limits::RespLimits,
    BodyWriter, WriteBuffer,
};
use std::{borrow::Cow, rc::Rc, sync::Arc};

#[derive(Debug)]
/// HTTP response builder for constructing server responses.
///
/// Provides a fluent interface for building HTTP responses with status codes,
/// headers, and body content. Automatically handles content-length calculation
/// and connection management.
///
/// Build responses by chaining methods in strict order:
/// [`status()`](Response::status) -> headers -> any body method.
///
/// Instances are created automatically by the server and passed to
/// the [`Handler::handle`](crate::Handler::handle).
///
/// # Examples
/// ```
/// use corehttpd::{Handled, Request, Response, StatusCode};
///
/// // In your implementation `Handler`
/// async fn handle(_req: &Request, resp: &mut Response) -> Handled {
///     resp
///         .status(StatusCode::Ok)
///         .header("content-type", "text/html")
///         .body("<h1>Hello World</h1>")
/// }
/// ```
///
/// # Panics
/// All methods perform validity checks in `debug` mode that panic on violations.
/// In `release` mode, these checks are omitted for performance, which may
/// produce invalid HTTP responses. Before creating a release version, conduct tests.
pub struct Response {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    pub(crate) upgrade_requested: bool,
    pub(crate) rewritten: bool,
    pub(crate) rewrite_target: Option<Vec<u8>>,
    posit_length: usize,
    start_body: usize,
    state: ResponseState,
}

#[doc(hidden)]
pub struct Handled(());

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

impl Response {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
            upgrade_requested: false,
            rewritten: false,
            rewrite_target: None,
            posit_length: 0,
            start_body: 0,
            state: ResponseState::Clean,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.upgrade_requested = false;
        self.rewritten = false;
        self.rewrite_target = None;
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
    }

    /// Clears everything a handler wrote so [`rewrite`](Self::rewrite) can
    /// re-invoke the handler on the same request, keeping the negotiated
    /// `version`/`keep_alive`/`upgrade_requested` state intact.
    #[inline(always)]
    pub(crate) fn rewind(&mut self) {
        self.buffer.clear();
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &Vec<u8> {
        &self.buffer
    }
}

/// Methods that work with all protocols
impl Response {
    /// Forces the connection to close after a response.
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .close()  // Connection will close after this response
    ///     .body("Closing connection")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error messages:
    /// - `Must be called before any finalizing method`
    ///
    /// Panics in `debug` mode when:
    /// - Called after any finalizing method (method returning `Handler`)
    #[inline]
    #[track_caller]
    pub fn close(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.keep_alive = false;
        self
    }

    /// Requests that dispatch re-parse `target` as the request's URL and
    /// re-invoke the handler against it, instead of finishing the
    /// response as-is.
    ///
    /// Only takes effect on routes whose
    /// [`allow_rewrite`](crate::RouteFlags::allow_rewrite) flag is set;
    /// bounded by a rewrite cap, past which dispatch surfaces an error
    /// instead of looping forever. `target` replaces the request's path,
    /// query and fragment; it is re-parsed exactly like a request-line
    /// URL, including percent-decoding and query sorting.
    #[inline]
    pub fn rewrite(&mut self, target: impl AsRef<[u8]>) -> &mut Self {
        self.rewrite_target = Some(target.as_ref().to_vec());
        self.rewritten = true;
        self
    }
}

/// Methods for working with `HTTP/1.X` (HTTP/1.0 or HTTP/1.1)
impl Response {
    /// Sets the HTTP status code for the response.
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::NotFound)
    ///     .body(r#"{"status": "not found", "code": 404}"#)
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be first and called only once`
    ///
    /// Panics in `debug` mode when:
    /// - Called multiple times
    /// - Called after any body method
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.into_first_line(self.version));
        self.state = ResponseState::Headers;
        self
    }

    /// Adds a header to the response.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADINGS:
    /// - `content-length` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "text/plain")        // &str, &str
    ///     .header("x-custom-id", 128)                  // &str, i32  
    ///     .header("x-cache-enabled", true)             // &str, bool
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");
        value.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Add a multi-value header to the response
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADINGS:
    /// - `content-length` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header_multi(b"x-tags", ", ", ["user"])
    ///     // x-tags: user
    ///     .header_multi("accept", "; ", ["text/html", "text/plain"])
    ///     // accept: text/html; text/plain
    ///     .header_multi("id-users", ", ", vec![123, 234, 345])
    ///     // id-users: 123, 234, 345
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn header_multi<N, S, I, V>(&mut self, name: N, split: S, values: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut self.buffer);

            for value in iter {
                split.write_to(&mut self.buffer);
                value.write_to(&mut self.buffer);
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a header with parameters to the response.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADINGS:
    /// - `content-length` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header_params("content-type", "; ", vec![
    ///         ("text/html", None),
    ///         ("charset", Some("utf-8")),
    ///     ])
    ///     // Content-Type: text/html; charset=utf-8
    ///     .header_params("cache-control", ", ", [
    ///         ("max-age", Some("3600")),
    ///         ("must-revalidate", None),
    ///     ])
    ///     // Cache-Control: max-age=3600, must-revalidate
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn header_params<N, S, I, K, V>(&mut self, name: N, split: S, params: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: WriteBuffer,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = params.into_iter();
        if let Some((first_key, first_val)) = iter.next() {
            first_key.write_to(&mut self.buffer);
            if let Some(val) = first_val {
                self.buffer.extend_from_slice(b"=");
                val.write_to(&mut self.buffer);
            }

            for (key, value) in iter {
                split.write_to(&mut self.buffer);
                key.write_to(&mut self.buffer);
                if let Some(val) = value {
                    self.buffer.extend_from_slice(b"=");
                    val.write_to(&mut self.buffer);
                }
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Sets the response body and finalizes the response.
    ///
    /// # Side Effects
    /// - Adds a `connection` header if necessary
    /// - Calculates and sets the `content-length` header
    ///
    /// After calling this method, the response is considered complete
    /// and cannot be modified further.
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    //
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "text/plain")
    ///     .body("Hello, World!")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        data.write_to(&mut self.buffer);
        self.end_body()
    }

    /// Writes the response body via closure and finalizes the response.
    ///
    /// # Side Effects
    /// - Adds a `connection` header if necessary
    /// - Calculates and sets the `content-length` header
    ///
    /// After calling this method, the response is considered complete
    /// and cannot be modified further.
    ///
    /// # Examples
    /// Using [`write!`]:
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    /// use std::io::Write;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "application/json")
    ///     .body_with(|writer| {
    ///         // Write JSON directly to the buffer
    ///         write!(writer, r#"{{"status": "ok", "message": "Hello"}}"#);
    ///     })
    /// # });
    /// ```
    /// Using [`WriteBuffer`]:
    /// ```rust
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "application/octet-stream")
    ///     .body_with(|writer| {
    ///         writer.write(b"lib: ");
    ///         writer.write("corehttpd");
    ///         writer.write(b", love_is_lib: ");
    ///         writer.write(true);
    ///         writer.write(b", just_number: ");
    ///         writer.write(123456);
    ///     })
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        f(&mut BodyWriter(&mut self.buffer));
        self.end_body()
    }
}

/// WebSocket upgrade handshake.
impl Response {
    /// Completes a WebSocket upgrade handshake for `request`.
    ///
    /// Requires that the client negotiated `Connection: Upgrade`, sent
    /// `Upgrade: websocket`, and a syntactically valid
    /// `Sec-WebSocket-Key`. On success writes a `101 Switching Protocols`
    /// response with the computed `Sec-WebSocket-Accept`; otherwise writes
    /// a `400 Bad Request`.
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|req, resp| {
    /// resp.upgrade(req)
    /// # });
    /// ```
    ///
    /// # Panics
    /// Panics in `debug` mode if called after [`status()`](Self::status).
    #[inline]
    #[track_caller]
    pub fn upgrade(&mut self, request: &super::request::Request) -> Handled {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be called before status() or any other response method"
        );

        let accept = self
            .upgrade_requested
            .then(|| request.header(b"upgrade"))
            .flatten()
            .filter(|value| value.eq_ignore_ascii_case(b"websocket"))
            .and_then(|_| request.header(b"sec-websocket-key"))
            .and_then(|key| crate::websocket::accept_key(key).ok());

        match accept {
            Some(accept) => self
                .status(StatusCode::SwitchingProtocols)
                .header("upgrade", "websocket")
                .header("connection", "Upgrade")
                .header("sec-websocket-accept", accept)
                .body(""),
            None => self
                .status(StatusCode::BadRequest)
                .close()
                .body("WebSocket upgrade precondition failed"),
        }
    }
}

impl Response {
    #[inline(always)]
    #[track_caller]
    fn start_body(&mut self) -> &mut Self {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        self.buffer.extend_from_slice(b"content-length: ");
        self.posit_length = self.buffer.len();
        self.buffer.extend_from_slice(b"0000000000\r\n\r\n");
        self.start_body = self.buffer.len();
        self
    }

    #[inline(always)]
    fn end_body(&mut self) -> Handled {
        let body_len = self.buffer.len() - self.start_body;
        let (arr, _) = Response::number_to_bytes(body_len as u128);

        let target_range = self.posit_length..self.posit_length + 10;
        self.buffer[target_range].copy_from_slice(&arr[29..39]);
        self.state = ResponseState::Complete;

        Handled(())
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static [u8]> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some(b"close"),
            (Version::Http10, true) => Some(b"keep-alive"),
            (Version::Http10, false) => Some(b"close"),
            _ => None,
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }
}

pub mod write {
    use super::*;

    /// Writer for constructing the HTTP response body.
    /// Used in [body_with](Response::body_with).
    ///
    /// # Examples
    ///
    /// With [WriteBuffer]:
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .body_with(|w| {
    ///         w.write("This goes in the response body");
    ///         w.write("<html>...</html>");
    ///         w.write(true);
    ///     })
    /// # });
    /// ```
    /// With [std::io::Write]:
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    /// use std::io::Write;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .body_with(|w| {
    ///         write!(w, "This goes in the response body");
    ///         write!(w, "{} - {} = {}", 6, 2, 4);
    ///     })
    /// # });
    /// ```
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        ///
        /// Adds data to the body section of the HTTP response. This method
        /// only affects the response body, not headers or status.
        ///
        /// # Examples
        /// ```
        /// # corehttpd::run_test(|_, resp| {
        /// use corehttpd::StatusCode;
        ///
        /// resp.status(StatusCode::Ok)
        ///     .body_with(|w| {
        ///         w.write("Hello");
        ///         w.write(123);
        ///         w.write(true);
        ///     })
        /// # });
        /// ```
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing data to the [`Response`] buffer.
    ///
    /// Implemented for common types like strings, bytes, booleans
    /// and numeric types (excluding floating-point numbers)
    ///
    /// # Note on Floating-Point
    /// Floating-point numbers are not implemented to avoid locale-dependent
    /// formatting and precision issues in protocol headers.
    ///
    /// For explicit float serialization, consider using the
    /// [`ryu`](https://crates.io/crates/ryu)
    /// crate or formatting to string with controlled precision.
    ///
    /// # Example
    /// ```
    /// use corehttpd::WriteBuffer;
    ///
    /// struct MyString(String);
    ///
    /// impl WriteBuffer for MyString {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(self.0.as_bytes())
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        ///
        /// This should avoid intermediate allocations and write the
        /// most efficient representation possible.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = Response::number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        let abs = value.unsigned_abs();

        let (arr, start) = Response::number_to_bytes(abs);
        buffer.extend_from_slice(&arr[start..]);
    }
}


#[cfg(test)]
mod status_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (StatusCode::Ok, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::NotFound, "HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::Found, "HTTP/1.1 302 Found\r\n"),
            (StatusCode::BadRequest, "HTTP/1.1 400 Bad Request\r\n"),
        ];

        for (status, result) in cases {
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);
            assert_eq!(resp.state, ResponseState::Clean);

            resp.status(status);
            assert_eq!(str_op(&resp.buffer), result);
            assert_eq!(resp.state, ResponseState::Headers);
        }
    }

    #[test]
    #[should_panic(expected = "Must be first and called only once")]
    fn double_call() {
        Response::new(&RespLimits::default())
            .status(StatusCode::Ok)
            .status(StatusCode::Found);
    }

}

#[cfg(test)]
mod header_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_header {
        ($method:ident, $(($name:expr $(, $params:expr)*; $result:expr);)*) => {
           #[test] fn $method() {$(
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);

            resp.status(StatusCode::Ok);
            assert_eq!(resp.state, ResponseState::Headers);

            resp.$method($name $(, $params)*);
            assert_eq!(str_op(&resp.buffer[17..]), $result);
            assert_eq!(resp.state, ResponseState::Headers);
        )*}};
    }

    test_header! {header,
        ("name", "value"; "name: value\r\n");
        ("", "value"; ": value\r\n");
        ("name", ""; "name: \r\n");

        ("name", 123; "name: 123\r\n");
        ("name", vec![35, 33, 43]; "name: #!+\r\n");
        ("name", false; "name: false\r\n");
        ("name", -123; "name: -123\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_before_status() {
        Response::new(&RespLimits::default()).header("Name", "value");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header("Name", "value");
    }

    test_header! {header_multi,
        ("name", ", ", ["q", "w", "e"]; "name: q, w, e\r\n");
        ("name", ",", [true, false]; "name: true,false\r\n");
        ("name", "; ", [-123, 123]; "name: -123; 123\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_multi_before_status() {
        Response::new(&RespLimits::default()).header_multi("Name", ",", ["value1", "value2"]);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_multi_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header_multi("Name", ",", ["value1", "value2"]);
    }

    test_header! {header_params,
        ("name", ", ", [("name", Some("value"))]; "name: name=value\r\n");
        (
            "name", ", ", [("q", Some("1")), ("w", Some("2")), ("e", Some("3"))];
            "name: q=1, w=2, e=3\r\n"
        );
        (
            "name", ";", [("q", Some("v1")), ("w", Some("v2")), ("e", Some("v3"))];
            "name: q=v1;w=v2;e=v3\r\n"
        );
        (
            "name", ", ", [("min", Some(-128)), ("max", Some(128)), ("mean", Some(0))];
            "name: min=-128, max=128, mean=0\r\n"
        );
        (
            "u128", ", ", [("min", Some(u128::MIN)), ("max", Some(u128::MAX))];
            "u128: min=0, max=340282366920938463463374607431768211455\r\n"
        );
        (
            "i128", ", ", [("min", Some(i128::MIN)), ("max", Some(i128::MAX))];
    "i128: min=-170141183460469231731687303715884105728, max=170141183460469231731687303715884105727\r\n"
        );
        (
            "name", ", ", [("debug", Some(true)), ("doc", Some(false))];
            "name: debug=true, doc=false\r\n"
        );
        (
            "name", "; ", [("debug", None), ("text", Some("asd"))];
            "name: debug; text=asd\r\n"
        );
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_params_before_status() {
        Response::new(&RespLimits::default()).header_params(
            "Name",
            ",",
            [("name1", Some("value1")), ("name2", None)],
        );
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_params_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header_params("Name", ",", [("name1", Some("value1")), ("name2", None)]);
    }
}
