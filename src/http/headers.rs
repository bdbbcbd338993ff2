//! Lazy, idempotent accessors for the headers that need more than a raw
//! span: `Range`, `If-Modified-Since`, `Accept-Encoding`, `Connection`.

use crate::http::types::Version;

/// Tiny local stand-in for a bitflags-style type: this crate pulls in no
/// bitflags dependency for two bits.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident: $repr:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        $vis struct $name($repr);

        impl $name {
            $($vis const $flag: $name = $name($value);)*

            #[inline(always)]
            $vis const fn empty() -> Self {
                $name(0)
            }

            #[inline(always)]
            $vis const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOrAssign for $name {
            #[inline(always)]
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

/// A parsed `Range` header. `-1` on either end means "absent/invalid" and
/// the accessor should report the range as not present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    pub from: i64,
    pub to: i64,
}

impl Range {
    pub const ABSENT: Range = Range { from: -1, to: -1 };

    /// Parses `bytes=%u-%u`, `bytes=-%u` (suffix, last N bytes) or
    /// `bytes=%u-` (open-ended). Any other shape, or arithmetic overflow,
    /// yields [`Range::ABSENT`].
    pub(crate) fn parse(value: &[u8]) -> Range {
        let Some(rest) = value.strip_prefix(b"bytes=") else {
            return Range::ABSENT;
        };

        let Some(dash) = memchr::memchr(b'-', rest) else {
            return Range::ABSENT;
        };
        let (before, after) = (&rest[..dash], &rest[dash + 1..]);

        match (before.is_empty(), after.is_empty()) {
            (true, true) => Range::ABSENT,
            (true, false) => match crate::http::types::slice_to_usize(after) {
                Some(n) => Range {
                    from: 0,
                    to: n as i64,
                },
                None => Range::ABSENT,
            },
            (false, true) => match crate::http::types::slice_to_usize(before) {
                Some(n) => Range {
                    from: n as i64,
                    to: -1,
                },
                None => Range::ABSENT,
            },
            (false, false) => {
                match (
                    crate::http::types::slice_to_usize(before),
                    crate::http::types::slice_to_usize(after),
                ) {
                    (Some(from), Some(to)) => Range {
                        from: from as i64,
                        to: to as i64,
                    },
                    _ => Range::ABSENT,
                }
            }
        }
    }
}

/// Parses an RFC-1123 `If-Modified-Since` value to a Unix epoch. Any
/// unparsable value yields `None`, which the accessor treats as "not
/// present" rather than surfacing a parse error.
pub(crate) fn parse_if_modified_since(value: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(value).ok()?;
    let time = httpdate::parse_http_date(text).ok()?;
    time.duration_since(std::time::UNIX_EPOCH).ok().map(|d| d.as_secs())
}

bitflags_like! {
    /// Encodings accepted via `Accept-Encoding`.
    pub struct AcceptEncoding: u8 {
        const GZIP = 0b01;
        const DEFLATE = 0b10;
    }
}

/// Walks comma-separated `Accept-Encoding` tokens, OR-ing in the flags
/// for recognized encodings. Matches on the full token (not a 4-byte
/// prefix) so `gzippy` does not false-match `gzip`.
pub(crate) fn parse_accept_encoding(value: &[u8]) -> AcceptEncoding {
    let mut flags = AcceptEncoding::empty();

    for token in value.split(|&b| b == b',') {
        let token = trim(token);
        if token.eq_ignore_ascii_case(b"gzip") {
            flags |= AcceptEncoding::GZIP;
        } else if token.eq_ignore_ascii_case(b"deflate") {
            flags |= AcceptEncoding::DEFLATE;
        }
    }

    flags
}

/// Result of parsing the `Connection` header: whether the peer asked to
/// upgrade, and the negotiated keep-alive outcome for this version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectionDirective {
    pub(crate) upgrade: bool,
    pub(crate) keep_alive: bool,
}

/// Walks comma-separated `Connection` tokens (`keep-alive`, `close`,
/// `upgrade`). An `upgrade` token unconditionally requests a protocol
/// switch. The final keep-alive decision depends on the HTTP version:
/// 1.1 defaults to keep-alive unless `close` is present; 1.0 defaults
/// to close unless `keep-alive` is explicitly present.
pub(crate) fn parse_connection(value: Option<&[u8]>, version: Version) -> ConnectionDirective {
    let mut saw_close = false;
    let mut saw_keep_alive = false;
    let mut upgrade = false;

    if let Some(value) = value {
        for token in value.split(|&b| b == b',') {
            let token = trim(token);
            if token.eq_ignore_ascii_case(b"close") {
                saw_close = true;
            } else if token.eq_ignore_ascii_case(b"keep-alive") {
                saw_keep_alive = true;
            } else if token.eq_ignore_ascii_case(b"upgrade") {
                upgrade = true;
            }
        }
    }

    let keep_alive = match version {
        Version::Http11 => !saw_close,
        Version::Http10 => saw_keep_alive,
    };

    ConnectionDirective { upgrade, keep_alive }
}

#[inline(always)]
fn trim(token: &[u8]) -> &[u8] {
    let start = token.iter().position(|&b| b != b' ').unwrap_or(token.len());
    let end = token.iter().rposition(|&b| b != b' ').map_or(start, |p| p + 1);
    &token[start..end]
}

#[cfg(test)]
mod range_tests {
    use super::*;

    #[test]
    fn forms() {
        let cases = [
            ("bytes=0-10", Range { from: 0, to: 10 }),
            ("bytes=-10", Range { from: 0, to: 10 }),
            ("bytes=10-", Range { from: 10, to: -1 }),
            ("bytes=5-2", Range { from: 5, to: 2 }),
            ("bytes=abc", Range::ABSENT),
            ("nonsense", Range::ABSENT),
        ];

        for (input, expected) in cases {
            assert_eq!(Range::parse(input.as_bytes()), expected, "input={input}");
        }
    }
}

#[cfg(test)]
mod accept_encoding_tests {
    use super::*;

    #[test]
    fn basic() {
        assert!(parse_accept_encoding(b"gzip").contains(AcceptEncoding::GZIP));
        assert!(parse_accept_encoding(b"gzip, deflate").contains(AcceptEncoding::DEFLATE));
        assert!(!parse_accept_encoding(b"gzippy").contains(AcceptEncoding::GZIP));
        assert!(!parse_accept_encoding(b"br").contains(AcceptEncoding::GZIP));
    }
}
