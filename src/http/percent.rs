//! In-place percent-decoding and generic key/value splitting for query strings,
//! form bodies and cookies.

use crate::http::types::hex_digit;

/// Percent-decodes `%XY` escapes and turns `+` into a space, in place.
///
/// Returns the new (shorter-or-equal) length of the decoded data, which
/// always occupies a prefix of `buf`. Decoding to a NUL byte is rejected:
/// callers rely on spans never hiding an embedded terminator.
#[inline]
pub(crate) fn decode_in_place(buf: &mut [u8]) -> Option<usize> {
    let mut read = 0;
    let mut write = 0;

    while read < buf.len() {
        let byte = buf[read];

        let decoded = match byte {
            b'%' => {
                let (hi, lo) = (*buf.get(read + 1)?, *buf.get(read + 2)?);
                if !hi.is_ascii_hexdigit() || !lo.is_ascii_hexdigit() {
                    return None;
                }
                read += 2;
                (hex_digit(hi) << 4) | hex_digit(lo)
            }
            b'+' => b' ',
            other => other,
        };

        if decoded == 0 {
            return None;
        }

        buf[write] = decoded;
        write += 1;
        read += 1;
    }

    Some(write)
}

/// Splits `data` on `sep`, yielding raw `(key, value)` spans.
///
/// A token with no `=` yields an empty value, matching the query-string
/// and cookie conventions. The separator occurs in practice as `&` for
/// query strings and form bodies, `;` for cookies.
pub(crate) fn split_kv(data: &[u8], sep: u8) -> impl Iterator<Item = (&[u8], &[u8])> {
    data.split(move |&b| b == sep).filter_map(move |token| {
        let trimmed = trim_leading_space(token);
        if trimmed.is_empty() {
            return None;
        }

        match memchr::memchr(b'=', trimmed) {
            Some(pos) => Some((&trimmed[..pos], &trimmed[pos + 1..])),
            None => Some((trimmed, &trimmed[trimmed.len()..])),
        }
    })
}

#[inline(always)]
fn trim_leading_space(token: &[u8]) -> &[u8] {
    match token.first() {
        Some(b' ') => &token[1..],
        _ => token,
    }
}

/// Outcome of building a lazily-populated sorted key/value array.
///
/// A single malformed entry (an empty decoded key) discards the whole
/// array rather than producing a partial result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvError {
    Malformed,
}

/// Builds a key/value array sorted by key, percent-decoding keys and,
/// optionally, values (cookies keep their raw value; query and form
/// fields decode both sides).
pub(crate) fn parse_sorted<'a>(
    data: &'a [u8],
    sep: u8,
    decode_values: bool,
    limit: usize,
) -> Result<Vec<(&'a [u8], &'a [u8])>, KvError> {
    let mut out = Vec::with_capacity(limit.min(64));
    parse_sorted_into(&mut out, data, sep, decode_values, limit)?;
    Ok(out)
}

/// Same as [`parse_sorted`], but fills an existing `Vec` in place instead
/// of allocating a new one. Used on the eager request-parsing path (the
/// query string), where a fresh allocation per request would defeat the
/// point of reusing the connection's buffers.
///
/// `out` is cleared up front; on `Err` it may hold a partial result and
/// callers must not treat it as the prior request's data.
pub(crate) fn parse_sorted_into<'a>(
    out: &mut Vec<(&'a [u8], &'a [u8])>,
    data: &'a [u8],
    sep: u8,
    decode_values: bool,
    limit: usize,
) -> Result<(), KvError> {
    out.clear();

    for (raw_key, raw_value) in split_kv(data, sep) {
        if out.len() >= limit {
            break;
        }

        // SAFETY: `raw_key`/`raw_value` are spans into a buffer the caller
        // owns for the lifetime of the request; decoding only ever shrinks
        // the span, so the returned slice stays within the original bounds.
        let key = unsafe { decode_span(raw_key) }.ok_or(KvError::Malformed)?;
        if key.is_empty() {
            return Err(KvError::Malformed);
        }

        let value = if decode_values {
            unsafe { decode_span(raw_value) }.ok_or(KvError::Malformed)?
        } else {
            raw_value
        };

        out.push((key, value));
    }

    // Stable: when two entries share a key, the earliest one in the
    // original data keeps the lowest index, so lookup_sorted's
    // first-occurrence-wins rule is well defined.
    out.sort_by(|a, b| a.0.cmp(b.0));
    Ok(())
}

#[inline]
unsafe fn decode_span<'a>(span: &'a [u8]) -> Option<&'a [u8]> {
    let mutable = std::slice::from_raw_parts_mut(span.as_ptr().cast_mut(), span.len());
    let len = decode_in_place(mutable)?;
    Some(&mutable[..len])
}


#[cfg(test)]
mod split_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn query_style() {
        let parts: Vec<_> = split_kv(b"a=1&b=2&flag", b'&').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(str_2(parts[0]), ("a", "1"));
        assert_eq!(str_2(parts[1]), ("b", "2"));
        assert_eq!(str_2(parts[2]), ("flag", ""));
    }

    #[test]
    fn cookie_style() {
        let parts: Vec<_> = split_kv(b"a=1; b=2", b';').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(str_2(parts[0]), ("a", "1"));
        assert_eq!(str_2(parts[1]), ("b", "2"));
    }
}

#[cfg(test)]
mod sorted_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn sorts_by_key() {
        let parsed = parse_sorted(b"b=2&a=1&c=3", b'&', true, 8).ok().unwrap();
        assert_eq!(str_2(parsed[0]), ("a", "1"));
        assert_eq!(str_2(parsed[1]), ("b", "2"));
        assert_eq!(str_2(parsed[2]), ("c", "3"));
    }

    #[test]
    fn empty_key_rejects_whole_array() {
        assert!(parse_sorted(b"=orphan&a=1", b'&', true, 8).is_err());
    }

    #[test]
    fn cookie_values_not_decoded() {
        let parsed = parse_sorted(b"session=a%2Bb", b';', false, 8).ok().unwrap();
        assert_eq!(str_2(parsed[0]), ("session", "a%2Bb"));
    }
}
