//! PROXY protocol v1 (text) and v2 (binary) preamble decoding.
//!
//! Only consulted when a connection is configured `allow_proxy`. Detects
//! the preamble from the first bytes of the buffer, and on success
//! reports how many leading bytes to skip before request-line parsing.

use crate::errors::ErrorKind;
use crate::http::types::parse_port;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

const V1_TAG: &[u8] = b"PROX";
const V2_SIGNATURE: &[u8] = b"\r\n\r\n\x00\r\n\x51\x55\x49\x54\x0A";
const V1_MAX_LEN: usize = 107;

/// Kept distinct from [`ProxyFamily`] on purpose: the v1 family token
/// and the v2 command byte share a numeric encoding space upstream, and
/// conflating them into one enum would let a v1 value be mistaken for
/// a v2 command or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProxyCommand {
    Local,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProxyFamily {
    Unspec,
    Inet,
    Inet6,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ProxyAddresses {
    pub(crate) family: ProxyFamily,
    pub(crate) source: Option<SocketAddr>,
    pub(crate) destination: Option<SocketAddr>,
}

impl ProxyAddresses {
    const LOCAL: ProxyAddresses = ProxyAddresses {
        family: ProxyFamily::Unspec,
        source: None,
        destination: None,
    };
}

/// Attempts to decode a PROXY preamble at the start of `buf`.
///
/// Returns `Ok(None)` when the buffer does not begin with either
/// signature (not an error: the preamble is optional even when the
/// listening socket allows it). Returns `Ok(Some((addresses, consumed)))`
/// on a fully-parsed preamble, where `consumed` is the number of leading
/// bytes to skip. Any malformed field rejects the entire request.
pub(crate) fn decode(buf: &[u8]) -> Result<Option<(ProxyAddresses, usize)>, ErrorKind> {
    if buf.starts_with(V1_TAG) {
        return decode_v1(buf).map(Some);
    }
    if buf.starts_with(V2_SIGNATURE) {
        return decode_v2(buf).map(Some);
    }
    Ok(None)
}

fn decode_v1(buf: &[u8]) -> Result<(ProxyAddresses, usize), ErrorKind> {
    let search_window = &buf[..buf.len().min(V1_MAX_LEN)];
    let line_end = memchr::memchr(b'\r', search_window)
        .filter(|&pos| search_window.get(pos + 1) == Some(&b'\n'))
        .ok_or(ErrorKind::InvalidProxyPreamble)?;

    let line = &buf[..line_end];
    let mut fields = line.split(|&b| b == b' ');

    if fields.next() != Some(b"PROXY") {
        return Err(ErrorKind::InvalidProxyPreamble);
    }

    let proto = fields.next().ok_or(ErrorKind::InvalidProxyPreamble)?;
    let src_ip = fields.next().ok_or(ErrorKind::InvalidProxyPreamble)?;
    let dst_ip = fields.next().ok_or(ErrorKind::InvalidProxyPreamble)?;
    let src_port = fields.next().ok_or(ErrorKind::InvalidProxyPreamble)?;
    let dst_port = fields.next().ok_or(ErrorKind::InvalidProxyPreamble)?;
    if fields.next().is_some() {
        return Err(ErrorKind::InvalidProxyPreamble);
    }

    let family = match proto {
        b"TCP4" => ProxyFamily::Inet,
        b"TCP6" => ProxyFamily::Inet6,
        _ => return Err(ErrorKind::InvalidProxyPreamble),
    };

    let src_port = parse_port(src_port).ok_or(ErrorKind::InvalidProxyPreamble)?;
    let dst_port = parse_port(dst_port).ok_or(ErrorKind::InvalidProxyPreamble)?;

    let (source, destination) = match family {
        ProxyFamily::Inet => (
            parse_ipv4(src_ip)?,
            parse_ipv4(dst_ip)?,
        ),
        ProxyFamily::Inet6 => (
            parse_ipv6(src_ip)?,
            parse_ipv6(dst_ip)?,
        ),
        ProxyFamily::Unspec => unreachable!(),
    };

    Ok((
        ProxyAddresses {
            family,
            source: Some(SocketAddr::new(source, src_port)),
            destination: Some(SocketAddr::new(destination, dst_port)),
        },
        line_end + 2,
    ))
}

fn parse_ipv4(text: &[u8]) -> Result<std::net::IpAddr, ErrorKind> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse::<Ipv4Addr>().ok())
        .map(std::net::IpAddr::V4)
        .ok_or(ErrorKind::InvalidProxyPreamble)
}

fn parse_ipv6(text: &[u8]) -> Result<std::net::IpAddr, ErrorKind> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse::<Ipv6Addr>().ok())
        .map(std::net::IpAddr::V6)
        .ok_or(ErrorKind::InvalidProxyPreamble)
}

fn decode_v2(buf: &[u8]) -> Result<(ProxyAddresses, usize), ErrorKind> {
    let header = buf
        .get(V2_SIGNATURE.len()..V2_SIGNATURE.len() + 4)
        .ok_or(ErrorKind::InvalidProxyPreamble)?;
    let (cmd_ver, fam, len) = (header[0], header[1], u16::from_be_bytes([header[2], header[3]]));

    let command = match cmd_ver {
        0x20 => ProxyCommand::Local,
        0x21 => ProxyCommand::Proxy,
        _ => return Err(ErrorKind::InvalidProxyPreamble),
    };

    let consumed = V2_SIGNATURE.len() + 4 + len as usize;
    let payload = buf
        .get(V2_SIGNATURE.len() + 4..consumed)
        .ok_or(ErrorKind::InvalidProxyPreamble)?;

    if command == ProxyCommand::Local {
        return Ok((ProxyAddresses::LOCAL, consumed));
    }

    let addresses = match fam {
        0x11 => parse_v2_addrs(payload, 4, |b| {
            std::net::IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        })
        .map(|(src, dst)| ProxyAddresses {
            family: ProxyFamily::Inet,
            source: Some(src),
            destination: Some(dst),
        }),
        0x21 => parse_v2_addrs(payload, 16, |b| {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(b);
            std::net::IpAddr::V6(Ipv6Addr::from(octets))
        })
        .map(|(src, dst)| ProxyAddresses {
            family: ProxyFamily::Inet6,
            source: Some(src),
            destination: Some(dst),
        }),
        _ => return Err(ErrorKind::InvalidProxyPreamble),
    }
    .ok_or(ErrorKind::InvalidProxyPreamble)?;

    Ok((addresses, consumed))
}

fn parse_v2_addrs(
    payload: &[u8],
    addr_len: usize,
    to_ip: impl Fn(&[u8]) -> std::net::IpAddr,
) -> Option<(SocketAddr, SocketAddr)> {
    if payload.len() < addr_len * 2 + 4 {
        return None;
    }

    let src_ip = to_ip(&payload[..addr_len]);
    let dst_ip = to_ip(&payload[addr_len..addr_len * 2]);
    let src_port = u16::from_be_bytes([payload[addr_len * 2], payload[addr_len * 2 + 1]]);
    let dst_port = u16::from_be_bytes([payload[addr_len * 2 + 2], payload[addr_len * 2 + 3]]);

    Some((
        SocketAddr::new(src_ip, src_port),
        SocketAddr::new(dst_ip, dst_port),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_tcp4() {
        let input = b"PROXY TCP4 1.2.3.4 5.6.7.8 1111 80\r\nGET / HTTP/1.1\r\n\r\n";
        let (addresses, consumed) = decode(input).unwrap().unwrap();

        assert_eq!(addresses.family, ProxyFamily::Inet);
        assert_eq!(
            addresses.source,
            Some("1.2.3.4:1111".parse().unwrap())
        );
        assert_eq!(&input[consumed..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn v1_malformed() {
        assert!(decode(b"PROXY TCP4 garbage\r\n").is_err());
    }

    #[test]
    fn no_preamble() {
        assert!(decode(b"GET / HTTP/1.1\r\n\r\n").unwrap().is_none());
    }

    #[test]
    fn v2_local() {
        let mut input = V2_SIGNATURE.to_vec();
        input.extend_from_slice(&[0x20, 0x00, 0x00, 0x00]);
        input.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");

        let (addresses, consumed) = decode(&input).unwrap().unwrap();
        assert_eq!(addresses.family, ProxyFamily::Unspec);
        assert_eq!(&input[consumed..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn v2_proxy_tcp4() {
        let mut input = V2_SIGNATURE.to_vec();
        input.extend_from_slice(&[0x21, 0x11, 0x00, 0x0C]);
        input.extend_from_slice(&[1, 2, 3, 4]);
        input.extend_from_slice(&[5, 6, 7, 8]);
        input.extend_from_slice(&1111u16.to_be_bytes());
        input.extend_from_slice(&80u16.to_be_bytes());

        let (addresses, consumed) = decode(&input).unwrap().unwrap();
        assert_eq!(addresses.family, ProxyFamily::Inet);
        assert_eq!(addresses.source, Some("1.2.3.4:1111".parse().unwrap()));
        assert_eq!(addresses.destination, Some("5.6.7.8:80".parse().unwrap()));
        assert_eq!(consumed, input.len());
    }
}
