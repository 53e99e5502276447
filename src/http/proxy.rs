//! HAProxy PROXY protocol (v1 and v2) preamble decoder.
//!
//! Runs before the request line, and only when the connection driver was
//! configured to accept proxied connections. Both versions carry the
//! original peer and destination addresses for TCP4/TCP6; the v2 `LOCAL`
//! command is accepted and yields unspecified addresses.

use crate::http::types::slice_to_u64;
use memchr::memchr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Addresses recovered from a PROXY preamble.
///
/// `None` means the forwarding proxy declared the address unspecified
/// (v2 `LOCAL` command, e.g. a health check).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyInfo {
    pub from: Option<SocketAddr>,
    pub to: Option<SocketAddr>,
}

/// Outcome of peeking at the start of the read buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ProxyHeader {
    /// The buffer does not start with a PROXY preamble; parsing resumes
    /// at the same position.
    Absent,
    /// A preamble was consumed; the request line starts at `consumed`.
    Present { info: ProxyInfo, consumed: usize },
}

// v1 lines are at most 107 bytes plus CRLF.
const V1_MAX_LINE: usize = 108;

// v2 fixed part: 12-byte signature, command/version, family, length.
const V2_HEADER_LEN: usize = 16;
// Largest address block we accept: two IPv6 addresses plus two ports.
const V2_MAX_ADDR_LEN: usize = 16 + 16 + 2 + 2;

/// Dispatches on the first four bytes of the buffer. Returns `None` for
/// a preamble that announced itself but is malformed; the driver turns
/// that into `400 Bad Request`.
pub(crate) fn parse_proxy_protocol(buf: &[u8]) -> Option<ProxyHeader> {
    match buf {
        [b'P', b'R', b'O', b'X', ..] => parse_v1(buf),
        [b'\r', b'\n', b'\r', b'\n', ..] => parse_v2(buf),
        _ => Some(ProxyHeader::Absent),
    }
}

fn parse_ascii_port(field: &[u8]) -> Option<u16> {
    let port = slice_to_u64(field)?;
    u16::try_from(port).ok()
}

fn parse_v1(buf: &[u8]) -> Option<ProxyHeader> {
    let window = &buf[..buf.len().min(V1_MAX_LINE)];
    let cr = memchr(b'\r', window)?;
    if buf.get(cr + 1) != Some(&b'\n') {
        return None;
    }

    let line = &buf[..cr];
    let rest = line.strip_prefix(b"PROXY ")?;

    let mut fields = rest.split(|&b| b == b' ');
    let protocol = fields.next()?;
    let src_addr = fields.next()?;
    let dst_addr = fields.next()?;
    let src_port = parse_ascii_port(fields.next()?)?;
    let dst_port = parse_ascii_port(fields.next()?)?;
    if fields.next().is_some() {
        return None;
    }

    let (from, to) = match protocol {
        b"TCP4" => (
            IpAddr::V4(parse_ip::<Ipv4Addr>(src_addr)?),
            IpAddr::V4(parse_ip::<Ipv4Addr>(dst_addr)?),
        ),
        b"TCP6" => (
            IpAddr::V6(parse_ip::<Ipv6Addr>(src_addr)?),
            IpAddr::V6(parse_ip::<Ipv6Addr>(dst_addr)?),
        ),
        _ => return None,
    };

    Some(ProxyHeader::Present {
        info: ProxyInfo {
            from: Some(SocketAddr::new(from, src_port)),
            to: Some(SocketAddr::new(to, dst_port)),
        },
        consumed: cr + 2,
    })
}

fn parse_ip<T: std::str::FromStr>(field: &[u8]) -> Option<T> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

fn parse_v2(buf: &[u8]) -> Option<ProxyHeader> {
    const LOCAL: u8 = 0x20;
    const PROXY: u8 = 0x21;
    const TCP4: u8 = 0x11;
    const TCP6: u8 = 0x21;

    if buf.len() < V2_HEADER_LEN {
        return None;
    }

    let cmd_ver = buf[12];
    let fam = buf[13];
    let addr_len = u16::from_be_bytes([buf[14], buf[15]]) as usize;

    if addr_len > V2_MAX_ADDR_LEN {
        return None;
    }
    let consumed = V2_HEADER_LEN + addr_len;
    if buf.len() < consumed {
        return None;
    }

    let addr = &buf[V2_HEADER_LEN..consumed];

    let info = match (cmd_ver, fam) {
        (LOCAL, _) => ProxyInfo {
            from: None,
            to: None,
        },
        (PROXY, TCP4) if addr.len() >= 12 => {
            let src: [u8; 4] = addr[0..4].try_into().ok()?;
            let dst: [u8; 4] = addr[4..8].try_into().ok()?;
            let src_port = u16::from_be_bytes([addr[8], addr[9]]);
            let dst_port = u16::from_be_bytes([addr[10], addr[11]]);

            ProxyInfo {
                from: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(src)), src_port)),
                to: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(dst)), dst_port)),
            }
        }
        (PROXY, TCP6) if addr.len() >= 36 => {
            let src: [u8; 16] = addr[0..16].try_into().ok()?;
            let dst: [u8; 16] = addr[16..32].try_into().ok()?;
            let src_port = u16::from_be_bytes([addr[32], addr[33]]);
            let dst_port = u16::from_be_bytes([addr[34], addr[35]]);

            ProxyInfo {
                from: Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(src)), src_port)),
                to: Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(dst)), dst_port)),
            }
        }
        _ => return None,
    };

    Some(ProxyHeader::Present { info, consumed })
}
