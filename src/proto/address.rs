// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! Target address and connection ID fields shared by QINQ messages and
//! inline datagram headers.
//!
//! ```text
//! | addr len (1) = 4 or 16 | addr (4/16) | port (2) | cid len (1) | cid (0..=20) |
//! ```

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

use bytes::{Buf, BufMut};

use crate::ConnectionId;
use crate::coding::BufExt;
use crate::error::{QinqError, QinqResult};

/// Address length byte for IPv4 targets
pub const IPV4_ADDRESS_LENGTH: u8 = 4;

/// Address length byte for IPv6 targets
pub const IPV6_ADDRESS_LENGTH: u8 = 16;

/// Decode a length-prefixed address followed by its port
///
/// IPv6 results carry no flow label or scope, so that equality is purely
/// structural.
pub fn decode_target<B: Buf>(buf: &mut B) -> QinqResult<SocketAddr> {
    let target = match buf.get::<u8>()? {
        IPV4_ADDRESS_LENGTH => {
            let ip = buf.get::<Ipv4Addr>()?;
            SocketAddr::new(ip.into(), buf.get::<u16>()?)
        }
        IPV6_ADDRESS_LENGTH => {
            let ip = buf.get::<Ipv6Addr>()?;
            SocketAddrV6::new(ip, buf.get::<u16>()?, 0, 0).into()
        }
        _ => return Err(QinqError::Malformed("address length must be 4 or 16")),
    };
    Ok(target)
}

/// Encode a length-prefixed address followed by its port
pub fn encode_target<B: BufMut>(target: &SocketAddr, buf: &mut B) {
    match target {
        SocketAddr::V4(v4) => {
            buf.put_u8(IPV4_ADDRESS_LENGTH);
            buf.put_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            buf.put_u8(IPV6_ADDRESS_LENGTH);
            buf.put_slice(&v6.ip().octets());
        }
    }
    buf.put_u16(target.port());
}

/// Encoded size of a target written by [`encode_target`]
pub fn target_size(target: &SocketAddr) -> usize {
    let ip_size = match target {
        SocketAddr::V4(_) => 4,
        SocketAddr::V6(_) => 16,
    };
    1 + ip_size + 2
}

/// Decode a length-prefixed connection ID; length 0 is legal
pub fn decode_connection_id<B: Buf>(buf: &mut B) -> QinqResult<ConnectionId> {
    ConnectionId::decode_long(buf).ok_or(QinqError::Malformed("invalid connection ID length"))
}

/// Encode a length-prefixed connection ID
pub fn encode_connection_id<B: BufMut>(cid: &ConnectionId, buf: &mut B) {
    cid.encode_long(buf);
}

/// Encoded size of a connection ID written by [`encode_connection_id`]
pub fn connection_id_size(cid: &ConnectionId) -> usize {
    1 + cid.len()
}

/// Normalize an address to the form produced by [`decode_target`]
pub fn canonical(target: SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => target,
        SocketAddr::V6(v6) => SocketAddrV6::new(*v6.ip(), v6.port(), 0, 0).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_layout() {
        let target: SocketAddr = "10.0.0.1:443".parse().unwrap();
        let mut buf = Vec::new();
        encode_target(&target, &mut buf);
        assert_eq!(buf, [4, 10, 0, 0, 1, 1, 187]);
        assert_eq!(buf.len(), target_size(&target));
        assert_eq!(decode_target(&mut &buf[..]).unwrap(), target);
    }

    #[test]
    fn ipv6_layout() {
        let target: SocketAddr = "[2001::dead:beef]:4660".parse().unwrap();
        let mut buf = Vec::new();
        encode_target(&target, &mut buf);
        assert_eq!(buf.len(), 19);
        assert_eq!(buf[0], 16);
        assert_eq!(&buf[17..], &[0x12, 0x34]);
        assert_eq!(decode_target(&mut &buf[..]).unwrap(), target);
    }

    #[test]
    fn bad_address_length() {
        let mut buf: &[u8] = &[6, 10, 0, 0, 1, 0, 80];
        assert_eq!(
            decode_target(&mut buf),
            Err(QinqError::Malformed("address length must be 4 or 16"))
        );
    }

    #[test]
    fn truncated_port() {
        let mut buf: &[u8] = &[4, 10, 0, 0, 1, 1];
        assert!(decode_target(&mut buf).unwrap_err().is_decode_error());
    }

    #[test]
    fn scope_is_dropped() {
        let scoped = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 443, 7, 3));
        let plain: SocketAddr = "[::1]:443".parse().unwrap();
        assert_eq!(canonical(scoped), plain);
    }
}
