// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! Destination connection ID elision for proxied QUIC packets
//!
//! When the proxied traffic is itself QUIC, the destination connection ID is
//! already carried by the compression entry, so it is cut out of the packet
//! before tunneling and spliced back in on the far side.
//!
//! - Long header (first bit set): `| first (1) | version (4) | dcid len (1) | dcid | rest |`
//!   loses both the DCID length byte and the DCID.
//! - Short header: `| first (1) | dcid | rest |` loses the DCID, whose length
//!   the endpoint knows out of band.

use std::net::SocketAddr;

use bytes::BufMut;

use crate::error::{QinqError, QinqResult};
use crate::proto::compression::CompressionRegistry;
use crate::proto::datagram::{Compression, DatagramHeader, DecodedPacket, encode_datagram_header};
use crate::{ConnectionId, MAX_CID_SIZE};

/// Bit distinguishing long from short QUIC headers
const LONG_HEADER_FORM: u8 = 0x80;

/// Bytes before the DCID length byte in a long header
const LONG_HEADER_PREFIX: usize = 5;

/// Bytes before the DCID in a short header
const SHORT_HEADER_PREFIX: usize = 1;

/// A QUIC packet with its destination connection ID removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrippedPacket<'a> {
    /// The removed destination connection ID
    pub destination_cid: ConnectionId,
    head: &'a [u8],
    tail: &'a [u8],
}

impl StrippedPacket<'_> {
    /// Length of the packet without its DCID
    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    /// Whether nothing is left, which never happens for a valid packet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the stripped packet
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.head);
        buf.put_slice(self.tail);
    }
}

fn is_long_header(first: u8) -> bool {
    first & LONG_HEADER_FORM != 0
}

/// Remove the destination connection ID from a QUIC packet
///
/// `short_cid_len` is the DCID length to assume for short header packets.
pub fn strip_destination_cid(
    packet: &[u8],
    short_cid_len: usize,
) -> QinqResult<StrippedPacket<'_>> {
    let first = *packet
        .first()
        .ok_or(QinqError::Malformed("empty QUIC packet"))?;

    if is_long_header(first) {
        let mut rest = packet
            .get(LONG_HEADER_PREFIX..)
            .ok_or(QinqError::Malformed("truncated long header"))?;
        let destination_cid = ConnectionId::decode_long(&mut rest)
            .ok_or(QinqError::Malformed("invalid destination connection ID"))?;
        return Ok(StrippedPacket {
            destination_cid,
            head: &packet[..LONG_HEADER_PREFIX],
            tail: rest,
        });
    }

    if short_cid_len > MAX_CID_SIZE {
        return Err(QinqError::Malformed("invalid connection ID length"));
    }
    let cid_end = SHORT_HEADER_PREFIX + short_cid_len;
    let cid_bytes = packet
        .get(SHORT_HEADER_PREFIX..cid_end)
        .ok_or(QinqError::Malformed("truncated destination connection ID"))?;

    Ok(StrippedPacket {
        destination_cid: ConnectionId::new(cid_bytes),
        head: &packet[..SHORT_HEADER_PREFIX],
        tail: &packet[cid_end..],
    })
}

/// Rebuild a QUIC packet by inserting `cid` as its destination connection ID
///
/// Returns the number of bytes written to `out`.
pub fn splice_destination_cid(
    stripped: &[u8],
    cid: &ConnectionId,
    out: &mut [u8],
) -> QinqResult<usize> {
    let first = *stripped
        .first()
        .ok_or(QinqError::Malformed("empty QUIC packet"))?;
    let long = is_long_header(first);

    let (prefix, extra) = if long {
        if stripped.len() < LONG_HEADER_PREFIX {
            return Err(QinqError::Malformed("truncated long header"));
        }
        (LONG_HEADER_PREFIX, 1 + cid.len())
    } else {
        (SHORT_HEADER_PREFIX, cid.len())
    };

    let needed = stripped.len() + extra;
    if out.len() < needed {
        return Err(QinqError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    let mut cursor = &mut out[..needed];
    cursor.put_slice(&stripped[..prefix]);
    if long {
        cid.encode_long(&mut cursor);
    } else {
        cursor.put_slice(cid);
    }
    cursor.put_slice(&stripped[prefix..]);
    Ok(needed)
}

/// Decode a datagram and rebuild the QUIC packet it carries
///
/// Like [`datagram_to_packet`](crate::proto::datagram::datagram_to_packet),
/// but the connection ID bound to the header is spliced back into the packet.
pub fn datagram_to_quic_packet(
    datagram: &[u8],
    registry: &mut CompressionRegistry,
    out: &mut [u8],
) -> QinqResult<DecodedPacket> {
    let mut buf = datagram;
    let header = DatagramHeader::decode(&mut buf, registry)?;
    let header_len = datagram.len() - buf.len();
    let len = splice_destination_cid(buf, &header.connection_id, out)?;

    Ok(DecodedPacket {
        target: header.target,
        connection_id: header.connection_id,
        compression: header.compression,
        header_len,
        len,
    })
}

/// Tunnel a QUIC packet to `target`, moving its DCID into the datagram header
pub fn quic_packet_to_datagram<B: BufMut>(
    registry: &mut CompressionRegistry,
    target: SocketAddr,
    packet: &[u8],
    short_cid_len: usize,
    buf: &mut B,
) -> QinqResult<Compression> {
    let stripped = strip_destination_cid(packet, short_cid_len)?;
    let compression = encode_datagram_header(registry, target, &stripped.destination_cid, buf)?;
    stripped.write_to(buf);
    Ok(compression)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_header_round_trip() {
        let packet = [0x41u8, 9, 8, 7, 6, 0xaa, 0xbb];
        let stripped = strip_destination_cid(&packet, 4).unwrap();
        assert_eq!(stripped.destination_cid, ConnectionId::new(&[9, 8, 7, 6]));
        let mut flat = Vec::new();
        stripped.write_to(&mut flat);
        assert_eq!(flat, [0x41u8, 0xaa, 0xbb]);

        let mut out = [0u8; 16];
        let len = splice_destination_cid(&flat, &stripped.destination_cid, &mut out).unwrap();
        assert_eq!(&out[..len], &packet[..]);
    }

    #[test]
    fn long_header_round_trip() {
        let packet = [0xc3u8, 0, 0, 0, 1, 2, 0x11, 0x22, 1, 0x33, 0xee];
        let stripped = strip_destination_cid(&packet, 8).unwrap();
        assert_eq!(stripped.destination_cid, ConnectionId::new(&[0x11, 0x22]));
        let mut flat = Vec::new();
        stripped.write_to(&mut flat);
        assert_eq!(flat, [0xc3u8, 0, 0, 0, 1, 1, 0x33, 0xee]);

        let mut out = [0u8; 16];
        let len = splice_destination_cid(&flat, &stripped.destination_cid, &mut out).unwrap();
        assert_eq!(&out[..len], &packet[..]);
    }

    #[test]
    fn long_header_with_empty_dcid() {
        let flat = [0xc0u8, 0, 0, 0, 1, 0];
        let mut out = [0u8; 8];
        let len = splice_destination_cid(&flat, &ConnectionId::empty(), &mut out).unwrap();
        assert_eq!(&out[..len], &[0xc0u8, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn malformed_packets() {
        assert!(strip_destination_cid(&[], 0).is_err());
        assert!(strip_destination_cid(&[0xc0, 0, 0], 0).is_err());
        assert!(strip_destination_cid(&[0xc0, 0, 0, 0, 1, 8, 1, 2], 0).is_err());
        assert!(strip_destination_cid(&[0x40, 1, 2], 4).is_err());
        assert!(strip_destination_cid(&[0x40; 32], 21).is_err());
        assert!(splice_destination_cid(&[0xc0, 0], &ConnectionId::empty(), &mut [0u8; 8]).is_err());
    }

    #[test]
    fn splice_checks_capacity() {
        let cid = ConnectionId::new(&[1, 2, 3, 4]);
        let mut out = [0u8; 4];
        assert_eq!(
            splice_destination_cid(&[0x40, 0xaa], &cid, &mut out),
            Err(QinqError::BufferTooSmall {
                needed: 6,
                available: 4
            })
        );
    }
}
