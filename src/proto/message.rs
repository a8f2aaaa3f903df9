// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! QINQ control messages
//!
//! Control messages are exchanged on a QUIC stream. Each one starts with a
//! variable-length type tag. They carry no length prefix, so the type must be
//! known to find the end of the message.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};
use tracing::debug;

use crate::coding::{BufExt, BufMutExt, Codec};
use crate::error::{QinqError, QinqResult};
use crate::proto::address::{
    connection_id_size, decode_connection_id, decode_target, encode_connection_id, encode_target,
    target_size,
};
use crate::proto::compression::Direction;
use crate::{ConnectionId, VarInt};

/// Message type of RESERVE_HEADER
pub const QINQ_PROTO_RESERVE_HEADER: u64 = 0x01;

/// RESERVE_HEADER message
///
/// Binds `hcid` to a target and connection ID for datagrams flowing in
/// `direction`.
///
/// Wire format:
/// ```text
/// +----------+---------------+----------+---------------------+----------+-------------+-----+
/// | Type (V) | Direction (V) | HCID (V) | Addr Len (1) + Addr | Port (2) | CID Len (1) | CID |
/// +----------+---------------+----------+---------------------+----------+-------------+-----+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveHeader {
    /// Which registry the reservation applies to
    pub direction: Direction,
    /// Identifier being reserved
    pub hcid: VarInt,
    /// Target address
    pub target: SocketAddr,
    /// Connection ID, possibly empty
    pub connection_id: ConnectionId,
}

impl ReserveHeader {
    /// Decode a complete message, type tag included
    ///
    /// On failure the rest of `buf` is consumed. Bytes left after a
    /// successful decode are for the caller to judge.
    pub fn decode<B: Buf>(buf: &mut B) -> QinqResult<Self> {
        let result = Self::decode_inner(buf);
        if let Err(e) = &result {
            debug!(error = %e, "dropping malformed reserve header");
            buf.drain();
        }
        result
    }

    fn decode_inner<B: Buf>(buf: &mut B) -> QinqResult<Self> {
        let msg_type = buf.get_var()?;
        if msg_type != QINQ_PROTO_RESERVE_HEADER {
            return Err(QinqError::UnexpectedMessageType(msg_type));
        }
        Self::decode_body(buf)
    }

    /// Decode the fields following the type tag
    fn decode_body<B: Buf>(buf: &mut B) -> QinqResult<Self> {
        let direction = Direction::from_u64(buf.get_var()?)
            .ok_or(QinqError::Malformed("direction must be 0 or 1"))?;
        let hcid = VarInt::decode(buf)?;
        let target = decode_target(buf)?;
        let connection_id = decode_connection_id(buf)?;
        Ok(Self {
            direction,
            hcid,
            target,
            connection_id,
        })
    }

    /// Append the message, type tag included
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write_var(QINQ_PROTO_RESERVE_HEADER);
        buf.write_var(self.direction.to_u64());
        self.hcid.encode(buf);
        encode_target(&self.target, buf);
        encode_connection_id(&self.connection_id, buf);
    }

    /// Number of bytes [`encode`](Self::encode) produces
    pub fn encoded_size(&self) -> usize {
        // Type and direction are both below 64 and take one byte each
        2 + self.hcid.size() + target_size(&self.target) + connection_id_size(&self.connection_id)
    }

    /// Encode into a fixed-size buffer, returning the number of bytes written
    pub fn encode_to_slice(&self, out: &mut [u8]) -> QinqResult<usize> {
        let needed = self.encoded_size();
        if out.len() < needed {
            return Err(QinqError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }
        let mut cursor = &mut out[..needed];
        self.encode(&mut cursor);
        debug_assert!(cursor.is_empty());
        Ok(needed)
    }
}

/// Any QINQ control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QinqMessage {
    /// RESERVE_HEADER message
    ReserveHeader(ReserveHeader),
}

impl QinqMessage {
    /// Decode one message, dispatching on its type tag
    ///
    /// Unknown types fail with [`QinqError::UnexpectedMessageType`] because
    /// their length cannot be determined. On failure the rest of `buf` is
    /// consumed.
    pub fn decode<B: Buf>(buf: &mut B) -> QinqResult<Self> {
        let result = buf
            .get_var()
            .map_err(QinqError::from)
            .and_then(|msg_type| match msg_type {
                QINQ_PROTO_RESERVE_HEADER => {
                    ReserveHeader::decode_body(buf).map(Self::ReserveHeader)
                }
                other => Err(QinqError::UnexpectedMessageType(other)),
            });
        if let Err(e) = &result {
            debug!(error = %e, "dropping undecodable QINQ message");
            buf.drain();
        }
        result
    }

    /// Append the encoded message
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::ReserveHeader(rh) => rh.encode(buf),
        }
    }

    /// Message type tag
    pub fn message_type(&self) -> u64 {
        match self {
            Self::ReserveHeader(_) => QINQ_PROTO_RESERVE_HEADER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RH1: [u8; 15] = [
        QINQ_PROTO_RESERVE_HEADER as u8,
        0,
        1,
        4,
        10,
        0,
        0,
        1,
        1,
        187,
        4,
        0x01,
        0x02,
        0x03,
        0x04,
    ];

    fn rh1() -> ReserveHeader {
        ReserveHeader {
            direction: Direction::ClientToProxy,
            hcid: VarInt::from_u32(1),
            target: "10.0.0.1:443".parse().unwrap(),
            connection_id: ConnectionId::new(&[1, 2, 3, 4]),
        }
    }

    #[test]
    fn decode_ipv4_vector() {
        let mut buf = &RH1[..];
        let decoded = ReserveHeader::decode(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(decoded, rh1());
    }

    #[test]
    fn encode_ipv4_vector() {
        let mut out = [0u8; 256];
        let len = rh1().encode_to_slice(&mut out).unwrap();
        assert_eq!(len, RH1.len());
        assert_eq!(&out[..len], &RH1[..]);
        assert_eq!(rh1().encoded_size(), RH1.len());
    }

    #[test]
    fn wrong_type_tag() {
        let mut bytes = RH1;
        bytes[0] = 0x02;
        let mut buf = &bytes[..];
        assert_eq!(
            ReserveHeader::decode(&mut buf),
            Err(QinqError::UnexpectedMessageType(2))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn every_truncation_fails_and_drains() {
        for cut in 0..RH1.len() {
            let mut buf = &RH1[..cut];
            let err = ReserveHeader::decode(&mut buf).unwrap_err();
            assert!(err.is_decode_error(), "cut at {cut}: {err}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn invalid_direction() {
        let mut bytes = RH1;
        bytes[1] = 2;
        assert_eq!(
            ReserveHeader::decode(&mut &bytes[..]),
            Err(QinqError::Malformed("direction must be 0 or 1"))
        );
    }

    #[test]
    fn empty_connection_id() {
        let rh = ReserveHeader {
            connection_id: ConnectionId::empty(),
            ..rh1()
        };
        let mut buf = Vec::new();
        rh.encode(&mut buf);
        assert_eq!(buf.len(), 11);
        assert_eq!(buf[10], 0);
        assert_eq!(ReserveHeader::decode(&mut &buf[..]).unwrap(), rh);
    }

    #[test]
    fn short_output_buffer() {
        let mut out = [0u8; 14];
        assert_eq!(
            rh1().encode_to_slice(&mut out),
            Err(QinqError::BufferTooSmall {
                needed: 15,
                available: 14
            })
        );
    }

    #[test]
    fn large_hcid_uses_wide_varint() {
        let rh = ReserveHeader {
            hcid: VarInt::from_u32(100_000),
            ..rh1()
        };
        let mut buf = Vec::new();
        rh.encode(&mut buf);
        assert_eq!(buf.len(), rh.encoded_size());
        assert_eq!(buf.len(), RH1.len() + 3);
        assert_eq!(ReserveHeader::decode(&mut &buf[..]).unwrap(), rh);
    }

    #[test]
    fn message_dispatch() {
        let mut buf = &RH1[..];
        let msg = QinqMessage::decode(&mut buf).unwrap();
        assert_eq!(msg, QinqMessage::ReserveHeader(rh1()));
        assert_eq!(msg.message_type(), QINQ_PROTO_RESERVE_HEADER);

        let mut encoded = Vec::new();
        msg.encode(&mut encoded);
        assert_eq!(encoded, RH1);

        let mut unknown: &[u8] = &[0x3f, 1, 2, 3];
        assert_eq!(
            QinqMessage::decode(&mut unknown),
            Err(QinqError::UnexpectedMessageType(0x3f))
        );
        assert!(unknown.is_empty());
    }
}
