// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! Datagram header encoding and datagram-to-packet translation
//!
//! Two header formats share one leading variable-length integer:
//!
//! 1. **Inline** (`0`): the target address and connection ID follow. The
//!    receiver registers them under the next free identifier of its
//!    registry, exactly as the sender did, so later datagrams can refer to
//!    them.
//! 2. **Compressed** (`hcid != 0`): nothing else follows; the target and
//!    connection ID come from the registry.
//!
//! Which format is used depends only on the registry state: the encoder
//! compresses whenever it already holds an entry for the pair.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};
use tracing::{debug, trace};

use crate::coding::{BufExt, BufMutExt, Codec};
use crate::error::{QinqError, QinqResult};
use crate::proto::address::{
    connection_id_size, decode_connection_id, decode_target, encode_connection_id, encode_target,
    target_size,
};
use crate::proto::compression::CompressionRegistry;
use crate::{ConnectionId, VarInt};

/// Leading value of an inline header
pub const INLINE_HEADER_TAG: u64 = 0;

/// How a datagram header identified its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Full target carried in the header, registered under `assigned`
    Inline {
        /// Identifier the inline header was registered under
        assigned: VarInt,
    },
    /// Target taken from the entry with this identifier
    Compressed(VarInt),
}

/// A decoded datagram header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Target address of the encapsulated packet
    pub target: SocketAddr,
    /// Connection ID bound to the target, possibly empty
    pub connection_id: ConnectionId,
    /// Header format
    pub compression: Compression,
}

impl DatagramHeader {
    /// Decode a header, leaving `buf` at the first payload byte
    ///
    /// Inline headers always add a new entry to `registry`, even when an
    /// identical binding exists. On failure the rest of `buf` is consumed and
    /// the datagram should be dropped.
    pub fn decode<B: Buf>(buf: &mut B, registry: &mut CompressionRegistry) -> QinqResult<Self> {
        let result = Self::decode_inner(buf, registry);
        if let Err(e) = &result {
            debug!(error = %e, "dropping datagram with undecodable header");
            buf.drain();
        }
        result
    }

    fn decode_inner<B: Buf>(buf: &mut B, registry: &mut CompressionRegistry) -> QinqResult<Self> {
        let tag = VarInt::decode(buf)?;
        if tag.into_inner() == INLINE_HEADER_TAG {
            let target = decode_target(buf)?;
            let connection_id = decode_connection_id(buf)?;
            let assigned = registry.register(target, connection_id)?;
            return Ok(Self {
                target,
                connection_id,
                compression: Compression::Inline { assigned },
            });
        }

        let entry = registry
            .find(tag.into_inner())
            .ok_or(QinqError::UnknownCompressionId(tag.into_inner()))?;
        trace!(hcid = %tag, target = %entry.target, "decompressed datagram header");
        Ok(Self {
            target: entry.target,
            connection_id: entry.connection_id,
            compression: Compression::Compressed(tag),
        })
    }
}

/// Size of the header [`encode_datagram_header`] would write right now
pub fn datagram_header_size(
    registry: &CompressionRegistry,
    target: &SocketAddr,
    connection_id: &ConnectionId,
) -> usize {
    match registry.find_by_target(target, connection_id) {
        Some(entry) => entry.id.size(),
        None => 1 + target_size(target) + connection_id_size(connection_id),
    }
}

/// Append a header for `target`, compressing it if `registry` allows
///
/// Uncompressed headers register the binding, mirroring what the receiver
/// does when it decodes them.
pub fn encode_datagram_header<B: BufMut>(
    registry: &mut CompressionRegistry,
    target: SocketAddr,
    connection_id: &ConnectionId,
    buf: &mut B,
) -> QinqResult<Compression> {
    if let Some(entry) = registry.find_by_target(&target, connection_id) {
        entry.id.encode(buf);
        return Ok(Compression::Compressed(entry.id));
    }

    let assigned = registry.register(target, *connection_id)?;
    buf.write_var(INLINE_HEADER_TAG);
    encode_target(&target, buf);
    encode_connection_id(connection_id, buf);
    Ok(Compression::Inline { assigned })
}

/// Encode a header into a fixed-size buffer, returning the bytes written
///
/// Capacity is checked before the registry is touched.
pub fn encode_datagram_header_to_slice(
    registry: &mut CompressionRegistry,
    target: SocketAddr,
    connection_id: &ConnectionId,
    out: &mut [u8],
) -> QinqResult<usize> {
    let needed = datagram_header_size(registry, &target, connection_id);
    if out.len() < needed {
        return Err(QinqError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }
    let mut cursor = &mut out[..needed];
    encode_datagram_header(registry, target, connection_id, &mut cursor)?;
    Ok(needed)
}

/// Result of [`datagram_to_packet`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// Target address of the packet
    pub target: SocketAddr,
    /// Connection ID bound to the target, possibly empty
    pub connection_id: ConnectionId,
    /// Header format the datagram used
    pub compression: Compression,
    /// Bytes taken by the datagram header
    pub header_len: usize,
    /// Bytes of packet written to the output buffer
    pub len: usize,
}

/// Decode a datagram header and copy the payload into `out`
///
/// An inline header is registered even if `out` then proves too small, so
/// that the registry stays in step with the sender's.
pub fn datagram_to_packet(
    datagram: &[u8],
    registry: &mut CompressionRegistry,
    out: &mut [u8],
) -> QinqResult<DecodedPacket> {
    let mut buf = datagram;
    let header = DatagramHeader::decode(&mut buf, registry)?;
    let header_len = datagram.len() - buf.len();
    let payload = buf;

    if out.len() < payload.len() {
        debug!(
            needed = payload.len(),
            available = out.len(),
            "packet buffer too small for datagram payload"
        );
        return Err(QinqError::BufferTooSmall {
            needed: payload.len(),
            available: out.len(),
        });
    }
    out[..payload.len()].copy_from_slice(payload);

    Ok(DecodedPacket {
        target: header.target,
        connection_id: header.connection_id,
        compression: header.compression,
        header_len,
        len: payload.len(),
    })
}

/// Wrap `payload` in a datagram for `target`
pub fn packet_to_datagram<B: BufMut>(
    registry: &mut CompressionRegistry,
    target: SocketAddr,
    connection_id: &ConnectionId,
    payload: &[u8],
    buf: &mut B,
) -> QinqResult<Compression> {
    let compression = encode_datagram_header(registry, target, connection_id, buf)?;
    buf.put_slice(payload);
    Ok(compression)
}
