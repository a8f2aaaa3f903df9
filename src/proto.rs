// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! QINQ wire protocol
//!
//! QINQ carries UDP datagrams for arbitrary destinations inside the DATAGRAM
//! frames of a single QUIC connection to a proxy.
//!
//! # Messages
//!
//! - **RESERVE_HEADER** (0x01): binds a header compression identifier
//!   (hcid) to a target address and connection ID, for one direction
//!
//! # Datagrams
//!
//! Every datagram starts with a variable-length integer:
//!
//! 1. **Inline** (`0`): followed by the full target address and connection
//!    ID. Decoding implicitly registers a new compression entry.
//! 2. **Compressed** (`hcid`): the address and connection ID are taken from
//!    the entry previously registered under that identifier.
//!
//! ```text
//! inline:     | 0 (V) | addr len (1) | addr (4/16) | port (2) | cid len (1) | cid | payload |
//! compressed: | hcid (V) | payload |
//! ```
//!
//! # Example
//!
//! ```rust
//! use qinq::{CompressionRegistry, ConnectionId};
//! use qinq::proto::datagram::{datagram_to_packet, packet_to_datagram};
//!
//! let target = "10.0.0.1:443".parse().unwrap();
//! let cid = ConnectionId::new(&[1, 2, 3, 4]);
//!
//! let mut sender = CompressionRegistry::new();
//! let mut receiver = CompressionRegistry::new();
//!
//! let mut first = Vec::new();
//! packet_to_datagram(&mut sender, target, &cid, b"hello", &mut first).unwrap();
//! let mut second = Vec::new();
//! packet_to_datagram(&mut sender, target, &cid, b"world", &mut second).unwrap();
//! assert_eq!(second[0], 1); // compressed under identifier 1
//!
//! let mut out = [0u8; 64];
//! let decoded = datagram_to_packet(&first, &mut receiver, &mut out).unwrap();
//! assert_eq!(&out[..decoded.len], b"hello");
//! let decoded = datagram_to_packet(&second, &mut receiver, &mut out).unwrap();
//! assert_eq!(decoded.target, target);
//! assert_eq!(&out[..decoded.len], b"world");
//! ```

pub mod address;
pub mod compression;
pub mod datagram;
pub mod message;
pub mod packet;

pub use compression::{CompressionContexts, CompressionEntry, CompressionRegistry, Direction};
pub use datagram::{Compression, DatagramHeader, DecodedPacket};
pub use message::{QINQ_PROTO_RESERVE_HEADER, QinqMessage, ReserveHeader};
