// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! qinq: UDP proxying over QUIC datagrams with header compression
//!
//! A client tunnels UDP packets for many destinations through one QUIC
//! connection to a proxy. Each tunneled packet is prefixed with a small
//! header naming its target, which both sides compress by agreeing on short
//! identifiers. The proxy keeps an address routing table so that packets
//! coming back from a target find their way to the right client connection.
//!
//! The library is organized into the following main modules:
//! - `proto`: control messages, datagram headers and compression registries
//! - `server`: proxy connection table and address routing
//! - `config`: server configuration
//!
//! The crate performs no I/O. Callers feed it bytes and timestamps and send
//! whatever it produces.

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

pub mod coding;
mod varint;

pub use varint::{VarInt, VarIntBoundsExceeded};

pub mod config;
pub mod error;
pub mod proto;
pub mod server;
mod shared;

pub use crate::config::{DEFAULT_ADDRESS_EXPIRY, DEFAULT_MAX_CONNECTIONS, ServerConfig};
pub use crate::error::{QinqError, QinqResult};
pub use crate::proto::{
    Compression, CompressionContexts, CompressionEntry, CompressionRegistry, DatagramHeader,
    DecodedPacket, Direction, QinqMessage, ReserveHeader,
};
pub use crate::server::{AddressLink, ConnectionContext, ConnectionHandle, ServerContext};
pub use crate::shared::ConnectionId;

/// Maximum length of a QUIC connection ID
pub const MAX_CID_SIZE: usize = 20;
