// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! Error types for QINQ encoding, decoding and routing.
//!
//! Nothing here is fatal: a datagram or control message that fails to decode
//! is dropped by the caller, and capacity errors are reported so the caller
//! can enlarge the buffer or reject the operation.

use thiserror::Error;

use crate::coding::UnexpectedEnd;
use crate::server::ConnectionHandle;

/// Result type alias for QINQ operations
pub type QinqResult<T> = Result<T, QinqError>;

/// Errors produced by the QINQ codecs and the server context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QinqError {
    /// Truncated or invalid field while decoding
    #[error("malformed QINQ message: {0}")]
    Malformed(&'static str),

    /// The leading type tag is not the one expected
    #[error("unexpected QINQ message type 0x{0:x}")]
    UnexpectedMessageType(u64),

    /// A compressed datagram referenced an identifier that was never reserved
    #[error("unknown header compression identifier {0}")]
    UnknownCompressionId(u64),

    /// Identifier 0 signals an inline header and cannot name an entry
    #[error("header compression identifier 0 is reserved")]
    ReservedCompressionId,

    /// No identifier below 2^62 is left to allocate
    #[error("header compression identifier space exhausted")]
    IdSpaceExhausted,

    /// The destination buffer cannot hold the encoded output
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// The server connection table is full
    #[error("connection table full ({limit} connections)")]
    TooManyConnections {
        /// Configured maximum
        limit: usize,
    },

    /// The handle does not name a live connection context
    #[error("unknown connection context {0}")]
    UnknownConnection(ConnectionHandle),

    /// Configuration rejected by validation
    #[error("invalid configuration for {parameter}: {reason}")]
    InvalidConfig {
        /// Offending parameter
        parameter: &'static str,
        /// Why it was rejected
        reason: &'static str,
    },
}

impl From<UnexpectedEnd> for QinqError {
    fn from(_: UnexpectedEnd) -> Self {
        Self::Malformed("unexpected end of buffer")
    }
}

impl QinqError {
    /// Whether the error came from undecodable input
    ///
    /// Such datagrams are dropped silently; the connection stays up.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::UnexpectedMessageType(_) | Self::UnknownCompressionId(_)
        )
    }
}
