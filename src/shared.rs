// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

use std::fmt;

use bytes::{Buf, BufMut};

use crate::{MAX_CID_SIZE, coding::BufExt};

/// Protocol-level identifier for a connection.
///
/// A zero-length identifier means "no identifier". Equality compares the
/// length and the identifier bytes only.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct ConnectionId {
    len: u8,
    bytes: [u8; MAX_CID_SIZE],
}

impl ConnectionId {
    /// Construct from raw bytes
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is longer than [`MAX_CID_SIZE`].
    pub fn new(bytes: &[u8]) -> Self {
        assert!(bytes.len() <= MAX_CID_SIZE, "connection ID too long");
        let mut res = Self::empty();
        res.len = bytes.len() as u8;
        res.bytes[..bytes.len()].copy_from_slice(bytes);
        res
    }

    /// Construct from raw bytes, or `None` if they exceed [`MAX_CID_SIZE`]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        (bytes.len() <= MAX_CID_SIZE).then(|| Self::new(bytes))
    }

    /// The empty connection ID
    pub const fn empty() -> Self {
        Self {
            len: 0,
            bytes: [0; MAX_CID_SIZE],
        }
    }

    /// Decode from long header format: one length byte followed by the ID
    pub(crate) fn decode_long(buf: &mut impl Buf) -> Option<Self> {
        let len = buf.get::<u8>().ok()? as usize;
        if len > MAX_CID_SIZE || buf.remaining() < len {
            return None;
        }
        let mut res = Self {
            len: len as u8,
            bytes: [0; MAX_CID_SIZE],
        };
        buf.copy_to_slice(&mut res.bytes[..len]);
        Some(res)
    }

    /// Encode in long header format
    pub(crate) fn encode_long(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.len);
        buf.put_slice(self);
    }
}

impl ::std::ops::Deref for ConnectionId {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes[0..self.len as usize]
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.bytes[0..self.len as usize].fmt(f)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
