// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! Header compression registry
//!
//! A registry binds compression identifiers (hcids) to a target address and
//! connection ID. Client-to-proxy and proxy-to-client compression use separate
//! registries, held together in [`CompressionContexts`].
//!
//! Entries are never mutated once added. Lookups scan from the most recently
//! added entry, so a newer entry shadows an older one with the same identifier.

use std::fmt;
use std::net::SocketAddr;
use std::ptr;

use tracing::debug;

use crate::error::{QinqError, QinqResult};
use crate::proto::address::canonical;
use crate::proto::message::ReserveHeader;
use crate::{ConnectionId, VarInt};

/// Direction a compression entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Datagrams sent by the client to the proxy
    ClientToProxy,
    /// Datagrams sent by the proxy to the client
    ProxyToClient,
}

impl Direction {
    /// Wire value of the direction field
    pub fn to_u64(self) -> u64 {
        match self {
            Self::ClientToProxy => 0,
            Self::ProxyToClient => 1,
        }
    }

    /// Parse the wire value of the direction field
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::ClientToProxy),
            1 => Some(Self::ProxyToClient),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToProxy => write!(f, "client-to-proxy"),
            Self::ProxyToClient => write!(f, "proxy-to-client"),
        }
    }
}

/// A single (identifier, target, connection ID) binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionEntry {
    /// Compression identifier, never 0
    pub id: VarInt,
    /// Target address
    pub target: SocketAddr,
    /// Connection ID, possibly empty
    pub connection_id: ConnectionId,
}

impl CompressionEntry {
    /// Create an entry without inserting it anywhere
    pub fn new(id: VarInt, target: SocketAddr, connection_id: ConnectionId) -> Self {
        Self {
            id,
            target: canonical(target),
            connection_id,
        }
    }

    fn matches(&self, target: &SocketAddr, connection_id: &ConnectionId) -> bool {
        self.target == *target && self.connection_id == *connection_id
    }
}

/// Ordered collection of compression entries for one direction
#[derive(Debug, Clone)]
pub struct CompressionRegistry {
    /// Oldest first; lookups iterate in reverse
    entries: Vec<CompressionEntry>,
    /// Strictly greater than every identifier inserted so far
    next_id: u64,
}

impl Default for CompressionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionRegistry {
    /// Create an empty registry; the first allocated identifier is 1
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Insert `entry` as the most recent entry
    ///
    /// Duplicate identifiers are accepted; the new entry shadows the old one.
    pub fn prepend(&mut self, entry: CompressionEntry) -> QinqResult<()> {
        let id = entry.id.into_inner();
        if id == 0 {
            return Err(QinqError::ReservedCompressionId);
        }
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.entries.push(entry);
        Ok(())
    }

    /// Find the most recent entry registered under `id`
    pub fn find(&self, id: u64) -> Option<&CompressionEntry> {
        self.iter().find(|entry| entry.id.into_inner() == id)
    }

    /// Find the most recent live entry for this target and connection ID
    ///
    /// An entry whose identifier was rebound later is shadowed and never
    /// returned; the peer resolves that identifier to the newer binding.
    pub fn find_by_target(
        &self,
        target: &SocketAddr,
        connection_id: &ConnectionId,
    ) -> Option<&CompressionEntry> {
        let target = canonical(*target);
        self.iter().find(|entry| {
            entry.matches(&target, connection_id)
                && self
                    .find(entry.id.into_inner())
                    .is_some_and(|live| ptr::eq(live, *entry))
        })
    }

    /// The identifier [`register`](Self::register) would allocate next
    pub fn next_id(&self) -> QinqResult<VarInt> {
        VarInt::from_u64(self.next_id).map_err(|_| QinqError::IdSpaceExhausted)
    }

    /// Allocate the next identifier for this binding and insert it
    pub fn register(
        &mut self,
        target: SocketAddr,
        connection_id: ConnectionId,
    ) -> QinqResult<VarInt> {
        let id = self.next_id()?;
        self.prepend(CompressionEntry::new(id, target, connection_id))?;
        debug!(
            hcid = %id,
            target = %target,
            cid = %connection_id,
            "registered header compression entry"
        );
        Ok(id)
    }

    /// Entries from most to least recent
    pub fn iter(&self) -> impl Iterator<Item = &CompressionEntry> + '_ {
        self.entries.iter().rev()
    }

    /// Number of entries, shadowed ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry was ever added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The pair of registries owned by one proxied connection
#[derive(Debug, Clone, Default)]
pub struct CompressionContexts {
    client_to_proxy: CompressionRegistry,
    proxy_to_client: CompressionRegistry,
}

impl CompressionContexts {
    /// Create empty registries for both directions
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for `direction`
    pub fn registry(&self, direction: Direction) -> &CompressionRegistry {
        match direction {
            Direction::ClientToProxy => &self.client_to_proxy,
            Direction::ProxyToClient => &self.proxy_to_client,
        }
    }

    /// Mutable registry for `direction`
    pub fn registry_mut(&mut self, direction: Direction) -> &mut CompressionRegistry {
        match direction {
            Direction::ClientToProxy => &mut self.client_to_proxy,
            Direction::ProxyToClient => &mut self.proxy_to_client,
        }
    }

    /// Record a reservation received from the peer
    pub fn apply_reserve_header(&mut self, header: &ReserveHeader) -> QinqResult<()> {
        let entry = CompressionEntry::new(header.hcid, header.target, header.connection_id);
        self.registry_mut(header.direction).prepend(entry)?;
        debug!(
            direction = %header.direction,
            hcid = %header.hcid,
            target = %header.target,
            "applied header reservation"
        );
        Ok(())
    }
}
