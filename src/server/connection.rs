// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! Per-connection state on the proxy

use std::fmt;
use std::net::SocketAddr;

use tracing::trace;

use crate::ConnectionId;
use crate::error::QinqResult;
use crate::proto::address::canonical;
use crate::proto::compression::{CompressionContexts, Direction};
use crate::proto::datagram::{DecodedPacket, datagram_to_packet};
use crate::proto::message::QinqMessage;

/// Identifies a connection context within its [`ServerContext`](super::ServerContext)
///
/// Handles are allocated in increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Binding of a remote address to a connection, with its last use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLink {
    /// Remote address
    pub addr: SocketAddr,
    /// Time of last use, in microseconds
    pub last_use: u64,
}

impl AddressLink {
    /// Whether the link is older than `expiry` at time `now`
    pub fn is_expired(&self, now: u64, expiry: u64) -> bool {
        now.saturating_sub(self.last_use) > expiry
    }
}

/// State of one proxied QUIC connection
#[derive(Debug)]
pub struct ConnectionContext {
    handle: ConnectionHandle,
    /// QUIC connection ID of the live connection this context serves
    connection_id: Option<ConnectionId>,
    /// At most one link per address, oldest first
    address_links: Vec<AddressLink>,
    compression: CompressionContexts,
}

impl ConnectionContext {
    pub(super) fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            connection_id: None,
            address_links: Vec::new(),
            compression: CompressionContexts::new(),
        }
    }

    /// Handle of this context
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Associate the context with a live QUIC connection
    pub fn bind_connection_id(&mut self, cid: ConnectionId) {
        self.connection_id = Some(cid);
    }

    /// QUIC connection ID bound with [`bind_connection_id`](Self::bind_connection_id)
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection_id.as_ref()
    }

    /// Record use of `addr` at `now`, creating the link if needed
    pub fn touch(&mut self, addr: SocketAddr, now: u64) {
        let addr = canonical(addr);
        match self.address_links.iter_mut().find(|link| link.addr == addr) {
            Some(link) => link.last_use = now,
            None => self.address_links.push(AddressLink { addr, last_use: now }),
        }
        trace!(connection = %self.handle, addr = %addr, now, "touched address link");
    }

    /// Last use of `addr`, expired or not
    pub fn last_use(&self, addr: &SocketAddr) -> Option<u64> {
        self.link(addr).map(|link| link.last_use)
    }

    /// All links, including expired ones
    pub fn address_links(&self) -> &[AddressLink] {
        &self.address_links
    }

    /// The link for `addr`, if it has not expired at `now`
    pub fn active_link(&self, addr: &SocketAddr, now: u64, expiry: u64) -> Option<&AddressLink> {
        self.link(addr).filter(|link| !link.is_expired(now, expiry))
    }

    fn link(&self, addr: &SocketAddr) -> Option<&AddressLink> {
        let addr = canonical(*addr);
        self.address_links.iter().find(|link| link.addr == addr)
    }

    /// Header compression registries of this connection
    pub fn compression(&self) -> &CompressionContexts {
        &self.compression
    }

    /// Mutable header compression registries of this connection
    pub fn compression_mut(&mut self) -> &mut CompressionContexts {
        &mut self.compression
    }

    /// Apply a control message received from the client
    pub fn handle_message(&mut self, message: &QinqMessage) -> QinqResult<()> {
        match message {
            QinqMessage::ReserveHeader(rh) => self.compression.apply_reserve_header(rh),
        }
    }

    /// Unwrap a datagram from the client into the packet to send on its behalf
    ///
    /// The target is touched, so that replies from it route back to this
    /// connection.
    pub fn forward_from_client(
        &mut self,
        datagram: &[u8],
        out: &mut [u8],
        now: u64,
    ) -> QinqResult<DecodedPacket> {
        let registry = self.compression.registry_mut(Direction::ClientToProxy);
        let packet = datagram_to_packet(datagram, registry, out)?;
        self.touch(packet.target, now);
        Ok(packet)
    }
}
