// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! Proxy-side connection table and address routing
//!
//! # Overview
//!
//! The proxy sends packets to real-world targets on behalf of many tunneled
//! connections. When a packet comes back, its source address is the only
//! clue to which connection it belongs. Every connection therefore keeps a
//! list of address links that are touched each time it sends to an address.
//!
//! [`ServerContext::find_best_proxy_for_incoming`] picks, among connections
//! holding an unexpired link to the source address, the one that used it
//! most recently. Expired links are not deleted, only ignored, and two
//! connections may hold a link to the same address at the same time (for
//! instance after a NAT rebinding); the most recent one wins.
//!
//! All time values are microseconds supplied by the caller.
//!
//! # Example
//!
//! ```rust
//! use qinq::{ServerConfig, ServerContext};
//!
//! let mut server = ServerContext::new(ServerConfig::default()).unwrap();
//! let a = server.create_connection().unwrap();
//! let b = server.create_connection().unwrap();
//! let peer = "10.0.0.1:443".parse().unwrap();
//!
//! server.touch_or_create(a, peer, 100).unwrap();
//! server.touch_or_create(b, peer, 200).unwrap();
//! assert_eq!(server.find_best_proxy_for_incoming(None, &peer, 300), Some(b));
//! ```

mod connection;

pub use connection::{AddressLink, ConnectionContext, ConnectionHandle};

use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::BufMut;
use tracing::{debug, info, trace};

use crate::ConnectionId;
use crate::config::ServerConfig;
use crate::error::{QinqError, QinqResult};
use crate::proto::compression::Direction;
use crate::proto::datagram::{Compression, packet_to_datagram};

/// Proxy state: a bounded table of connection contexts
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    /// Address expiry in microseconds
    expiry: u64,
    /// Ordered by handle, i.e. by creation
    connections: BTreeMap<ConnectionHandle, ConnectionContext>,
    next_handle: u64,
}

impl ServerContext {
    /// Create a server context after validating `config`
    pub fn new(config: ServerConfig) -> QinqResult<Self> {
        config.validate()?;
        Ok(Self {
            expiry: config.address_expiry_micros(),
            config,
            connections: BTreeMap::new(),
            next_handle: 0,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Create a connection context
    ///
    /// # Errors
    ///
    /// [`QinqError::TooManyConnections`] once `max_connections` contexts exist.
    pub fn create_connection(&mut self) -> QinqResult<ConnectionHandle> {
        let limit = self.config.max_connections;
        if self.connections.len() >= limit {
            debug!(limit, "rejecting connection context: table full");
            return Err(QinqError::TooManyConnections { limit });
        }

        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;
        self.connections.insert(handle, ConnectionContext::new(handle));

        info!(
            connection = %handle,
            active = self.connections.len(),
            "QINQ connection context created"
        );
        Ok(handle)
    }

    /// Tear down a connection context
    ///
    /// Its address links stop counting for routing immediately.
    pub fn delete_connection(&mut self, handle: ConnectionHandle) -> QinqResult<ConnectionContext> {
        let ctx = self
            .connections
            .remove(&handle)
            .ok_or(QinqError::UnknownConnection(handle))?;
        info!(
            connection = %handle,
            links = ctx.address_links().len(),
            active = self.connections.len(),
            "QINQ connection context deleted"
        );
        Ok(ctx)
    }

    /// Connection context for `handle`
    pub fn connection(&self, handle: ConnectionHandle) -> Option<&ConnectionContext> {
        self.connections.get(&handle)
    }

    /// Mutable connection context for `handle`
    pub fn connection_mut(&mut self, handle: ConnectionHandle) -> Option<&mut ConnectionContext> {
        self.connections.get_mut(&handle)
    }

    /// Number of live connection contexts
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection context is live
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Handles of live contexts in creation order
    pub fn handles(&self) -> impl Iterator<Item = ConnectionHandle> + '_ {
        self.connections.keys().copied()
    }

    fn get_mut(&mut self, handle: ConnectionHandle) -> QinqResult<&mut ConnectionContext> {
        self.connections
            .get_mut(&handle)
            .ok_or(QinqError::UnknownConnection(handle))
    }

    /// Record that `handle` used `addr` at `now`
    pub fn touch_or_create(
        &mut self,
        handle: ConnectionHandle,
        addr: SocketAddr,
        now: u64,
    ) -> QinqResult<()> {
        self.get_mut(handle)?.touch(addr, now);
        Ok(())
    }

    /// Associate `handle` with the QUIC connection ID of its live connection
    pub fn bind_connection_id(
        &mut self,
        handle: ConnectionHandle,
        cid: ConnectionId,
    ) -> QinqResult<()> {
        self.get_mut(handle)?.bind_connection_id(cid);
        Ok(())
    }

    /// Pick the connection that owns a packet arriving from `addr`
    ///
    /// A connection bound to `cid_hint` wins if it holds an unexpired link to
    /// `addr`. Otherwise the connection whose unexpired link was used most
    /// recently wins, with ties going to the oldest connection. Returns `None`
    /// when no connection has an unexpired link.
    pub fn find_best_proxy_for_incoming(
        &self,
        cid_hint: Option<&ConnectionId>,
        addr: &SocketAddr,
        now: u64,
    ) -> Option<ConnectionHandle> {
        if let Some(hint) = cid_hint {
            let hinted = self.connections.values().find(|ctx| {
                ctx.connection_id() == Some(hint)
                    && ctx.active_link(addr, now, self.expiry).is_some()
            });
            if let Some(ctx) = hinted {
                trace!(connection = %ctx.handle(), addr = %addr, "routed by connection ID hint");
                return Some(ctx.handle());
            }
        }

        let mut best: Option<(ConnectionHandle, u64)> = None;
        for ctx in self.connections.values() {
            let Some(link) = ctx.active_link(addr, now, self.expiry) else {
                continue;
            };
            if best.is_none_or(|(_, last_use)| link.last_use > last_use) {
                best = Some((ctx.handle(), link.last_use));
            }
        }

        match best {
            Some((handle, last_use)) => {
                trace!(connection = %handle, addr = %addr, last_use, "routed by most recent use");
                Some(handle)
            }
            None => {
                trace!(addr = %addr, "no connection owns incoming address");
                None
            }
        }
    }

    /// Wrap a packet that arrived from `source` for the connection owning it
    ///
    /// Returns `Ok(None)` when no connection owns `source`; the packet is
    /// then simply dropped. A non-empty `connection_id` is also used as the
    /// routing hint.
    pub fn encapsulate_incoming<B: BufMut>(
        &mut self,
        source: SocketAddr,
        connection_id: &ConnectionId,
        payload: &[u8],
        now: u64,
        buf: &mut B,
    ) -> QinqResult<Option<(ConnectionHandle, Compression)>> {
        let hint = (!connection_id.is_empty()).then_some(connection_id);
        let Some(handle) = self.find_best_proxy_for_incoming(hint, &source, now) else {
            return Ok(None);
        };
        let ctx = self.get_mut(handle)?;
        let registry = ctx.compression_mut().registry_mut(Direction::ProxyToClient);
        let compression = packet_to_datagram(registry, source, connection_id, payload, buf)?;
        Ok(Some((handle, compression)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::VarInt;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn server(max: usize) -> ServerContext {
        let mut config = ServerConfig::default();
        config
            .max_connections(max)
            .address_expiry(Duration::from_micros(1_000));
        ServerContext::new(config).unwrap()
    }

    #[test]
    fn table_is_bounded() {
        let mut server = server(2);
        let a = server.create_connection().unwrap();
        server.create_connection().unwrap();
        assert_eq!(
            server.create_connection(),
            Err(QinqError::TooManyConnections { limit: 2 })
        );

        server.delete_connection(a).unwrap();
        let c = server.create_connection().unwrap();
        assert_ne!(a, c);
        assert_eq!(server.len(), 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ServerConfig::default();
        config.max_connections(0);
        assert!(matches!(
            ServerContext::new(config),
            Err(QinqError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn unknown_handles() {
        let mut server = server(1);
        let a = server.create_connection().unwrap();
        server.delete_connection(a).unwrap();
        assert_eq!(
            server.delete_connection(a).unwrap_err(),
            QinqError::UnknownConnection(a)
        );
        assert_eq!(
            server.touch_or_create(a, addr("10.0.0.1:1"), 0),
            Err(QinqError::UnknownConnection(a))
        );
    }

    #[test]
    fn most_recent_wins_and_flips() {
        let mut server = server(4);
        let a = server.create_connection().unwrap();
        let b = server.create_connection().unwrap();
        let peer = addr("10.0.0.1:443");

        server.touch_or_create(a, peer, 100).unwrap();
        server.touch_or_create(b, peer, 200).unwrap();
        assert_eq!(server.find_best_proxy_for_incoming(None, &peer, 300), Some(b));

        server.touch_or_create(a, peer, 400).unwrap();
        assert_eq!(server.find_best_proxy_for_incoming(None, &peer, 500), Some(a));
    }

    #[test]
    fn ties_go_to_oldest_connection() {
        let mut server = server(4);
        let a = server.create_connection().unwrap();
        let b = server.create_connection().unwrap();
        let peer = addr("10.0.0.1:443");
        server.touch_or_create(b, peer, 100).unwrap();
        server.touch_or_create(a, peer, 100).unwrap();
        assert_eq!(server.find_best_proxy_for_incoming(None, &peer, 100), Some(a));
    }

    #[test]
    fn stale_recent_link_loses_to_nothing() {
        let mut server = server(4);
        let a = server.create_connection().unwrap();
        let b = server.create_connection().unwrap();
        let peer = addr("10.0.0.1:443");
        server.touch_or_create(a, peer, 100).unwrap();
        server.touch_or_create(b, peer, 900).unwrap();

        assert_eq!(server.find_best_proxy_for_incoming(None, &peer, 1_100), Some(b));
        assert_eq!(server.find_best_proxy_for_incoming(None, &peer, 1_900), Some(b));
        assert_eq!(server.find_best_proxy_for_incoming(None, &peer, 1_901), None);
    }

    #[test]
    fn hint_selects_bound_connection() {
        let mut server = server(4);
        let a = server.create_connection().unwrap();
        let b = server.create_connection().unwrap();
        let peer = addr("10.0.0.1:443");
        let cid = ConnectionId::new(&[0xaa; 8]);

        server.bind_connection_id(a, cid).unwrap();
        server.touch_or_create(a, peer, 100).unwrap();
        server.touch_or_create(b, peer, 200).unwrap();

        assert_eq!(server.find_best_proxy_for_incoming(Some(&cid), &peer, 300), Some(a));
        // Hint without a link to the address falls back to recency
        let other = addr("10.0.0.2:443");
        server.touch_or_create(b, other, 250).unwrap();
        assert_eq!(server.find_best_proxy_for_incoming(Some(&cid), &other, 300), Some(b));
    }

    #[test]
    fn encapsulate_incoming_uses_proxy_to_client_registry() {
        let mut server = server(4);
        let a = server.create_connection().unwrap();
        let peer = addr("10.0.0.1:443");
        server.touch_or_create(a, peer, 100).unwrap();

        let mut first = Vec::new();
        let routed = server
            .encapsulate_incoming(peer, &ConnectionId::empty(), b"pong", 150, &mut first)
            .unwrap();
        assert_eq!(
            routed,
            Some((
                a,
                Compression::Inline {
                    assigned: VarInt::from_u32(1)
                }
            ))
        );
        assert_eq!(&first[first.len() - 4..], b"pong");

        let mut second = Vec::new();
        let routed = server
            .encapsulate_incoming(peer, &ConnectionId::empty(), b"pong", 160, &mut second)
            .unwrap();
        assert_eq!(routed, Some((a, Compression::Compressed(VarInt::from_u32(1)))));
        assert_eq!(second, b"\x01pong");

        let ctx = server.connection(a).unwrap();
        assert_eq!(ctx.compression().registry(Direction::ProxyToClient).len(), 1);
        assert!(ctx.compression().registry(Direction::ClientToProxy).is_empty());

        let stranger = addr("192.0.2.1:53");
        let mut dropped = Vec::new();
        assert_eq!(
            server
                .encapsulate_incoming(stranger, &ConnectionId::empty(), b"x", 170, &mut dropped)
                .unwrap(),
            None
        );
        assert!(dropped.is_empty());
    }
}
