// Copyright 2024 Saorsa Labs Ltd.
//
// This Saorsa Network Software is licensed under the General Public License (GPL), version 3.
// Please see the file LICENSE-GPL, or visit <http://www.gnu.org/licenses/> for the full text.
//
// Full details available at https://saorsalabs.com/licenses

//! Server-side configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QinqError, QinqResult};

/// How long an address link stays eligible for routing after its last use
pub const DEFAULT_ADDRESS_EXPIRY: Duration = Duration::from_secs(120);

/// Default bound on concurrently proxied connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Configuration for a [`ServerContext`](crate::ServerContext)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum number of live connection contexts
    pub max_connections: usize,
    /// Age after which an address link is ignored by routing queries
    pub address_expiry: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            address_expiry: DEFAULT_ADDRESS_EXPIRY,
        }
    }
}

impl ServerConfig {
    /// Set the connection table bound
    pub fn max_connections(&mut self, value: usize) -> &mut Self {
        self.max_connections = value;
        self
    }

    /// Set the address link expiry
    pub fn address_expiry(&mut self, value: Duration) -> &mut Self {
        self.address_expiry = value;
        self
    }

    /// Address expiry in the microsecond clock used by routing queries
    pub fn address_expiry_micros(&self) -> u64 {
        u64::try_from(self.address_expiry.as_micros()).unwrap_or(u64::MAX)
    }

    /// Check the configuration before building a server context
    pub fn validate(&self) -> QinqResult<()> {
        if self.max_connections == 0 {
            return Err(QinqError::InvalidConfig {
                parameter: "max_connections",
                reason: "must allow at least one connection",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.address_expiry_micros(), 120_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_connections_rejected() {
        let mut config = ServerConfig::default();
        config.max_connections(0);
        assert!(matches!(
            config.validate(),
            Err(QinqError::InvalidConfig {
                parameter: "max_connections",
                ..
            })
        ));
    }

    #[test]
    fn serde_round_trip_and_partial_input() {
        let mut config = ServerConfig::default();
        config
            .max_connections(4)
            .address_expiry(Duration::from_millis(1500));
        let json = serde_json::to_string(&config).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let partial: ServerConfig = serde_json::from_str(r#"{"max_connections": 8}"#).unwrap();
        assert_eq!(partial.max_connections, 8);
        assert_eq!(partial.address_expiry, DEFAULT_ADDRESS_EXPIRY);
    }
}
