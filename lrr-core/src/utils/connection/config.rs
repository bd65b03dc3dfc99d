//! Peer address provisioning.
//!
//! The agent's IPv4 address is stored as a string in a key-value store
//! (non-volatile storage on target). A missing key is not an error at boot:
//! the transport polls until the address has been provisioned.

use core::net::{Ipv4Addr, SocketAddrV4};

use embassy_time::{Duration, Timer};

/// Key holding the agent's dotted-quad IPv4 address.
pub const AGENT_IP_KEY: &str = "uros_ag_ip";

/// Delay between polls while the agent address is missing.
pub const PEER_POLL_BACKOFF: Duration = Duration::from_millis(500);

/// Read-only view of the key-value store.
pub trait KeyValueStore {
    type Error: core::fmt::Debug;

    /// Copy the string stored under `key` into `buf`.
    ///
    /// Returns `Ok(None)` when the key does not exist.
    fn get_str<'b>(
        &mut self,
        key: &str,
        buf: &'b mut [u8],
    ) -> Result<Option<&'b str>, Self::Error>;
}

/// Configuration and setup failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The store could not be read.
    Store,
    /// The agent address has not been provisioned yet.
    MissingPeer,
    /// The stored value is not an IPv4 address.
    InvalidAddress,
    /// The local socket could not be bound.
    Bind,
}

/// Look the agent address up once.
pub fn resolve_peer<K: KeyValueStore>(
    store: &mut K,
    port: u16,
) -> Result<SocketAddrV4, ConfigError> {
    // Long enough for "255.255.255.255".
    let mut buf = [0u8; 16];
    let raw = store
        .get_str(AGENT_IP_KEY, &mut buf)
        .map_err(|error| {
            tracing::warn!(?error, "error reading agent address");
            ConfigError::Store
        })?
        .ok_or(ConfigError::MissingPeer)?;

    let ip: Ipv4Addr = raw.trim().parse().map_err(|_| {
        tracing::warn!(raw, "stored agent address is not IPv4");
        ConfigError::InvalidAddress
    })?;
    Ok(SocketAddrV4::new(ip, port))
}

/// Poll the store until a valid agent address is available.
#[tracing::instrument(level = "info", skip(store))]
pub async fn wait_for_peer<K: KeyValueStore>(
    store: &mut K,
    port: u16,
    backoff: Duration,
) -> SocketAddrV4 {
    loop {
        match resolve_peer(store, port) {
            Ok(peer) => {
                tracing::info!(%peer, "retrieved agent address");
                return peer;
            }
            Err(ConfigError::MissingPeer) => tracing::debug!("agent address has not been set"),
            Err(error) => tracing::warn!(?error, "agent address unusable"),
        }
        Timer::after(backoff).await;
    }
}
