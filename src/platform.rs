//! Capability surface the link consumes from the device platform.
//!
//! The radio stack, the TLS/WebSocket transport and the captive DNS responder
//! are never implemented here. Firmware supplies real implementations; the
//! [`sim`](crate::sim) module supplies deterministic ones for host runs.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::config::RelayEndpoint;
use crate::error::PlatformError;

/// Station-mode network credentials
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

/// Everything the radio needs to bring up the local configuration network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPointSettings {
    pub ssid: String,
    pub passphrase: String,
    pub hostname: String,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// The single wireless radio. Station and access-point use are mutually
/// exclusive; the state machine never asks for both at once.
pub trait Radio {
    fn set_hostname(&mut self, hostname: &str);

    fn set_power_save(&mut self, enabled: bool);

    /// Start associating with `credentials`. Must not wait for the result;
    /// progress is observed through [`Radio::is_joined`].
    fn join(&mut self, credentials: &Credentials) -> Result<(), PlatformError>;

    /// Re-initiate association with whatever credentials the radio last used.
    fn reconnect(&mut self) -> Result<(), PlatformError>;

    fn disconnect(&mut self);

    fn is_joined(&self) -> bool;

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), PlatformError>;

    fn stop_access_point(&mut self) -> Result<(), PlatformError>;
}

/// A running local DNS responder. Owned by the access-point session that
/// started it and consumed by [`DnsResponder::stop`].
pub trait DnsResponder {
    /// Answer at most one pending query. Never blocks.
    fn process_next_request(&mut self);

    fn stop(self);
}

/// Starts DNS responders that resolve every name under `domain` to `address`.
pub trait DnsProvider {
    type Responder: DnsResponder;

    fn start(
        &mut self,
        port: u16,
        domain: &str,
        address: Ipv4Addr,
    ) -> Result<Self::Responder, PlatformError>;
}

/// Events surfaced by the message socket, drained once per tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Text(Vec<u8>),
    Binary(Vec<u8>),
    Error(String),
}

/// Secure persistent message socket to the relay.
pub trait Transport {
    /// Begin connecting to `endpoint` at `path`. Completion is reported as a
    /// [`TransportEvent::Connected`].
    fn open(&mut self, endpoint: &RelayEndpoint, path: &str) -> Result<(), PlatformError>;

    /// The transport's own reconnect timer. Advisory; seconds granularity is
    /// enough.
    fn set_reconnect_interval(&mut self, interval: Duration);

    /// Service pending I/O and return the next event, if any.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    fn send_text(&mut self, text: &str) -> Result<(), PlatformError>;

    fn is_connected(&self) -> bool;

    fn close(&mut self);
}

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;

    /// Only used by the bounded startup wait in `begin`.
    fn sleep(&self, duration: Duration);
}

/// Milliseconds elapsed from `since` to `now`, tolerant of counter wrap.
pub fn elapsed_ms(now: u64, since: u64) -> u64 {
    now.wrapping_sub(since)
}

/// [`Clock`] backed by [`Instant`]
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_handles_wrap() {
        assert_eq!(elapsed_ms(10, 4), 6);
        assert_eq!(elapsed_ms(3, u64::MAX - 1), 5);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now_ms() >= first);
    }
}
