use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use common::relay::{
    ACCESS_POINT_ADDRESS, ACCESS_POINT_NETMASK, DEFAULT_RELAY_HOST, DEFAULT_RELAY_PORT,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Runtime configuration for the link. Every field has a default, so an
/// empty `()` config file is valid.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub relay: RelayEndpoint,
    /// Reconnect interval handed to the transport's own retry timer.
    pub transport_reconnect_interval_ms: u64,
    pub backoff: BackoffConfig,
    /// Consecutive failed joins before falling back to access-point mode.
    pub max_join_attempts: u32,
    /// When false the link keeps retrying station mode forever.
    pub access_point_fallback: bool,
    /// Bounded blocking wait inside `begin`. Zero makes `begin` non-blocking.
    pub startup_join_timeout_ms: u64,
    /// Deadline for each later, polled rejoin attempt.
    pub rejoin_timeout_ms: u64,
    pub join_poll_interval_ms: u64,
    pub station_hostname: String,
    pub disable_power_save: bool,
    pub access_point: AccessPointConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RelayEndpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub path: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub factor: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AccessPointConfig {
    pub ssid: String,
    pub passphrase: String,
    pub hostname: String,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dns_port: u16,
    /// Zero means the access point never expires on its own.
    pub timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            relay: RelayEndpoint::default(),
            transport_reconnect_interval_ms: 5_000,
            backoff: BackoffConfig::default(),
            max_join_attempts: 5,
            access_point_fallback: true,
            startup_join_timeout_ms: 15_000,
            rejoin_timeout_ms: 10_000,
            join_poll_interval_ms: 500,
            station_hostname: "LINK_Device".to_string(),
            disable_power_save: true,
            access_point: AccessPointConfig::default(),
        }
    }
}

impl Default for RelayEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_RELAY_HOST.to_string(),
            port: DEFAULT_RELAY_PORT,
            secure: true,
            path: "/".to_string(),
        }
    }
}

impl RelayEndpoint {
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// Full socket URL for `path` (which already carries the query string).
    pub fn url(&self, path: &str) -> String {
        format!("{}://{}:{}{}", self.scheme(), self.host, self.port, path)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            cap_delay_ms: 60_000,
            factor: 2,
        }
    }
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: "LINK_Setup".to_string(),
            passphrase: "link-setup-4f9q".to_string(),
            hostname: "LINK_AP_Config".to_string(),
            address: Ipv4Addr::from(ACCESS_POINT_ADDRESS),
            netmask: Ipv4Addr::from(ACCESS_POINT_NETMASK),
            dns_port: 53,
            timeout_ms: 0,
        }
    }
}

impl LinkConfig {
    /// Load and validate a RON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<LinkConfig, ConfigError> {
        let config = std::fs::read_to_string(path)?;
        Self::from_ron(&config)
    }

    pub fn from_ron(source: &str) -> Result<LinkConfig, ConfigError> {
        let config: LinkConfig = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(reason.to_string()))
        };

        if self.relay.host.is_empty() {
            return invalid("relay host must not be empty");
        }
        if self.backoff.base_delay_ms == 0 {
            return invalid("backoff base delay must be positive");
        }
        if self.backoff.base_delay_ms > self.backoff.cap_delay_ms {
            return invalid("backoff base delay exceeds cap");
        }
        if self.backoff.factor == 0 {
            return invalid("backoff factor must be at least 1");
        }
        if self.max_join_attempts == 0 {
            return invalid("max_join_attempts must be at least 1");
        }
        if self.access_point.ssid.is_empty() || self.access_point.ssid.len() > 32 {
            return invalid("access point ssid must be 1..=32 bytes");
        }
        if !(8..=63).contains(&self.access_point.passphrase.len()) {
            return invalid("access point passphrase must be 8..=63 bytes");
        }

        Ok(())
    }

    pub fn transport_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.transport_reconnect_interval_ms)
    }
}
