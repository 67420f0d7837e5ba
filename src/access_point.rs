//! Local configuration network.
//!
//! While a session is active the radio runs as an access point at a fixed
//! private address and a wildcard DNS responder points every name at that
//! address. The responder only exists for the lifetime of the session.

use log::{debug, info, warn};

use crate::config::AccessPointConfig;
use crate::error::PlatformError;
use crate::platform::{elapsed_ms, AccessPointSettings, DnsProvider, DnsResponder, Radio};

/// Domain pattern handed to the DNS responder: answer for every name.
pub const WILDCARD_DOMAIN: &str = "*";

/// State of a running access point. Dropped on exit.
#[derive(Debug)]
pub struct AccessPointSession<R> {
    pub started_ms: u64,
    pub ssid: String,
    pub passphrase: String,
    responder: Option<R>,
}

impl<R> AccessPointSession<R> {
    pub fn has_dns(&self) -> bool {
        self.responder.is_some()
    }
}

pub struct AccessPointController<P: DnsProvider> {
    dns: P,
    config: AccessPointConfig,
    timeout_ms: u64,
    session: Option<AccessPointSession<P::Responder>>,
}

impl<P: DnsProvider> AccessPointController<P> {
    pub fn new(dns: P, config: AccessPointConfig) -> Self {
        Self {
            dns,
            timeout_ms: config.timeout_ms,
            config,
            session: None,
        }
    }

    /// Bring up the access point. Returns `Ok(false)` without touching
    /// anything when one is already running.
    ///
    /// Empty or missing credentials fall back to the configured defaults.
    pub fn start<R: Radio>(
        &mut self,
        radio: &mut R,
        now_ms: u64,
        ssid: Option<&str>,
        passphrase: Option<&str>,
    ) -> Result<bool, PlatformError> {
        if self.session.is_some() {
            debug!("access point already active, ignoring start");
            return Ok(false);
        }

        let ssid = non_empty(ssid).unwrap_or(&self.config.ssid).to_string();
        let passphrase = non_empty(passphrase)
            .unwrap_or(&self.config.passphrase)
            .to_string();

        let settings = AccessPointSettings {
            ssid: ssid.clone(),
            passphrase: passphrase.clone(),
            hostname: self.config.hostname.clone(),
            address: self.config.address,
            netmask: self.config.netmask,
        };

        radio.disconnect();
        radio.set_hostname(&self.config.hostname);
        radio.start_access_point(&settings)?;

        let responder = match self
            .dns
            .start(self.config.dns_port, WILDCARD_DOMAIN, self.config.address)
        {
            Ok(responder) => Some(responder),
            Err(err) => {
                warn!("access point running without captive dns: {}", err);
                None
            }
        };

        info!("access point started");
        info!("ssid: {}", ssid);
        info!("access via: http://{}", self.config.address);

        self.session = Some(AccessPointSession {
            started_ms: now_ms,
            ssid,
            passphrase,
            responder,
        });

        Ok(true)
    }

    /// Service one DNS query and enforce the timeout. Returns true when this
    /// call stopped the access point because the timeout elapsed.
    pub fn tick<R: Radio>(&mut self, radio: &mut R, now_ms: u64) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        if let Some(responder) = session.responder.as_mut() {
            responder.process_next_request();
        }

        if self.timeout_ms > 0 && elapsed_ms(now_ms, session.started_ms) >= self.timeout_ms {
            info!("access point timeout of {} ms reached, stopping", self.timeout_ms);
            self.stop(radio);
            return true;
        }

        false
    }

    /// Tear down DNS and the access point. Returns whether one was running.
    pub fn stop<R: Radio>(&mut self, radio: &mut R) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };

        if let Some(responder) = session.responder {
            responder.stop();
        }
        if let Err(err) = radio.stop_access_point() {
            warn!("failed to stop access point cleanly: {}", err);
        }

        info!("access point stopped");
        true
    }

    /// Zero disables the timeout. Applies to a running access point too,
    /// measured from its start.
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
        info!("access point timeout set to {} ms", timeout_ms);
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&AccessPointSession<P::Responder>> {
        self.session.as_ref()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDns, SimRadio};
    use std::net::Ipv4Addr;

    fn controller() -> (AccessPointController<SimDns>, SimDns, SimRadio) {
        let dns = SimDns::new();
        let controller = AccessPointController::new(dns.clone(), AccessPointConfig::default());
        (controller, dns, SimRadio::new())
    }

    #[test]
    fn test_start_uses_defaults_for_missing_credentials() {
        let (mut controller, dns, mut radio) = controller();

        assert_eq!(controller.start(&mut radio, 0, None, Some("")), Ok(true));

        let session = controller.session().unwrap();
        assert_eq!(session.ssid, AccessPointConfig::default().ssid);
        assert_eq!(session.passphrase, AccessPointConfig::default().passphrase);
        assert!(session.has_dns());
        assert!(radio.access_point_active());
        assert_eq!(radio.hostname().as_deref(), Some("LINK_AP_Config"));
        assert_eq!(dns.started(), 1);
        assert_eq!(dns.last_address(), Some(Ipv4Addr::new(192, 168, 4, 1)));
    }

    #[test]
    fn test_second_start_is_noop() {
        let (mut controller, dns, mut radio) = controller();

        controller.start(&mut radio, 100, Some("Mine"), Some("password123")).unwrap();
        assert_eq!(controller.start(&mut radio, 900, None, None), Ok(false));

        assert_eq!(dns.started(), 1);
        assert_eq!(radio.access_point_starts(), 1);
        let session = controller.session().unwrap();
        assert_eq!(session.started_ms, 100);
        assert_eq!(session.ssid, "Mine");
    }

    #[test]
    fn test_timeout_stops_access_point() {
        let (mut controller, dns, mut radio) = controller();
        controller.set_timeout(1_000);
        controller.start(&mut radio, 0, None, None).unwrap();

        assert!(!controller.tick(&mut radio, 999));
        assert!(controller.is_active());
        assert!(controller.tick(&mut radio, 1_000));
        assert!(!controller.is_active());
        assert!(!radio.access_point_active());
        assert_eq!(dns.running(), 0);
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let (mut controller, dns, mut radio) = controller();
        controller.start(&mut radio, 0, None, None).unwrap();

        for now in (0..10_000_000).step_by(250_000) {
            assert!(!controller.tick(&mut radio, now));
        }
        assert!(controller.is_active());
        assert_eq!(dns.serviced(), 40);
    }

    #[test]
    fn test_dns_failure_keeps_access_point_up() {
        let (mut controller, dns, mut radio) = controller();
        dns.fail_next_start();

        assert_eq!(controller.start(&mut radio, 0, None, None), Ok(true));
        assert!(!controller.session().unwrap().has_dns());
        assert!(!controller.tick(&mut radio, 10));
    }

    #[test]
    fn test_stop_error_still_tears_down() {
        let (mut controller, dns, mut radio) = controller();
        controller.start(&mut radio, 0, None, None).unwrap();
        radio.fail_next_access_point_stop();

        assert!(controller.stop(&mut radio));
        assert!(!controller.is_active());
        assert!(!radio.access_point_active());
        assert_eq!(dns.running(), 0);
        assert!(!controller.stop(&mut radio));
    }

    #[test]
    fn test_stop_when_inactive() {
        let (mut controller, _dns, mut radio) = controller();
        assert!(!controller.stop(&mut radio));
    }
}
