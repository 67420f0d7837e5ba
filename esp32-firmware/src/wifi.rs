//! Station and access point radio on top of `EspWifi`.
//!
//! Joins are non-blocking: `join` and `reconnect` only kick off association
//! and the link polls `is_joined` on later ticks. The access point gets its
//! own router netif at the configured address so DHCP hands clients our
//! address as their DNS server.

use std::ffi::c_void;

use embedded_svc::wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::ipv4::{self, Mask, RouterConfiguration, Subnet};
use esp_idf_svc::netif::{EspNetif, NetifConfiguration};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::{self, esp, EspError};
use esp_idf_svc::wifi::EspWifi;
use realtime_link::error::PlatformError;
use realtime_link::platform::{AccessPointSettings, Credentials, Radio};

use crate::utils::get_disconnect_reason_string;

const ACCESS_POINT_CHANNEL: u8 = 1;
const ACCESS_POINT_MAX_CLIENTS: u16 = 4;

pub struct EspRadio {
    wifi: EspWifi<'static>,
    hostname: Option<String>,
}

impl EspRadio {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> anyhow::Result<Self> {
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs))?;

        unsafe {
            esp!(sys::esp_event_handler_register(
                sys::WIFI_EVENT,
                sys::wifi_event_t_WIFI_EVENT_STA_DISCONNECTED as i32,
                Some(log_station_disconnect),
                std::ptr::null_mut()
            ))?;
        }

        info!("wifi: radio ready");
        Ok(Self {
            wifi,
            hostname: None,
        })
    }

    fn ensure_started(&mut self) -> Result<(), EspError> {
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }

    fn apply_station_hostname(&mut self) {
        let Some(hostname) = self.hostname.as_deref() else {
            return;
        };
        if let Err(err) = self.wifi.sta_netif_mut().set_hostname(hostname) {
            warn!("wifi: could not set hostname {}: {}", hostname, err);
        }
    }
}

impl Radio for EspRadio {
    fn set_hostname(&mut self, hostname: &str) {
        self.hostname = Some(hostname.to_string());
        self.apply_station_hostname();
    }

    fn set_power_save(&mut self, enabled: bool) {
        let mode = if enabled {
            sys::wifi_ps_type_t_WIFI_PS_MIN_MODEM
        } else {
            sys::wifi_ps_type_t_WIFI_PS_NONE
        };
        let rc = unsafe { sys::esp_wifi_set_ps(mode) };
        if rc == sys::ESP_OK {
            info!("wifi: power save {}", if enabled { "enabled" } else { "disabled" });
        } else {
            warn!("wifi: failed to set power save: esp_err_t={}", rc);
        }
    }

    fn join(&mut self, credentials: &Credentials) -> Result<(), PlatformError> {
        let auth_method = if credentials.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        let configuration = Configuration::Client(ClientConfiguration {
            ssid: fixed(&credentials.ssid, "ssid")?,
            password: fixed(&credentials.password, "password")?,
            auth_method,
            ..Default::default()
        });

        self.wifi
            .set_configuration(&configuration)
            .map_err(radio_error)?;
        self.ensure_started().map_err(radio_error)?;
        self.apply_station_hostname();

        info!("wifi: joining {}", credentials.ssid);
        self.wifi.connect().map_err(radio_error)
    }

    fn reconnect(&mut self) -> Result<(), PlatformError> {
        // Falls back to whatever configuration the driver kept in NVS
        self.ensure_started().map_err(radio_error)?;
        self.wifi.connect().map_err(radio_error)
    }

    fn disconnect(&mut self) {
        if let Err(err) = self.wifi.disconnect() {
            debug!("wifi: disconnect: {}", err);
        }
    }

    fn is_joined(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), PlatformError> {
        if let Err(err) = self.wifi.stop() {
            debug!("wifi: stop before access point: {}", err);
        }

        let mask = Mask::try_from(settings.netmask).map_err(|_| {
            PlatformError::AccessPoint(format!("invalid netmask {}", settings.netmask))
        })?;
        let netif = EspNetif::new_with_conf(&NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Router(RouterConfiguration {
                subnet: Subnet {
                    gateway: settings.address,
                    mask,
                },
                dhcp_enabled: true,
                dns: Some(settings.address),
                secondary_dns: None,
            })),
            ..NetifConfiguration::wifi_default_router()
        })
        .map_err(access_point_error)?;
        self.wifi.swap_netif_ap(netif).map_err(access_point_error)?;

        if let Err(err) = self.wifi.ap_netif_mut().set_hostname(&settings.hostname) {
            warn!("wifi: could not set hostname {}: {}", settings.hostname, err);
        }

        let configuration = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: fixed(&settings.ssid, "access point ssid")?,
            password: fixed(&settings.passphrase, "access point passphrase")?,
            auth_method: AuthMethod::WPA2Personal,
            channel: ACCESS_POINT_CHANNEL,
            max_connections: ACCESS_POINT_MAX_CLIENTS,
            ..Default::default()
        });
        self.wifi
            .set_configuration(&configuration)
            .map_err(access_point_error)?;
        self.wifi.start().map_err(access_point_error)?;

        info!("wifi: access point {} up at {}", settings.ssid, settings.address);
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), PlatformError> {
        self.wifi.stop().map_err(access_point_error)?;
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .map_err(access_point_error)
    }
}

fn fixed<const N: usize>(value: &str, what: &str) -> Result<heapless::String<N>, PlatformError> {
    heapless::String::try_from(value)
        .map_err(|_| PlatformError::Radio(format!("{} longer than {} bytes", what, N)))
}

fn radio_error(err: EspError) -> PlatformError {
    PlatformError::Radio(err.to_string())
}

fn access_point_error(err: EspError) -> PlatformError {
    PlatformError::AccessPoint(err.to_string())
}

unsafe extern "C" fn log_station_disconnect(
    _arg: *mut c_void,
    _event_base: sys::esp_event_base_t,
    _event_id: i32,
    event_data: *mut c_void,
) {
    if event_data.is_null() {
        warn!("wifi: station disconnected");
        return;
    }
    let event = &*(event_data as *const sys::wifi_event_sta_disconnected_t);
    warn!(
        "wifi: station disconnected, reason: {} ({})",
        event.reason,
        get_disconnect_reason_string(event.reason)
    );
}
