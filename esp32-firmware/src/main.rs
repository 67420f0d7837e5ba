#[macro_use]
mod logging;
mod utils;
mod websocket;
mod wifi;

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use realtime_link::dns::UdpDnsProvider;
use realtime_link::platform::{elapsed_ms, SystemClock};
use realtime_link::prelude::*;
use serde_json::json;

use crate::utils::get_embedded_env_value;
use crate::websocket::EspTransport;
use crate::wifi::EspRadio;

const TICK_INTERVAL: Duration = Duration::from_millis(10);
const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_DEVICE_ID: &str = "esp32-device";

/// Defaults, overridden by whatever the embedded `.env` sets.
fn link_config() -> Result<LinkConfig> {
    let mut config = LinkConfig::default();

    if let Some(host) = get_embedded_env_value("RELAY_HOST") {
        config.relay.host = host.to_string();
    }
    if let Some(port) = get_embedded_env_value("RELAY_PORT") {
        config.relay.port = port
            .parse()
            .map_err(|_| anyhow!("RELAY_PORT is not a port: {}", port))?;
    }
    if let Some(ssid) = get_embedded_env_value("AP_SSID") {
        config.access_point.ssid = ssid.to_string();
    }
    if let Some(passphrase) = get_embedded_env_value("AP_PASSWORD") {
        config.access_point.passphrase = passphrase.to_string();
    }
    if let Some(secs) = get_embedded_env_value("AP_TIMEOUT_SECS") {
        let secs: u64 = secs
            .parse()
            .map_err(|_| anyhow!("AP_TIMEOUT_SECS is not a number: {}", secs))?;
        config.access_point.timeout_ms = secs * 1_000;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("realtime link firmware, built {}", env!("BUILD_TIMESTAMP"));

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = link_config()?;
    let radio = EspRadio::new(peripherals.modem, sys_loop, nvs)?;
    let clock = SystemClock::new();
    let mut link = RealtimeLink::new(
        config,
        radio,
        EspTransport::new(),
        UdpDnsProvider::new(),
        clock.clone(),
    );

    link.set_message_callback(|message| info!("relay: {}", message));
    link.set_connection_status_callback(|connected| {
        info!("relay session {}", if connected { "up" } else { "down" })
    });

    let identity = get_embedded_env_value("DEVICE_ID").unwrap_or(DEFAULT_DEVICE_ID);
    let credentials = get_embedded_env_value("WIFI_SSID").map(|ssid| {
        Credentials::new(ssid, get_embedded_env_value("WIFI_PASSWORD").unwrap_or(""))
    });
    if credentials.is_none() {
        warn!("no WIFI_SSID in .env, relying on stored station configuration");
    }

    link.begin(credentials, identity);

    let heartbeat_target = get_embedded_env_value("HEARTBEAT_TARGET");
    let mut last_heartbeat = clock.now_ms();

    loop {
        link.tick();

        let now = clock.now_ms();
        if let Some(target) = heartbeat_target {
            if link.is_session_connected() && elapsed_ms(now, last_heartbeat) >= HEARTBEAT_INTERVAL_MS {
                last_heartbeat = now;
                // Failures are logged by the link; the next heartbeat retries
                let _ = link.send_to(target, |payload| {
                    payload.insert("type".into(), json!("heartbeat"));
                    payload.insert("from".into(), json!(identity));
                    payload.insert("uptime_ms".into(), json!(now));
                });
            }
        }

        thread::sleep(TICK_INTERVAL);
    }
}
