use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Error};
use log::{info, warn};
use realtime_link::prelude::*;
use realtime_link::sim::SimPlatform;
use serde::Deserialize;
use serde_json::json;

const CONFIG_PATH: &str = "config.ron";

/// Host run settings. The `link` section is the same configuration the
/// firmware uses; the rest scripts the simulated network.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct HostConfig {
    link: LinkConfig,
    identity: String,
    ssid: Option<String>,
    password: String,
    /// Wall-clock tick period; simulated time advances by the same amount.
    tick_interval_ms: u64,
    /// Stop after this many ticks. Runs until Ctrl-C when unset.
    max_ticks: Option<u64>,
    /// Joins fail until simulated time reaches this point.
    network_available_after_ms: u64,
    /// Drop the station link once at this simulated time.
    network_drop_at_ms: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            identity: "sim-device".to_string(),
            ssid: Some("home".to_string()),
            password: "password".to_string(),
            tick_interval_ms: 10,
            max_ticks: None,
            network_available_after_ms: 0,
            network_drop_at_ms: None,
        }
    }
}

impl HostConfig {
    fn load() -> Result<HostConfig, Error> {
        if !Path::new(CONFIG_PATH).exists() {
            warn!("{} not found, using defaults", CONFIG_PATH);
            return Ok(HostConfig::default());
        }

        let text = std::fs::read_to_string(CONFIG_PATH)
            .with_context(|| format!("reading {}", CONFIG_PATH))?;
        let config: HostConfig =
            ron::from_str(&text).with_context(|| format!("parsing {}", CONFIG_PATH))?;
        config.link.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = HostConfig::load()?;
    info!("relay: {}", config.link.relay.url(&config.link.relay.path));

    let platform = SimPlatform::new();
    let network = platform.network();
    platform
        .radio
        .join_by_default(config.network_available_after_ms == 0);

    let mut link = platform.link(config.link.clone());
    link.set_message_callback(|message| println!("message: {}", message));
    link.set_connection_status_callback(|connected| println!("connected: {}", connected));

    let credentials = config
        .ssid
        .as_ref()
        .map(|ssid| Credentials::new(ssid.as_str(), config.password.as_str()));
    link.begin(credentials, config.identity.as_str());

    let tick_ms = config.tick_interval_ms.max(1);
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut ticks = 0u64;
    let mut echoed = 0usize;
    let mut dropped = false;
    let mut greeted = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = interval.tick() => {}
        }

        platform.clock.advance(tick_ms);
        let now = platform.clock.now_ms();

        if now >= config.network_available_after_ms {
            platform.radio.join_by_default(true);
        }
        if let Some(drop_at) = config.network_drop_at_ms {
            if !dropped && now >= drop_at {
                info!("simulating loss of the station link");
                network.set_up(false);
                dropped = true;
            }
        }

        link.tick();

        if link.is_session_connected() && !greeted {
            let identity = config.identity.clone();
            if link
                .send_to(identity, |payload| {
                    payload.insert("hello".into(), json!("relay"));
                })
                .is_ok()
            {
                greeted = true;
            }
        }

        // Loopback relay: frames addressed to ourselves come straight back
        let sent = platform.transport.sent();
        for frame in &sent[echoed..] {
            let target = serde_json::from_str::<serde_json::Value>(frame)
                .ok()
                .and_then(|value| value.get("targetId").cloned());
            if target == Some(json!(config.identity)) {
                platform.transport.push_inbound(frame.as_bytes());
            }
        }
        echoed = sent.len();

        ticks += 1;
        if config.max_ticks.is_some_and(|max| ticks >= max) {
            info!("tick limit of {} reached", ticks);
            break;
        }
    }

    info!(
        "finished in state {:?} after {} simulated ms",
        link.state(),
        platform.clock.now_ms()
    );

    Ok(())
}
