//! Relay socket over `EspWebSocketClient`.
//!
//! The client reports events from its own task; they are forwarded through a
//! channel and drained by `poll_event` on the link's tick.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use esp_idf_svc::io::EspIOError;
use esp_idf_svc::sys;
use esp_idf_svc::ws::client::{
    EspWebSocketClient, EspWebSocketClientConfig, FrameType, WebSocketEvent, WebSocketEventType,
};
use realtime_link::config::RelayEndpoint;
use realtime_link::error::PlatformError;
use realtime_link::platform::{Transport, TransportEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EspTransport {
    client: Option<EspWebSocketClient<'static>>,
    events: Option<Receiver<TransportEvent>>,
    reconnect_interval: Duration,
}

impl EspTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            events: None,
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

impl Transport for EspTransport {
    fn open(&mut self, endpoint: &RelayEndpoint, path: &str) -> Result<(), PlatformError> {
        self.close();

        let url = endpoint.url(path);
        let config = EspWebSocketClientConfig {
            reconnect_timeout_ms: self.reconnect_interval,
            crt_bundle_attach: Some(sys::esp_crt_bundle_attach),
            ..Default::default()
        };

        let (tx, rx) = mpsc::channel();
        let client = EspWebSocketClient::new(&url, &config, CONNECT_TIMEOUT, move |event| {
            forward(&tx, event)
        })
        .map_err(|err| PlatformError::Transport(format!("{}: {}", url, err)))?;

        info!("ws: client started for {}", url);
        self.client = Some(client);
        self.events = Some(rx);
        Ok(())
    }

    fn set_reconnect_interval(&mut self, interval: Duration) {
        // Picked up by the next open
        self.reconnect_interval = interval;
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.as_ref()?.try_recv().ok()
    }

    fn send_text(&mut self, text: &str) -> Result<(), PlatformError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PlatformError::Transport("socket not open".into()))?;
        client
            .send(FrameType::Text(false), text.as_bytes())
            .map_err(|err| PlatformError::Transport(err.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.client
            .as_ref()
            .is_some_and(|client| client.is_connected())
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            info!("ws: client closed");
        }
        self.events = None;
    }
}

fn forward(events: &Sender<TransportEvent>, event: &Result<WebSocketEvent<'_>, EspIOError>) {
    let event = match event {
        Ok(event) => match &event.event_type {
            WebSocketEventType::Connected => TransportEvent::Connected,
            WebSocketEventType::Disconnected | WebSocketEventType::Closed => {
                TransportEvent::Disconnected
            }
            WebSocketEventType::Text(text) => TransportEvent::Text(text.as_bytes().to_vec()),
            WebSocketEventType::Binary(data) => TransportEvent::Binary(data.to_vec()),
            _ => return,
        },
        Err(err) => TransportEvent::Error(err.to_string()),
    };

    // The receiver is gone once the socket was closed
    let _ = events.send(event);
}
