//! Persistent message socket to the relay.

use std::time::Duration;

use common::relay::identity_path;
use common::Envelope;
use log::{debug, info, warn};
use serde_json::Value;

use crate::callbacks::LinkEvent;
use crate::codec;
use crate::config::RelayEndpoint;
use crate::error::{PlatformError, SendError};
use crate::platform::{elapsed_ms, Transport, TransportEvent};

/// Upper bound on transport events handled in one tick so a chatty relay
/// cannot starve the rest of the device loop.
pub const MAX_EVENTS_PER_TICK: usize = 16;

/// Outcome of one pass over the socket.
#[derive(Debug, Default, PartialEq)]
pub struct SessionTick {
    pub events: Vec<LinkEvent>,
    /// The transport reported the socket closed and it has not come back
    /// within the same pass. Recovery is up to the caller.
    pub lost: bool,
}

pub struct SessionController<T: Transport> {
    transport: T,
    endpoint: RelayEndpoint,
    reconnect_interval: Duration,
    path: Option<String>,
    opened: bool,
    last_open_ms: u64,
    // Last status handed to the application; reports are edge-triggered.
    connected: bool,
}

impl<T: Transport> SessionController<T> {
    pub fn new(transport: T, endpoint: RelayEndpoint, reconnect_interval: Duration) -> Self {
        Self {
            transport,
            endpoint,
            reconnect_interval,
            path: None,
            opened: false,
            last_open_ms: 0,
            connected: false,
        }
    }

    /// Open (or reopen) the socket addressed with `identity`.
    ///
    /// A refused open is not fatal: `tick` retries it once the reconnect
    /// interval has passed.
    pub fn open(&mut self, identity: &str, now_ms: u64) -> Result<(), PlatformError> {
        if self.opened {
            self.transport.close();
            self.opened = false;
        }

        let path = identity_path(&self.endpoint.path, identity);
        self.path = Some(path);
        self.open_transport(now_ms)
    }

    fn open_transport(&mut self, now_ms: u64) -> Result<(), PlatformError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        self.last_open_ms = now_ms;
        self.transport.set_reconnect_interval(self.reconnect_interval);

        match self.transport.open(&self.endpoint, path) {
            Ok(()) => {
                info!("session opening to {}", self.endpoint.url(path));
                self.opened = true;
                Ok(())
            }
            Err(err) => {
                warn!("session open to {} refused: {}", self.endpoint.url(path), err);
                Err(err)
            }
        }
    }

    /// Close the socket. Reports a disconnect if the application last saw
    /// the session connected.
    pub fn close(&mut self) -> Option<LinkEvent> {
        if self.opened {
            self.transport.close();
            self.opened = false;
            info!("session closed");
        }
        self.path = None;
        self.report(false)
    }

    /// The network under the socket is gone. The socket is left alone; the
    /// application is told once that it is disconnected.
    pub fn mark_link_lost(&mut self) -> Option<LinkEvent> {
        self.report(false)
    }

    /// Service socket I/O and translate transport events into link events.
    pub fn tick(&mut self, now_ms: u64) -> SessionTick {
        let mut tick = SessionTick::default();

        if !self.opened
            && self.path.is_some()
            && elapsed_ms(now_ms, self.last_open_ms) >= self.reconnect_interval.as_millis() as u64
        {
            debug!("retrying refused session open");
            let _ = self.open_transport(now_ms);
        }

        if !self.opened {
            return tick;
        }

        let mut saw_disconnect = false;

        for _ in 0..MAX_EVENTS_PER_TICK {
            let Some(event) = self.transport.poll_event() else {
                break;
            };

            match event {
                TransportEvent::Connected => {
                    info!("session connected");
                    saw_disconnect = false;
                    tick.events.extend(self.report(true));
                }
                TransportEvent::Disconnected => {
                    info!("session disconnected");
                    saw_disconnect = true;
                    tick.events.extend(self.report(false));
                }
                TransportEvent::Text(frame) => match codec::decode(&frame) {
                    Ok(value) => tick.events.push(LinkEvent::Message(value)),
                    Err(err) => warn!("dropping inbound frame: {}", err),
                },
                TransportEvent::Binary(frame) => {
                    debug!("ignoring {} byte binary frame", frame.len());
                }
                TransportEvent::Error(err) => warn!("transport error: {}", err),
            }
        }

        tick.lost = saw_disconnect && !self.transport.is_connected();
        tick
    }

    /// Serialize and transmit. Sending is attempted whatever the connection
    /// state; the transport decides whether it can deliver.
    pub fn send(&mut self, envelope: &Envelope) -> Result<(), SendError> {
        let text = codec::encode(envelope)?;
        self.transport.send_text(&text)?;
        Ok(())
    }

    pub fn send_value(&mut self, value: &Value) -> Result<(), SendError> {
        let text = codec::encode_value(value)?;
        self.transport.send_text(&text)?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn report(&mut self, connected: bool) -> Option<LinkEvent> {
        if self.connected == connected {
            return None;
        }
        self.connected = connected;
        Some(LinkEvent::ConnectionStatus(connected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimNetwork, SimTransport};
    use serde_json::json;

    fn session() -> (SessionController<SimTransport>, SimTransport, SimNetwork) {
        let network = SimNetwork::new();
        network.set_up(true);
        let transport = SimTransport::new(network.clone());
        let session = SessionController::new(
            transport.clone(),
            RelayEndpoint::default(),
            Duration::from_secs(5),
        );
        (session, transport, network)
    }

    #[test]
    fn test_open_addresses_identity() {
        let (mut session, transport, _network) = session();
        session.open("dev 42", 0).unwrap();

        assert_eq!(session.path(), Some("/?id=dev%2042"));
        assert_eq!(transport.opened_paths(), vec!["/?id=dev%2042".to_string()]);
        assert_eq!(transport.reconnect_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_connected_and_messages_dispatched() {
        let (mut session, transport, _network) = session();
        session.open("dev42", 0).unwrap();
        transport.push_inbound(br#"{"cmd":"blink"}"#);

        let tick = session.tick(10);
        assert!(!tick.lost);
        assert_eq!(
            tick.events,
            vec![
                LinkEvent::ConnectionStatus(true),
                LinkEvent::Message(json!({ "cmd": "blink" })),
            ]
        );
        assert!(session.is_connected());
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let (mut session, transport, _network) = session();
        session.open("dev42", 0).unwrap();
        session.tick(0);

        transport.push_inbound(b"{oops");
        transport.push_inbound_binary(&[1, 2, 3]);
        transport.push_inbound(b"[1]");
        assert_eq!(session.tick(1).events, vec![LinkEvent::Message(json!([1]))]);
    }

    #[test]
    fn test_status_is_edge_triggered() {
        let (mut session, transport, _network) = session();
        session.open("dev42", 0).unwrap();
        assert_eq!(session.tick(0).events, vec![LinkEvent::ConnectionStatus(true)]);

        assert_eq!(session.mark_link_lost(), Some(LinkEvent::ConnectionStatus(false)));
        transport.drop_connection();
        let tick = session.tick(1);
        assert!(tick.events.is_empty());
        assert!(tick.lost);
        assert_eq!(session.mark_link_lost(), None);
    }

    #[test]
    fn test_drop_is_signalled_until_reopened() {
        let (mut session, transport, _network) = session();
        transport.disable_auto_reconnect();
        session.open("dev42", 0).unwrap();
        session.tick(0);

        transport.drop_connection();
        assert_eq!(
            session.tick(1),
            SessionTick {
                events: vec![LinkEvent::ConnectionStatus(false)],
                lost: true,
            }
        );

        // The socket stays down, but the drop is only reported once
        assert_eq!(session.tick(2), SessionTick::default());
        assert!(!session.is_connected());

        session.open("dev42", 3).unwrap();
        assert_eq!(session.tick(4).events, vec![LinkEvent::ConnectionStatus(true)]);
        assert_eq!(transport.opened_paths().len(), 2);
    }

    #[test]
    fn test_refused_open_is_retried_after_interval() {
        let (mut session, transport, _network) = session();
        transport.refuse_next_open();

        assert!(session.open("dev42", 0).is_err());
        assert!(!session.is_open());

        session.tick(4_999);
        assert!(!session.is_open());
        session.tick(5_000);
        assert!(session.is_open());
        assert_eq!(transport.opened_paths().len(), 1);
    }

    #[test]
    fn test_send_is_attempted_while_disconnected() {
        let (mut session, transport, network) = session();
        network.set_up(false);

        let envelope = Envelope::new("dev42", json!({ "x": 1 }));
        let err = session.send(&envelope).unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
        assert_eq!(transport.send_attempts(), 1);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_send_while_connected() {
        let (mut session, transport, _network) = session();
        session.open("dev42", 0).unwrap();
        session.tick(0);

        session.send(&Envelope::new("dev42", json!({ "x": 1 }))).unwrap();
        session.send_value(&json!({ "raw": true })).unwrap();

        assert_eq!(
            transport.sent(),
            vec![
                r#"{"targetId":"dev42","payload":{"x":1}}"#.to_string(),
                r#"{"raw":true}"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_close_reports_disconnect_once() {
        let (mut session, transport, _network) = session();
        session.open("dev42", 0).unwrap();
        session.tick(0);

        assert_eq!(session.close(), Some(LinkEvent::ConnectionStatus(false)));
        assert_eq!(session.close(), None);
        assert_eq!(transport.closes(), 1);
    }
}
