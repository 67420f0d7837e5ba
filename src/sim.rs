//! In-memory platform for host runs and tests.
//!
//! Every handle is a cheap clone over shared state, so a test can keep one
//! copy to script and inspect a collaborator after moving another copy into
//! the link.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use crate::config::{LinkConfig, RelayEndpoint};
use crate::error::PlatformError;
use crate::platform::{
    AccessPointSettings, Clock, Credentials, DnsProvider, DnsResponder, Radio, Transport,
    TransportEvent,
};
use crate::state::RealtimeLink;

pub type SimLink = RealtimeLink<SimRadio, SimTransport, SimDns, ManualClock>;

/// One handle to each simulated collaborator, all sharing one network.
#[derive(Clone)]
pub struct SimPlatform {
    pub radio: SimRadio,
    pub transport: SimTransport,
    pub dns: SimDns,
    pub clock: ManualClock,
}

impl SimPlatform {
    pub fn new() -> Self {
        let network = SimNetwork::new();
        Self {
            radio: SimRadio::with_network(network.clone()),
            transport: SimTransport::new(network),
            dns: SimDns::new(),
            clock: ManualClock::new(),
        }
    }

    pub fn network(&self) -> SimNetwork {
        self.radio.network()
    }

    /// A link wired to clones of these handles.
    pub fn link(&self, config: LinkConfig) -> SimLink {
        RealtimeLink::new(
            config,
            self.radio.clone(),
            self.transport.clone(),
            self.dns.clone(),
            self.clock.clone(),
        )
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Clock that only moves when told to. `sleep` advances it.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as u64);
    }
}

/// Whether the upstream network is reachable. Shared by the radio and the
/// transport.
#[derive(Clone, Default)]
pub struct SimNetwork {
    up: Rc<Cell<bool>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_up(&self, up: bool) {
        self.up.set(up);
    }

    pub fn is_up(&self) -> bool {
        self.up.get()
    }
}

#[derive(Default)]
struct RadioState {
    hostname: Option<String>,
    power_save: Option<bool>,
    credentials: Option<Credentials>,
    join_script: VecDeque<bool>,
    join_by_default: bool,
    joins: usize,
    reconnects: usize,
    disconnects: usize,
    access_point: Option<AccessPointSettings>,
    access_point_starts: usize,
    fail_next_access_point: bool,
    fail_next_access_point_stop: bool,
    refused_joins: usize,
}

/// Radio whose join outcomes are scripted. A successful join brings the
/// shared network up immediately; a failed one leaves it down.
#[derive(Clone)]
pub struct SimRadio {
    network: SimNetwork,
    state: Rc<RefCell<RadioState>>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::with_network(SimNetwork::new())
    }

    pub fn with_network(network: SimNetwork) -> Self {
        Self {
            network,
            state: Rc::new(RefCell::new(RadioState {
                join_by_default: true,
                ..Default::default()
            })),
        }
    }

    pub fn network(&self) -> SimNetwork {
        self.network.clone()
    }

    /// Outcomes for the next join/reconnect calls, in order.
    pub fn script_joins(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state.borrow_mut().join_script.extend(outcomes);
    }

    /// Outcome once the script runs out.
    pub fn join_by_default(&self, succeed: bool) {
        self.state.borrow_mut().join_by_default = succeed;
    }

    /// The access point the device was associated with goes away.
    pub fn drop_link(&self) {
        self.network.set_up(false);
    }

    pub fn fail_next_access_point(&self) {
        self.state.borrow_mut().fail_next_access_point = true;
    }

    /// The driver reports an error when asked to stop the access point. The
    /// access point still goes down.
    pub fn fail_next_access_point_stop(&self) {
        self.state.borrow_mut().fail_next_access_point_stop = true;
    }

    /// The next join or reconnect call is refused outright instead of
    /// starting an association. Calls add up.
    pub fn fail_next_join(&self) {
        self.state.borrow_mut().refused_joins += 1;
    }

    pub fn hostname(&self) -> Option<String> {
        self.state.borrow().hostname.clone()
    }

    pub fn power_save(&self) -> Option<bool> {
        self.state.borrow().power_save
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.state.borrow().credentials.clone()
    }

    /// Join and reconnect calls together.
    pub fn join_attempts(&self) -> usize {
        let state = self.state.borrow();
        state.joins + state.reconnects
    }

    pub fn disconnects(&self) -> usize {
        self.state.borrow().disconnects
    }

    pub fn access_point_active(&self) -> bool {
        self.state.borrow().access_point.is_some()
    }

    pub fn access_point_settings(&self) -> Option<AccessPointSettings> {
        self.state.borrow().access_point.clone()
    }

    pub fn access_point_starts(&self) -> usize {
        self.state.borrow().access_point_starts
    }

    fn next_outcome(&self) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        if state.access_point.is_some() {
            return Err(PlatformError::Radio("radio is in access point mode".into()));
        }
        if state.refused_joins > 0 {
            state.refused_joins -= 1;
            return Err(PlatformError::Radio("association refused by driver".into()));
        }
        let succeed = match state.join_script.pop_front() {
            Some(outcome) => outcome,
            None => state.join_by_default,
        };
        drop(state);

        if succeed {
            self.network.set_up(true);
        }
        Ok(())
    }
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for SimRadio {
    fn set_hostname(&mut self, hostname: &str) {
        self.state.borrow_mut().hostname = Some(hostname.to_string());
    }

    fn set_power_save(&mut self, enabled: bool) {
        self.state.borrow_mut().power_save = Some(enabled);
    }

    fn join(&mut self, credentials: &Credentials) -> Result<(), PlatformError> {
        {
            let mut state = self.state.borrow_mut();
            state.joins += 1;
            state.credentials = Some(credentials.clone());
        }
        self.next_outcome()
    }

    fn reconnect(&mut self) -> Result<(), PlatformError> {
        self.state.borrow_mut().reconnects += 1;
        self.next_outcome()
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().disconnects += 1;
        self.network.set_up(false);
    }

    fn is_joined(&self) -> bool {
        self.network.is_up() && self.state.borrow().access_point.is_none()
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        if state.fail_next_access_point {
            state.fail_next_access_point = false;
            return Err(PlatformError::AccessPoint("soft ap refused to start".into()));
        }
        self.network.set_up(false);
        state.access_point = Some(settings.clone());
        state.access_point_starts += 1;
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        state.access_point = None;
        if state.fail_next_access_point_stop {
            state.fail_next_access_point_stop = false;
            return Err(PlatformError::AccessPoint("wifi stop timed out".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct DnsState {
    started: usize,
    running: usize,
    serviced: usize,
    last_address: Option<Ipv4Addr>,
    fail_next_start: bool,
}

/// Counts responder lifecycles and serviced polls.
#[derive(Clone, Default)]
pub struct SimDns {
    state: Rc<RefCell<DnsState>>,
}

pub struct SimDnsResponder {
    state: Rc<RefCell<DnsState>>,
}

impl SimDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_start(&self) {
        self.state.borrow_mut().fail_next_start = true;
    }

    pub fn started(&self) -> usize {
        self.state.borrow().started
    }

    pub fn running(&self) -> usize {
        self.state.borrow().running
    }

    pub fn serviced(&self) -> usize {
        self.state.borrow().serviced
    }

    pub fn last_address(&self) -> Option<Ipv4Addr> {
        self.state.borrow().last_address
    }
}

impl DnsProvider for SimDns {
    type Responder = SimDnsResponder;

    fn start(
        &mut self,
        _port: u16,
        _domain: &str,
        address: Ipv4Addr,
    ) -> Result<SimDnsResponder, PlatformError> {
        let mut state = self.state.borrow_mut();
        if state.fail_next_start {
            state.fail_next_start = false;
            return Err(PlatformError::Dns("port already in use".into()));
        }
        state.started += 1;
        state.running += 1;
        state.last_address = Some(address);
        Ok(SimDnsResponder {
            state: self.state.clone(),
        })
    }
}

impl DnsResponder for SimDnsResponder {
    fn process_next_request(&mut self) {
        self.state.borrow_mut().serviced += 1;
    }

    fn stop(self) {
        self.state.borrow_mut().running -= 1;
    }
}

#[derive(Default)]
struct TransportState {
    open: bool,
    connected: bool,
    // Set by a relay-side drop; cleared once the event queue drains so the
    // reconnect shows up on the following tick.
    dropped: bool,
    // Without auto reconnect a lost socket stays down until the next open.
    manual_reconnect: bool,
    awaiting_open: bool,
    relay_unreachable: bool,
    refuse_next_open: bool,
    events: VecDeque<TransportEvent>,
    opened_paths: Vec<String>,
    reconnect_interval: Option<Duration>,
    sent: Vec<String>,
    send_attempts: usize,
    closes: usize,
}

/// Message socket that is connected whenever it is open and the shared
/// network is up, reconnecting on its own like a real client would unless
/// told otherwise.
#[derive(Clone)]
pub struct SimTransport {
    network: SimNetwork,
    state: Rc<RefCell<TransportState>>,
}

impl SimTransport {
    pub fn new(network: SimNetwork) -> Self {
        Self {
            network,
            state: Rc::default(),
        }
    }

    /// Queue a text frame from the relay.
    pub fn push_inbound(&self, frame: &[u8]) {
        self.state
            .borrow_mut()
            .events
            .push_back(TransportEvent::Text(frame.to_vec()));
    }

    pub fn push_inbound_binary(&self, frame: &[u8]) {
        self.state
            .borrow_mut()
            .events
            .push_back(TransportEvent::Binary(frame.to_vec()));
    }

    /// The relay drops the socket while the network stays up.
    pub fn drop_connection(&self) {
        let mut state = self.state.borrow_mut();
        if state.connected {
            state.connected = false;
            state.dropped = true;
            state.awaiting_open = state.manual_reconnect;
            state.events.push_back(TransportEvent::Disconnected);
        }
    }

    /// A lost socket is only brought back by reopening it.
    pub fn disable_auto_reconnect(&self) {
        self.state.borrow_mut().manual_reconnect = true;
    }

    /// While unreachable, an open socket never connects.
    pub fn set_relay_reachable(&self, reachable: bool) {
        self.state.borrow_mut().relay_unreachable = !reachable;
    }

    pub fn refuse_next_open(&self) {
        self.state.borrow_mut().refuse_next_open = true;
    }

    pub fn opened_paths(&self) -> Vec<String> {
        self.state.borrow().opened_paths.clone()
    }

    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.state.borrow().reconnect_interval
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.borrow().sent.clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.state.borrow().send_attempts
    }

    pub fn closes(&self) -> usize {
        self.state.borrow().closes
    }
}

impl Transport for SimTransport {
    fn open(&mut self, _endpoint: &RelayEndpoint, path: &str) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        if state.refuse_next_open {
            state.refuse_next_open = false;
            return Err(PlatformError::Transport("connection refused".into()));
        }
        state.open = true;
        state.connected = false;
        state.awaiting_open = false;
        state.opened_paths.push(path.to_string());
        Ok(())
    }

    fn set_reconnect_interval(&mut self, interval: Duration) {
        self.state.borrow_mut().reconnect_interval = Some(interval);
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let mut state = self.state.borrow_mut();
        if state.open {
            let up = self.network.is_up();
            let reachable = up && !state.relay_unreachable;
            if state.connected && !up {
                state.connected = false;
                state.awaiting_open = state.manual_reconnect;
                state.events.push_back(TransportEvent::Disconnected);
            } else if !state.connected && reachable && !state.dropped && !state.awaiting_open {
                state.connected = true;
                state.events.push_front(TransportEvent::Connected);
            }
        }
        let event = state.events.pop_front();
        if event.is_none() {
            state.dropped = false;
        }
        event
    }

    fn send_text(&mut self, text: &str) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        state.send_attempts += 1;
        if !state.connected || !self.network.is_up() {
            return Err(PlatformError::Transport("not connected".into()));
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.open = false;
        state.connected = false;
        state.closes += 1;
    }
}
