//! Connectivity state machine
//!
//! Decides on every tick whether the device should be joining a network in
//! station mode, running its local configuration access point, or keeping
//! the relay session alive.
//!
//! # Design
//!
//! Everything runs inside [`RealtimeLink::tick`] on the caller's thread.
//! The one blocking window is the bounded startup wait in
//! [`RealtimeLink::begin`]; every later join is a [`JoinAttempt`] with a
//! deadline, polled across ticks and rate-limited by the [`Backoff`].
//!
//! ```text
//! Idle --begin--> JoiningNetwork --joined--> SessionActive
//!                   |    ^                     |    ^
//!         failures  |    | AP stop/timeout     |    | joined and
//!                   |    |      link or socket |    | socket back
//!                   v    |                lost v    |
//!             AccessPointActive <--failures-- SessionDegraded
//! ```
//!
//! `SessionDegraded` covers two situations. With the network gone it
//! rejoins like `JoiningNetwork` does. With the network still up only the
//! relay socket is down, and the link reopens it itself instead of relying
//! on the transport's own reconnect timer. Both kinds of retry share the
//! one backoff and the same access point threshold.
//!
//! Station mode and the access point never run together: entering the
//! access point cancels any join in flight and closes the session, and no
//! join is attempted while it is active.

pub mod types;

use std::time::Duration;

use common::Envelope;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use crate::access_point::AccessPointController;
use crate::backoff::Backoff;
use crate::callbacks::{Callbacks, LinkEvent};
use crate::codec;
use crate::config::LinkConfig;
use crate::error::{PlatformError, SendError};
use crate::platform::{elapsed_ms, Clock, Credentials, DnsProvider, Radio, Transport};
use crate::session::SessionController;

pub use types::{ConnectivityState, JoinAttempt};

pub struct RealtimeLink<R, T, P, C>
where
    R: Radio,
    T: Transport,
    P: DnsProvider,
    C: Clock,
{
    config: LinkConfig,
    radio: R,
    clock: C,
    session: SessionController<T>,
    access_point: AccessPointController<P>,
    backoff: Backoff,
    callbacks: Callbacks,
    state: ConnectivityState,
    identity: Option<String>,
    credentials: Option<Credentials>,
    join_attempt: Option<JoinAttempt>,
    reopen_attempt: Option<JoinAttempt>,
}

impl<R, T, P, C> RealtimeLink<R, T, P, C>
where
    R: Radio,
    T: Transport,
    P: DnsProvider,
    C: Clock,
{
    pub fn new(config: LinkConfig, radio: R, transport: T, dns: P, clock: C) -> Self {
        let session = SessionController::new(
            transport,
            config.relay.clone(),
            config.transport_reconnect_interval(),
        );
        let access_point = AccessPointController::new(dns, config.access_point.clone());
        let backoff = Backoff::new(config.backoff);

        Self {
            config,
            radio,
            clock,
            session,
            access_point,
            backoff,
            callbacks: Callbacks::default(),
            state: ConnectivityState::Idle,
            identity: None,
            credentials: None,
            join_attempt: None,
            reopen_attempt: None,
        }
    }

    /// Start the link as `identity`.
    ///
    /// With credentials the radio is asked to join that network; without, the
    /// network is assumed to be managed elsewhere and the link only waits for
    /// it. Blocks for at most `startup_join_timeout_ms` waiting for the first
    /// association.
    ///
    /// Ignored once the link has been started, and while the access point is
    /// active.
    pub fn begin(&mut self, credentials: Option<Credentials>, identity: impl Into<String>) {
        if self.access_point.is_active() {
            debug!("begin ignored, access point active");
            return;
        }
        if let Some(current) = &self.identity {
            debug!("begin ignored, link already started as {}", current);
            return;
        }

        let identity = identity.into();
        info!("starting link as device {}", identity);
        self.identity = Some(identity);
        self.credentials = credentials;

        self.radio.set_hostname(&self.config.station_hostname);
        if self.config.disable_power_save {
            self.radio.set_power_save(false);
        }
        self.transition(ConnectivityState::JoiningNetwork);

        let started = self.clock.now_ms();
        if let Err(err) = self.initiate_join(false) {
            warn!("could not start joining: {}", err);
            self.on_retry_failure(started);
            return;
        }

        let timeout_ms = self.config.startup_join_timeout_ms;
        if timeout_ms == 0 {
            self.join_attempt = Some(JoinAttempt {
                started_ms: started,
                timeout_ms: self.config.rejoin_timeout_ms,
            });
            return;
        }

        info!("waiting up to {} ms for the network", timeout_ms);
        let poll = Duration::from_millis(self.config.join_poll_interval_ms.max(1));
        while !self.radio.is_joined() && elapsed_ms(self.clock.now_ms(), started) < timeout_ms {
            self.clock.sleep(poll);
        }

        let now = self.clock.now_ms();
        if self.radio.is_joined() {
            self.on_join_success(now);
        } else {
            warn!("no network after {} ms", timeout_ms);
            self.on_retry_failure(now);
        }
    }

    /// Advance the link by one step. Call from the device's main loop; never
    /// blocks.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();

        match self.state {
            ConnectivityState::Idle => {}
            ConnectivityState::AccessPointActive => {
                if self.access_point.tick(&mut self.radio, now) {
                    self.leave_access_point(now);
                }
            }
            ConnectivityState::JoiningNetwork => self.poll_join(now),
            ConnectivityState::SessionDegraded => {
                if self.join_attempt.is_none() && self.radio.is_joined() {
                    self.poll_reopen(now);
                } else {
                    self.reopen_attempt = None;
                    self.poll_join(now);
                }
            }
            ConnectivityState::SessionActive => {
                if !self.radio.is_joined() {
                    warn!("network link lost");
                    self.transition(ConnectivityState::SessionDegraded);
                    if let Some(event) = self.session.mark_link_lost() {
                        self.callbacks.dispatch(event);
                    }
                    return;
                }
                if self.service_session(now) {
                    warn!("relay session lost with the network still up");
                    self.transition(ConnectivityState::SessionDegraded);
                }
            }
        }
    }

    /// Send an addressed message. Attempted whatever the connection state;
    /// nothing is queued on failure.
    pub fn send(&mut self, envelope: &Envelope) -> Result<(), SendError> {
        self.session.send(envelope).map_err(|err| {
            warn!("send to {} failed: {}", envelope.target_id, err);
            err
        })
    }

    /// Build and send a message to `target_id` whose payload object is
    /// filled in by `build`.
    pub fn send_to<F>(&mut self, target_id: impl Into<String>, build: F) -> Result<(), SendError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let envelope = codec::encode_addressed(target_id, build);
        self.send(&envelope)
    }

    /// Send a value without wrapping it in an envelope.
    pub fn send_raw(&mut self, value: &Value) -> Result<(), SendError> {
        self.session.send_value(value).map_err(|err| {
            warn!("raw send failed: {}", err);
            err
        })
    }

    pub fn set_message_callback(&mut self, callback: impl FnMut(&Value) + 'static) {
        self.callbacks.set_message_callback(callback);
    }

    pub fn set_connection_status_callback(&mut self, callback: impl FnMut(bool) + 'static) {
        self.callbacks.set_connection_status_callback(callback);
    }

    /// Switch to the local configuration network. Returns false when it is
    /// already running or could not be started.
    pub fn start_access_point_mode(&mut self, ssid: Option<&str>, passphrase: Option<&str>) -> bool {
        let now = self.clock.now_ms();
        self.enter_access_point(now, ssid, passphrase)
    }

    /// Leave the configuration network and go back to joining in station
    /// mode. Returns false when no access point was running.
    pub fn stop_access_point_mode(&mut self) -> bool {
        if !self.access_point.stop(&mut self.radio) {
            return false;
        }
        let now = self.clock.now_ms();
        self.leave_access_point(now);
        true
    }

    /// `Duration::ZERO` means the access point never expires on its own.
    pub fn set_access_point_timeout(&mut self, timeout: Duration) {
        self.access_point
            .set_timeout(timeout.as_millis().try_into().unwrap_or(u64::MAX));
    }

    pub fn is_access_point_active(&self) -> bool {
        self.access_point.is_active()
    }

    pub fn is_session_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn join_attempt(&self) -> Option<JoinAttempt> {
        self.join_attempt
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn session(&self) -> &SessionController<T> {
        &self.session
    }

    pub fn access_point(&self) -> &AccessPointController<P> {
        &self.access_point
    }

    fn transition(&mut self, next: ConnectivityState) {
        if self.state != next {
            info!("state: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn initiate_join(&mut self, rejoin: bool) -> Result<(), PlatformError> {
        if rejoin {
            self.radio.disconnect();
        }
        match &self.credentials {
            Some(credentials) => {
                info!("joining network {}", credentials.ssid);
                self.radio.join(credentials)
            }
            None if rejoin => self.radio.reconnect(),
            None => Ok(()),
        }
    }

    fn poll_join(&mut self, now: u64) {
        if let Some(attempt) = self.join_attempt {
            if self.radio.is_joined() {
                self.on_join_success(now);
            } else if attempt.expired(now) {
                warn!("join attempt timed out after {} ms", attempt.timeout_ms);
                self.on_retry_failure(now);
            }
            return;
        }

        if self.radio.is_joined() {
            info!("network came back");
            self.on_join_success(now);
            return;
        }

        if self.backoff.due_for_retry(now) {
            self.start_rejoin(now);
        }
    }

    fn start_rejoin(&mut self, now: u64) {
        info!("join attempt {} starting", self.backoff.attempt_count() + 1);
        match self.initiate_join(true) {
            Ok(()) => {
                self.join_attempt = Some(JoinAttempt {
                    started_ms: now,
                    timeout_ms: self.config.rejoin_timeout_ms,
                });
            }
            Err(err) => {
                warn!("join attempt refused: {}", err);
                self.on_retry_failure(now);
            }
        }
    }

    /// Network up, relay socket down. Whatever brings the socket back first
    /// wins: the transport's own reconnect or a reopen from here.
    fn poll_reopen(&mut self, now: u64) {
        self.service_session(now);
        if self.session.is_connected() {
            info!("relay session restored");
            self.reopen_attempt = None;
            self.backoff.on_success();
            self.transition(ConnectivityState::SessionActive);
            return;
        }

        match self.reopen_attempt {
            Some(attempt) if attempt.expired(now) => {
                warn!("session reopen timed out after {} ms", attempt.timeout_ms);
                self.on_retry_failure(now);
            }
            Some(_) => {}
            None if self.backoff.due_for_retry(now) => self.reopen_session(now),
            None => {}
        }
    }

    fn reopen_session(&mut self, now: u64) {
        let Some(identity) = self.identity.as_deref() else {
            return;
        };
        info!("session reopen {} starting", self.backoff.attempt_count() + 1);
        match self.session.open(identity, now) {
            Ok(()) => {
                self.reopen_attempt = Some(JoinAttempt {
                    started_ms: now,
                    timeout_ms: self.config.rejoin_timeout_ms,
                });
            }
            // Already logged by the session
            Err(_) => self.on_retry_failure(now),
        }
    }

    fn on_join_success(&mut self, now: u64) {
        self.join_attempt = None;
        self.reopen_attempt = None;
        self.backoff.on_success();
        info!("network joined");
        self.transition(ConnectivityState::SessionActive);

        if let Some(identity) = self.identity.as_deref() {
            // A refused open is retried by the session controller itself.
            let _ = self.session.open(identity, now);
        }
        self.service_session(now);
    }

    /// A join or session reopen gave up at `now`.
    fn on_retry_failure(&mut self, now: u64) {
        self.join_attempt = None;
        self.reopen_attempt = None;
        self.backoff.on_failure(now);
        let failures = self.backoff.attempt_count();

        if self.config.access_point_fallback && failures >= self.config.max_join_attempts {
            warn!(
                "connection failed {} times, falling back to access point",
                failures
            );
            self.enter_access_point(now, None, None);
        } else {
            info!(
                "connection failed ({} in a row), next attempt in {} ms",
                failures,
                self.backoff.remaining_ms(now)
            );
        }
    }

    fn enter_access_point(&mut self, now: u64, ssid: Option<&str>, passphrase: Option<&str>) -> bool {
        if self.access_point.is_active() {
            debug!("access point already active");
            return false;
        }

        self.join_attempt = None;
        self.reopen_attempt = None;
        if let Some(event) = self.session.close() {
            self.callbacks.dispatch(event);
        }

        match self.access_point.start(&mut self.radio, now, ssid, passphrase) {
            Ok(started) => {
                self.transition(ConnectivityState::AccessPointActive);
                started
            }
            Err(err) => {
                error!("could not start access point: {}", err);
                if self.state == ConnectivityState::SessionActive {
                    self.transition(ConnectivityState::JoiningNetwork);
                }
                false
            }
        }
    }

    fn leave_access_point(&mut self, now: u64) {
        self.backoff.reset();
        if self.identity.is_none() {
            self.transition(ConnectivityState::Idle);
            return;
        }

        self.transition(ConnectivityState::JoiningNetwork);
        self.radio.set_hostname(&self.config.station_hostname);
        self.start_rejoin(now);
    }

    /// Returns whether the relay socket was lost during this pass.
    fn service_session(&mut self, now: u64) -> bool {
        let tick = self.session.tick(now);
        for event in tick.events {
            self.dispatch(event);
        }
        tick.lost
    }

    fn dispatch(&mut self, event: LinkEvent) {
        self.callbacks.dispatch(event);
    }
}
