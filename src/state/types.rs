//! Observable connectivity states and the polled attempt sub-state.

use crate::platform::elapsed_ms;

/// Where the link currently is. Exactly one value at a time, owned by
/// [`RealtimeLink`](super::RealtimeLink).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// `begin` has not been called yet
    #[default]
    Idle,
    /// Station mode, not associated yet
    JoiningNetwork,
    /// Associated, message session open
    SessionActive,
    /// Was connected, now the network or the relay socket is down and a
    /// rejoin or session reopen is pending
    SessionDegraded,
    /// Local configuration network running; station mode and the session
    /// are off
    AccessPointActive,
}

/// A join or session reopen in flight, polled once per tick until it
/// succeeds or its deadline passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinAttempt {
    pub started_ms: u64,
    pub timeout_ms: u64,
}

impl JoinAttempt {
    pub fn expired(&self, now_ms: u64) -> bool {
        elapsed_ms(now_ms, self.started_ms) >= self.timeout_ms
    }
}
