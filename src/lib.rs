pub mod access_point;
pub mod backoff;
pub mod callbacks;
pub mod codec;
pub mod config;
pub mod dns;
pub mod error;
pub mod platform;
pub mod session;
#[cfg(any(test, feature = "host"))]
pub mod sim;
pub mod state;

pub use common::Envelope;
pub use state::{ConnectivityState, JoinAttempt, RealtimeLink};

pub mod prelude {
    pub use crate::{
        config::*,
        error::*,
        platform::{Clock, Credentials, DnsProvider, DnsResponder, Radio, Transport},
        state::*,
        Envelope,
    };
}
