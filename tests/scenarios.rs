use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use realtime_link::prelude::*;
use realtime_link::sim::{SimLink, SimPlatform};
use serde_json::json;

const TICK_MS: u64 = 100;

fn statuses(link: &mut SimLink) -> Rc<RefCell<Vec<bool>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    link.set_connection_status_callback(move |connected| sink.borrow_mut().push(connected));
    seen
}

fn begin(platform: &SimPlatform, config: LinkConfig) -> SimLink {
    let mut link = platform.link(config);
    link.begin(Some(Credentials::new("home", "secret")), "dev42");
    link
}

/// Tick until `done` or `limit_ms` of simulated time have passed, checking
/// the radio exclusivity invariant on every step.
fn run_until(
    platform: &SimPlatform,
    link: &mut SimLink,
    limit_ms: u64,
    mut done: impl FnMut(&SimLink) -> bool,
) -> bool {
    let end = platform.clock.now_ms() + limit_ms;
    while platform.clock.now_ms() < end {
        platform.clock.advance(TICK_MS);
        link.tick();
        assert!(
            !(link.is_access_point_active() && link.state() == ConnectivityState::SessionActive),
            "station session and access point active together"
        );
        assert!(!(link.is_access_point_active() && link.join_attempt().is_some()));
        if done(link) {
            return true;
        }
    }
    false
}

#[test]
fn five_failed_joins_fall_back_to_access_point() {
    let platform = SimPlatform::new();
    platform.radio.join_by_default(false);
    let mut link = begin(&platform, LinkConfig::default());

    assert_eq!(link.state(), ConnectivityState::JoiningNetwork);
    let mut failures = vec![platform.clock.now_ms()];
    let mut retries = Vec::new();
    let mut attempts = platform.radio.join_attempts();
    let mut failed = link.backoff().attempt_count();

    let fell_back = run_until(&platform, &mut link, 600_000, |link| {
        if platform.radio.join_attempts() != attempts {
            attempts = platform.radio.join_attempts();
            retries.push(platform.clock.now_ms());
        }
        if link.backoff().attempt_count() != failed {
            failed = link.backoff().attempt_count();
            failures.push(platform.clock.now_ms());
        }
        if !link.is_access_point_active() {
            assert_eq!(link.state(), ConnectivityState::JoiningNetwork);
        }
        link.is_access_point_active()
    });

    assert!(fell_back);
    assert_eq!(link.state(), ConnectivityState::AccessPointActive);
    assert_eq!(failures.len(), 5);
    assert_eq!(retries.len(), 4);

    let waits: Vec<u64> = retries
        .iter()
        .zip(&failures)
        .map(|(retry, failure)| retry - failure)
        .collect();
    assert_eq!(waits, vec![5_000, 10_000, 20_000, 40_000]);

    assert_eq!(platform.radio.access_point_starts(), 1);
    assert_eq!(platform.dns.running(), 1);
    assert_eq!(platform.transport.opened_paths().len(), 0);
}

#[test]
fn link_drop_degrades_then_recovers_on_first_retry() {
    let platform = SimPlatform::new();
    let mut link = platform.link(LinkConfig::default());
    let seen = statuses(&mut link);
    link.begin(Some(Credentials::new("home", "secret")), "dev42");

    assert_eq!(link.state(), ConnectivityState::SessionActive);
    assert_eq!(*seen.borrow(), vec![true]);

    platform.radio.drop_link();
    link.tick();
    assert_eq!(link.state(), ConnectivityState::SessionDegraded);
    assert_eq!(*seen.borrow(), vec![true, false]);

    // Degraded ticks do not repeat the status
    link.tick();
    assert_eq!(*seen.borrow(), vec![true, false]);

    let recovered = run_until(&platform, &mut link, 30_000, |link| {
        link.state() == ConnectivityState::SessionActive
    });
    assert!(recovered);
    assert_eq!(*seen.borrow(), vec![true, false, true]);
    assert_eq!(link.backoff().attempt_count(), 0);
    assert_eq!(link.backoff().current_delay_ms(), 5_000);
    assert_eq!(platform.radio.disconnects(), 1);
    assert_eq!(
        platform.transport.opened_paths(),
        vec!["/?id=dev42".to_string(), "/?id=dev42".to_string()]
    );
}

#[test]
fn degraded_link_retries_with_backoff_then_falls_back() {
    let platform = SimPlatform::new();
    let mut link = begin(&platform, LinkConfig::default());

    platform.radio.join_by_default(false);
    platform.radio.drop_link();
    link.tick();
    assert_eq!(link.state(), ConnectivityState::SessionDegraded);

    let fell_back = run_until(&platform, &mut link, 600_000, |link| {
        if !link.is_access_point_active() {
            assert_eq!(link.state(), ConnectivityState::SessionDegraded);
        }
        link.is_access_point_active()
    });
    assert!(fell_back);
    assert_eq!(link.backoff().attempt_count(), 5);
    assert!(!link.is_session_connected());
}

#[test]
fn send_while_disconnected_is_attempted() {
    let platform = SimPlatform::new();
    platform.radio.join_by_default(false);
    let mut link = begin(&platform, LinkConfig::default());

    let result = link.send(&Envelope::new("dev42", json!({ "x": 1 })));
    assert!(matches!(result, Err(SendError::Transport(_))));
    assert_eq!(platform.transport.send_attempts(), 1);
    assert!(platform.transport.sent().is_empty());

    // Nothing was queued for later
    platform.radio.join_by_default(true);
    run_until(&platform, &mut link, 30_000, |link| link.is_session_connected());
    assert!(platform.transport.sent().is_empty());
}

#[test]
fn second_access_point_start_is_noop() {
    let platform = SimPlatform::new();
    let mut link = begin(&platform, LinkConfig::default());

    assert!(link.start_access_point_mode(None, None));
    platform.clock.advance(5_000);
    assert!(!link.start_access_point_mode(Some("Other"), Some("another-pass")));

    assert_eq!(platform.radio.access_point_starts(), 1);
    assert_eq!(platform.dns.started(), 1);
    let session = link.access_point().session().unwrap();
    assert_eq!(session.started_ms, 0);
    assert_eq!(session.ssid, "LINK_Setup");
}

#[test]
fn access_point_timeout_exits_exactly_on_time() {
    let platform = SimPlatform::new();
    let mut link = begin(&platform, LinkConfig::default());
    link.set_access_point_timeout(Duration::from_secs(60));
    link.start_access_point_mode(None, None);
    let started = platform.clock.now_ms();

    let exited = run_until(&platform, &mut link, 120_000, |link| !link.is_access_point_active());
    assert!(exited);
    assert_eq!(platform.clock.now_ms() - started, 60_000);
    assert_eq!(platform.dns.running(), 0);
    assert!(!platform.radio.access_point_active());
    assert_eq!(link.state(), ConnectivityState::JoiningNetwork);

    let rejoined = run_until(&platform, &mut link, 1_000, |link| link.is_session_connected());
    assert!(rejoined);
}

#[test]
fn zero_access_point_timeout_never_exits() {
    let platform = SimPlatform::new();
    let mut link = begin(&platform, LinkConfig::default());
    link.start_access_point_mode(None, None);

    let exited = run_until(&platform, &mut link, 3_600_000, |link| !link.is_access_point_active());
    assert!(!exited);
    assert_eq!(link.state(), ConnectivityState::AccessPointActive);
}

#[test]
fn malformed_frames_never_reach_callback() {
    let platform = SimPlatform::new();
    let mut link = begin(&platform, LinkConfig::default());
    let messages = Rc::new(RefCell::new(Vec::new()));
    let sink = messages.clone();
    link.set_message_callback(move |value| sink.borrow_mut().push(value.clone()));

    let malformed: [&[u8]; 5] = [b"{", b"not json", b"", b"\xff\xfe", b"{\"a\":1"];
    for frame in malformed {
        platform.transport.push_inbound(frame);
    }
    platform.transport.push_inbound(br#"{"targetId":"dev42","payload":{"x":1}}"#);
    link.tick();

    assert_eq!(
        *messages.borrow(),
        vec![json!({ "targetId": "dev42", "payload": { "x": 1 } })]
    );
}

#[test]
fn fallback_disabled_keeps_retrying_station() {
    let platform = SimPlatform::new();
    platform.radio.join_by_default(false);
    let config = LinkConfig {
        access_point_fallback: false,
        ..LinkConfig::default()
    };
    let mut link = begin(&platform, config);

    let fell_back = run_until(&platform, &mut link, 1_800_000, |link| link.is_access_point_active());
    assert!(!fell_back);
    assert!(link.backoff().attempt_count() > 5);
    assert!(link.backoff().current_delay_ms() <= 60_000);
}

#[test]
fn relay_drop_degrades_until_transport_reconnects() {
    let platform = SimPlatform::new();
    let mut link = platform.link(LinkConfig::default());
    let seen = statuses(&mut link);
    link.begin(Some(Credentials::new("home", "secret")), "dev42");

    platform.transport.drop_connection();
    link.tick();
    assert_eq!(link.state(), ConnectivityState::SessionDegraded);
    assert!(!link.is_session_connected());
    assert_eq!(*seen.borrow(), vec![true, false]);

    // The transport's own reconnect gets there before a reopen was due
    link.tick();
    assert_eq!(link.state(), ConnectivityState::SessionActive);
    assert_eq!(*seen.borrow(), vec![true, false, true]);
    assert_eq!(platform.transport.opened_paths().len(), 1);
}

#[test]
fn relay_drop_without_transport_reconnect_is_reopened_by_link() {
    let platform = SimPlatform::new();
    platform.transport.disable_auto_reconnect();
    let mut link = platform.link(LinkConfig::default());
    let seen = statuses(&mut link);
    link.begin(Some(Credentials::new("home", "secret")), "dev42");

    platform.transport.drop_connection();
    link.tick();
    assert_eq!(link.state(), ConnectivityState::SessionDegraded);
    assert_eq!(*seen.borrow(), vec![true, false]);

    let recovered = run_until(&platform, &mut link, 60_000, |link| {
        link.state() == ConnectivityState::SessionActive
    });
    assert!(recovered);
    assert!(link.is_session_connected());
    assert_eq!(*seen.borrow(), vec![true, false, true]);
    assert_eq!(
        platform.transport.opened_paths(),
        vec!["/?id=dev42".to_string(), "/?id=dev42".to_string()]
    );
    // The station association was never touched
    assert_eq!(platform.radio.join_attempts(), 1);
    assert_eq!(platform.radio.disconnects(), 0);
    assert_eq!(link.backoff().attempt_count(), 0);
}

#[test]
fn unreachable_relay_reopens_with_backoff_then_falls_back() {
    let platform = SimPlatform::new();
    platform.transport.disable_auto_reconnect();
    let mut link = begin(&platform, LinkConfig::default());

    platform.transport.set_relay_reachable(false);
    platform.transport.drop_connection();
    link.tick();
    assert_eq!(link.state(), ConnectivityState::SessionDegraded);

    let mut opens = vec![];
    let mut opened = platform.transport.opened_paths().len();
    let fell_back = run_until(&platform, &mut link, 600_000, |link| {
        if platform.transport.opened_paths().len() != opened {
            opened = platform.transport.opened_paths().len();
            opens.push(platform.clock.now_ms());
        }
        if !link.is_access_point_active() {
            assert_eq!(link.state(), ConnectivityState::SessionDegraded);
        }
        link.is_access_point_active()
    });

    assert!(fell_back);
    assert_eq!(link.backoff().attempt_count(), 5);
    assert_eq!(opens.len(), 5);

    // Each reopen gets the rejoin deadline, then waits out a growing delay
    let gaps: Vec<u64> = opens.windows(2).map(|pair| pair[1] - pair[0]).collect();
    assert_eq!(gaps, vec![15_000, 20_000, 30_000, 50_000]);
    assert_eq!(platform.radio.join_attempts(), 1);
}

#[test]
fn rejoin_succeeds_on_third_retry() {
    let platform = SimPlatform::new();
    platform.radio.join_by_default(false);
    platform.radio.script_joins([false, false, false, true]);
    let mut link = begin(&platform, LinkConfig::default());
    assert_eq!(link.state(), ConnectivityState::JoiningNetwork);

    let joined = run_until(&platform, &mut link, 600_000, |link| {
        link.state() == ConnectivityState::SessionActive
    });

    assert!(joined);
    assert!(link.is_session_connected());
    assert_eq!(platform.radio.join_attempts(), 4);
    // Every retry drops the old association first
    assert_eq!(platform.radio.disconnects(), 3);
    assert_eq!(link.backoff().attempt_count(), 0);
    assert_eq!(platform.radio.access_point_starts(), 0);
    // begin gives up at 15 s, retries fail at 30 s and 50 s, the third
    // retry starts at 70 s and is seen joined on the next tick
    assert_eq!(platform.clock.now_ms(), 70_000 + TICK_MS);
}

#[test]
fn refused_joins_count_towards_fallback() {
    let platform = SimPlatform::new();
    for _ in 0..5 {
        platform.radio.fail_next_join();
    }
    let mut link = begin(&platform, LinkConfig::default());

    assert_eq!(platform.clock.now_ms(), 0);
    assert_eq!(link.backoff().attempt_count(), 1);
    assert!(link.join_attempt().is_none());

    let fell_back = run_until(&platform, &mut link, 600_000, |link| link.is_access_point_active());
    assert!(fell_back);
    assert_eq!(link.backoff().attempt_count(), 5);
    // Refusals are immediate, so only the backoff delays add up
    assert_eq!(platform.clock.now_ms(), 5_000 + 10_000 + 20_000 + 40_000);
    assert_eq!(platform.radio.join_attempts(), 5);
    assert_eq!(platform.radio.access_point_starts(), 1);
}
