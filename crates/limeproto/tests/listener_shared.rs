//! Shared listener integration tests over loopback UDP
//!
//! Exercises the reference-counted (port, address) lifecycle: two subscribers
//! on one address, exact-match dispatch, and teardown when the last
//! registration is removed.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use limeproto::osc::{OscArg, OscMessage};
use limeproto::{OscListenerHub, OscCallback};

/// Find a UDP port that is currently free on loopback
fn free_port() -> u16 {
    let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

fn send_osc(port: u16, message: &OscMessage) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .send_to(&message.encode(), ("127.0.0.1", port))
        .unwrap();
}

fn counting_callback(counter: Arc<AtomicUsize>) -> OscCallback {
    Arc::new(move |_msg: &OscMessage| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn wait_for(counter: &AtomicUsize, expected: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if counter.load(Ordering::SeqCst) >= expected {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_two_subscribers_share_one_listener() {
    let hub = OscListenerHub::new();
    let port = free_port();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let id_a = hub
        .register(port, "/a", counting_callback(first.clone()))
        .unwrap();
    let _id_b = hub
        .register(port, "/a", counting_callback(second.clone()))
        .unwrap();
    assert_eq!(hub.port_count(), 1);

    send_osc(port, &OscMessage::with_args("/a", vec![OscArg::Int(1)]));
    assert!(wait_for(&first, 1, Duration::from_secs(2)));
    assert!(wait_for(&second, 1, Duration::from_secs(2)));

    // Removing one callback leaves the listener and the other subscriber alive
    assert!(hub.unregister(port, "/a", id_a));
    assert_eq!(hub.port_count(), 1);

    send_osc(port, &OscMessage::new("/a"));
    assert!(wait_for(&second, 2, Duration::from_secs(2)));
    assert_eq!(first.load(Ordering::SeqCst), 1);

    hub.shutdown();
    assert_eq!(hub.port_count(), 0);
}

#[test]
fn test_exact_match_addressing_only() {
    let hub = OscListenerHub::new();
    let port = free_port();

    let hits = Arc::new(AtomicUsize::new(0));
    hub.register(port, "/light/1", counting_callback(hits.clone()))
        .unwrap();

    send_osc(port, &OscMessage::new("/light"));
    send_osc(port, &OscMessage::new("/light/1/extra"));
    send_osc(port, &OscMessage::new("/light/1"));

    assert!(wait_for(&hits, 1, Duration::from_secs(2)));
    // Give mismatched messages time to have been (wrongly) delivered
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_last_unregister_tears_down_listener() {
    let hub = OscListenerHub::new();
    let port = free_port();

    let hits = Arc::new(AtomicUsize::new(0));
    let id = hub
        .register(port, "/x", counting_callback(hits.clone()))
        .unwrap();
    assert_eq!(hub.port_count(), 1);

    assert!(hub.unregister(port, "/x", id));
    assert_eq!(hub.port_count(), 0);

    // The port is free again once the listener is gone
    let rebound = UdpSocket::bind(("127.0.0.1", port));
    assert!(rebound.is_ok());
}

#[test]
fn test_unregister_unknown_id_is_false() {
    let hub = OscListenerHub::new();
    let port = free_port();

    let hits = Arc::new(AtomicUsize::new(0));
    let id = hub
        .register(port, "/x", counting_callback(hits.clone()))
        .unwrap();

    assert!(!hub.unregister(port, "/y", id));
    assert!(!hub.unregister(port + 1, "/x", id));
    assert_eq!(hub.port_count(), 1);
}
