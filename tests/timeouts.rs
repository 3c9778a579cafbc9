use std::thread;
use std::time;

use rudp::{Event, Host, HostConfig, PeerConfig, StdUdpSocket};

fn bind(addr: &str) -> Host {
    Host::new(Box::new(StdUdpSocket::bind(addr).unwrap()), HostConfig::default()).unwrap()
}

/// The initiator's CONNECT never reaches anyone (port 18994 is never bound by a server), so the
/// handshake should eventually time out and the peer should be reaped without the application
/// ever seeing `Event::Connect`.
#[test]
fn handshake_without_a_server_times_out() {
    let mut client = bind("127.0.0.1:0");
    let peer = client.connect("127.0.0.1:18994".parse().unwrap(), PeerConfig::default()).unwrap();

    let end_time = time::Instant::now() + time::Duration::from_secs(40);
    let mut disconnect_seen = false;

    while time::Instant::now() < end_time && !disconnect_seen {
        match client.service(0).unwrap() {
            Some(Event::Disconnect { peer: p, .. }) => {
                assert_eq!(p, peer);
                disconnect_seen = true;
            }
            Some(other) => panic!("unexpected event: {:?}", other),
            None => thread::sleep(time::Duration::from_millis(200)),
        }
    }

    assert!(disconnect_seen, "no timeout disconnect observed within 40s");
}

/// Once connected, if the remote host vanishes without sending a DISCONNECT, the local side
/// should still notice via its own idle-peer timeout and surface a Disconnect event.
#[test]
fn silent_peer_times_out_after_connecting() {
    let server_thread = thread::spawn(|| {
        let mut server = bind("127.0.0.1:18995");
        let end_time = time::Instant::now() + time::Duration::from_secs(5);
        while time::Instant::now() < end_time {
            if let Some(Event::Connect { .. }) = server.service(0).unwrap() {
                // Drop the host entirely: stop servicing, simulating a vanished peer.
                return;
            }
            thread::sleep(time::Duration::from_millis(50));
        }
        panic!("server never observed a connection");
    });

    thread::sleep(time::Duration::from_millis(50));

    let mut client = bind("127.0.0.1:0");
    let peer = client.connect("127.0.0.1:18995".parse().unwrap(), PeerConfig::default()).unwrap();

    let end_time = time::Instant::now() + time::Duration::from_secs(45);
    let mut connect_seen = false;
    let mut disconnect_seen = false;

    while time::Instant::now() < end_time && !disconnect_seen {
        match client.service(0).unwrap() {
            Some(Event::Connect { peer: p, .. }) => {
                assert_eq!(p, peer);
                connect_seen = true;
            }
            Some(Event::Disconnect { peer: p, .. }) => {
                assert!(connect_seen);
                assert_eq!(p, peer);
                disconnect_seen = true;
            }
            Some(other) => panic!("unexpected event: {:?}", other),
            None => thread::sleep(time::Duration::from_millis(200)),
        }
    }

    assert!(connect_seen, "no connect event received");
    assert!(disconnect_seen, "no timeout disconnect observed within 45s");

    server_thread.join().unwrap();
}
