use std::thread;
use std::time;

use rudp::{flags, Event, Host, HostConfig, PeerConfig, Segment, StdUdpSocket};

const DURATION: time::Duration = time::Duration::from_secs(5);
const STEP_INTERVAL: time::Duration = time::Duration::from_millis(20);

fn bind(addr: &str) -> Host {
    Host::new(Box::new(StdUdpSocket::bind(addr).unwrap()), HostConfig::default()).unwrap()
}

#[test]
fn client_disconnect_now_reaches_server() {
    let server_thread = thread::spawn(|| {
        let mut server = bind("127.0.0.1:18991");

        let mut connect_seen = false;
        let mut disconnect_seen = false;
        let end_time = time::Instant::now() + DURATION;

        while time::Instant::now() < end_time && !disconnect_seen {
            match server.service(0).unwrap() {
                Some(Event::Connect { .. }) => {
                    assert!(!connect_seen);
                    connect_seen = true;
                }
                Some(Event::Disconnect { .. }) => {
                    assert!(connect_seen);
                    disconnect_seen = true;
                }
                Some(other) => panic!("unexpected event: {:?}", other),
                None => thread::sleep(STEP_INTERVAL),
            }
        }

        assert!(connect_seen, "no connect event received");
        assert!(disconnect_seen, "no disconnect event received");
    });

    thread::sleep(STEP_INTERVAL);

    let client_thread = thread::spawn(|| {
        let mut client = bind("127.0.0.1:0");
        let peer = client.connect("127.0.0.1:18991".parse().unwrap(), PeerConfig::default()).unwrap();

        let end_time = time::Instant::now() + DURATION;
        let mut connect_seen = false;

        while time::Instant::now() < end_time && !connect_seen {
            match client.service(0).unwrap() {
                Some(Event::Connect { .. }) => {
                    connect_seen = true;
                    client.disconnect_now(peer, 0).unwrap();
                }
                Some(other) => panic!("unexpected event: {:?}", other),
                None => thread::sleep(STEP_INTERVAL),
            }
        }

        assert!(connect_seen, "no connect event received");

        // disconnect_now zombifies the peer synchronously, so drive a couple more service
        // passes for the host to observe and surface its own Disconnect event.
        let mut disconnect_seen = false;
        let end_time = time::Instant::now() + DURATION;
        while time::Instant::now() < end_time && !disconnect_seen {
            match client.service(0).unwrap() {
                Some(Event::Disconnect { .. }) => disconnect_seen = true,
                Some(other) => panic!("unexpected event: {:?}", other),
                None => thread::sleep(STEP_INTERVAL),
            }
        }
        assert!(disconnect_seen, "no disconnect event observed locally");
    });

    client_thread.join().unwrap();
    server_thread.join().unwrap();
}

#[test]
fn client_graceful_disconnect_delivers_pending_send_first() {
    let server_thread = thread::spawn(|| {
        let mut server = bind("127.0.0.1:18992");

        let mut connect_seen = false;
        let mut receive_seen = false;
        let mut disconnect_seen = false;
        let end_time = time::Instant::now() + DURATION;

        while time::Instant::now() < end_time && !disconnect_seen {
            match server.service(0).unwrap() {
                Some(Event::Connect { .. }) => {
                    assert!(!connect_seen);
                    connect_seen = true;
                }
                Some(Event::Receive { channel_id, segment, .. }) => {
                    assert!(connect_seen);
                    assert!(!receive_seen);
                    assert_eq!(channel_id, 0);
                    assert_eq!(segment.data(), &[0u8, 1, 2, 3]);
                    receive_seen = true;
                }
                Some(Event::Disconnect { .. }) => {
                    assert!(receive_seen);
                    disconnect_seen = true;
                }
                Some(Event::ReceiveAck { .. }) => {}
                None => thread::sleep(STEP_INTERVAL),
            }
        }

        assert!(connect_seen, "no connect event received");
        assert!(receive_seen, "no receive event received");
        assert!(disconnect_seen, "no disconnect event received");
    });

    thread::sleep(STEP_INTERVAL);

    let client_thread = thread::spawn(|| {
        let mut client = bind("127.0.0.1:0");
        let peer = client.connect("127.0.0.1:18992".parse().unwrap(), PeerConfig::default()).unwrap();

        let mut connect_seen = false;
        let mut disconnect_seen = false;
        let end_time = time::Instant::now() + DURATION;

        while time::Instant::now() < end_time && !disconnect_seen {
            match client.service(0).unwrap() {
                Some(Event::Connect { .. }) => {
                    connect_seen = true;
                    let data: Box<[u8]> = [0u8, 1, 2, 3].into();
                    client.send(peer, 0, Segment::new(data, flags::RELIABLE)).unwrap();
                    client.disconnect_later(peer, 0).unwrap();
                }
                Some(Event::Disconnect { .. }) => {
                    assert!(connect_seen);
                    disconnect_seen = true;
                }
                Some(Event::ReceiveAck { .. }) => {}
                Some(other) => panic!("unexpected event: {:?}", other),
                None => thread::sleep(STEP_INTERVAL),
            }
        }

        assert!(connect_seen, "no connect event received");
        assert!(disconnect_seen, "no disconnect event received");
    });

    client_thread.join().unwrap();
    server_thread.join().unwrap();
}
