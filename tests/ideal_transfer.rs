use std::thread;
use std::time;

use rudp::{flags, Event, Host, HostConfig, PeerConfig, Segment, StdUdpSocket};

const NUM_CHANNELS: u32 = 4;
const STEP_INTERVAL: time::Duration = time::Duration::from_millis(10);

/// Unlike `reliable.rs`, this mixes reliable and unreliable sends over a lossless loopback link,
/// so only the reliable channels' digests are expected to match end to end.
fn server_thread(addr: &'static str) -> Vec<md5::Digest> {
    let config = HostConfig { peer_count: 1, channel_limit: NUM_CHANNELS, ..HostConfig::default() };
    let mut host = Host::new(Box::new(StdUdpSocket::bind(addr).unwrap()), config).unwrap();

    let mut all_data: Vec<Vec<u8>> = vec![Vec::new(); NUM_CHANNELS as usize];

    loop {
        match host.service(0).unwrap() {
            Some(Event::Receive { channel_id, segment, .. }) => {
                all_data[channel_id as usize].extend_from_slice(segment.data());
            }
            Some(Event::Disconnect { .. }) => break,
            Some(_) => {}
            None => thread::sleep(STEP_INTERVAL),
        }
    }

    all_data.into_iter().map(md5::compute).collect()
}

fn client_thread(server_addr: &'static str) -> Vec<md5::Digest> {
    let config = HostConfig { peer_count: 1, channel_limit: NUM_CHANNELS, ..HostConfig::default() };
    let mut host = Host::new(Box::new(StdUdpSocket::bind("127.0.0.1:0").unwrap()), config).unwrap();

    let peer_config = PeerConfig { channel_count: NUM_CHANNELS, ..PeerConfig::default() };
    let peer = host.connect(server_addr.parse().unwrap(), peer_config).unwrap();

    // Channel 0 is sent reliably throughout; the others are a mix, so only channel 0's digest
    // is asserted against the server's.
    let num_steps = 150;
    let packets_per_step = 8;
    let packet_size = 300;

    let mut reliable_channel0 = Vec::new();

    for _ in 0..num_steps {
        while let Some(_event) = host.service(0).unwrap() {}

        for i in 0..packets_per_step {
            let data: Box<[u8]> = (0..packet_size).map(|_| rand::random::<u8>()).collect::<Vec<_>>().into_boxed_slice();

            if i % 3 == 0 {
                reliable_channel0.extend_from_slice(&data);
                host.send(peer, 0, Segment::new(data, flags::RELIABLE)).unwrap();
            } else {
                let channel_id = 1 + (rand::random::<u32>() % (NUM_CHANNELS - 1)) as u8;
                host.send(peer, channel_id, Segment::new(data, 0)).unwrap();
            }
        }

        thread::sleep(STEP_INTERVAL);
    }

    host.disconnect_later(peer, 0).unwrap();

    loop {
        match host.service(0).unwrap() {
            Some(Event::Disconnect { .. }) => break,
            Some(_) => {}
            None => thread::sleep(STEP_INTERVAL),
        }
    }

    vec![md5::compute(reliable_channel0)]
}

#[test]
fn reliable_channel_survives_mixed_traffic() {
    let server = thread::spawn(|| server_thread("127.0.0.1:18993"));

    thread::sleep(time::Duration::from_millis(100));

    let client = thread::spawn(|| client_thread("127.0.0.1:18993"));

    let server_md5s = server.join().unwrap();
    let client_md5s = client.join().unwrap();

    assert_eq!(server_md5s[0], client_md5s[0]);
}
