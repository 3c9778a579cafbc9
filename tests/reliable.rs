use std::thread;
use std::time;

use rudp::{flags, Event, Host, HostConfig, PeerConfig, Segment, StdUdpSocket};

const NUM_CHANNELS: u32 = 4;
const STEP_INTERVAL: time::Duration = time::Duration::from_millis(10);

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

    let num_steps = 200;
    let packets_per_step = 10;
    let packet_size = 400;

    let mut all_data: Vec<Vec<u8>> = vec![Vec::new(); NUM_CHANNELS as usize];

    for _ in 0..num_steps {
        while let Some(_event) = host.service(0).unwrap() {}

        for _ in 0..packets_per_step {
            let data: Box<[u8]> = (0..packet_size).map(|_| rand::random::<u8>()).collect::<Vec<_>>().into_boxed_slice();
            let channel_id = (rand::random::<u32>() % NUM_CHANNELS) as u8;

            all_data[channel_id as usize].extend_from_slice(&data);

            host.send(peer, channel_id, Segment::new(data, flags::RELIABLE)).unwrap();
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

    all_data.into_iter().map(md5::compute).collect()
}

#[test]
fn reliable_sends_arrive_in_order_and_intact() {
    let server = thread::spawn(|| server_thread("127.0.0.1:18881"));

    thread::sleep(time::Duration::from_millis(100));

    let client = thread::spawn(|| client_thread("127.0.0.1:18881"));

    let server_md5s = server.join().unwrap();
    let client_md5s = client.join().unwrap();

    assert_eq!(server_md5s, client_md5s);
}
