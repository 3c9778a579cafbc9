//! Connects to `echo_server`, sends an incrementing "hello world" every 300ms on channel 0, and
//! prints whatever comes back.

use rudp::{flags, Event, Host, HostConfig, PeerConfig, Segment, StdUdpSocket};

fn main() {
    env_logger::init();

    let socket = StdUdpSocket::bind("127.0.0.1:0").expect("failed to bind");
    let config = HostConfig { peer_count: 1, channel_limit: 2, ..HostConfig::default() };
    let mut host = Host::new(Box::new(socket), config).expect("failed to construct host");

    let server_addr = "127.0.0.1:8888".parse().expect("invalid address");
    let peer = host.connect(server_addr, PeerConfig { channel_count: 2, ..PeerConfig::default() }).expect("connect failed");

    let mut send_counter = 0;
    let mut message_counter = 0;

    loop {
        match host.service(30) {
            Ok(Some(Event::Connect { .. })) => println!("connected to server"),
            Ok(Some(Event::Disconnect { .. })) => {
                println!("disconnected from server");
                break;
            }
            Ok(Some(Event::ReceiveAck { channel_id, .. })) => println!("server acked channel {}", channel_id),
            Ok(Some(Event::Receive { channel_id, segment, .. })) => {
                let text = String::from_utf8_lossy(segment.data());
                println!("received on channel {}: \"{}\"", channel_id, text);
            }
            Ok(None) => {}
            Err(e) => eprintln!("service error: {}", e),
        }

        send_counter += 1;
        if send_counter == 10 {
            let data = format!("Hello world {}!", message_counter).into_bytes().into_boxed_slice();
            let segment = Segment::new(data, flags::RELIABLE);
            if let Err(e) = host.send(peer, 0, segment) {
                eprintln!("send failed: {}", e);
            }
            send_counter = 0;
            message_counter += 1;
        }
    }
}
