//! Accepts connections, echoes each received segment back reliably on channel 0 and its reverse
//! unreliably on channel 1. Run alongside `echo_client`.

use rudp::{flags, Event, Host, HostConfig, Segment, StdUdpSocket};

fn main() {
    env_logger::init();

    let address = "127.0.0.1:8888";
    let config = HostConfig { peer_count: 8, channel_limit: 2, ..HostConfig::default() };
    let socket = StdUdpSocket::bind(address).expect("failed to bind");
    let mut host = Host::new(Box::new(socket), config).expect("failed to construct host");

    println!("listening on {}", address);

    loop {
        match host.service(30) {
            Ok(Some(Event::Connect { peer, data })) => {
                println!("{} connected (data={})", peer, data);
            }
            Ok(Some(Event::Disconnect { peer, data })) => {
                println!("{} disconnected (data={})", peer, data);
            }
            Ok(Some(Event::ReceiveAck { peer, channel_id })) => {
                println!("{} acked channel {}", peer, channel_id);
            }
            Ok(Some(Event::Receive { peer, channel_id, segment })) if channel_id == 0 => {
                let text = String::from_utf8_lossy(segment.data()).into_owned();
                println!("{} received \"{}\"", peer, text);

                let reversed: String = text.chars().rev().collect();
                let echo = Segment::new(segment.data().to_vec().into_boxed_slice(), flags::RELIABLE);
                let reverse = Segment::new(reversed.into_bytes().into_boxed_slice(), 0);

                if let Err(e) = host.send(peer, 0, echo) {
                    eprintln!("failed to echo to {}: {}", peer, e);
                }
                if let Err(e) = host.send(peer, 1, reverse) {
                    eprintln!("failed to send reverse to {}: {}", peer, e);
                }
            }
            Ok(Some(Event::Receive { .. })) => {}
            Ok(None) => {}
            Err(e) => eprintln!("service error: {}", e),
        }
    }
}
