//! Wire encoding for [`super::Command`]. All multi-byte fields are big-endian (spec.md §6).
//!
//! Mirrors the manual byte-packing style of `frame/serial/mod.rs` and `frame/serial/build.rs`
//! in the teacher rather than pulling in a derive-based serializer: every field the protocol
//! needs is a handful of shifts, and the command-size table this module exposes is itself part
//! of the protocol (spec.md §4.5's "a command's size is looked up in a fixed table").

use super::*;

pub const HEADER_SIZE: usize = 4;

/// The fixed body size (bytes, excluding the 4-byte [`CommandHeader`] and excluding any
/// trailing variable-length payload) for each command id. `0` for unknown ids.
pub const fn fixed_body_size(id: u8) -> usize {
    match id {
        ID_ACKNOWLEDGE => 4,
        ID_CONNECT => 44,
        ID_VERIFY_CONNECT => 40,
        ID_DISCONNECT => 4,
        ID_PING => 0,
        ID_SEND_RELIABLE => 2,
        ID_SEND_UNRELIABLE => 4,
        ID_SEND_UNSEQUENCED => 4,
        ID_SEND_FRAGMENT => 20,
        ID_BANDWIDTH_LIMIT => 8,
        ID_THROTTLE_CONFIGURE => 12,
        ID_SEND_UNRELIABLE_FRAGMENT => 20,
        _ => 0,
    }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn get_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn get_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Writes `header` followed by the fixed body of `body` (not the trailing payload, if any).
pub fn write_command(out: &mut Vec<u8>, header: &CommandHeader, body: &CommandBody) {
    out.push(header.command);
    out.push(header.channel_id);
    put_u16(out, header.reliable_sequence_number);

    match *body {
        CommandBody::Acknowledge { received_reliable_sequence_number, received_sent_time } => {
            put_u16(out, received_reliable_sequence_number);
            put_u16(out, received_sent_time);
        }
        CommandBody::Connect(c) => {
            put_u16(out, c.outgoing_peer_id);
            out.push(c.incoming_session_id);
            out.push(c.outgoing_session_id);
            put_u32(out, c.mtu);
            put_u32(out, c.window_size);
            put_u32(out, c.channel_count);
            put_u32(out, c.incoming_bandwidth);
            put_u32(out, c.outgoing_bandwidth);
            put_u32(out, c.throttle.interval);
            put_u32(out, c.throttle.acceleration);
            put_u32(out, c.throttle.deceleration);
            put_u32(out, c.connect_id);
            put_u32(out, c.data);
        }
        CommandBody::VerifyConnect(v) => {
            put_u16(out, v.outgoing_peer_id);
            out.push(v.incoming_session_id);
            out.push(v.outgoing_session_id);
            put_u32(out, v.mtu);
            put_u32(out, v.window_size);
            put_u32(out, v.channel_count);
            put_u32(out, v.incoming_bandwidth);
            put_u32(out, v.outgoing_bandwidth);
            put_u32(out, v.throttle.interval);
            put_u32(out, v.throttle.acceleration);
            put_u32(out, v.throttle.deceleration);
            put_u32(out, v.connect_id);
        }
        CommandBody::Disconnect { data } => put_u32(out, data),
        CommandBody::Ping => {}
        CommandBody::SendReliable { data_length } => put_u16(out, data_length),
        CommandBody::SendUnreliable { unreliable_sequence_number, data_length } => {
            put_u16(out, unreliable_sequence_number);
            put_u16(out, data_length);
        }
        CommandBody::SendUnsequenced { unsequenced_group, data_length } => {
            put_u16(out, unsequenced_group);
            put_u16(out, data_length);
        }
        CommandBody::SendFragment {
            start_sequence_number, data_length, fragment_count, fragment_number, total_length, fragment_offset,
        } => {
            put_u16(out, start_sequence_number);
            put_u16(out, data_length);
            put_u32(out, fragment_count);
            put_u32(out, fragment_number);
            put_u32(out, total_length);
            put_u32(out, fragment_offset);
        }
        CommandBody::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth } => {
            put_u32(out, incoming_bandwidth);
            put_u32(out, outgoing_bandwidth);
        }
        CommandBody::ThrottleConfigure(t) => {
            put_u32(out, t.interval);
            put_u32(out, t.acceleration);
            put_u32(out, t.deceleration);
        }
    }
}

/// Parses one command (header + fixed body) from the front of `data`. Returns the command and
/// the number of bytes consumed for the header+fixed-body portion; the caller is responsible
/// for slicing off `data_length` trailing payload bytes afterward, per `CommandBody::data_length`.
pub fn read_command(data: &[u8]) -> Option<(Command, usize)> {
    if data.len() < HEADER_SIZE {
        return None;
    }

    let header = CommandHeader {
        command: data[0],
        channel_id: data[1],
        reliable_sequence_number: get_u16(&data[2..4]),
    };

    let id = header.id();
    let body_size = fixed_body_size(id);
    let total = HEADER_SIZE + body_size;
    if data.len() < total {
        return None;
    }

    let b = &data[HEADER_SIZE..total];

    let body = match id {
        ID_ACKNOWLEDGE => CommandBody::Acknowledge {
            received_reliable_sequence_number: get_u16(&b[0..2]),
            received_sent_time: get_u16(&b[2..4]),
        },
        ID_CONNECT => CommandBody::Connect(ConnectBody {
            outgoing_peer_id: get_u16(&b[0..2]),
            incoming_session_id: b[2],
            outgoing_session_id: b[3],
            mtu: get_u32(&b[4..8]),
            window_size: get_u32(&b[8..12]),
            channel_count: get_u32(&b[12..16]),
            incoming_bandwidth: get_u32(&b[16..20]),
            outgoing_bandwidth: get_u32(&b[20..24]),
            throttle: ThrottleParams {
                interval: get_u32(&b[24..28]),
                acceleration: get_u32(&b[28..32]),
                deceleration: get_u32(&b[32..36]),
            },
            connect_id: get_u32(&b[36..40]),
            data: get_u32(&b[40..44]),
        }),
        ID_VERIFY_CONNECT => CommandBody::VerifyConnect(VerifyConnectBody {
            outgoing_peer_id: get_u16(&b[0..2]),
            incoming_session_id: b[2],
            outgoing_session_id: b[3],
            mtu: get_u32(&b[4..8]),
            window_size: get_u32(&b[8..12]),
            channel_count: get_u32(&b[12..16]),
            incoming_bandwidth: get_u32(&b[16..20]),
            outgoing_bandwidth: get_u32(&b[20..24]),
            throttle: ThrottleParams {
                interval: get_u32(&b[24..28]),
                acceleration: get_u32(&b[28..32]),
                deceleration: get_u32(&b[32..36]),
            },
            connect_id: get_u32(&b[36..40]),
        }),
        ID_DISCONNECT => CommandBody::Disconnect { data: get_u32(&b[0..4]) },
        ID_PING => CommandBody::Ping,
        ID_SEND_RELIABLE => CommandBody::SendReliable { data_length: get_u16(&b[0..2]) },
        ID_SEND_UNRELIABLE => CommandBody::SendUnreliable {
            unreliable_sequence_number: get_u16(&b[0..2]),
            data_length: get_u16(&b[2..4]),
        },
        ID_SEND_UNSEQUENCED => CommandBody::SendUnsequenced {
            unsequenced_group: get_u16(&b[0..2]),
            data_length: get_u16(&b[2..4]),
        },
        ID_SEND_FRAGMENT | ID_SEND_UNRELIABLE_FRAGMENT => CommandBody::SendFragment {
            start_sequence_number: get_u16(&b[0..2]),
            data_length: get_u16(&b[2..4]),
            fragment_count: get_u32(&b[4..8]),
            fragment_number: get_u32(&b[8..12]),
            total_length: get_u32(&b[12..16]),
            fragment_offset: get_u32(&b[16..20]),
        },
        ID_BANDWIDTH_LIMIT => CommandBody::BandwidthLimit {
            incoming_bandwidth: get_u32(&b[0..4]),
            outgoing_bandwidth: get_u32(&b[4..8]),
        },
        ID_THROTTLE_CONFIGURE => CommandBody::ThrottleConfigure(ThrottleParams {
            interval: get_u32(&b[0..4]),
            acceleration: get_u32(&b[4..8]),
            deceleration: get_u32(&b[8..12]),
        }),
        _ => return None,
    };

    Some((Command { header, body, payload: None }, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips() {
        let header = CommandHeader::new(ID_PING, 0, 7).with_acknowledge_flag();
        let mut buf = Vec::new();
        write_command(&mut buf, &header, &CommandBody::Ping);
        assert_eq!(buf.len(), HEADER_SIZE);

        let (cmd, consumed) = read_command(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(cmd.header, header);
        assert!(cmd.header.has_acknowledge_flag());
        assert_eq!(cmd.body, CommandBody::Ping);
    }

    #[test]
    fn send_reliable_round_trips_with_trailing_payload() {
        let header = CommandHeader::new(ID_SEND_RELIABLE, 3, 42);
        let body = CommandBody::SendReliable { data_length: 5 };
        let mut buf = Vec::new();
        write_command(&mut buf, &header, &body);
        buf.extend_from_slice(b"hello");

        let (cmd, consumed) = read_command(&buf).unwrap();
        assert_eq!(consumed, HEADER_SIZE + 2);
        assert_eq!(cmd.body.data_length(), Some(5));
        assert_eq!(&buf[consumed..consumed + 5], b"hello");
    }

    #[test]
    fn connect_round_trips() {
        let body = ConnectBody {
            outgoing_peer_id: 3,
            incoming_session_id: 1,
            outgoing_session_id: 2,
            mtu: 1400,
            window_size: 65536,
            channel_count: 3,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            throttle: ThrottleParams { interval: 5000, acceleration: 2, deceleration: 2 },
            connect_id: 0xDEADBEEF,
            data: 0,
        };
        let header = CommandHeader::new(ID_CONNECT, 0xFF, 0).with_acknowledge_flag();
        let mut buf = Vec::new();
        write_command(&mut buf, &header, &CommandBody::Connect(body));
        assert_eq!(buf.len(), HEADER_SIZE + fixed_body_size(ID_CONNECT));

        let (cmd, consumed) = read_command(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(cmd.body, CommandBody::Connect(body));
    }

    #[test]
    fn read_command_rejects_truncated_input() {
        assert!(read_command(&[ID_CONNECT, 0, 0, 0]).is_none());
    }
}
