//! Datagram parsing and the per-peer command handlers (spec.md §4.5), including the RTT
//! estimator and segment-throttle adjustment. CONNECT/VERIFY_CONNECT, which need access to the
//! peer pool rather than a single already-accepted peer, are handled in `host.rs` instead.

use std::collections::VecDeque;

use crate::chamber::{HEADER_FLAG_COMPRESSED, HEADER_FLAG_SENT_TIME, HEADER_PEER_ID_MASK, HEADER_SESSION_SHIFT};
use crate::channel::QueueOutcome;
use crate::command::{self, Command, CommandBody, CommandHeader};
use crate::command_pod::PEER_SEGMENT_THROTTLE_SCALE;
use crate::peer::{Peer, PeerState};
use crate::segment::{flags as segment_flags, ReassemblyBuffer, Segment};
use crate::time;

/// One parsed incoming datagram, stripped of its protocol header.
pub struct ParsedDatagram {
    pub peer_id: u16,
    pub session_id: u8,
    pub compressed: bool,
    pub sent_time: Option<u16>,
    pub commands: Vec<Command>,
}

/// Parses the protocol header and every command in `data`. Returns `None` on any malformed
/// command, so one corrupt datagram never poisons later ones (spec.md §7: malformed input is
/// dropped, not propagated as an error).
pub fn parse_datagram(data: &[u8]) -> Option<ParsedDatagram> {
    if data.len() < 2 {
        return None;
    }
    let peer_field = u16::from_be_bytes([data[0], data[1]]);

    let peer_id = peer_field & HEADER_PEER_ID_MASK;
    let session_id = ((peer_field >> HEADER_SESSION_SHIFT) & 0x3) as u8;
    let compressed = peer_field & HEADER_FLAG_COMPRESSED != 0;
    let has_sent_time = peer_field & HEADER_FLAG_SENT_TIME != 0;

    // The sent-time field is only present in the datagram when the flag is set (chamber.rs only
    // reserves it for datagrams carrying a reliable command), so the command stream starts at
    // byte 2 or byte 4 depending on that flag.
    let (sent_time, mut offset) = if has_sent_time {
        if data.len() < 4 {
            return None;
        }
        (Some(u16::from_be_bytes([data[2], data[3]])), 4)
    } else {
        (None, 2)
    };

    let mut commands = Vec::new();
    while offset < data.len() {
        let (mut command, consumed) = command::serial::read_command(&data[offset..])?;
        offset += consumed;

        if let Some(len) = command.body.data_length() {
            let len = len as usize;
            if offset + len > data.len() {
                return None;
            }
            command.payload = Some(data[offset..offset + len].to_vec().into_boxed_slice());
            offset += len;
        }

        commands.push(command);
    }

    Some(ParsedDatagram { peer_id, session_id, compressed, sent_time, commands })
}

/// The result of processing one incoming command against an already-connected peer.
pub enum CommandOutcome {
    /// Nothing externally visible happened (e.g. an acknowledgement was consumed).
    Handled,
    /// A reliable round trip completed; `measured_rtt` should feed the RTT estimator.
    AcknowledgedReliable { measured_rtt: u32 },
    /// The remote peer asked to disconnect.
    PeerRequestedDisconnect,
    /// The remote peer violated the protocol and should be reset to ZOMBIE.
    ProtocolViolation(String),
}

/// Dispatches one already-parsed command against a connected peer's channels and command pod.
/// Reliable/unreliable/unsequenced payload commands are queued into the owning channel, and the
/// caller should subsequently drain `Channel::new_incoming_reliable_commands` /
/// `Channel::drain_incoming_unreliable` to produce `Event::Receive`.
pub fn handle_command(peer: &mut Peer, command: Command, service_time: u32) -> CommandOutcome {
    peer.net.last_receive_time = service_time;

    match command.body {
        CommandBody::Acknowledge { received_reliable_sequence_number, .. } => {
            let channel_id = command.header.channel_id;
            match peer.pod.remove_sent_reliable(received_reliable_sequence_number, channel_id, &mut peer.channels) {
                Some((_body, sent_time)) if sent_time != 0 => {
                    let measured_rtt = time::wrapping_diff(service_time, sent_time).max(1);
                    CommandOutcome::AcknowledgedReliable { measured_rtt }
                }
                _ => CommandOutcome::Handled,
            }
        }

        CommandBody::Disconnect { .. } => CommandOutcome::PeerRequestedDisconnect,

        CommandBody::Ping => CommandOutcome::Handled,

        CommandBody::SendReliable { .. } => handle_send_reliable(peer, command, 1, None),

        CommandBody::SendUnreliable { unreliable_sequence_number, .. } => {
            handle_send_unreliable(peer, command, unreliable_sequence_number, false)
        }

        CommandBody::SendUnsequenced { unsequenced_group, .. } => {
            if peer.check_unsequenced_duplicate(unsequenced_group) {
                return CommandOutcome::Handled;
            }
            handle_send_unreliable(peer, command, 0, true)
        }

        CommandBody::SendFragment { start_sequence_number, fragment_count, fragment_number, total_length, fragment_offset, .. } => {
            let unreliable = command.header.id() == command::ID_SEND_UNRELIABLE_FRAGMENT;
            handle_send_fragment(peer, command.header, start_sequence_number, fragment_count, fragment_number, total_length, fragment_offset, command.payload, unreliable)
        }

        CommandBody::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth } => {
            peer.net.incoming_bandwidth = incoming_bandwidth;
            peer.net.outgoing_bandwidth = outgoing_bandwidth;
            CommandOutcome::Handled
        }

        CommandBody::ThrottleConfigure(params) => {
            peer.net.segment_throttle_interval = params.interval;
            peer.net.segment_throttle_acceleration = params.acceleration;
            peer.net.segment_throttle_deceleration = params.deceleration;
            CommandOutcome::Handled
        }

        CommandBody::Connect(_) | CommandBody::VerifyConnect(_) => {
            CommandOutcome::ProtocolViolation("CONNECT/VERIFY_CONNECT on an established peer".to_string())
        }
    }
}

fn channel_mut(peer: &mut Peer, channel_id: u8) -> Option<&mut crate::channel::Channel> {
    peer.channels.get_mut(channel_id as usize)
}

fn handle_send_reliable(peer: &mut Peer, command: Command, span: u32, reassembly: Option<ReassemblyBuffer>) -> CommandOutcome {
    let channel_id = command.header.channel_id;
    let seq = command.header.reliable_sequence_number;
    let payload = command.payload.unwrap_or_else(|| Box::new([]));
    let segment = if reassembly.is_none() {
        Some(Segment::new(payload, segment_flags::RELIABLE))
    } else {
        None
    };

    let outcome = match channel_mut(peer, channel_id) {
        Some(channel) => channel.queue_incoming_reliable(seq, channel_id, span, segment, reassembly),
        None => return CommandOutcome::ProtocolViolation(format!("channel {} out of range", channel_id)),
    };

    match outcome {
        QueueOutcome::Inserted => CommandOutcome::Handled,
        QueueOutcome::Duplicate => CommandOutcome::Handled,
        QueueOutcome::OutOfWindow => CommandOutcome::Handled,
    }
}

fn handle_send_unreliable(peer: &mut Peer, command: Command, unreliable_sequence_number: u16, unsequenced: bool) -> CommandOutcome {
    let channel_id = command.header.channel_id;
    let reliable_sequence_number = command.header.reliable_sequence_number;
    let payload = command.payload.unwrap_or_else(|| Box::new([]));
    let flag = if unsequenced { segment_flags::UNSEQUENCED } else { 0 };
    let segment = Segment::new(payload, flag);

    match channel_mut(peer, channel_id) {
        Some(channel) => {
            channel.queue_incoming_unreliable(reliable_sequence_number, unreliable_sequence_number, channel_id, segment, unsequenced);
            CommandOutcome::Handled
        }
        None => CommandOutcome::ProtocolViolation(format!("channel {} out of range", channel_id)),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_send_fragment(
    peer: &mut Peer,
    header: CommandHeader,
    start_sequence_number: u16,
    fragment_count: u32,
    fragment_number: u32,
    total_length: u32,
    fragment_offset: u32,
    payload: Option<Box<[u8]>>,
    unreliable: bool,
) -> CommandOutcome {
    let channel_id = header.channel_id;
    let payload = match payload {
        Some(p) => p,
        None => return CommandOutcome::ProtocolViolation("fragment command missing payload".to_string()),
    };

    if unreliable {
        // Unreliable fragments that arrive out of order with a missing peer are simply dropped;
        // the spec does not require reassembly guarantees for unreliable channels.
        let _ = (start_sequence_number, fragment_count, fragment_number, total_length, fragment_offset);
        return CommandOutcome::Handled;
    }

    let channel = match channel_mut(peer, channel_id) {
        Some(c) => c,
        None => return CommandOutcome::ProtocolViolation(format!("channel {} out of range", channel_id)),
    };

    if let Some(existing) = channel.find_incoming_reliable_fragment_mut(start_sequence_number) {
        if let Some(reassembly) = existing.reassembly.as_mut() {
            reassembly.place(fragment_number, fragment_offset, &payload);
            if reassembly.is_complete() {
                let complete = std::mem::replace(&mut existing.reassembly, None).unwrap();
                existing.segment = Some(complete.into_segment(segment_flags::RELIABLE));
            }
        }
        return CommandOutcome::Handled;
    }

    let mut reassembly = ReassemblyBuffer::new(total_length, fragment_count);
    let complete = reassembly.place(fragment_number, fragment_offset, &payload);
    let (segment, reassembly) = if complete {
        (Some(reassembly.into_segment(segment_flags::RELIABLE)), None)
    } else {
        (None, Some(reassembly))
    };

    // A stale or out-of-window fragment start is a silent no-op either way (spec.md §4.2).
    channel.queue_incoming_reliable(start_sequence_number, channel_id, fragment_count.max(1), segment, reassembly);
    CommandOutcome::Handled
}

/// Updates the RTT estimator from one measured sample (spec.md §4.5, Jacobson-style EWMA:
/// `variance += (|sample - mean| - variance) / 4`, `mean += (sample - mean) / 8`).
pub fn update_round_trip_time(peer: &mut Peer, measured_rtt: u32) {
    let pod = &mut peer.pod;
    let mean = pod.round_trip_time;
    let diff = if measured_rtt > mean { measured_rtt - mean } else { mean - measured_rtt };

    pod.round_trip_time_variance = pod.round_trip_time_variance * 3 / 4 + diff / 4;
    pod.round_trip_time = mean * 7 / 8 + measured_rtt / 8;
}

/// Applies the segment-throttle adjustment once per `segment_throttle_interval` (spec.md §4.5):
/// accelerate when the epoch's loss ratio is at or below the peer's tolerance, decelerate
/// otherwise.
pub fn update_segment_throttle(peer: &mut Peer, service_time: u32) {
    if time::wrapping_diff(service_time, peer.net.segment_throttle_epoch) < peer.net.segment_throttle_interval {
        return;
    }

    let sent = peer.pod.segments_sent;
    let lost = peer.pod.segments_lost;
    peer.pod.segments_sent = 0;
    peer.pod.segments_lost = 0;

    if sent > 0 && lost * PEER_SEGMENT_THROTTLE_SCALE as u64 / sent > peer.net.segment_throttle_deceleration as u64 {
        peer.net.segment_throttle = peer.net.segment_throttle.saturating_sub(peer.net.segment_throttle_acceleration);
    } else {
        peer.net.segment_throttle =
            (peer.net.segment_throttle + peer.net.segment_throttle_deceleration).min(PEER_SEGMENT_THROTTLE_SCALE);
    }

    peer.net.segment_throttle_epoch = service_time;
}

/// Runs the peer's retransmission timer, converting an expired datagram into either a resend (the
/// common case, handled inside `CommandPod::timeout`) or a hard disconnect.
pub fn service_timeouts(peer: &mut Peer, service_time: u32) -> bool {
    if peer.net.state == PeerState::Zombie {
        return false;
    }
    peer.pod.timeout(service_time)
}

/// Builds the queue of `Event::Receive` from everything newly deliverable on one channel.
pub fn drain_deliverable(channel: &mut crate::channel::Channel, channel_id: u8, out: &mut VecDeque<(Segment, u8)>) {
    for command in channel.new_incoming_reliable_commands() {
        if let Some(segment) = command.segment {
            out.push_back((segment, channel_id));
        }
    }
    for command in channel.drain_incoming_unreliable() {
        if let Some(segment) = command.segment {
            out.push_back((segment, channel_id));
        }
    }
}
