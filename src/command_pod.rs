//! Per-peer command bookkeeping: outgoing/sent queues, RTT and retransmission timing
//! (spec.md §3/§4.3).

use std::collections::VecDeque;

use crate::chamber::Chamber;
use crate::channel::{Channel, PEER_FREE_RELIABLE_WINDOWS, PEER_RELIABLE_WINDOWS, PEER_RELIABLE_WINDOW_SIZE};
use crate::command::{self, CommandBody, CommandHeader};
use crate::segment::Segment;
use crate::time;

pub const PEER_DEFAULT_ROUND_TRIP_TIME: u32 = 500;
pub const PEER_TIMEOUT_LIMIT: u32 = 32;
pub const PEER_TIMEOUT_MINIMUM: u32 = 5000;
pub const PEER_TIMEOUT_MAXIMUM: u32 = 30000;
pub const PEER_SEGMENT_THROTTLE_SCALE: u32 = 32;

/// A queued send-side command, carrying an optional payload (spec.md §3).
pub struct OutgoingCommand {
    pub header: CommandHeader,
    pub body: CommandBody,
    pub payload: Option<Segment>,
    pub fragment_offset: u32,
    pub fragment_length: u32,
    pub round_trip_timeout: u32,
    pub round_trip_timeout_limit: u32,
    pub sent_time: u32,
    pub send_attempts: u32,
}

impl OutgoingCommand {
    fn new(header: CommandHeader, body: CommandBody, payload: Option<Segment>, fragment_offset: u32, fragment_length: u32) -> Self {
        Self {
            header,
            body,
            payload,
            fragment_offset,
            fragment_length,
            round_trip_timeout: 0,
            round_trip_timeout_limit: 0,
            sent_time: 0,
            send_attempts: 0,
        }
    }

}

/// True when sending `cmd` would wrap its channel's reliable window before older windows have
/// drained: it has never been sent, it's the first sequence number in its window, and either the
/// previous window is saturated or some other window still has commands in flight (spec.md
/// §4.3's `WindowWraps`, §7's "Known ambiguities" (a)).
fn window_wraps(channel: &Channel, reliable_window: usize, cmd: &OutgoingCommand) -> bool {
    let has_not_sent_once = cmd.send_attempts == 0;
    let first_command_in_window = cmd.header.reliable_sequence_number % PEER_RELIABLE_WINDOW_SIZE as u16 == 0;

    let windows = PEER_RELIABLE_WINDOWS as usize;
    let previous_window = (reliable_window + windows - 1) % windows;
    let all_available_windows_are_in_use = channel.reliable_window(previous_window) >= (PEER_RELIABLE_WINDOW_SIZE - 1) as u16;

    let free = (1u32 << PEER_FREE_RELIABLE_WINDOWS) - 1;
    let mask = (free << reliable_window) | (free >> (windows - reliable_window));
    let existing_commands_are_in_flight = channel.used_reliable_windows() as u32 & mask != 0;

    has_not_sent_once && first_command_in_window && (all_available_windows_are_in_use || existing_commands_are_in_flight)
}

/// Command bookkeeping for a single peer's reliable/unreliable scheduling, RTT estimation, and
/// retransmission (spec.md §3's CommandPod).
pub struct CommandPod {
    pub outgoing_reliable: VecDeque<OutgoingCommand>,
    pub outgoing_unreliable: VecDeque<OutgoingCommand>,
    pub sent_reliable: VecDeque<OutgoingCommand>,
    pub sent_unreliable: VecDeque<OutgoingCommand>,

    pub incoming_data_total: u64,
    pub outgoing_data_total: u64,

    pub earliest_timeout: u32,
    pub next_timeout: u32,

    pub reliable_data_in_transit: u32,

    pub round_trip_time: u32,
    pub round_trip_time_variance: u32,
    pub timeout_limit: u32,
    pub timeout_minimum: u32,
    pub timeout_maximum: u32,

    pub outgoing_reliable_sequence_number: u16,
    pub outgoing_unsequenced_group: u16,
    pub incoming_unsequenced_group: u16,

    pub segments_sent: u64,
    pub segments_lost: u64,
}

impl CommandPod {
    pub fn new() -> Self {
        Self {
            outgoing_reliable: VecDeque::new(),
            outgoing_unreliable: VecDeque::new(),
            sent_reliable: VecDeque::new(),
            sent_unreliable: VecDeque::new(),
            incoming_data_total: 0,
            outgoing_data_total: 0,
            earliest_timeout: 0,
            next_timeout: 0,
            reliable_data_in_transit: 0,
            round_trip_time: PEER_DEFAULT_ROUND_TRIP_TIME,
            round_trip_time_variance: PEER_DEFAULT_ROUND_TRIP_TIME / 2,
            timeout_limit: PEER_TIMEOUT_LIMIT,
            timeout_minimum: PEER_TIMEOUT_MINIMUM,
            timeout_maximum: PEER_TIMEOUT_MAXIMUM,
            outgoing_reliable_sequence_number: 0,
            outgoing_unsequenced_group: 0,
            incoming_unsequenced_group: 0,
            segments_sent: 0,
            segments_lost: 0,
        }
    }

    /// Assigns sequence numbers and enqueues a command for sending (spec.md §4.3's
    /// `SetupOutgoing`). `channel` is `None` for connection-level commands (CONNECT, DISCONNECT,
    /// PING) which are numbered from the pod's own counter rather than a channel's.
    pub fn setup_outgoing(
        &mut self,
        mut header: CommandHeader,
        body: CommandBody,
        payload: Option<Segment>,
        fragment_offset: u32,
        fragment_length: u32,
        channel: Option<&mut Channel>,
    ) {
        let is_unsequenced = header.has_unsequenced_flag();

        if is_unsequenced {
            self.outgoing_unsequenced_group = self.outgoing_unsequenced_group.wrapping_add(1);
            header.reliable_sequence_number = 0;
        } else if let Some(channel) = channel {
            channel.outgoing_reliable_sequence_number = channel.outgoing_reliable_sequence_number.wrapping_add(1);
            header.reliable_sequence_number = channel.outgoing_reliable_sequence_number;
        } else {
            self.outgoing_reliable_sequence_number = self.outgoing_reliable_sequence_number.wrapping_add(1);
            header.reliable_sequence_number = self.outgoing_reliable_sequence_number;
        }

        self.outgoing_data_total += (command::serial::HEADER_SIZE + command::serial::fixed_body_size(header.id())) as u64
            + fragment_length as u64;

        let cmd = OutgoingCommand::new(header, body, payload, fragment_offset, fragment_length);

        if header.has_acknowledge_flag() {
            self.outgoing_reliable.push_back(cmd);
        } else {
            self.outgoing_unreliable.push_back(cmd);
        }
    }

    /// Loads as many reliable commands as fit into `chamber` (spec.md §4.3's
    /// `LoadReliableIntoChamber`). Returns `true` iff at least one reliable command was emitted
    /// (used by the caller to decide whether a PING is still needed this pass).
    pub fn load_reliable_into_chamber(
        &mut self,
        chamber: &mut Chamber,
        channels: &mut [Channel],
        window_size: u32,
        throttle: u32,
        throttle_scale: u32,
        mtu: u32,
        service_time: u32,
    ) -> bool {
        let mut emitted_any = false;
        let mut window_wrap = false;
        let mut window_exceeded = false;

        let mut i = 0;
        while i < self.outgoing_reliable.len() {
            let channel_id = self.outgoing_reliable[i].header.channel_id as usize;
            let channel = channels.get(channel_id);
            let reliable_seq = self.outgoing_reliable[i].header.reliable_sequence_number;
            let reliable_window = reliable_seq as usize / PEER_RELIABLE_WINDOW_SIZE as usize;

            if let Some(channel) = channel {
                if !window_wrap && window_wraps(channel, reliable_window, &self.outgoing_reliable[i]) {
                    window_wrap = true;
                }

                if window_wrap {
                    i += 1;
                    continue;
                }
            }

            let fragment_length = self.outgoing_reliable[i].fragment_length;
            if self.outgoing_reliable[i].payload.is_some() {
                if !window_exceeded {
                    let effective_window_size = std::cmp::max(window_size * throttle / throttle_scale.max(1), mtu);
                    if self.reliable_data_in_transit + fragment_length > effective_window_size {
                        window_exceeded = true;
                    }
                }

                if window_exceeded {
                    i += 1;
                    continue;
                }
            }

            if !chamber.sending_continues(fragment_length as usize) {
                break;
            }

            let mut cmd = self.outgoing_reliable.remove(i).unwrap();

            if cmd.send_attempts == 0 {
                if let Some(channel) = channels.get_mut(channel_id) {
                    channel.mark_reliable_window_as_used(reliable_seq);
                    channel.increment_reliable_window(reliable_seq);
                }
            }

            cmd.send_attempts += 1;
            if cmd.round_trip_timeout == 0 {
                cmd.round_trip_timeout = self.round_trip_time + 4 * self.round_trip_time_variance;
                cmd.round_trip_timeout_limit = self.timeout_limit * cmd.round_trip_timeout;
            }
            if cmd.payload.is_some() {
                self.reliable_data_in_transit += fragment_length;
            }
            cmd.sent_time = service_time;

            chamber.append_command(&cmd.header, &cmd.body, cmd.payload.as_ref().map(|s| s.data()), true);

            self.segments_sent += 1;
            self.sent_reliable.push_back(cmd);
            emitted_any = true;
        }

        emitted_any
    }

    /// Loads unreliable commands into `chamber`, honouring the per-peer segment throttle
    /// (spec.md §4.3's `LoadUnreliableIntoChamber`). A whole fragmented unreliable message is
    /// dropped together if the throttle counter overflows `PEER_SEGMENT_THROTTLE_SCALE`.
    pub fn load_unreliable_into_chamber(&mut self, chamber: &mut Chamber, throttle: u32, throttle_counter: &mut u32) {
        while let Some(front) = self.outgoing_unreliable.front() {
            if !chamber.sending_continues(front.fragment_length as usize) {
                break;
            }

            *throttle_counter += PEER_SEGMENT_THROTTLE_SCALE;
            let drop_message = *throttle_counter > throttle;

            let cmd = self.outgoing_unreliable.pop_front().unwrap();

            if drop_message {
                continue;
            }

            chamber.append_command(&cmd.header, &cmd.body, cmd.payload.as_ref().map(|s| s.data()), false);
            self.segments_sent += 1;

            if cmd.payload.is_some() {
                self.sent_unreliable.push_back(cmd);
            }
        }
    }

    /// Walks `sent_reliable`, retransmitting commands whose RTT timeout has elapsed and
    /// reporting whether the peer should be disconnected for exceeding the retransmission
    /// budget (spec.md §4.3's `Timeout`).
    pub fn timeout(&mut self, service_time: u32) -> bool {
        let mut i = 0;
        while i < self.sent_reliable.len() {
            let sent_time = self.sent_reliable[i].sent_time;

            if time::wrapping_diff(service_time, sent_time) < self.sent_reliable[i].round_trip_timeout {
                i += 1;
                continue;
            }

            self.earliest_timeout = if self.earliest_timeout == 0 {
                sent_time
            } else if time::wrapping_less_than(sent_time, self.earliest_timeout) {
                sent_time
            } else {
                self.earliest_timeout
            };

            if self.earliest_timeout != 0
                && (time::wrapping_diff(service_time, self.earliest_timeout) >= self.timeout_maximum
                    || (self.sent_reliable[i].round_trip_timeout >= self.sent_reliable[i].round_trip_timeout_limit
                        && time::wrapping_diff(service_time, self.earliest_timeout) >= self.timeout_minimum))
            {
                return true;
            }

            let mut cmd = self.sent_reliable.remove(i).unwrap();
            self.reliable_data_in_transit -= self.reliable_data_in_transit.min(cmd.fragment_length);
            cmd.round_trip_timeout *= 2;
            self.segments_lost += 1;
            self.outgoing_reliable.push_front(cmd);
        }

        false
    }

    /// Finds and removes the command matching `reliable_sequence_number` from `sent_reliable`,
    /// or from `outgoing_reliable` if it was acknowledged before it was even sent (spec.md
    /// §4.3's `RemoveSentReliable`). Returns the removed command's body and the full-precision
    /// time it was sent (0 if it had not been sent yet), for state-machine transitions keyed on
    /// acknowledged command kind and for the RTT estimator.
    pub fn remove_sent_reliable(
        &mut self,
        reliable_sequence_number: u16,
        channel_id: u8,
        channels: &mut [Channel],
    ) -> Option<(CommandBody, u32)> {
        let decrement_window = |channels: &mut [Channel]| {
            if let Some(channel) = channels.get_mut(channel_id as usize) {
                channel.decrement_reliable_window(reliable_sequence_number);
            }
        };

        if let Some(pos) = self.sent_reliable.iter().position(|c| {
            c.header.reliable_sequence_number == reliable_sequence_number && c.header.channel_id == channel_id
        }) {
            let cmd = self.sent_reliable.remove(pos).unwrap();
            self.reliable_data_in_transit -= self.reliable_data_in_transit.min(cmd.fragment_length);
            decrement_window(channels);
            return Some((cmd.body, cmd.sent_time));
        }

        if let Some(pos) = self.outgoing_reliable.iter().position(|c| {
            c.header.reliable_sequence_number == reliable_sequence_number && c.header.channel_id == channel_id
        }) {
            let cmd = self.outgoing_reliable.remove(pos).unwrap();
            decrement_window(channels);
            return Some((cmd.body, 0));
        }

        None
    }

    pub fn has_outgoing_reliable(&self) -> bool {
        !self.outgoing_reliable.is_empty()
    }

    pub fn has_sent_reliable(&self) -> bool {
        !self.sent_reliable.is_empty()
    }

    pub fn is_send_pending(&self) -> bool {
        self.has_outgoing_reliable() || self.has_sent_reliable() || !self.outgoing_unreliable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ID_PING, ID_SEND_RELIABLE};
    use crate::peer::{HOST_DEFAULT_MTU, PEER_MAXIMUM_WINDOW_SIZE};

    #[test]
    fn setup_outgoing_assigns_monotonic_channel_sequence() {
        let mut pod = CommandPod::new();
        let mut channel = Channel::new();

        for _ in 0..3 {
            let header = CommandHeader::new(ID_SEND_RELIABLE, 0, 0).with_acknowledge_flag();
            pod.setup_outgoing(header, CommandBody::SendReliable { data_length: 0 }, None, 0, 0, Some(&mut channel));
        }

        let seqs: Vec<u16> = pod.outgoing_reliable.iter().map(|c| c.header.reliable_sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn setup_outgoing_without_channel_uses_pod_sequence() {
        let mut pod = CommandPod::new();
        let header = CommandHeader::new(ID_PING, 0xFF, 0).with_acknowledge_flag();
        pod.setup_outgoing(header, CommandBody::Ping, None, 0, 0, None);
        assert_eq!(pod.outgoing_reliable[0].header.reliable_sequence_number, 1);
    }

    #[test]
    fn timeout_doubles_backoff_and_requeues() {
        let mut pod = CommandPod::new();
        let header = CommandHeader::new(ID_SEND_RELIABLE, 0, 1).with_acknowledge_flag();
        let mut cmd = OutgoingCommand::new(header, CommandBody::SendReliable { data_length: 0 }, None, 0, 10);
        cmd.sent_time = 0;
        cmd.round_trip_timeout = 100;
        cmd.round_trip_timeout_limit = 10_000;
        cmd.send_attempts = 1;
        pod.reliable_data_in_transit = 10;
        pod.sent_reliable.push_back(cmd);

        let disconnect = pod.timeout(150);
        assert!(!disconnect);
        assert_eq!(pod.reliable_data_in_transit, 0);
        assert_eq!(pod.segments_lost, 1);
        assert_eq!(pod.outgoing_reliable.len(), 1);
        assert_eq!(pod.outgoing_reliable[0].round_trip_timeout, 200);
    }

    #[test]
    fn timeout_signals_disconnect_past_timeout_maximum() {
        let mut pod = CommandPod::new();
        pod.timeout_maximum = 1000;
        let header = CommandHeader::new(ID_SEND_RELIABLE, 0, 1).with_acknowledge_flag();
        let mut cmd = OutgoingCommand::new(header, CommandBody::SendReliable { data_length: 0 }, None, 0, 10);
        cmd.sent_time = 0;
        cmd.round_trip_timeout = 100;
        cmd.round_trip_timeout_limit = 10_000;
        pod.sent_reliable.push_back(cmd);

        assert!(pod.timeout(2000));
    }

    #[test]
    fn load_reliable_marks_the_window_used_on_first_send() {
        let mut pod = CommandPod::new();
        let mut channel = Channel::new();
        let header = CommandHeader::new(ID_SEND_RELIABLE, 0, 0).with_acknowledge_flag();
        pod.setup_outgoing(header, CommandBody::SendReliable { data_length: 0 }, None, 0, 0, Some(&mut channel));

        let mut channels = vec![channel];
        let mut chamber = Chamber::new(HOST_DEFAULT_MTU as usize);
        let emitted = pod.load_reliable_into_chamber(
            &mut chamber,
            &mut channels,
            PEER_MAXIMUM_WINDOW_SIZE,
            PEER_SEGMENT_THROTTLE_SCALE,
            PEER_SEGMENT_THROTTLE_SCALE,
            HOST_DEFAULT_MTU,
            0,
        );

        assert!(emitted);
        assert_eq!(pod.sent_reliable.len(), 1);
        assert_eq!(channels[0].reliable_window(0), 1);
        assert_eq!(channels[0].used_reliable_windows(), 1);
    }

    #[test]
    fn load_reliable_defers_the_first_command_in_a_window_while_another_is_in_flight() {
        let mut pod = CommandPod::new();
        let mut channel = Channel::new();
        // Window 3 has a command in flight; window 0's first command must wait for it to drain
        // rather than opening a new window underneath it.
        channel.mark_reliable_window_as_used(3 * PEER_RELIABLE_WINDOW_SIZE as u16);

        let header = CommandHeader::new(ID_SEND_RELIABLE, 0, 0).with_acknowledge_flag();
        let cmd = OutgoingCommand::new(header, CommandBody::SendReliable { data_length: 0 }, None, 0, 0);
        pod.outgoing_reliable.push_back(cmd);

        let mut channels = vec![channel];
        let mut chamber = Chamber::new(HOST_DEFAULT_MTU as usize);
        let emitted = pod.load_reliable_into_chamber(
            &mut chamber,
            &mut channels,
            PEER_MAXIMUM_WINDOW_SIZE,
            PEER_SEGMENT_THROTTLE_SCALE,
            PEER_SEGMENT_THROTTLE_SCALE,
            HOST_DEFAULT_MTU,
            0,
        );

        assert!(!emitted);
        assert_eq!(pod.outgoing_reliable.len(), 1);
        assert!(pod.sent_reliable.is_empty());
    }
}
