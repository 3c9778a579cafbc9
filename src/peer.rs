//! Peer identity, addressing, network/throttle state, and the connection state machine
//! (spec.md §3, §4.4).

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::channel::Channel;
use crate::command::CommandHeader;
use crate::command_pod::{CommandPod, PEER_SEGMENT_THROTTLE_SCALE};

pub const PROTOCOL_MINIMUM_MTU: u32 = 576;
pub const PROTOCOL_MAXIMUM_MTU: u32 = 4096;
pub const HOST_DEFAULT_MTU: u32 = 1400;
pub const PEER_MINIMUM_WINDOW_SIZE: u32 = 4096;
pub const PEER_MAXIMUM_WINDOW_SIZE: u32 = 65536;
pub const PROTOCOL_MINIMUM_CHANNEL_COUNT: u32 = 1;
pub const PROTOCOL_MAXIMUM_CHANNEL_COUNT: u32 = 255;
pub const PEER_UNSEQUENCED_WINDOW_SIZE: u32 = 1024;
pub const PEER_SEGMENT_THROTTLE_INTERVAL: u32 = 5000;
pub const PEER_SEGMENT_THROTTLE_ACCELERATION: u32 = 2;
pub const PEER_SEGMENT_THROTTLE_DECELERATION: u32 = 2;
pub const PROTOCOL_MAXIMUM_PEER_ID: u16 = 0xFFF;

/// The connection state machine of spec.md §4.4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    AcknowledgingConnect,
    ConnectionPending,
    ConnectionSucceeded,
    Connected,
    DisconnectLater,
    Disconnecting,
    AcknowledgingDisconnect,
    Zombie,
}

/// Network and throttle state (spec.md §3's PeerNet).
pub struct PeerNet {
    pub state: PeerState,

    pub mtu: u32,
    pub window_size: u32,

    pub incoming_bandwidth: u32,
    pub outgoing_bandwidth: u32,
    pub incoming_bandwidth_throttle_epoch: u32,
    pub outgoing_bandwidth_throttle_epoch: u32,

    pub segment_throttle: u32,
    pub segment_throttle_limit: u32,
    pub segment_throttle_counter: u32,
    pub segment_throttle_acceleration: u32,
    pub segment_throttle_deceleration: u32,
    pub segment_throttle_interval: u32,
    pub segment_throttle_epoch: u32,

    pub segment_loss_value: u32,
    pub segment_loss_variance: u32,
    pub segment_loss_epoch: u32,
    pub segments_lost_total: u64,
    pub segments_sent_total: u64,

    pub last_send_time: u32,
    pub last_receive_time: u32,
}

impl PeerNet {
    pub fn new() -> Self {
        Self {
            state: PeerState::Disconnected,
            mtu: HOST_DEFAULT_MTU,
            window_size: PEER_MAXIMUM_WINDOW_SIZE,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            incoming_bandwidth_throttle_epoch: 0,
            outgoing_bandwidth_throttle_epoch: 0,
            segment_throttle: PEER_SEGMENT_THROTTLE_SCALE,
            segment_throttle_limit: PEER_SEGMENT_THROTTLE_SCALE,
            segment_throttle_counter: 0,
            segment_throttle_acceleration: PEER_SEGMENT_THROTTLE_ACCELERATION,
            segment_throttle_deceleration: PEER_SEGMENT_THROTTLE_DECELERATION,
            segment_throttle_interval: PEER_SEGMENT_THROTTLE_INTERVAL,
            segment_throttle_epoch: 0,
            segment_loss_value: 0,
            segment_loss_variance: 0,
            segment_loss_epoch: 0,
            segments_lost_total: 0,
            segments_sent_total: 0,
            last_send_time: 0,
            last_receive_time: 0,
        }
    }
}

/// An acknowledgement queued for the next send pass. Acknowledgements bypass
/// `outgoing_reliable_commands`, written directly to the chamber ahead of every other command
/// (spec.md §9's design note), so they are not subject to reliable-window accounting.
pub struct Acknowledgement {
    pub sent_time: u16,
    pub header: CommandHeader,
}

/// A connected remote endpoint (spec.md §3's Peer).
pub struct Peer {
    pub incoming_peer_id: u16,
    pub outgoing_peer_id: u16,
    pub incoming_session_id: u8,
    pub outgoing_session_id: u8,

    pub address: Option<SocketAddr>,
    pub connect_id: u32,

    pub channels: Vec<Channel>,

    pub net: PeerNet,
    pub pod: CommandPod,

    pub acknowledgements: VecDeque<Acknowledgement>,
    unsequenced_window: [u32; (PEER_UNSEQUENCED_WINDOW_SIZE / 32) as usize],

    /// Events generated while processing an incoming datagram, awaiting the dispatch hub to
    /// surface them one at a time through `Host::service` (spec.md §3's dispatched-command queue).
    pub dispatched_events: VecDeque<crate::Event>,

    pub event_data: u32,
    pub needs_dispatch: bool,

    /// Set once a ZOMBIE peer's `Event::Disconnect` has been synthesised, so the host reaps the
    /// slot only after that event has actually been drained, never in the same pass it was
    /// queued (which would wipe it out from under the application).
    pub disconnect_notified: bool,

    was_connected: bool,
}

impl Peer {
    pub fn new() -> Self {
        Self {
            incoming_peer_id: 0,
            outgoing_peer_id: 0,
            incoming_session_id: 0,
            outgoing_session_id: 0,
            address: None,
            connect_id: 0,
            channels: Vec::new(),
            net: PeerNet::new(),
            pod: CommandPod::new(),
            acknowledgements: VecDeque::new(),
            unsequenced_window: [0; (PEER_UNSEQUENCED_WINDOW_SIZE / 32) as usize],
            dispatched_events: VecDeque::new(),
            event_data: 0,
            needs_dispatch: false,
            disconnect_notified: false,
            was_connected: false,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.net.state != PeerState::Disconnected
    }

    pub fn allocate_channels(&mut self, channel_count: usize) {
        self.channels = (0..channel_count).map(|_| Channel::new()).collect();
    }

    /// Returns `true` if this command's unsequenced group has already been seen, marking it as
    /// seen either way (spec.md §4.5: a 1024-bit window indexed by group mod 1024).
    pub fn check_unsequenced_duplicate(&mut self, group: u16) -> bool {
        let index = group as usize % PEER_UNSEQUENCED_WINDOW_SIZE as usize;
        let word = index / 32;
        let bit = 1u32 << (index % 32);
        let duplicate = self.unsequenced_window[word] & bit != 0;
        self.unsequenced_window[word] |= bit;
        duplicate
    }

    /// Transitions unconditionally to ZOMBIE, discarding all queues (spec.md §4.4's `any -> ZOMBIE`).
    pub fn reset_to_zombie(&mut self) {
        self.net.state = PeerState::Zombie;
    }

    /// The only path back to DISCONNECTED from ZOMBIE: clears channels and queues, frees the
    /// peer pool slot for reuse (spec.md §4.4, §3's lifecycle note).
    pub fn reset(&mut self) {
        let was_connected = self.was_connected;
        *self = Peer::new();
        let _ = was_connected;
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.net.state, PeerState::Connected | PeerState::DisconnectLater)
    }

    pub fn mark_was_connected(&mut self) {
        self.was_connected = true;
    }

    pub fn was_connected(&self) -> bool {
        self.was_connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsequenced_duplicate_group_is_detected_once() {
        let mut peer = Peer::new();
        assert!(!peer.check_unsequenced_duplicate(5));
        assert!(peer.check_unsequenced_duplicate(5));
        assert!(!peer.check_unsequenced_duplicate(6));
    }

    #[test]
    fn reset_returns_peer_to_disconnected_with_no_channels() {
        let mut peer = Peer::new();
        peer.allocate_channels(3);
        peer.net.state = PeerState::Zombie;
        peer.reset();
        assert_eq!(peer.net.state, PeerState::Disconnected);
        assert!(peer.channels.is_empty());
    }
}
