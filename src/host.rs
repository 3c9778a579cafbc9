//! The top-level façade (spec.md §4.7/§6): `Host::service` drains one step of the protocol
//! engine — bandwidth throttle, send outgoing, receive incoming, dispatch — and the `Connect`/
//! `Send`/`Broadcast`/`Disconnect*` methods queue work for the next step.

use std::net::SocketAddr;
use std::time::Duration;

use crate::chamber::Chamber;
use crate::channel::Channel;
use crate::command::{Command, CommandBody, CommandHeader, ConnectBody, ThrottleParams, VerifyConnectBody};
use crate::command_pod::PEER_SEGMENT_THROTTLE_SCALE;
use crate::config::{HostConfig, PeerConfig};
use crate::dispatch::DispatchHub;
use crate::error::{Error, PeerId, Result};
use crate::peer::{Acknowledgement, Peer, PeerState};
use crate::peer_pod::PeerPod;
use crate::protocol::{self, CommandOutcome};
use crate::segment::Segment;
use crate::socket::DatagramSocket;
use crate::time::Clock;
use crate::Event;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const CONNECTIONLESS_CHANNEL: u8 = 0xFF;
/// How long a connected peer may go without an outgoing datagram before a bare PING is queued
/// to keep its RTT estimate and timeout clock alive (spec.md §4.4's keepalive note).
const PEER_PING_INTERVAL: u32 = 1000;

/// A reliable, connection-oriented, multi-channel UDP host (spec.md §3's Host).
pub struct Host {
    socket: Box<dyn DatagramSocket>,
    peers: PeerPod,
    dispatch: DispatchHub,
    chamber: Chamber,
    clock: Clock,
    service_time: u32,

    config: HostConfig,
    bandwidth_throttle_epoch: u32,

    recv_buf: Vec<u8>,
}

impl Host {
    /// Builds a host over any [`DatagramSocket`] implementation — a real [`StdUdpSocket`]
    /// (`crate::socket::StdUdpSocket`) in production, or a `ChannelSocket` in tests.
    pub fn new(socket: Box<dyn DatagramSocket>, config: HostConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            socket,
            peers: PeerPod::with_capacity(config.peer_count),
            dispatch: DispatchHub::new(),
            chamber: Chamber::new(config.mtu as usize),
            clock: Clock::new(),
            service_time: 0,
            config,
            bandwidth_throttle_epoch: 0,
            recv_buf: vec![0u8; crate::PROTOCOL_MAXIMUM_MTU as usize],
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Queues a CONNECT command to `address` and allocates the initiating peer (spec.md §6's
    /// `Connect(addr, channel_count, user_data)`).
    pub fn connect(&mut self, address: SocketAddr, peer_config: PeerConfig) -> Result<PeerId> {
        peer_config.validate()?;

        let id = self
            .peers
            .allocate(address)
            .ok_or_else(|| Error::ResourceExhausted("peer pool exhausted".to_string()))?;

        let peer = self.peers.get_mut(id).unwrap();
        peer.net.state = PeerState::Connecting;
        peer.net.mtu = self.config.mtu;
        peer.net.window_size = peer_config.window_size;
        peer.connect_id = rand::random::<u32>();
        peer.allocate_channels(peer_config.channel_count as usize);
        peer.event_data = peer_config.user_data;

        let body = ConnectBody {
            outgoing_peer_id: id.0 as u16,
            incoming_session_id: 0xFF,
            outgoing_session_id: 0xFF,
            mtu: peer.net.mtu,
            window_size: peer.net.window_size,
            channel_count: peer_config.channel_count,
            incoming_bandwidth: self.config.incoming_bandwidth,
            outgoing_bandwidth: self.config.outgoing_bandwidth,
            throttle: default_throttle(),
            connect_id: peer.connect_id,
            data: peer_config.user_data,
        };

        let header = CommandHeader::new(crate::command::ID_CONNECT, CONNECTIONLESS_CHANNEL, 0).with_acknowledge_flag();
        peer.pod.setup_outgoing(header, CommandBody::Connect(body), None, 0, 0, None);

        log::debug!("{} CONNECTING -> {}", id, address);
        Ok(id)
    }

    /// Sends `segment` to `peer` on `channel_id`, reliably iff `Segment::has_flag(RELIABLE)`.
    pub fn send(&mut self, peer: PeerId, channel_id: u8, segment: Segment) -> Result<()> {
        let p = self.peers.get_mut(peer).ok_or_else(|| Error::InputInvalid(format!("unknown {}", peer)))?;
        if !p.is_connected() {
            return Err(Error::InputInvalid(format!("{} is not connected", peer)));
        }
        enqueue_send(p, channel_id, segment)
    }

    /// Sends `segment` to every currently connected peer on `channel_id`.
    pub fn broadcast(&mut self, channel_id: u8, segment: Segment) {
        for (_, peer) in self.peers.iter_mut() {
            if peer.is_connected() {
                let _ = enqueue_send(peer, channel_id, segment.clone());
            }
        }
    }

    /// Transitions `peer` straight to ZOMBIE, discarding any unsent data (spec.md §4.4).
    pub fn disconnect_now(&mut self, peer: PeerId, user_data: u32) -> Result<()> {
        let p = self.peers.get_mut(peer).ok_or_else(|| Error::InputInvalid(format!("unknown {}", peer)))?;
        let header = CommandHeader::new(crate::command::ID_DISCONNECT, CONNECTIONLESS_CHANNEL, 0);
        p.pod.setup_outgoing(header, CommandBody::Disconnect { data: user_data }, None, 0, 0, None);
        p.reset_to_zombie();
        Ok(())
    }

    /// Queues a DISCONNECT once `peer`'s outgoing queues drain (spec.md §4.4's DISCONNECT_LATER).
    pub fn disconnect_later(&mut self, peer: PeerId, user_data: u32) -> Result<()> {
        let p = self.peers.get_mut(peer).ok_or_else(|| Error::InputInvalid(format!("unknown {}", peer)))?;
        p.event_data = user_data;
        p.net.state = PeerState::DisconnectLater;
        Ok(())
    }

    /// Drains one step of the protocol engine and returns the next user-visible event, if any,
    /// waiting up to `timeout_ms` for one to appear (spec.md §4.7's `Service` contract).
    pub fn service(&mut self, timeout_ms: u32) -> Result<Option<Event>> {
        if let Some(event) = self.pop_dispatched_event() {
            return Ok(Some(event));
        }

        self.service_time = self.clock.now_ms();
        let deadline = self.service_time.wrapping_add(timeout_ms);

        loop {
            self.bandwidth_throttle();
            self.send_outgoing(true)?;
            self.receive_incoming()?;
            self.send_outgoing(false)?;
            self.collect_state_transitions();

            if let Some(event) = self.pop_dispatched_event() {
                return Ok(Some(event));
            }

            self.service_time = self.clock.now_ms();
            if timeout_ms == 0 || !crate::time::wrapping_less_than(self.service_time, deadline) {
                return Ok(None);
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn pop_dispatched_event(&mut self) -> Option<Event> {
        loop {
            let id = self.dispatch.pop()?;
            let peer = self.peers.get_mut(id)?;
            if let Some(event) = peer.dispatched_events.pop_front() {
                if !peer.dispatched_events.is_empty() {
                    self.dispatch.mark(id, &mut peer.needs_dispatch);
                } else {
                    peer.needs_dispatch = false;
                }
                return Some(event);
            }
            peer.needs_dispatch = false;
        }
    }

    /// Synthesises `Event::Disconnect` for peers that reached ZOMBIE without one already queued
    /// (`disconnect_now`, a timeout, a peer-requested disconnect), and reaps a peer's slot only
    /// once that event has actually been drained by the application — never in the same pass it
    /// was queued, since `Peer::reset` wipes `dispatched_events` before `pop_dispatched_event`
    /// would ever get a chance to return it.
    fn collect_state_transitions(&mut self) {
        for (id, peer) in self.peers.iter_mut() {
            if peer.net.state != PeerState::Zombie {
                continue;
            }
            if !peer.disconnect_notified {
                peer.disconnect_notified = true;
                peer.dispatched_events.push_back(Event::Disconnect { peer: id, data: peer.event_data });
                self.dispatch.mark(id, &mut peer.needs_dispatch);
            } else if peer.dispatched_events.is_empty() && !peer.needs_dispatch {
                peer.reset();
            }
        }
    }

    fn send_outgoing(&mut self, check_timeouts: bool) -> Result<()> {
        let service_time = self.service_time;

        for (id, peer) in self.peers.iter_mut() {
            if !peer.is_in_use() {
                continue;
            }

            if check_timeouts && protocol::service_timeouts(peer, service_time) {
                log::warn!("{} timed out, moving to ZOMBIE", id);
                peer.reset_to_zombie();
                continue;
            }

            protocol::update_segment_throttle(peer, service_time);

            if peer.net.state == PeerState::DisconnectLater && !peer.pod.is_send_pending() {
                peer.net.state = PeerState::Disconnecting;
            }
            if peer.net.state == PeerState::Disconnecting {
                // Emitting the DISCONNECT is what moves us into ACKNOWLEDGING_DISCONNECT
                // (spec.md §4.4); its ack is what completes the teardown.
                peer.net.state = PeerState::AcknowledgingDisconnect;
                let header = CommandHeader::new(crate::command::ID_DISCONNECT, CONNECTIONLESS_CHANNEL, 0).with_acknowledge_flag();
                peer.pod.setup_outgoing(header, CommandBody::Disconnect { data: peer.event_data }, None, 0, 0, None);
            }

            let address = match peer.address {
                Some(a) => a,
                None => continue,
            };

            if peer.is_connected()
                && !peer.pod.has_outgoing_reliable()
                && crate::time::wrapping_diff(service_time, peer.net.last_send_time) >= PEER_PING_INTERVAL
            {
                let header = CommandHeader::new(crate::command::ID_PING, CONNECTIONLESS_CHANNEL, 0).with_acknowledge_flag();
                peer.pod.setup_outgoing(header, CommandBody::Ping, None, 0, 0, None);
            }

            self.chamber.reset(peer.net.mtu.max(crate::PROTOCOL_MINIMUM_MTU) as usize);

            while let Some(ack) = peer.acknowledgements.pop_front() {
                let Acknowledgement { sent_time, header } = ack;
                let ack_header = CommandHeader::new(crate::command::ID_ACKNOWLEDGE, header.channel_id, 0);
                let body = CommandBody::Acknowledge {
                    received_reliable_sequence_number: header.reliable_sequence_number,
                    received_sent_time: sent_time,
                };
                self.chamber.append_command(&ack_header, &body, None, false);
            }

            peer.pod.load_reliable_into_chamber(
                &mut self.chamber,
                &mut peer.channels,
                peer.net.window_size,
                peer.net.segment_throttle,
                PEER_SEGMENT_THROTTLE_SCALE,
                peer.net.mtu,
                service_time,
            );

            let mut throttle_counter = 0;
            peer.pod.load_unreliable_into_chamber(&mut self.chamber, peer.net.segment_throttle, &mut throttle_counter);

            if let Some(datagram) = self.chamber.flush(
                peer.outgoing_peer_id,
                peer.outgoing_session_id,
                service_time,
                self.config.checksum.as_ref().map(|f| f as &dyn Fn(&[u8]) -> u32),
                self.config.compressor.as_deref(),
            ) {
                peer.net.last_send_time = service_time;
                self.socket.send_to(&datagram, address)?;
            }
        }

        Ok(())
    }

    fn receive_incoming(&mut self) -> Result<()> {
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.recv_buf) {
                Ok(Some(pair)) => pair,
                Ok(None) => return Ok(()),
                Err(e) => return Err(Error::Fatal(e)),
            };

            let data = self.recv_buf[..len].to_vec();
            let datagram = match protocol::parse_datagram(&data) {
                Some(d) => d,
                None => {
                    log::warn!("dropped malformed datagram from {}", from);
                    continue;
                }
            };

            let service_time = self.service_time;

            if datagram.commands.iter().any(|c| c.header.id() == crate::command::ID_CONNECT) {
                for command in datagram.commands {
                    if command.header.id() == crate::command::ID_CONNECT {
                        self.handle_connect(from, command, service_time);
                    }
                }
                continue;
            }

            let peer_id = match self.peers.find_by_address(&from) {
                Some(id) => id,
                None => continue,
            };

            for command in datagram.commands {
                self.handle_one_command(peer_id, command, service_time);
            }
        }
    }

    fn handle_one_command(&mut self, peer_id: PeerId, command: Command, service_time: u32) {
        let needs_ack = command.header.has_acknowledge_flag();
        let ack_header = command.header;
        let ack_sent_time = service_time as u16;

        if command.header.id() == crate::command::ID_VERIFY_CONNECT {
            self.handle_verify_connect(peer_id, command);
            if let Some(peer) = self.peers.get_mut(peer_id) {
                if needs_ack {
                    peer.acknowledgements.push_back(Acknowledgement { sent_time: ack_sent_time, header: ack_header });
                }
            }
            return;
        }

        let peer = match self.peers.get_mut(peer_id) {
            Some(p) => p,
            None => return,
        };

        log::trace!("{} <- command id {}", peer_id, command.header.id());

        let outcome = protocol::handle_command(peer, command, service_time);

        match outcome {
            CommandOutcome::Handled => {}
            CommandOutcome::AcknowledgedReliable { measured_rtt } => {
                protocol::update_round_trip_time(peer, measured_rtt);
                maybe_confirm_connection(peer, peer_id);
                if ack_header.channel_id != CONNECTIONLESS_CHANNEL {
                    peer.dispatched_events.push_back(Event::ReceiveAck { peer: peer_id, channel_id: ack_header.channel_id });
                }
            }
            CommandOutcome::PeerRequestedDisconnect => {
                peer.reset_to_zombie();
            }
            CommandOutcome::ProtocolViolation(reason) => {
                log::warn!("{} protocol violation: {}", peer_id, reason);
                peer.reset_to_zombie();
            }
        }

        if let Some(peer) = self.peers.get_mut(peer_id) {
            drain_peer_receives(peer, peer_id, &mut self.dispatch);

            if needs_ack {
                peer.acknowledgements.push_back(Acknowledgement { sent_time: ack_sent_time, header: ack_header });
            }
        }
    }

    fn handle_connect(&mut self, from: SocketAddr, command: Command, service_time: u32) {
        let body = match command.body {
            CommandBody::Connect(b) => b,
            _ => return,
        };

        if body.channel_count < crate::PROTOCOL_MINIMUM_CHANNEL_COUNT || body.channel_count > self.config.channel_limit {
            log::warn!("rejected CONNECT from {} with channel_count {}", from, body.channel_count);
            return;
        }

        let existing = self.peers.find_by_address(&from);

        // A retransmitted CONNECT for a handshake already underway (our VERIFY_CONNECT was lost
        // or is still in flight) must not re-run session/channel setup, or the session id we
        // already sent would drift out from under the peer.
        if let Some(id) = existing {
            let peer = self.peers.get(id).unwrap();
            if peer.connect_id == body.connect_id
                && matches!(peer.net.state, PeerState::AcknowledgingConnect | PeerState::Connected)
            {
                log::debug!("{} duplicate CONNECT from {}, resending VERIFY_CONNECT", id, from);
                return;
            }
        }

        let id = match existing {
            Some(id) => id,
            None => match self.peers.allocate(from) {
                Some(id) => id,
                None => {
                    log::warn!("rejected CONNECT from {}: peer pool exhausted", from);
                    return;
                }
            },
        };

        let peer = self.peers.get_mut(id).unwrap();
        peer.net.state = PeerState::AcknowledgingConnect;
        peer.net.mtu = body.mtu.clamp(crate::PROTOCOL_MINIMUM_MTU, crate::PROTOCOL_MAXIMUM_MTU);
        peer.net.window_size = body.window_size.clamp(crate::PEER_MINIMUM_WINDOW_SIZE, crate::PEER_MAXIMUM_WINDOW_SIZE);
        peer.connect_id = body.connect_id;
        peer.outgoing_peer_id = body.outgoing_peer_id;
        peer.incoming_session_id = (peer.incoming_session_id.wrapping_add(1)) % 4;
        peer.allocate_channels(body.channel_count.min(self.config.channel_limit) as usize);
        peer.net.last_receive_time = service_time;
        peer.event_data = body.data;

        let verify = VerifyConnectBody {
            outgoing_peer_id: id.0 as u16,
            incoming_session_id: peer.incoming_session_id,
            outgoing_session_id: peer.outgoing_session_id,
            mtu: peer.net.mtu,
            window_size: peer.net.window_size,
            channel_count: peer.channels.len() as u32,
            incoming_bandwidth: self.config.incoming_bandwidth,
            outgoing_bandwidth: self.config.outgoing_bandwidth,
            throttle: body.throttle,
            connect_id: peer.connect_id,
        };

        let header = CommandHeader::new(crate::command::ID_VERIFY_CONNECT, CONNECTIONLESS_CHANNEL, 0).with_acknowledge_flag();
        peer.pod.setup_outgoing(header, CommandBody::VerifyConnect(verify), None, 0, 0, None);

        log::debug!("{} ACKNOWLEDGING_CONNECT <- {}", id, from);
    }

    fn handle_verify_connect(&mut self, peer_id: PeerId, command: Command) {
        let body = match command.body {
            CommandBody::VerifyConnect(b) => b,
            _ => return,
        };

        let peer = match self.peers.get_mut(peer_id) {
            Some(p) => p,
            None => return,
        };

        if peer.net.state != PeerState::Connecting || body.connect_id != peer.connect_id {
            log::warn!("{} VERIFY_CONNECT mismatch", peer_id);
            peer.reset_to_zombie();
            return;
        }

        peer.outgoing_peer_id = body.outgoing_peer_id;
        peer.outgoing_session_id = body.outgoing_session_id;
        peer.incoming_session_id = body.incoming_session_id;
        peer.net.mtu = body.mtu.clamp(crate::PROTOCOL_MINIMUM_MTU, crate::PROTOCOL_MAXIMUM_MTU);
        peer.net.window_size = body.window_size.clamp(crate::PEER_MINIMUM_WINDOW_SIZE, crate::PEER_MAXIMUM_WINDOW_SIZE);

        // VERIFY_CONNECT is itself the acknowledgement of CONNECT (there is exactly one CONNECT
        // ever in flight for this peer, so it is identified by kind, not by sequence number).
        peer.pod.sent_reliable.retain(|c| !matches!(c.body, CommandBody::Connect(_)));
        peer.pod.outgoing_reliable.retain(|c| !matches!(c.body, CommandBody::Connect(_)));

        peer.net.state = PeerState::Connected;
        peer.mark_was_connected();
        peer.dispatched_events.push_back(Event::Connect { peer: peer_id, data: peer.event_data });
        self.dispatch.mark(peer_id, &mut peer.needs_dispatch);

        log::debug!("{} CONNECTED (initiator)", peer_id);
    }

    /// Runs the host-wide bandwidth-throttle algorithm once per `HOST_BANDWIDTH_THROTTLE_INTERVAL`
    /// (spec.md §4.5).
    fn bandwidth_throttle(&mut self) {
        let elapsed = crate::time::wrapping_diff(self.service_time, self.bandwidth_throttle_epoch);
        if elapsed < crate::HOST_BANDWIDTH_THROTTLE_INTERVAL {
            return;
        }
        self.bandwidth_throttle_epoch = self.service_time;

        if self.config.outgoing_bandwidth == 0 {
            return;
        }

        let data_total: u64 = self.peers.iter().filter(|(_, p)| p.is_connected()).map(|(_, p)| p.pod.outgoing_data_total).sum();
        if data_total == 0 {
            return;
        }

        let bandwidth = self.config.outgoing_bandwidth as u64 * (elapsed as u64) / 1000;

        for (id, peer) in self.peers.iter_mut() {
            if !peer.is_connected() {
                continue;
            }
            let limit = if data_total > bandwidth {
                (bandwidth * PEER_SEGMENT_THROTTLE_SCALE as u64 / data_total) as u32
            } else {
                PEER_SEGMENT_THROTTLE_SCALE
            };
            peer.net.segment_throttle_limit = limit;
            if peer.net.segment_throttle > limit {
                peer.net.segment_throttle = limit;
            }
            peer.pod.outgoing_data_total = 0;
            log::debug!("{} bandwidth throttle recalculated: limit={}", id, limit);
        }
    }
}

fn default_throttle() -> ThrottleParams {
    ThrottleParams {
        interval: crate::PEER_SEGMENT_THROTTLE_INTERVAL,
        acceleration: 2,
        deceleration: 2,
    }
}

/// Headroom reserved per datagram for the protocol header and one command header, so a
/// maximum-size fragment still fits under the peer's negotiated MTU (spec.md §4.5's
/// `SendReliable`: messages larger than a single command are split into SEND_FRAGMENT commands).
const FRAGMENT_OVERHEAD: u32 = 24;

fn enqueue_send(peer: &mut Peer, channel_id: u8, segment: Segment) -> Result<()> {
    let reliable = segment.has_flag(crate::segment::flags::RELIABLE);
    let unsequenced = segment.has_flag(crate::segment::flags::UNSEQUENCED);
    let max_fragment_size = peer.net.mtu.saturating_sub(FRAGMENT_OVERHEAD).max(64) as usize;

    if peer.channels.get(channel_id as usize).is_none() {
        return Err(Error::InputInvalid(format!("channel {} out of range", channel_id)));
    }

    if reliable && segment.len() > max_fragment_size {
        return enqueue_fragmented_send(peer, channel_id, segment, max_fragment_size);
    }

    if !reliable && segment.len() > max_fragment_size {
        return Err(Error::InputInvalid(format!(
            "unreliable segment of {} bytes exceeds the {}-byte single-command limit for this peer's MTU",
            segment.len(),
            max_fragment_size
        )));
    }

    let channel = peer.channels.get_mut(channel_id as usize).unwrap();
    let mut header = CommandHeader::new(0, channel_id, 0);
    let body = if reliable {
        header.command = crate::command::ID_SEND_RELIABLE;
        header = header.with_acknowledge_flag();
        CommandBody::SendReliable { data_length: segment.len() as u16 }
    } else if unsequenced {
        header.command = crate::command::ID_SEND_UNSEQUENCED;
        header = header.with_unsequenced_flag();
        let group = peer.pod.outgoing_unsequenced_group.wrapping_add(1);
        CommandBody::SendUnsequenced { unsequenced_group: group, data_length: segment.len() as u16 }
    } else {
        header.command = crate::command::ID_SEND_UNRELIABLE;
        channel.outgoing_unreliable_sequence_number = channel.outgoing_unreliable_sequence_number.wrapping_add(1);
        CommandBody::SendUnreliable {
            unreliable_sequence_number: channel.outgoing_unreliable_sequence_number,
            data_length: segment.len() as u16,
        }
    };

    let fragment_length = segment.len() as u32;
    let channel = if reliable { Some(channel) } else { None };
    peer.pod.setup_outgoing(header, body, Some(segment), 0, fragment_length, channel);
    Ok(())
}

fn enqueue_fragmented_send(peer: &mut Peer, channel_id: u8, segment: Segment, max_fragment_size: usize) -> Result<()> {
    let total_length = segment.len() as u32;
    let fragment_count = ((segment.len() + max_fragment_size - 1) / max_fragment_size) as u32;

    let channel = peer.channels.get_mut(channel_id as usize).unwrap();
    let start_sequence_number = channel.outgoing_reliable_sequence_number.wrapping_add(1);

    for fragment_number in 0..fragment_count {
        let offset = fragment_number as usize * max_fragment_size;
        let end = (offset + max_fragment_size).min(segment.len());
        let chunk = segment.fragment(offset, end - offset);
        let fragment_length = chunk.len() as u32;

        let header = CommandHeader::new(crate::command::ID_SEND_FRAGMENT, channel_id, 0).with_acknowledge_flag();
        let body = CommandBody::SendFragment {
            start_sequence_number,
            data_length: fragment_length as u16,
            fragment_count,
            fragment_number,
            total_length,
            fragment_offset: offset as u32,
        };
        let payload = Segment::new(chunk, crate::segment::flags::RELIABLE);

        let channel = peer.channels.get_mut(channel_id as usize).unwrap();
        peer.pod.setup_outgoing(header, body, Some(payload), offset as u32, fragment_length, Some(channel));
    }

    Ok(())
}

fn maybe_confirm_connection(peer: &mut Peer, peer_id: PeerId) {
    match peer.net.state {
        PeerState::ConnectionPending | PeerState::AcknowledgingConnect => {
            peer.net.state = PeerState::Connected;
            peer.mark_was_connected();
            peer.dispatched_events.push_back(Event::Connect { peer: peer_id, data: peer.event_data });
        }
        // The DISCONNECT's own ack completes the teardown (spec.md §4.4); `collect_state_transitions`
        // picks up the ZOMBIE state and synthesises `Event::Disconnect` once this is observed.
        PeerState::AcknowledgingDisconnect => peer.reset_to_zombie(),
        _ => {}
    }
}

fn drain_peer_receives(peer: &mut Peer, peer_id: PeerId, dispatch: &mut DispatchHub) {
    for channel_idx in 0..peer.channels.len() {
        let channel: &mut Channel = &mut peer.channels[channel_idx];
        let mut out = std::collections::VecDeque::new();
        protocol::drain_deliverable(channel, channel_idx as u8, &mut out);
        for (segment, channel_id) in out {
            peer.dispatched_events.push_back(Event::Receive { peer: peer_id, channel_id, segment });
        }
    }
    if !peer.dispatched_events.is_empty() {
        dispatch.mark(peer_id, &mut peer.needs_dispatch);
    }
}
