//! The outgoing datagram assembler (spec.md §4.6). A chamber stages commands for exactly one
//! peer's next datagram; [`Chamber::flush`] hands the assembled bytes to the socket.

use crate::command::serial::{self, HEADER_SIZE as COMMAND_HEADER_SIZE};
use crate::command::{CommandBody, CommandHeader};

pub const PROTOCOL_HEADER_SIZE: usize = 2;
pub const PROTOCOL_HEADER_SENT_TIME_SIZE: usize = 2;
pub const PROTOCOL_MAXIMUM_SEGMENT_COMMANDS: usize = 32;

pub const HEADER_FLAG_COMPRESSED: u16 = 1 << 14;
pub const HEADER_FLAG_SENT_TIME: u16 = 1 << 15;
pub const HEADER_SESSION_SHIFT: u16 = 12;
pub const HEADER_PEER_ID_MASK: u16 = 0x0FFF;

/// A chamber owns one outbound datagram's worth of staged command bytes (header + each
/// command's fixed body + optional payload, concatenated in send order).
pub struct Chamber {
    mtu: usize,
    buf: Vec<u8>,
    command_count: usize,
    header_reserved: usize,
    has_reliable: bool,
}

impl Chamber {
    pub fn new(mtu: usize) -> Self {
        let mut buf = Vec::with_capacity(mtu);
        buf.resize(PROTOCOL_HEADER_SIZE + PROTOCOL_HEADER_SENT_TIME_SIZE, 0);
        let header_reserved = buf.len();
        Self { mtu, buf, command_count: 0, header_reserved, has_reliable: false }
    }

    pub fn reset(&mut self, mtu: usize) {
        self.mtu = mtu;
        self.buf.clear();
        self.buf.resize(PROTOCOL_HEADER_SIZE + PROTOCOL_HEADER_SENT_TIME_SIZE, 0);
        self.header_reserved = self.buf.len();
        self.command_count = 0;
        self.has_reliable = false;
    }

    pub fn is_empty(&self) -> bool {
        self.command_count == 0
    }

    pub fn command_count(&self) -> usize {
        self.command_count
    }

    /// Whether one more command (of the given payload length) will still fit under the peer's
    /// MTU and the per-datagram command-count cap (spec.md §4.6's `SendingContinues`).
    pub fn sending_continues(&self, payload_len: usize) -> bool {
        if self.command_count >= PROTOCOL_MAXIMUM_SEGMENT_COMMANDS {
            return false;
        }
        // Conservative upper bound on a command's fixed body: the largest body size we encode
        // (SEND_FRAGMENT / CONNECT), so this check never under-counts.
        const MAX_FIXED_BODY: usize = 44;
        self.buf.len() + COMMAND_HEADER_SIZE + MAX_FIXED_BODY + payload_len <= self.mtu
    }

    /// Appends one command's header, fixed body, and payload (if any) to the chamber.
    /// `reliable` marks the command as having consumed a retransmission attempt; a datagram
    /// carrying at least one such command gets `HEADER_SENT_TIME` set on flush so its ack can
    /// report back an RTT sample, and datagrams with none don't pay for the field at all.
    pub fn append_command(&mut self, header: &CommandHeader, body: &CommandBody, payload: Option<&[u8]>, reliable: bool) {
        if reliable {
            self.has_reliable = true;
        }
        serial::write_command(&mut self.buf, header, body);
        if let Some(payload) = payload {
            self.buf.extend_from_slice(payload);
        }
        self.command_count += 1;
    }

    /// Writes the protocol header (peer id, session id, flags, optional sent-time) and returns
    /// the complete datagram bytes, running the optional checksum and compressor over the
    /// post-header range (spec.md §4.6).
    pub fn flush(
        &mut self,
        peer_id: u16,
        session_id: u8,
        service_time: u32,
        checksum: Option<&dyn Fn(&[u8]) -> u32>,
        compressor: Option<&dyn crate::compress::Compressor>,
    ) -> Option<Box<[u8]>> {
        if self.is_empty() {
            return None;
        }

        let mut flags = 0u16;
        let use_sent_time = self.has_reliable;
        if use_sent_time {
            flags |= HEADER_FLAG_SENT_TIME;
        }

        let peer_field = (peer_id & HEADER_PEER_ID_MASK) | ((session_id as u16 & 0x3) << HEADER_SESSION_SHIFT) | flags;

        self.buf[0] = (peer_field >> 8) as u8;
        self.buf[1] = (peer_field & 0xFF) as u8;
        if use_sent_time {
            self.buf[2] = (service_time >> 8) as u8;
            self.buf[3] = (service_time & 0xFF) as u8;
        }

        let mut out = std::mem::take(&mut self.buf);

        if !use_sent_time {
            // The sent-time field was reserved but never written; drop it so the datagram
            // matches the flag we just cleared.
            out.drain(PROTOCOL_HEADER_SIZE..self.header_reserved);
        }
        let header_len = if use_sent_time { self.header_reserved } else { PROTOCOL_HEADER_SIZE };

        if let Some(compressor) = compressor {
            let mut compressed = Vec::new();
            let written = compressor.compress(&out[header_len..], &mut compressed);
            if written > 0 && written < out.len() - header_len {
                out.truncate(header_len);
                out.extend_from_slice(&compressed[..written]);
                out[0] |= (HEADER_FLAG_COMPRESSED >> 8) as u8;
            }
        }

        if let Some(checksum) = checksum {
            let sum = checksum(&out);
            log::trace!("outgoing datagram checksum: {:#010x}", sum);
        }

        Some(out.into_boxed_slice())
    }
}
