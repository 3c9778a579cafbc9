//! A reliable, connection-oriented, multi-channel transport protocol over UDP, modelled after
//! the ENet wire format. See [`Host`] for the public entry point.

mod chamber;
mod channel;
mod command;
mod command_pod;
mod compress;
mod config;
mod dispatch;
mod error;
mod host;
mod peer;
mod peer_pod;
mod protocol;
mod segment;
mod time;

pub use compress::{ChecksumFn, Compressor};
pub use config::{HostConfig, PeerConfig};
pub use error::{Error, PeerId, Result};
pub use host::Host;
pub use segment::{flags, Segment};
pub use socket::{ChannelSocket, DatagramSocket, StdUdpSocket};

pub mod socket;

pub const PROTOCOL_MINIMUM_MTU: u32 = 576;
pub const PROTOCOL_MAXIMUM_MTU: u32 = 4096;
pub const HOST_DEFAULT_MTU: u32 = 1400;
pub const PEER_MINIMUM_WINDOW_SIZE: u32 = 4096;
pub const PEER_MAXIMUM_WINDOW_SIZE: u32 = 65536;
pub const PROTOCOL_MINIMUM_CHANNEL_COUNT: u32 = 1;
pub const PROTOCOL_MAXIMUM_CHANNEL_COUNT: u32 = 255;
pub const PROTOCOL_MAXIMUM_SEGMENT_COMMANDS: usize = 32;
pub const PROTOCOL_MAXIMUM_PEER_ID: u16 = 0x0FFF;
pub const PROTOCOL_MAXIMUM_FRAGMENT_COUNT: u32 = 1024 * 1024;
pub const PEER_RELIABLE_WINDOW_SIZE: u32 = 0x1000;
pub const PEER_RELIABLE_WINDOWS: u16 = 16;
pub const PEER_FREE_RELIABLE_WINDOWS: u16 = 8;
pub const PEER_UNSEQUENCED_WINDOW_SIZE: u32 = 1024;
pub const PEER_SEGMENT_THROTTLE_SCALE: u32 = 32;
pub const PEER_SEGMENT_THROTTLE_INTERVAL: u32 = 5000;
pub const PEER_SEGMENT_THROTTLE_COUNTER: u32 = 7;
pub const PEER_DEFAULT_ROUND_TRIP_TIME: u32 = 500;
pub const PEER_TIMEOUT_LIMIT: u32 = 32;
pub const PEER_TIMEOUT_MINIMUM: u32 = 5000;
pub const PEER_TIMEOUT_MAXIMUM: u32 = 30000;
pub const HOST_BANDWIDTH_THROTTLE_INTERVAL: u32 = 1000;
pub const HOST_DEFAULT_MAXIMUM_SEGMENT_SIZE: u32 = 32 * 1024 * 1024;

/// The channel identifier reserved for the crate's own examples and tests (not a protocol
/// requirement, just a convention for code that only needs one channel).
pub const RELIABLE: u8 = 0;

/// A user-visible occurrence surfaced from [`Host::service`] (spec.md §6).
#[derive(Debug, Clone)]
pub enum Event {
    /// A peer finished connecting (either as the initiator once VERIFY_CONNECT lands, or as the
    /// responder once its own VERIFY_CONNECT is acknowledged).
    Connect { peer: PeerId, data: u32 },
    /// A peer disconnected, gracefully or otherwise.
    Disconnect { peer: PeerId, data: u32 },
    /// A segment was delivered on `channel_id`, in the channel's delivery order.
    Receive { peer: PeerId, channel_id: u8, segment: Segment },
    /// A previously sent reliable segment was acknowledged by its peer.
    ReceiveAck { peer: PeerId, channel_id: u8 },
}
