//! The error taxonomy of the RUDP engine (see `SPEC_FULL.md` §4.8 / spec.md §7).
//!
//! `Transient` (socket BUSY) is deliberately absent: it is retried silently inside
//! [`crate::host::Host::service`] and never surfaces. Timeout-induced disconnects are likewise
//! not errors; they arrive as [`crate::Event::Disconnect`].

use std::fmt;

/// An opaque index into the host's peer pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub usize);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Caller-provided arguments out of range (port, bandwidth, channel_count, MTU).
    #[error("invalid argument: {0}")]
    InputInvalid(String),

    /// The peer pool has no free slot, or a send would exceed the reliable window.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A reassembly buffer could not grow to hold an incoming fragmented segment.
    #[error("allocation failed for peer {peer}: {reason}")]
    AllocationFailed { peer: PeerId, reason: String },

    /// A malformed header, an impossible fragment range, or a VERIFY_CONNECT mismatch. The
    /// offending peer is moved to ZOMBIE; other peers are unaffected.
    #[error("protocol violation from peer {peer}: {reason}")]
    ProtocolViolation { peer: PeerId, reason: String },

    /// A socket error other than BUSY occurred during send or receive.
    #[error("fatal socket error: {0}")]
    Fatal(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
