//! Monotonic millisecond clock and modular time/sequence-number arithmetic.
//!
//! The protocol engine never reads the OS clock directly outside of this module; every
//! comparison between two service-time samples goes through [`less_than`]/[`greater_than`] so
//! that wrap-around at 2^32 ms (roughly 49.7 days) is handled uniformly.

use std::time::Instant;

/// Sequence numbers more than this many milliseconds apart are treated as having wrapped,
/// rather than as one being "far in the future" of the other.
pub const TIME_OVERFLOW: u32 = 86_400_000;

/// A fixed epoch sampled once per process, from which all service times are derived.
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// The current service time, in milliseconds since this clock was created, truncated to 32
    /// bits (wrapping).
    pub fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }
}

/// The canonical wrapping comparison used throughout the engine: `a - b >= TIME_OVERFLOW`
/// (computed in wrapping unsigned arithmetic) means `a` is considered less than `b`.
pub fn wrapping_less_than(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) >= TIME_OVERFLOW
}

pub fn wrapping_greater_than(a: u32, b: u32) -> bool {
    wrapping_less_than(b, a)
}

pub fn wrapping_diff(a: u32, b: u32) -> u32 {
    a.wrapping_sub(b)
}

/// 16-bit reliable-sequence-number comparison, split into [`PEER_RELIABLE_WINDOWS`] windows of
/// [`PEER_RELIABLE_WINDOW_SIZE`] each (see `channel.rs`). `a` is "less than" `b` if advancing
/// from `a` to `b` (mod 2^16) is shorter than advancing from `b` to `a`.
pub fn sequence_less_than(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

pub fn sequence_greater_than(a: u16, b: u16) -> bool {
    sequence_less_than(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_less_than_handles_overflow() {
        // 0 is "less than" a value just behind the overflow horizon when measured the other way.
        assert!(wrapping_less_than(0, 5));
        assert!(!wrapping_less_than(5, 0));
        assert!(wrapping_less_than(u32::MAX, 5));
    }

    #[test]
    fn sequence_less_than_wraps_at_u16() {
        assert!(sequence_less_than(0xFFFE, 2));
        assert!(!sequence_less_than(2, 0xFFFE));
        assert!(sequence_less_than(10, 20));
        assert!(!sequence_less_than(20, 10));
    }
}
