//! The pluggable compression interface (spec.md §1: "a pluggable interface is exposed, but
//! compression algorithms themselves are not part of the core"). See `SPEC_FULL.md` §4.11.

/// Compresses/decompresses the post-header range of a datagram. Concrete algorithms (range
/// coding, zlib, ...) are the embedding application's responsibility; this crate only calls
/// through the trait.
pub trait Compressor {
    /// Compresses `input` into `out`, returning the number of bytes written. A return value of
    /// `0`, or one not smaller than `input.len()`, is treated as "don't bother" by the caller.
    fn compress(&self, input: &[u8], out: &mut Vec<u8>) -> usize;

    /// Decompresses `input` into `out`, returning the number of bytes written.
    fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> usize;
}

/// Matches ENet's `checksum(const ENetBuffer*, size_t)` translated to a single concatenated
/// slice (the Chamber flushes one contiguous buffer, not a scatter/gather list).
pub type ChecksumFn = fn(&[u8]) -> u32;
