//! UDMA descriptors.
//!
//! Each hardware thread gets a small ring of descriptors in L2TCM for its
//! own user-DMA transfers. The runtime chains new descriptors after a
//! dummy descriptor that the program image ships already marked done, so
//! the first transfer never waits on an uninitialised chain.
//!
//! ## Descriptor words (little-endian)
//!
//! ```text
//! word0  next descriptor pointer
//! word1  bits 0..24 length, bit 31 done
//! word2  source address
//! word3  destination address
//! ```

use crate::memory::CACHE_LINE_SIZE;

/// Size of one UDMA descriptor in bytes.
pub const DESCRIPTOR_SIZE: u64 = 16;

/// Cache lines of descriptors reserved per thread.
pub const CACHELINES_PER_THREAD: u64 = 2;

/// Bit in `word1` that flags a completed descriptor.
pub const DONE_BIT: u32 = 1 << 31;

/// Mask of the length field in `word1`.
pub const LENGTH_MASK: u32 = 0x00ff_ffff;

/// Bytes of descriptor ring for `num_threads` threads.
#[must_use]
pub const fn ring_size(num_threads: u32) -> u64 {
    num_threads as u64 * CACHE_LINE_SIZE * CACHELINES_PER_THREAD
}

/// A single UDMA descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Address of the next descriptor, 0 to end the chain.
    pub next: u32,
    /// Transfer length in bytes.
    pub length: u32,
    /// Completion flag.
    pub done: bool,
    /// Source address.
    pub src: u32,
    /// Destination address.
    pub dst: u32,
}

impl Descriptor {
    /// The empty, already-completed descriptor placed ahead of each chain.
    pub const DUMMY: Self = Self {
        next: 0,
        length: 0,
        done: true,
        src: 0,
        dst: 0,
    };

    /// Encode as four little-endian words.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE as usize] {
        let word1 = (self.length & LENGTH_MASK) | if self.done { DONE_BIT } else { 0 };
        let mut out = [0u8; DESCRIPTOR_SIZE as usize];
        out[0..4].copy_from_slice(&self.next.to_le_bytes());
        out[4..8].copy_from_slice(&word1.to_le_bytes());
        out[8..12].copy_from_slice(&self.src.to_le_bytes());
        out[12..16].copy_from_slice(&self.dst.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_sets_only_done_bit() {
        let bytes = Descriptor::DUMMY.to_bytes();
        assert_eq!(bytes[..4], [0, 0, 0, 0]);
        assert_eq!(bytes[4..8], [0, 0, 0, 0x80]);
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn ring_for_five_threads() {
        assert_eq!(ring_size(5), 1280);
    }
}
