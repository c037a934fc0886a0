//! Core, thread and protocol limits.

/// Maximum cores a program can span.
pub const MAX_NUM_CORES: u32 = 16;

/// Hardware threads available per core.
pub const MAX_NUM_THREADS: u32 = 6;

/// HVX threads started when a program does not pick a thread count.
pub const DEFAULT_HVX_THREADS: u32 = 4;

/// Hardware generation the planner emits programs for.
pub const SUPPORTED_HW_VERSION: (u32, u32) = (2, 0);

/// Semaphores used by the host/device handshake.
pub mod semaphore {
    /// Semaphore the device waits on until inputs are in place.
    pub const INPUT: u16 = 0;
    /// Semaphore the host waits on until outputs are ready.
    pub const OUTPUT: u16 = 1;
    /// Total semaphores a program declares.
    pub const COUNT: u16 = 2;
}

/// DMA ports registered for user I/O.
pub mod port {
    /// Port used for every input transfer.
    pub const INPUT: u16 = 100;
    /// Port used for every output transfer.
    pub const OUTPUT: u16 = 101;
}

/// Mask with one bit set for each of the first `num_cores` cores.
#[must_use]
pub const fn all_cores_mask(num_cores: u32) -> u32 {
    if num_cores >= 32 {
        u32::MAX
    } else {
        (1u32 << num_cores) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_masks() {
        assert_eq!(all_cores_mask(1), 0b1);
        assert_eq!(all_cores_mask(14), 0x3fff);
        assert_eq!(all_cores_mask(MAX_NUM_CORES), 0xffff);
    }
}
