//! Doorbell window at the bottom of L2TCM.
//!
//! The firmware polls a fixed number of 32-bit slots starting at L2TCM
//! offset 0. Programs always occupy the whole window: unused slots are
//! padding, and the last slot is the exit doorbell the host rings to stop
//! the network.

/// Width of one doorbell slot in bytes.
pub const DB_SIZE: u64 = 4;

/// Number of slots the firmware scans. Includes the exit slot.
pub const FIRMWARE_SLOTS: u32 = 281;

/// Slot index of the exit doorbell.
pub const EXIT_SLOT: u32 = FIRMWARE_SLOTS - 1;

/// Most buffer doorbells a single program can use.
pub const MAX_BUFFER_DOORBELLS: u32 = EXIT_SLOT;

/// Value written to a slot to signal "ready".
pub const DB_SET: u32 = 1;

/// Value of a cleared slot.
pub const DB_CLEAR: u32 = 0;

/// Byte size of the doorbell window.
#[must_use]
pub const fn window_size() -> u64 {
    FIRMWARE_SLOTS as u64 * DB_SIZE
}

/// Byte offset of a slot inside the window.
#[must_use]
pub const fn slot_offset(slot: u32) -> u64 {
    slot as u64 * DB_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_geometry() {
        assert_eq!(window_size(), 1124);
        assert_eq!(slot_offset(EXIT_SLOT), 1120);
        assert_eq!(slot_offset(EXIT_SLOT), window_size() - DB_SIZE);
    }
}
