//! Execution-context ABI.
//!
//! The runtime passes every network thread a pointer to a context block
//! holding base addresses and service entry points. Programs are built for
//! the 32-bit pointer ABI, so every pointer slot is 4 bytes and the two
//! 64-bit fields are naturally aligned.
//!
//! The metadata document carries this table so a runtime can refuse a
//! program that expects a slot it does not provide.

/// One slot of the execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextField {
    /// Slot name as the runtime knows it.
    pub name: &'static str,
    /// Byte offset from the start of the block.
    pub offset: u32,
    /// Slot size in bytes.
    pub size: u32,
}

const fn field(name: &'static str, offset: u32, size: u32) -> ContextField {
    ContextField { name, offset, size }
}

/// Context layout, grouped as version, base addresses, runtime services and
/// dynamic loader entry points.
pub const FIELDS: &[ContextField] = &[
    field("execContextMajorVersion", 0, 2),
    field("execContextMinorVersion", 2, 2),
    field("virtualNSPId", 4, 1),
    field("baseL2TCM", 8, 4),
    field("baseVTCM", 12, 4),
    field("baseConstantDataMem", 16, 4),
    field("baseSharedDDR", 20, 4),
    field("baseL2CachedDDR", 24, 4),
    field("mcAddresses", 28, 4),
    field("startTimeStamp", 32, 8),
    field("logFuncPtr", 40, 4),
    field("exitThread", 44, 4),
    field("setPMUReg", 48, 4),
    field("errFuncPtr", 52, 4),
    field("notifyHangPtr", 56, 4),
    field("udmaReadFuncPtr", 60, 4),
    field("mmapFuncPtr", 64, 4),
    field("munmapFuncPtr", 68, 4),
    field("qdssSTMPortVaddr", 72, 4),
    field("readPMUCnt", 76, 4),
    field("ddrBWMonRegVaddr", 80, 4),
    field("semaphoreListPtr", 84, 4),
    field("networkHeapAddr", 88, 4),
    field("networkHeapSize", 96, 8),
    field("reprogMcidFuncPtr", 104, 4),
    field("dlOpenPtr", 108, 4),
    field("dlOpenbufPtr", 112, 4),
    field("dlClosePtr", 116, 4),
    field("dlSymPtr", 120, 4),
    field("dlAddrPtr", 124, 4),
    field("dlErrorPtr", 128, 4),
    field("dlInfoPtr", 132, 4),
    field("baseUtcOffsetDDR", 136, 4),
];

/// Major version of the context layout above.
pub const MAJOR_VERSION: u16 = 1;

/// Minor version of the context layout above.
pub const MINOR_VERSION: u16 = 0;

/// Size of the context block: the end of its last slot.
#[must_use]
pub fn block_size() -> u32 {
    FIELDS.iter().map(|f| f.offset + f.size).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_do_not_overlap() {
        for pair in FIELDS.windows(2) {
            assert!(pair[0].offset + pair[0].size <= pair[1].offset, "{:?}", pair);
        }
    }

    #[test]
    fn wide_slots_are_aligned() {
        for f in FIELDS {
            assert_eq!(f.offset % f.size, 0, "{}", f.name);
        }
    }

    #[test]
    fn block_ends_after_last_slot() {
        assert_eq!(block_size(), 140);
    }
}
