//! Address spaces visible to a compute program.
//!
//! Every core owns two tightly-coupled memories. L2TCM is the small,
//! byte-addressable scratch that also hosts the doorbell window and the UDMA
//! descriptors; VTCM is the vector memory. DDR is shared off-chip memory and
//! is reached by DMA only.
//!
//! | Space | Capacity per core | Multicast | Alignment of base groups |
//! |-------|-------------------|-----------|--------------------------|
//! | L2TCM | 1 MiB | yes | 4 KiB |
//! | VTCM | 8 MiB | yes | 4 KiB |
//! | DDR | host-allocated | no | base group must be 0 |

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Largest L2TCM region a program may claim.
pub const L2TCM_MAX_SIZE: u64 = MIB;

/// Largest VTCM region a program may claim.
pub const VTCM_MAX_SIZE: u64 = 8 * MIB;

/// Base-group offsets in on-chip memory must be page aligned.
pub const BASE_GROUP_ALIGN: u64 = 4096;

/// Cache line of the core's data path.
pub const CACHE_LINE_SIZE: u64 = 128;

/// Memory a buffer can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// On-chip scratch, shared with the doorbell window.
    L2tcm,
    /// On-chip vector memory.
    Vtcm,
    /// Off-chip shared memory.
    Ddr,
}

impl AddressSpace {
    /// Maximum bytes a program may use, `None` when the host sizes it.
    #[must_use]
    pub const fn capacity(self) -> Option<u64> {
        match self {
            Self::L2tcm => Some(L2TCM_MAX_SIZE),
            Self::Vtcm => Some(VTCM_MAX_SIZE),
            Self::Ddr => None,
        }
    }

    /// True for the core-local memories reached through multicast.
    #[must_use]
    pub const fn is_on_chip(self) -> bool {
        matches!(self, Self::L2tcm | Self::Vtcm)
    }
}

impl std::fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L2tcm => write!(f, "L2TCM"),
            Self::Vtcm => write!(f, "VTCM"),
            Self::Ddr => write!(f, "DDR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacities() {
        assert_eq!(AddressSpace::L2tcm.capacity(), Some(1_048_576));
        assert_eq!(AddressSpace::Vtcm.capacity(), Some(8_388_608));
        assert_eq!(AddressSpace::Ddr.capacity(), None);
    }

    #[test]
    fn on_chip() {
        assert!(AddressSpace::L2tcm.is_on_chip());
        assert!(AddressSpace::Vtcm.is_on_chip());
        assert!(!AddressSpace::Ddr.is_on_chip());
    }
}
