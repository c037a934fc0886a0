//! Multicast routing.
//!
//! A multicast group lets one write reach the same offset on several
//! cores. Group 0 is the doorbell broadcast group: every core sees the
//! other cores' doorbell windows through it. Each on-chip buffer then gets
//! the next group id, in the order buffers are routed.

use aic_chip::memory::AddressSpace;
use aic_chip::topology;
use aic_format::prelude::{HostMulticastEntry, McAddrSpace, NspMulticastEntry};
use tracing::trace;

use crate::error::{PlanError, Result};

/// Group id of the doorbell broadcast group.
pub const DOORBELL_GROUP: u16 = 0;

/// Per-core and host multicast tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastRouter {
    num_cores: u32,
    nsp_tables: Vec<Vec<NspMulticastEntry>>,
    host_table: Vec<HostMulticastEntry>,
    next_id: u16,
}

fn mc_space(space: AddressSpace) -> Result<McAddrSpace> {
    match space {
        AddressSpace::L2tcm => Ok(McAddrSpace::L2tcm),
        AddressSpace::Vtcm => Ok(McAddrSpace::Vtcm),
        AddressSpace::Ddr => Err(PlanError::config("DDR buffers are not multicast")),
    }
}

impl MulticastRouter {
    /// Create the tables with the doorbell group already in place.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] if the doorbell window does not fit a
    /// multicast entry.
    pub fn new(num_cores: u32, doorbell_space: u64) -> Result<Self> {
        let size = u32::try_from(doorbell_space)
            .map_err(|_| PlanError::config("doorbell window exceeds 4 GiB"))?;
        let all = topology::all_cores_mask(num_cores);
        let nsp_tables = (0..num_cores)
            .map(|core| {
                vec![NspMulticastEntry {
                    dynamic: false,
                    mask: all & !(1 << core),
                    size,
                    addr_space: McAddrSpace::L2tcm,
                    base_offset: 0,
                }]
            })
            .collect();
        Ok(Self {
            num_cores,
            nsp_tables,
            host_table: vec![HostMulticastEntry { mask: all, size }],
            next_id: DOORBELL_GROUP + 1,
        })
    }

    /// Allocate the next group for a buffer on the cores in `mask`.
    ///
    /// Every core gets an entry; cores outside `mask` see size 0. Only
    /// host-visible groups appear in the host table.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] for a DDR buffer or when group ids run
    /// out.
    pub fn add_group(
        &mut self,
        space: AddressSpace,
        mask: u32,
        size: u32,
        base_offset: u64,
        host_visible: bool,
    ) -> Result<u16> {
        let addr_space = mc_space(space)?;
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| PlanError::config("multicast group ids exhausted"))?;

        for (core, table) in self.nsp_tables.iter_mut().enumerate() {
            let member = mask & (1 << core) != 0;
            table.push(NspMulticastEntry {
                dynamic: false,
                mask,
                size: if member { size } else { 0 },
                addr_space,
                base_offset,
            });
        }
        if host_visible {
            self.host_table.push(HostMulticastEntry { mask, size });
        }
        trace!(group = id, space = %space, mask = %format_args!("0x{mask:x}"), size, "multicast group");
        Ok(id)
    }

    /// Cores routed.
    #[must_use]
    pub const fn num_cores(&self) -> u32 {
        self.num_cores
    }

    /// Groups allocated so far, the doorbell group included.
    #[must_use]
    pub fn num_groups(&self) -> usize {
        usize::from(self.next_id)
    }

    /// Table of one core.
    #[must_use]
    pub fn nsp_table(&self, core: usize) -> &[NspMulticastEntry] {
        self.nsp_tables.get(core).map_or(&[], Vec::as_slice)
    }

    /// Tables of every core.
    #[must_use]
    pub fn nsp_tables(&self) -> &[Vec<NspMulticastEntry>] {
        &self.nsp_tables
    }

    /// Host table.
    #[must_use]
    pub fn host_table(&self) -> &[HostMulticastEntry] {
        &self.host_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doorbell_group_excludes_self() {
        let r = MulticastRouter::new(3, 1124).unwrap();
        assert_eq!(r.num_groups(), 1);
        assert_eq!(r.host_table(), &[HostMulticastEntry { mask: 0b111, size: 1124 }]);
        assert_eq!(r.nsp_table(0)[0].mask, 0b110);
        assert_eq!(r.nsp_table(1)[0].mask, 0b101);
        assert_eq!(r.nsp_table(2)[0].mask, 0b011);
        assert!(r.nsp_tables().iter().all(|t| t[0].size == 1124));
    }

    #[test]
    fn groups_are_numbered_in_order() {
        let mut r = MulticastRouter::new(2, 1124).unwrap();
        let a = r.add_group(AddressSpace::Vtcm, 0b01, 64, 0, true).unwrap();
        let b = r.add_group(AddressSpace::L2tcm, 0b11, 32, 4096, false).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(r.host_table().len(), 2);
        assert_eq!(r.host_table()[1], HostMulticastEntry { mask: 0b01, size: 64 });

        let core1 = r.nsp_table(1);
        assert_eq!(core1.len(), 3);
        assert_eq!(core1[1].size, 0);
        assert_eq!(core1[1].addr_space, McAddrSpace::Vtcm);
        assert_eq!(core1[2].size, 32);
        assert_eq!(core1[2].base_offset, 4096);
    }

    #[test]
    fn ddr_is_not_routed() {
        let mut r = MulticastRouter::new(1, 1124).unwrap();
        assert!(r.add_group(AddressSpace::Ddr, 1, 8, 0, true).is_err());
        assert_eq!(r.num_groups(), 1);
    }
}
