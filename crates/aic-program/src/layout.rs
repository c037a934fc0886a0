//! Buffer layout.
//!
//! Places every buffer in its address space and tracks the high-water mark
//! of each space. L2TCM starts with a region the program never allocates
//! from:
//!
//! ```text
//! 0      doorbell window (281 slots × 4 bytes)
//! 1152   UDMA dummy descriptor (16 bytes, pre-set to done)
//! 1280   UDMA descriptor ring (threads × 2 cache lines)
//! ```
//!
//! Each of the last two starts on a cache-line boundary.

use aic_chip::memory::{AddressSpace, BASE_GROUP_ALIGN, CACHE_LINE_SIZE};
use aic_chip::{align_up, doorbell, topology, udma};
use aic_format::Usage;
use tracing::trace;

use crate::config::{BufferSpec, DataType};
use crate::error::{PlanError, Result};

/// Fixed L2TCM reservation at the bottom of every core's scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2tcmReservation {
    /// Bytes of the doorbell window
    pub doorbell_space: u64,
    /// Offset of the UDMA dummy descriptor
    pub dummy_desc_offset: u64,
    /// Offset of the UDMA descriptor ring
    pub ring_offset: u64,
    /// Bytes of the UDMA descriptor ring
    pub ring_size: u64,
}

impl L2tcmReservation {
    /// Reservation for cores running `num_threads` threads.
    #[must_use]
    pub fn new(num_threads: u32) -> Self {
        let doorbell_space = doorbell::window_size();
        let dummy_desc_offset = align_up(doorbell_space, CACHE_LINE_SIZE);
        let ring_offset = align_up(dummy_desc_offset + udma::DESCRIPTOR_SIZE, CACHE_LINE_SIZE);
        Self {
            doorbell_space,
            dummy_desc_offset,
            ring_offset,
            ring_size: udma::ring_size(num_threads),
        }
    }

    /// First byte buffers may use: the end of the descriptor ring.
    ///
    /// This is `ring_offset + ring_size`, not `dummy_desc_offset +
    /// ring_size`: the ring starts a cache line past the dummy descriptor,
    /// so the shorter bound would let a buffer overlap the ring's tail.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.ring_offset + self.ring_size
    }

    /// Length of the L2TCM image the runtime initialises: the doorbells
    /// and the dummy descriptor. The ring itself starts out undefined.
    #[must_use]
    pub const fn init_image_len(&self) -> u64 {
        self.dummy_desc_offset + udma::DESCRIPTOR_SIZE
    }
}

/// A validated buffer, ready to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBuffer {
    /// Role
    pub usage: Usage,
    /// Position among buffers of the same role
    pub index: usize,
    /// Element type
    pub data_type: DataType,
    /// Shape
    pub dims: Vec<u64>,
    /// Memory
    pub space: AddressSpace,
    /// Base group offset
    pub base_offset: u64,
    /// Offset inside the base group
    pub dev_offset: u64,
    /// Offset in the host buffer
    pub host_offset: u64,
    /// Bytes
    pub size: u32,
    /// Cores holding the buffer
    pub mask: u32,
    /// Fence before the semaphore op
    pub in_sync_fence: bool,
    /// Fence after the semaphore op
    pub out_sync_fence: bool,
    /// Host may transfer a prefix
    pub allow_partial: bool,
}

impl PlannedBuffer {
    /// Absolute offset in its address space.
    ///
    /// Saturates; [`resolve`] only returns buffers whose end fits in 32 bits.
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.base_offset.saturating_add(self.dev_offset)
    }

    /// One past the last byte, saturating like [`start`](Self::start).
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start().saturating_add(self.size as u64)
    }

    /// One past the last byte, `None` if the offsets overflow.
    #[must_use]
    pub fn checked_end(&self) -> Option<u64> {
        self.base_offset
            .checked_add(self.dev_offset)?
            .checked_add(u64::from(self.size))
    }

    /// Name used in messages and host-facing descriptors.
    #[must_use]
    pub fn label(&self) -> String {
        match self.usage {
            Usage::Input => format!("inputBuff_{}", self.index),
            Usage::Output => format!("outputBuff_{}", self.index),
            Usage::Internal => format!("internalBuff_{}", self.index),
        }
    }
}

fn fence(value: u32, what: &str, label: &str) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        v => Err(PlanError::config(format!("{label}: {what} must be 0 or 1, got {v}"))),
    }
}

/// Validate one configured buffer and resolve its size and core mask.
///
/// # Errors
///
/// Returns [`PlanError::Config`] for an empty or oversized shape, a core
/// outside the program, a misaligned or non-zero base group, an on-chip
/// output spread over several cores, fence flags other than 0 or 1, or a
/// partial transfer on anything but an input.
pub fn resolve(spec: &BufferSpec, usage: Usage, index: usize, num_cores: u32) -> Result<PlannedBuffer> {
    let mut buf = PlannedBuffer {
        usage,
        index,
        data_type: spec.data_type,
        dims: spec.dims.clone(),
        space: spec.dest.into(),
        base_offset: spec.base_addr_offset,
        dev_offset: spec.dev_offset,
        host_offset: spec.host_offset,
        size: 0,
        mask: 0,
        in_sync_fence: false,
        out_sync_fence: false,
        allow_partial: spec.allow_partial,
    };
    let label = buf.label();

    let size = spec.byte_size().unwrap_or(u64::MAX);
    if spec.dims.is_empty() || size == 0 {
        return Err(PlanError::config(format!("{label}: buffer has no elements")));
    }
    buf.size = u32::try_from(size)
        .map_err(|_| PlanError::config(format!("{label}: {size} bytes exceeds 4 GiB")))?;

    for &core in &spec.nsps {
        if core >= num_cores {
            return Err(PlanError::config(format!(
                "{label}: core {core} outside the {num_cores} cores of the program"
            )));
        }
        buf.mask |= 1 << core;
    }
    if buf.mask == 0 {
        buf.mask = topology::all_cores_mask(num_cores);
    }

    if buf.space.is_on_chip() {
        if buf.base_offset % BASE_GROUP_ALIGN != 0 {
            return Err(PlanError::config(format!(
                "{label}: base group offset 0x{:x} is not {BASE_GROUP_ALIGN}-byte aligned",
                buf.base_offset
            )));
        }
        if usage == Usage::Output && !buf.mask.is_power_of_two() {
            return Err(PlanError::config(format!(
                "{label}: {} outputs must live on a single core, mask is 0x{:x}",
                buf.space, buf.mask
            )));
        }
    } else if buf.base_offset != 0 {
        return Err(PlanError::config(format!(
            "{label}: DDR buffers cannot use a base group offset"
        )));
    }
    if buf.checked_end().map_or(true, |end| u32::try_from(end).is_err()) {
        return Err(PlanError::config(format!(
            "{label}: ends past the 32-bit device address range"
        )));
    }

    if usage != Usage::Internal {
        buf.in_sync_fence = fence(spec.in_sync_fence, "inSyncFence", &label)?;
        buf.out_sync_fence = fence(spec.out_sync_fence, "outSyncFence", &label)?;
    }
    if spec.allow_partial && usage != Usage::Input {
        return Err(PlanError::config(format!(
            "{label}: only inputs may allow partial transfers"
        )));
    }
    Ok(buf)
}

/// Memory each address space needs per core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePlan {
    /// L2TCM bytes, reservation included
    pub l2tcm: u64,
    /// VTCM bytes
    pub vtcm: u64,
    /// Shared DDR bytes
    pub ddr: u64,
}

/// Tracks high-water marks while buffers are placed.
#[derive(Debug, Clone)]
pub struct LayoutPlanner {
    reservation: L2tcmReservation,
    plan: ResourcePlan,
}

impl LayoutPlanner {
    /// Start with only the reservation in use.
    ///
    /// On-chip sizes start at 1 byte since the runtime rejects zero-sized
    /// memories.
    #[must_use]
    pub fn new(reservation: L2tcmReservation) -> Self {
        Self {
            reservation,
            plan: ResourcePlan {
                l2tcm: reservation.end().max(1),
                vtcm: 1,
                ddr: 0,
            },
        }
    }

    /// Reservation this planner was built with.
    #[must_use]
    pub const fn reservation(&self) -> &L2tcmReservation {
        &self.reservation
    }

    /// Account for `buf` and check it fits.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] if the buffer overlaps the L2TCM
    /// reservation or pushes a space past its capacity.
    pub fn place(&mut self, buf: &PlannedBuffer) -> Result<()> {
        let label = buf.label();
        match buf.space {
            AddressSpace::L2tcm => {
                if buf.start() < self.reservation.end() {
                    return Err(PlanError::config(format!(
                        "{label}: starts at 0x{:x}, inside the first 0x{:x} bytes of L2TCM reserved for doorbells and UDMA",
                        buf.start(),
                        self.reservation.end()
                    )));
                }
                self.plan.l2tcm = self.plan.l2tcm.max(buf.end());
            }
            AddressSpace::Vtcm => self.plan.vtcm = self.plan.vtcm.max(buf.end()),
            AddressSpace::Ddr => self.plan.ddr = self.plan.ddr.max(buf.end()),
        }
        if let Some(cap) = buf.space.capacity() {
            let used = match buf.space {
                AddressSpace::L2tcm => self.plan.l2tcm,
                _ => self.plan.vtcm,
            };
            if used > cap {
                return Err(PlanError::config(format!(
                    "{label}: needs {used} bytes of {}, capacity is {cap}",
                    buf.space
                )));
            }
        }
        trace!(buffer = %label, space = %buf.space, start = buf.start(), size = buf.size, "placed");
        Ok(())
    }

    /// Sizes so far.
    #[must_use]
    pub const fn plan(&self) -> ResourcePlan {
        self.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Destination;

    fn l2(base: u64, dev: u64, bytes: u64) -> BufferSpec {
        BufferSpec::new(DataType::Int8, vec![bytes], Destination::L2tcm)
            .with_base_offset(base)
            .with_dev_offset(dev)
            .with_nsps(vec![0])
    }

    #[test]
    fn reservation_for_five_threads() {
        let r = L2tcmReservation::new(5);
        assert_eq!(r.doorbell_space, 1124);
        assert_eq!(r.dummy_desc_offset, 1152);
        assert_eq!(r.ring_offset, 1280);
        assert_eq!(r.ring_size, 1280);
        assert_eq!(r.end(), 2560);
        assert_eq!(r.init_image_len(), 1168);
    }

    #[test]
    fn ring_tail_stays_reserved() {
        let r = L2tcmReservation::new(5);
        let mut planner = LayoutPlanner::new(r);
        let tail_offset = r.dummy_desc_offset + r.ring_size;
        let tail = resolve(&l2(0, tail_offset, 64), Usage::Internal, 0, 1).unwrap();
        assert!(planner.place(&tail).unwrap_err().is_config());
        let clear = resolve(&l2(0, r.end(), 64), Usage::Internal, 0, 1).unwrap();
        planner.place(&clear).unwrap();
    }

    #[test]
    fn overflowing_offsets_are_config_errors() {
        let spec = BufferSpec::new(DataType::Int8, vec![8], Destination::Ddr)
            .with_dev_offset(u64::MAX - 3);
        let err = resolve(&spec, Usage::Input, 0, 1).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("32-bit"), "{err}");

        let spec = BufferSpec::new(DataType::Int8, vec![8], Destination::Vtcm)
            .with_base_offset(u64::MAX - 4095)
            .with_dev_offset(4096);
        assert!(resolve(&spec, Usage::Input, 0, 1).unwrap_err().is_config());
    }

    #[test]
    fn resolve_fills_mask_and_size() {
        let spec = BufferSpec::new(DataType::Float, vec![2, 8], Destination::Vtcm);
        let b = resolve(&spec, Usage::Input, 0, 4).unwrap();
        assert_eq!(b.size, 64);
        assert_eq!(b.mask, 0b1111);
        let b = resolve(&spec.with_nsps(vec![1, 3]), Usage::Input, 0, 4).unwrap();
        assert_eq!(b.mask, 0b1010);
    }

    #[test]
    fn resolve_rejects_bad_buffers() {
        let ok = l2(4096, 0, 16);
        let cases = [
            BufferSpec { dims: vec![], ..ok.clone() },
            BufferSpec { dims: vec![4, 0], ..ok.clone() },
            ok.clone().with_nsps(vec![4]),
            ok.clone().with_base_offset(100),
            BufferSpec { dest: Destination::Ddr, ..ok.clone() },
            BufferSpec { in_sync_fence: 2, ..ok.clone() },
        ];
        for spec in &cases {
            assert!(
                resolve(spec, Usage::Input, 0, 4).unwrap_err().is_config(),
                "{spec:?}"
            );
        }
        assert!(resolve(&ok.clone().with_partial(true), Usage::Output, 0, 4).is_err());
    }

    #[test]
    fn on_chip_output_must_be_single_core() {
        let spec = l2(4096, 0, 16).with_nsps(vec![0, 1]);
        assert!(resolve(&spec, Usage::Input, 0, 4).is_ok());
        assert!(resolve(&spec, Usage::Output, 0, 4).is_err());
        let ddr = BufferSpec::new(DataType::Int8, vec![16], Destination::Ddr);
        assert!(resolve(&ddr, Usage::Output, 0, 4).is_ok());
    }

    #[test]
    fn l2tcm_reservation_is_protected() {
        let mut p = LayoutPlanner::new(L2tcmReservation::new(4));
        let inside = resolve(&l2(0, 1024, 8), Usage::Input, 0, 1).unwrap();
        assert!(p.place(&inside).is_err());
        let after = resolve(&l2(4096, 0, 8), Usage::Input, 1, 1).unwrap();
        p.place(&after).unwrap();
        assert_eq!(p.plan().l2tcm, 4104);
    }

    #[test]
    fn capacities_are_enforced() {
        let mut p = LayoutPlanner::new(L2tcmReservation::new(4));
        let full = resolve(&l2(1_040_384, 4096, 4096), Usage::Input, 0, 1).unwrap();
        p.place(&full).unwrap();
        assert_eq!(p.plan().l2tcm, 1 << 20);
        let over = resolve(&l2(1_040_384, 4096, 4097), Usage::Input, 1, 1).unwrap();
        assert!(p.place(&over).is_err());

        let vtcm = BufferSpec::new(DataType::Int8, vec![8 << 20], Destination::Vtcm).with_dev_offset(1);
        let vtcm = resolve(&vtcm, Usage::Input, 2, 1).unwrap();
        assert!(p.place(&vtcm).is_err());
    }

    #[test]
    fn ddr_tracks_furthest_end() {
        let mut p = LayoutPlanner::new(L2tcmReservation::new(4));
        for (i, dev) in [4096u64, 0].into_iter().enumerate() {
            let spec = BufferSpec::new(DataType::Float, vec![256], Destination::Ddr).with_dev_offset(dev);
            p.place(&resolve(&spec, Usage::Input, i, 2).unwrap()).unwrap();
        }
        assert_eq!(p.plan().ddr, 5120);
        assert_eq!(p.plan().vtcm, 1);
    }
}
