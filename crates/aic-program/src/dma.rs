//! DMA requests.
//!
//! One request moves each input or output between the host and its device
//! buffer. Requests are numbered in the order buffers are processed and
//! carry the handshake built by [`SyncPlanner`](crate::sync::SyncPlanner).

use aic_chip::memory::AddressSpace;
use aic_chip::topology::{self, port};
use aic_format::metadata::TRANSACTION_ID_NONE;
use aic_format::prelude::{DmaAddrSpace, DmaDirection, DmaRequest};
use aic_format::Usage;
use tracing::trace;

use crate::config::DataType;
use crate::error::{PlanError, Result};
use crate::layout::{L2tcmReservation, PlannedBuffer};
use crate::sync::BufferSync;

/// Builds the program's DMA requests.
#[derive(Debug, Clone, Default)]
pub struct DmaBuilder {
    requests: Vec<DmaRequest>,
}

impl DmaBuilder {
    /// Start with no request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the transfer of `buf`, if it has one.
    ///
    /// Internal buffers never move to or from the host and are skipped.
    /// `mc_id` is the buffer's multicast group, `None` in DDR.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] when request numbers run out.
    pub fn add(
        &mut self,
        buf: &PlannedBuffer,
        mc_id: Option<u16>,
        sync: &BufferSync,
    ) -> Result<Option<&DmaRequest>> {
        let (direction, port_id) = match buf.usage {
            Usage::Input => (DmaDirection::In, port::INPUT),
            Usage::Output => (DmaDirection::Out, port::OUTPUT),
            Usage::Internal => return Ok(None),
        };
        let num = u16::try_from(self.requests.len())
            .map_err(|_| PlanError::config("more DMA requests than sequence numbers"))?;
        let dev_addr_space = if buf.space == AddressSpace::Ddr {
            DmaAddrSpace::Ddr
        } else {
            DmaAddrSpace::Multicast
        };
        let request = DmaRequest {
            num,
            host_offset: buf.host_offset,
            dev_addr_space,
            dev_offset: buf.dev_offset,
            size: buf.size,
            direction,
            port_id,
            mc_id: mc_id.unwrap_or(0),
            semaphore_ops: sync.semaphore_ops.clone(),
            doorbell_ops: sync.doorbell_op.into_iter().collect(),
            transaction_id: TRANSACTION_ID_NONE,
        };
        trace!(num, buffer = %buf.label(), size = buf.size, "DMA request");
        self.requests.push(request);
        Ok(self.requests.last())
    }

    /// Requests built so far.
    #[must_use]
    pub fn requests(&self) -> &[DmaRequest] {
        &self.requests
    }

    /// Take the requests.
    #[must_use]
    pub fn into_requests(self) -> Vec<DmaRequest> {
        self.requests
    }
}

/// The UDMA descriptor ring as an internal buffer spanning every core.
///
/// The ring lives inside the L2TCM reservation, so it is never placed by
/// the layout planner. `index` follows the configured internal buffers.
#[must_use]
pub fn ring_buffer(reservation: &L2tcmReservation, num_cores: u32, index: usize) -> PlannedBuffer {
    let size = u32::try_from(reservation.ring_size).unwrap_or(u32::MAX);
    PlannedBuffer {
        usage: Usage::Internal,
        index,
        data_type: DataType::Int8,
        dims: vec![reservation.ring_size],
        space: AddressSpace::L2tcm,
        base_offset: 0,
        dev_offset: reservation.ring_offset,
        host_offset: 0,
        size,
        mask: topology::all_cores_mask(num_cores),
        in_sync_fence: false,
        out_sync_fence: false,
        allow_partial: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferSpec, Destination};
    use crate::layout;
    use crate::sync::SyncPlanner;
    use aic_format::prelude::SemaphoreOpcode;

    fn planned() -> Vec<PlannedBuffer> {
        let input = BufferSpec {
            host_offset: 512,
            ..BufferSpec::new(DataType::Float, vec![16], Destination::Ddr).with_dev_offset(64)
        };
        let output = BufferSpec::new(DataType::Int8, vec![32], Destination::Vtcm)
            .with_base_offset(8192)
            .with_dev_offset(16)
            .with_nsps(vec![1]);
        let internal = BufferSpec::new(DataType::Int8, vec![8], Destination::Vtcm);
        vec![
            layout::resolve(&input, Usage::Input, 0, 2).unwrap(),
            layout::resolve(&output, Usage::Output, 0, 2).unwrap(),
            layout::resolve(&internal, Usage::Internal, 0, 2).unwrap(),
        ]
    }

    #[test]
    fn one_request_per_io_buffer() {
        let bufs = planned();
        let mut sync = SyncPlanner::new(&bufs).unwrap();
        let mut dma = DmaBuilder::new();
        for (b, mc) in bufs.iter().zip([None, Some(1), Some(2)]) {
            let s = sync.assign(b).unwrap();
            dma.add(b, mc, &s).unwrap();
        }
        let reqs = dma.into_requests();
        assert_eq!(reqs.len(), 2);

        let input = &reqs[0];
        assert_eq!(input.num, 0);
        assert_eq!(input.dev_addr_space, DmaAddrSpace::Ddr);
        assert_eq!((input.host_offset, input.dev_offset, input.size), (512, 64, 64));
        assert_eq!((input.direction, input.port_id, input.mc_id), (DmaDirection::In, 100, 0));
        assert_eq!(input.semaphore_ops[0].opcode, SemaphoreOpcode::WaitEq);
        assert_eq!(input.doorbell_ops[0].offset, 0);

        let output = &reqs[1];
        assert_eq!(output.num, 1);
        assert_eq!(output.dev_addr_space, DmaAddrSpace::Multicast);
        assert_eq!(output.dev_offset, 16);
        assert_eq!((output.direction, output.port_id, output.mc_id), (DmaDirection::Out, 101, 1));
        assert_eq!(output.doorbell_ops[0].offset, 4);
        assert_eq!(output.transaction_id, TRANSACTION_ID_NONE);
    }

    #[test]
    fn ring_covers_every_core() {
        let r = L2tcmReservation::new(5);
        let ring = ring_buffer(&r, 14, 0);
        assert_eq!(ring.start(), 1280);
        assert_eq!(ring.size, 1280);
        assert_eq!(ring.mask, 0x3fff);
        assert_eq!(ring.usage, Usage::Internal);
    }
}
