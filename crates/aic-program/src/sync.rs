//! Host/device handshake.
//!
//! Two counting semaphores and one doorbell per buffer carry the whole
//! protocol:
//!
//! - every input transfer waits until the input semaphore equals the number
//!   of cores holding inputs, so the host only writes once all of them
//!   signalled they are done with the previous batch; the last input resets
//!   it to 0
//! - every output transfer waits until the output semaphore drops to 0; the
//!   last output re-arms it to the number of cores holding outputs
//! - after each transfer the host rings the buffer's doorbell, which the
//!   device clears before consuming the data
//!
//! Wait targets are popcounts of the participation masks, so each is
//! reached exactly once per iteration.

use aic_chip::doorbell::{self, DB_CLEAR, DB_SET, EXIT_SLOT, MAX_BUFFER_DOORBELLS};
use aic_chip::topology::semaphore;
use aic_format::prelude::{DoorbellOp, DoorbellWidth, SemaphoreOp, SemaphoreOpcode, SyncPoint};
use aic_format::{MetadataWriter, Usage};
use tracing::debug;

use crate::error::{PlanError, Result};
use crate::layout::PlannedBuffer;
use crate::multicast::DOORBELL_GROUP;

/// Handshake attached to one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSync {
    /// Doorbell slot
    pub slot: u32,
    /// Semaphore operations of the transfer, empty for internal buffers
    pub semaphore_ops: Vec<SemaphoreOp>,
    /// Doorbell rung after the transfer, `None` for internal buffers
    pub doorbell_op: Option<DoorbellOp>,
    /// Initial value of the slot
    pub init_word: u32,
}

#[allow(clippy::cast_possible_truncation)]
const fn popcount(mask: u32) -> u16 {
    mask.count_ones() as u16
}

/// Assigns doorbell slots and semaphore operations in processing order.
#[derive(Debug, Clone)]
pub struct SyncPlanner {
    input_mask: u32,
    output_mask: u32,
    num_inputs: usize,
    num_outputs: usize,
    next_slot: u32,
    init_words: Vec<(u32, u32)>,
}

impl SyncPlanner {
    /// Derive the semaphore targets from every buffer of the program.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] if the buffers need more doorbells
    /// than the firmware scans.
    pub fn new(buffers: &[PlannedBuffer]) -> Result<Self> {
        let needed = buffers.len() + 1;
        if needed > doorbell::FIRMWARE_SLOTS as usize {
            return Err(PlanError::config(format!(
                "{} buffers need {needed} doorbells, firmware supports {} buffer doorbells plus exit",
                buffers.len(),
                MAX_BUFFER_DOORBELLS
            )));
        }
        let mut planner = Self {
            input_mask: 0,
            output_mask: 0,
            num_inputs: 0,
            num_outputs: 0,
            next_slot: 0,
            init_words: Vec::with_capacity(buffers.len()),
        };
        for b in buffers {
            match b.usage {
                Usage::Input => {
                    planner.input_mask |= b.mask;
                    planner.num_inputs += 1;
                }
                Usage::Output => {
                    planner.output_mask |= b.mask;
                    planner.num_outputs += 1;
                }
                Usage::Internal => {}
            }
        }
        debug!(
            input_mask = %format_args!("0x{:x}", planner.input_mask),
            output_mask = %format_args!("0x{:x}", planner.output_mask),
            "semaphore targets"
        );
        Ok(planner)
    }

    /// Value the input semaphore must reach before inputs are written.
    #[must_use]
    pub const fn input_wait_target(&self) -> u16 {
        popcount(self.input_mask)
    }

    /// Value the output semaphore is re-armed to.
    #[must_use]
    pub const fn output_init_value(&self) -> u16 {
        popcount(self.output_mask)
    }

    /// Initial values of the two semaphores.
    #[must_use]
    pub fn semaphore_init_state(&self) -> [u32; semaphore::COUNT as usize] {
        [0, u32::from(self.output_init_value())]
    }

    /// Assign the next slot to `buf` and build its handshake.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] if the slots run out.
    pub fn assign(&mut self, buf: &PlannedBuffer) -> Result<BufferSync> {
        let slot = self.next_slot;
        if slot >= EXIT_SLOT {
            return Err(PlanError::config(format!(
                "{}: no doorbell left, {MAX_BUFFER_DOORBELLS} in use",
                buf.label()
            )));
        }
        self.next_slot += 1;

        let op = |opcode, sem_num, value, sync| SemaphoreOp {
            opcode,
            sem_num,
            value,
            sync,
            in_sync_fence: buf.in_sync_fence,
            out_sync_fence: buf.out_sync_fence,
        };
        let mut semaphore_ops = Vec::new();
        match buf.usage {
            Usage::Input => {
                semaphore_ops.push(op(
                    SemaphoreOpcode::WaitEq,
                    semaphore::INPUT,
                    self.input_wait_target(),
                    SyncPoint::Pre,
                ));
                if buf.index + 1 == self.num_inputs {
                    semaphore_ops.push(op(SemaphoreOpcode::Init, semaphore::INPUT, 0, SyncPoint::Post));
                }
            }
            Usage::Output => {
                semaphore_ops.push(op(SemaphoreOpcode::WaitEq, semaphore::OUTPUT, 0, SyncPoint::Pre));
                if buf.index + 1 == self.num_outputs {
                    semaphore_ops.push(op(
                        SemaphoreOpcode::Init,
                        semaphore::OUTPUT,
                        self.output_init_value(),
                        SyncPoint::Post,
                    ));
                }
            }
            Usage::Internal => {}
        }

        let doorbell_op = (buf.usage != Usage::Internal).then(|| DoorbellOp {
            width: DoorbellWidth::Bits32,
            mc_id: DOORBELL_GROUP,
            offset: doorbell::slot_offset(slot),
            data: DB_SET,
        });
        // Outputs start "rung": the buffer is free for the device to fill.
        let init_word = if buf.usage == Usage::Output { DB_SET } else { DB_CLEAR };
        self.init_words.push((slot, init_word));

        Ok(BufferSync {
            slot,
            semaphore_ops,
            doorbell_op,
            init_word,
        })
    }

    /// Slots assigned so far.
    #[must_use]
    pub const fn slots_used(&self) -> u32 {
        self.next_slot
    }

    /// Write every assigned slot and the cleared exit slot into the L2TCM
    /// init image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is shorter than the doorbell window.
    pub fn write_doorbells(&self, writer: &mut MetadataWriter) -> Result<()> {
        for &(slot, word) in &self.init_words {
            writer.init_l2tcm_word(doorbell::slot_offset(slot), word)?;
        }
        writer.init_l2tcm_word(doorbell::slot_offset(EXIT_SLOT), DB_CLEAR)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferSpec, DataType, Destination};
    use crate::layout;

    fn buf(usage: Usage, index: usize, nsps: Vec<u32>) -> PlannedBuffer {
        let spec = BufferSpec::new(DataType::Int8, vec![64], Destination::Ddr).with_nsps(nsps);
        layout::resolve(&spec, usage, index, 4).unwrap()
    }

    #[test]
    fn targets_are_mask_popcounts() {
        let bufs = [
            buf(Usage::Input, 0, vec![0, 1]),
            buf(Usage::Input, 1, vec![2]),
            buf(Usage::Output, 0, vec![3]),
        ];
        let s = SyncPlanner::new(&bufs).unwrap();
        assert_eq!(s.input_wait_target(), 3);
        assert_eq!(s.output_init_value(), 1);
        assert_eq!(s.semaphore_init_state(), [0, 1]);
    }

    #[test]
    fn last_buffer_of_a_class_resets_its_semaphore() {
        let bufs = [
            buf(Usage::Input, 0, vec![]),
            buf(Usage::Input, 1, vec![]),
            buf(Usage::Output, 0, vec![1]),
        ];
        let mut s = SyncPlanner::new(&bufs).unwrap();
        let first = s.assign(&bufs[0]).unwrap();
        let last = s.assign(&bufs[1]).unwrap();
        let out = s.assign(&bufs[2]).unwrap();

        assert_eq!(first.semaphore_ops.len(), 1);
        assert_eq!(first.semaphore_ops[0].opcode, SemaphoreOpcode::WaitEq);
        assert_eq!(first.semaphore_ops[0].value, 4);

        assert_eq!(last.semaphore_ops.len(), 2);
        let reset = last.semaphore_ops[1];
        assert_eq!((reset.opcode, reset.sem_num, reset.value), (SemaphoreOpcode::Init, 0, 0));
        assert_eq!(reset.sync, SyncPoint::Post);

        let ops = &out.semaphore_ops;
        assert_eq!((ops[0].sem_num, ops[0].value), (semaphore::OUTPUT, 0));
        assert_eq!((ops[1].opcode, ops[1].value), (SemaphoreOpcode::Init, 1));
    }

    #[test]
    fn slots_and_init_words() {
        let bufs = [
            buf(Usage::Input, 0, vec![]),
            buf(Usage::Output, 0, vec![0]),
            buf(Usage::Internal, 0, vec![]),
        ];
        let mut s = SyncPlanner::new(&bufs).unwrap();
        let syncs: Vec<_> = bufs.iter().map(|b| s.assign(b).unwrap()).collect();
        assert_eq!(syncs.iter().map(|x| x.slot).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(syncs.iter().map(|x| x.init_word).collect::<Vec<_>>(), [0, 1, 0]);
        assert_eq!(syncs[1].doorbell_op.unwrap().offset, 4);
        assert!(syncs[2].doorbell_op.is_none());
        assert!(syncs[2].semaphore_ops.is_empty());
        assert_eq!(s.slots_used(), 3);
    }

    #[test]
    fn fences_follow_the_buffer() {
        let spec = BufferSpec {
            in_sync_fence: 1,
            ..BufferSpec::new(DataType::Int8, vec![8], Destination::Ddr)
        };
        let b = layout::resolve(&spec, Usage::Input, 0, 1).unwrap();
        let mut s = SyncPlanner::new(std::slice::from_ref(&b)).unwrap();
        let sync = s.assign(&b).unwrap();
        assert!(sync.semaphore_ops.iter().all(|op| op.in_sync_fence && !op.out_sync_fence));
    }

    #[test]
    fn too_many_buffers() {
        let one = buf(Usage::Internal, 0, vec![]);
        let bufs = vec![one; doorbell::FIRMWARE_SLOTS as usize];
        assert!(SyncPlanner::new(&bufs).unwrap_err().is_config());
        assert!(SyncPlanner::new(&bufs[1..]).is_ok());
    }

    #[test]
    fn doorbell_image() {
        let bufs = [buf(Usage::Output, 0, vec![0])];
        let mut s = SyncPlanner::new(&bufs).unwrap();
        s.assign(&bufs[0]).unwrap();
        let mut w = MetadataWriter::new(2, 0);
        w.resize_l2tcm_init(doorbell::window_size() as usize);
        s.write_doorbells(&mut w).unwrap();
        let image = &w.metadata().l2tcm_init_state;
        assert_eq!(&image[0..4], &[1, 0, 0, 0]);
        assert!(image[4..].iter().all(|&b| b == 0));
        assert!(SyncPlanner::new(&bufs).unwrap().write_doorbells(&mut MetadataWriter::new(2, 0)).is_err());
    }
}
