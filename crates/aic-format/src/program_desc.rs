//! Program descriptor (`constants.bin`).
//!
//! Fixed-layout record the on-device loader reads before starting any
//! thread. It lists every buffer with its location, doorbell slots and
//! multicast group, so device code can find its I/O without parsing the
//! metadata document.
//!
//! ## Layout (little-endian)
//!
//! | Offset | Field | Type |
//! |--------|-------|------|
//! | 0 | version | u16 |
//! | 2 | exit doorbell slot | u16 |
//! | 4 | total size | u32 |
//! | 8 | thread count | u32 |
//! | 12 | buffers / inputs / outputs / internal | u16 ×4 |
//! | 20 | input semaphore / output semaphore | u16 ×2 |
//! | 24 | input core mask / output core mask | u16 ×2 |
//! | 28 | buffer table offset | u32 |
//! | 32 | UDMA ring buffer index | u32 |
//! | 36 | UDMA dummy descriptor offset | u32 |
//! | 40 | buffer descriptors | 40 B each |

use crate::error::{FormatError, Result};
use crate::wire::Cursor;

/// Descriptor layout revision.
pub const VERSION: u16 = 1;

/// Header bytes.
pub const HEADER_SIZE: usize = 40;

/// Bytes per buffer descriptor.
pub const BUFFER_DESC_SIZE: usize = 40;

const WHAT: &str = "program descriptor";

/// Memory holding a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum MemLocation {
    /// L2TCM
    #[default]
    L2tcm = 0,
    /// VTCM
    Vtcm = 1,
    /// DDR
    Ddr = 2,
}

/// Role of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Usage {
    /// Written by the host
    #[default]
    Input = 0,
    /// Read by the host
    Output = 1,
    /// Device-private
    Internal = 2,
}

/// One buffer as the loader sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferDesc {
    /// Memory
    pub location: MemLocation,
    /// Byte offset in that memory (device offset + base group offset)
    pub offset: u32,
    /// Bytes
    pub size: u32,
    /// Doorbell slot the device waits on
    pub wait_db_num: u16,
    /// Doorbell slot the device rings when done
    pub io_db_num: u16,
    /// Value that counts as "rung" for the wait slot
    pub wait_db_val: u32,
    /// Value written to the I/O slot
    pub io_db_val: u32,
    /// Multicast group of the I/O transfer
    pub io_mc_id: u16,
    /// Multicast group of the I/O doorbell
    pub io_db_mc_id: u16,
    /// Multicast group of the buffer itself
    pub buff_mc_id: u16,
    /// Cores holding the buffer
    pub nsp_mask: u16,
    /// Role
    pub usage: Usage,
    /// Partial transfers allowed
    pub allow_partial: bool,
}

impl BufferDesc {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.location as u32).to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.wait_db_num.to_le_bytes());
        out.extend_from_slice(&self.io_db_num.to_le_bytes());
        out.extend_from_slice(&self.wait_db_val.to_le_bytes());
        out.extend_from_slice(&self.io_db_val.to_le_bytes());
        out.extend_from_slice(&self.io_mc_id.to_le_bytes());
        out.extend_from_slice(&self.io_db_mc_id.to_le_bytes());
        out.extend_from_slice(&self.buff_mc_id.to_le_bytes());
        out.extend_from_slice(&self.nsp_mask.to_le_bytes());
        out.extend_from_slice(&(self.usage as u32).to_le_bytes());
        out.extend_from_slice(&u32::from(self.allow_partial).to_le_bytes());
    }

    fn read(c: &mut Cursor<'_>) -> Result<Self> {
        let location = match c.u32()? {
            0 => MemLocation::L2tcm,
            1 => MemLocation::Vtcm,
            2 => MemLocation::Ddr,
            v => return Err(FormatError::malformed(WHAT, format!("location {v}"))),
        };
        let offset = c.u32()?;
        let size = c.u32()?;
        let wait_db_num = c.u16()?;
        let io_db_num = c.u16()?;
        let wait_db_val = c.u32()?;
        let io_db_val = c.u32()?;
        let io_mc_id = c.u16()?;
        let io_db_mc_id = c.u16()?;
        let buff_mc_id = c.u16()?;
        let nsp_mask = c.u16()?;
        let usage = match c.u32()? {
            0 => Usage::Input,
            1 => Usage::Output,
            2 => Usage::Internal,
            v => return Err(FormatError::malformed(WHAT, format!("usage {v}"))),
        };
        let allow_partial = c.u32()? != 0;
        Ok(Self {
            location,
            offset,
            size,
            wait_db_num,
            io_db_num,
            wait_db_val,
            io_db_val,
            io_mc_id,
            io_db_mc_id,
            buff_mc_id,
            nsp_mask,
            usage,
            allow_partial,
        })
    }
}

/// The program descriptor.
///
/// Buffers are referenced by their index in [`buffers`](Self::buffers).
/// Counts and core masks in the header are derived from the buffer list
/// when encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramDesc {
    /// Slot of the exit doorbell
    pub exit_db: u16,
    /// Threads per core
    pub num_threads: u32,
    /// Semaphore guarding inputs
    pub input_sem: u16,
    /// Semaphore guarding outputs
    pub output_sem: u16,
    /// Buffers in declaration order
    pub buffers: Vec<BufferDesc>,
    /// Index of the UDMA descriptor ring buffer
    pub udma_desc_buff_num: u32,
    /// L2TCM offset of the UDMA dummy descriptor
    pub udma_dummy_start_desc_offset: u32,
}

#[allow(clippy::cast_possible_truncation)]
fn count16(n: usize) -> u16 {
    n as u16
}

impl ProgramDesc {
    /// Start an empty descriptor.
    #[must_use]
    pub fn new(exit_db: u16, input_sem: u16, output_sem: u16, num_threads: u32) -> Self {
        Self {
            exit_db,
            num_threads,
            input_sem,
            output_sem,
            ..Self::default()
        }
    }

    /// Append a buffer and return its index.
    pub fn add_buffer(&mut self, buffer: BufferDesc) -> u32 {
        self.buffers.push(buffer);
        u32::try_from(self.buffers.len() - 1).unwrap_or(u32::MAX)
    }

    /// Append the UDMA descriptor ring and remember where it is.
    pub fn add_udma_desc_buffer(&mut self, buffer: BufferDesc, dummy_desc_offset: u32) -> u32 {
        let index = self.add_buffer(buffer);
        self.udma_desc_buff_num = index;
        self.udma_dummy_start_desc_offset = dummy_desc_offset;
        index
    }

    fn count(&self, usage: Usage) -> usize {
        self.buffers.iter().filter(|b| b.usage == usage).count()
    }

    fn mask(&self, usage: Usage) -> u16 {
        self.buffers
            .iter()
            .filter(|b| b.usage == usage)
            .fold(0, |m, b| m | b.nsp_mask)
    }

    /// Number of input buffers.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.count(Usage::Input)
    }

    /// Number of output buffers.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.count(Usage::Output)
    }

    /// Number of internal buffers.
    #[must_use]
    pub fn num_internal(&self) -> usize {
        self.count(Usage::Internal)
    }

    /// Cores holding at least one input.
    #[must_use]
    pub fn inputs_mask(&self) -> u16 {
        self.mask(Usage::Input)
    }

    /// Cores holding at least one output.
    #[must_use]
    pub fn outputs_mask(&self) -> u16 {
        self.mask(Usage::Output)
    }

    /// Encoded size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.buffers.len() * BUFFER_DESC_SIZE
    }

    /// Encode.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = self.encoded_len();
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.exit_db.to_le_bytes());
        out.extend_from_slice(&u32::try_from(size).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&self.num_threads.to_le_bytes());
        out.extend_from_slice(&count16(self.buffers.len()).to_le_bytes());
        out.extend_from_slice(&count16(self.num_inputs()).to_le_bytes());
        out.extend_from_slice(&count16(self.num_outputs()).to_le_bytes());
        out.extend_from_slice(&count16(self.num_internal()).to_le_bytes());
        out.extend_from_slice(&self.input_sem.to_le_bytes());
        out.extend_from_slice(&self.output_sem.to_le_bytes());
        out.extend_from_slice(&self.inputs_mask().to_le_bytes());
        out.extend_from_slice(&self.outputs_mask().to_le_bytes());
        out.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&self.udma_desc_buff_num.to_le_bytes());
        out.extend_from_slice(&self.udma_dummy_start_desc_offset.to_le_bytes());
        for b in &self.buffers {
            b.write(&mut out);
        }
        out
    }

    /// Decode and cross-check a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::VersionMismatch`] for another layout
    /// revision and [`FormatError::Malformed`] if the header disagrees with
    /// the buffer table.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::of(WHAT, buf);
        let version = c.u16()?;
        if version != VERSION {
            return Err(FormatError::VersionMismatch {
                what: WHAT,
                found: u32::from(version),
                expected: u32::from(VERSION),
            });
        }
        let exit_db = c.u16()?;
        let size = c.u32()? as usize;
        let num_threads = c.u32()?;
        let num_buffs = usize::from(c.u16()?);
        let counts = [c.u16()?, c.u16()?, c.u16()?];
        let input_sem = c.u16()?;
        let output_sem = c.u16()?;
        let masks = [c.u16()?, c.u16()?];
        let buffers_offset = c.u32()? as usize;
        let udma_desc_buff_num = c.u32()?;
        let udma_dummy_start_desc_offset = c.u32()?;

        if size != buf.len() || size != buffers_offset + num_buffs * BUFFER_DESC_SIZE {
            return Err(FormatError::malformed(
                WHAT,
                format!("size {size} for {num_buffs} buffers in {} bytes", buf.len()),
            ));
        }
        c.take(buffers_offset.saturating_sub(c.position()))?;
        let buffers = (0..num_buffs)
            .map(|_| BufferDesc::read(&mut c))
            .collect::<Result<Vec<_>>>()?;

        let desc = Self {
            exit_db,
            num_threads,
            input_sem,
            output_sem,
            buffers,
            udma_desc_buff_num,
            udma_dummy_start_desc_offset,
        };
        let derived = [
            count16(desc.num_inputs()),
            count16(desc.num_outputs()),
            count16(desc.num_internal()),
        ];
        if counts != derived || masks != [desc.inputs_mask(), desc.outputs_mask()] {
            return Err(FormatError::malformed(
                WHAT,
                "header counts disagree with buffer table",
            ));
        }
        Ok(desc)
    }
}
