//! Metadata document model.
//!
//! A [`Metadata`] value is everything the runtime needs to load and drive a
//! compute program: memory sizes, the multicast routing tables, the
//! semaphore/doorbell handshake attached to each DMA request, thread entry
//! points and the execution-context contract. Build one with
//! [`MetadataWriter`](crate::MetadataWriter) and read one back with
//! [`read_metadata`](crate::read_metadata).

use std::fmt;

/// Format revision written by this crate. Readers refuse another major.
pub const VERSION_MAJOR: u16 = 2;

/// Minor revision; readers accept any minor of their major.
pub const VERSION_MINOR: u16 = 1;

/// Alignment padding the runtime adds for each of the four DDR regions.
pub const DDR_REGION_PADDING: u64 = 2048;

/// Semaphore operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SemaphoreOpcode {
    /// No operation
    #[default]
    Nop = 0,
    /// Set the semaphore to the value
    Init = 1,
    /// Add the value
    Inc = 2,
    /// Subtract the value
    Dec = 3,
    /// Block until equal to the value
    WaitEq = 4,
    /// Block until greater than or equal to the value
    WaitGe = 5,
    /// Block until non-zero, then decrement
    WaitDec = 6,
}

impl SemaphoreOpcode {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Nop,
            1 => Self::Init,
            2 => Self::Inc,
            3 => Self::Dec,
            4 => Self::WaitEq,
            5 => Self::WaitGe,
            6 => Self::WaitDec,
            _ => return None,
        })
    }
}

/// Whether an operation runs before or after its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SyncPoint {
    /// Before the DMA starts
    #[default]
    Pre = 0,
    /// After the DMA completes
    Post = 1,
}

/// A semaphore operation attached to a DMA request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SemaphoreOp {
    /// Operation
    pub opcode: SemaphoreOpcode,
    /// Semaphore number
    pub sem_num: u16,
    /// Operand
    pub value: u16,
    /// Pre or post transfer
    pub sync: SyncPoint,
    /// Wait for earlier transfers to land before this op
    pub in_sync_fence: bool,
    /// Hold later transfers until this op completes
    pub out_sync_fence: bool,
}

/// Width of a doorbell write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DoorbellWidth {
    /// 1 byte
    Bits8 = 0,
    /// 2 bytes
    Bits16 = 1,
    /// 4 bytes
    #[default]
    Bits32 = 2,
}

impl DoorbellWidth {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Bits8,
            1 => Self::Bits16,
            2 => Self::Bits32,
            _ => return None,
        })
    }

    /// Bytes written.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
            Self::Bits32 => 4,
        }
    }
}

/// A doorbell write issued after a DMA request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoorbellOp {
    /// Write width
    pub width: DoorbellWidth,
    /// Multicast group the write goes through
    pub mc_id: u16,
    /// Byte offset inside the group
    pub offset: u64,
    /// Value written
    pub data: u32,
}

/// Device-side address space of a DMA request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DmaAddrSpace {
    /// Core-local memory reached through a multicast group
    #[default]
    Multicast = 0,
    /// Static shared DDR
    Ddr = 1,
    /// DDR allocated per activation
    DdrDynamicShared = 2,
}

impl DmaAddrSpace {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Multicast,
            1 => Self::Ddr,
            2 => Self::DdrDynamicShared,
            _ => return None,
        })
    }
}

/// Transfer direction seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DmaDirection {
    /// Host to device
    #[default]
    In = 0,
    /// Device to host
    Out = 1,
}

impl DmaDirection {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::In),
            1 => Some(Self::Out),
            _ => None,
        }
    }
}

/// Transaction id meaning "not part of a transaction".
pub const TRANSACTION_ID_NONE: u32 = 0;

/// One host/device transfer and its handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DmaRequest {
    /// Sequence number
    pub num: u16,
    /// Offset in the host buffer
    pub host_offset: u64,
    /// Device address space
    pub dev_addr_space: DmaAddrSpace,
    /// Offset in the device space
    pub dev_offset: u64,
    /// Bytes transferred
    pub size: u32,
    /// Direction
    pub direction: DmaDirection,
    /// Port the request is queued on
    pub port_id: u16,
    /// Multicast group for on-chip targets, 0 otherwise
    pub mc_id: u16,
    /// Semaphore operations, in order
    pub semaphore_ops: Vec<SemaphoreOp>,
    /// Doorbell writes, in order
    pub doorbell_ops: Vec<DoorbellOp>,
    /// Transaction id
    pub transaction_id: u32,
}

/// Core-local memory of a multicast entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum McAddrSpace {
    /// L2TCM
    #[default]
    L2tcm = 0,
    /// VTCM
    Vtcm = 1,
}

impl McAddrSpace {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::L2tcm),
            1 => Some(Self::Vtcm),
            _ => None,
        }
    }
}

/// A multicast group as seen by one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NspMulticastEntry {
    /// Group is resolved at run time
    pub dynamic: bool,
    /// Cores a write to this group reaches
    pub mask: u32,
    /// Bytes covered on this core, 0 if the core is not a member
    pub size: u32,
    /// Memory backing the group
    pub addr_space: McAddrSpace,
    /// Base of the group in that memory
    pub base_offset: u64,
}

/// A multicast group as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostMulticastEntry {
    /// Cores reached
    pub mask: u32,
    /// Bytes covered
    pub size: u32,
}

/// Bits of [`ThreadDescriptor::type_mask`].
pub mod thread_type {
    /// Vector (HVX) thread
    pub const HVX: u8 = 1;
    /// Matrix (HMX) thread
    pub const HMX: u8 = 2;
}

/// A hardware thread the runtime starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadDescriptor {
    /// Start address
    pub entry_point: u64,
    /// [`thread_type`] bits
    pub type_mask: u8,
}

/// Placement of the constants segment on a set of cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstantMapping {
    /// Cores that map the segment
    pub core_mask: u32,
    /// Offset in the constants area
    pub base_offset: u64,
    /// Bytes mapped
    pub size: u32,
}

/// Kind of a registered DMA port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PortType {
    /// Host user I/O
    #[default]
    UserIo = 0,
    /// Peer-to-peer
    P2p = 1,
}

impl PortType {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::UserIo),
            1 => Some(Self::P2p),
            _ => None,
        }
    }
}

/// A registered DMA port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Port {
    /// Port number
    pub id: u16,
    /// Kind
    pub port_type: PortType,
}

/// A run of the L2TCM init image worth copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    /// First byte
    pub start: u64,
    /// One past the last byte
    pub end: u64,
    /// `end - start`
    pub size: u64,
}

/// What the runtime does with the network heap on deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum HeapBehavior {
    /// Release the heap
    #[default]
    Free = 0,
    /// Keep the heap for the next activation
    Retain = 1,
}

impl HeapBehavior {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Free),
            1 => Some(Self::Retain),
            _ => None,
        }
    }
}

/// Whether constants may be cached across activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConstantsCaching {
    /// Reload every activation
    #[default]
    Disabled = 0,
    /// Keep loaded
    Enabled = 1,
}

impl ConstantsCaching {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Disabled),
            1 => Some(Self::Enabled),
            _ => None,
        }
    }
}

/// One slot of the execution-context contract.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecContextField {
    /// Slot name
    pub name: String,
    /// Slot size in bytes
    pub size: u32,
    /// Offset in the context block
    pub offset: u32,
    /// The program cannot run without it
    pub required: bool,
}

/// Execution-context contract of a program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecContext {
    /// Size of the context block
    pub size: u32,
    /// Slots the program uses
    pub fields: Vec<ExecContextField>,
}

/// The metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    /// Format major version
    pub version_major: u16,
    /// Format minor version
    pub version_minor: u16,
    /// Execution-context major version
    pub exec_context_major_version: u16,
    /// Hardware major version
    pub hw_version_major: u16,
    /// Hardware minor version
    pub hw_version_minor: u16,
    /// L2TCM offset of the exit doorbell
    pub exit_doorbell_offset: u64,
    /// Network name
    pub network_name: String,
    /// Cores used
    pub num_nsps: u16,
    /// VTCM bytes per core
    pub vtcm_size: u32,
    /// L2TCM bytes per core
    pub l2tcm_size: u32,
    /// Semaphores declared
    pub num_semaphores: u16,
    /// Initial semaphore values
    pub semaphore_init_state: Vec<u32>,
    /// Length of the L2TCM init image
    pub l2tcm_init_size: u32,
    /// L2TCM init image
    pub l2tcm_init_state: Vec<u8>,
    /// Non-zero runs of the init image
    pub l2tcm_init_regions: Vec<Region>,
    /// Static shared DDR bytes
    pub static_shared_ddr_size: u64,
    /// Static shared DDR has ECC
    pub static_shared_ddr_ecc: bool,
    /// Dynamic shared DDR bytes
    pub dynamic_shared_ddr_size: u64,
    /// Dynamic shared DDR has ECC
    pub dynamic_shared_ddr_ecc: bool,
    /// Static constants bytes
    pub static_constants_size: u64,
    /// Static constants have ECC
    pub static_constants_ecc: bool,
    /// Dynamic constants bytes
    pub dynamic_constants_size: u64,
    /// Dynamic constants have ECC
    pub dynamic_constants_ecc: bool,
    /// VTCM must be one contiguous page
    pub single_vtcm_page: bool,
    /// Multicast table of each core
    pub nsp_multicast_tables: Vec<Vec<NspMulticastEntry>>,
    /// Host multicast table
    pub host_multicast_table: Vec<HostMulticastEntry>,
    /// DMA requests
    pub dma_requests: Vec<DmaRequest>,
    /// Threads started on each core
    pub thread_descriptors: Vec<ThreadDescriptor>,
    /// Constant segment placement
    pub constant_mappings: Vec<ConstantMapping>,
    /// Registered ports
    pub ports: Vec<Port>,
    /// Network heap bytes
    pub network_heap_size: u64,
    /// Heap handling on deactivate
    pub heap_behavior: HeapBehavior,
    /// Constants caching
    pub constants_caching: ConstantsCaching,
    /// HVX threads use floating point
    pub has_hvx_fp: bool,
    /// HMX threads use floating point
    pub has_hmx_fp: bool,
    /// Fields a reader must understand
    pub required_fields: Vec<String>,
    /// Legacy size hint, twice the encoded size
    pub raw_struct_version_length: u64,
    /// Execution-context contract
    pub exec_context: ExecContext,
}

impl Metadata {
    /// DDR the host must allocate for one activation.
    #[must_use]
    pub fn total_required_memory(&self) -> u64 {
        self.static_shared_ddr_size
            + self.static_constants_size
            + self.dynamic_shared_ddr_size
            + self.dynamic_constants_size
            + 4 * DDR_REGION_PADDING
    }

    /// True if `name` is in the required-fields list.
    #[must_use]
    pub fn requires(&self, name: &str) -> bool {
        self.required_fields.iter().any(|f| f == name)
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

impl fmt::Display for SemaphoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} sem {} value {}",
            self.sync, self.opcode, self.sem_num, self.value
        )?;
        if self.in_sync_fence {
            write!(f, " in-fence")?;
        }
        if self.out_sync_fence {
            write!(f, " out-fence")?;
        }
        Ok(())
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Network:            {}", self.network_name)?;
        writeln!(
            f,
            "Format:             {}.{} (exec context {})",
            self.version_major, self.version_minor, self.exec_context_major_version
        )?;
        writeln!(
            f,
            "Hardware:           {}.{}",
            self.hw_version_major, self.hw_version_minor
        )?;
        writeln!(f, "Cores:              {}", self.num_nsps)?;
        writeln!(f, "VTCM:               {} bytes", self.vtcm_size)?;
        writeln!(f, "L2TCM:              {} bytes", self.l2tcm_size)?;
        writeln!(
            f,
            "L2TCM init:         {} bytes in {} regions",
            self.l2tcm_init_size,
            self.l2tcm_init_regions.len()
        )?;
        writeln!(f, "Exit doorbell:      0x{:x}", self.exit_doorbell_offset)?;
        writeln!(
            f,
            "Semaphores:         {} {:?}",
            self.num_semaphores, self.semaphore_init_state
        )?;
        writeln!(
            f,
            "Shared DDR:         static {} (ECC {}), dynamic {} (ECC {})",
            self.static_shared_ddr_size,
            yes_no(self.static_shared_ddr_ecc),
            self.dynamic_shared_ddr_size,
            yes_no(self.dynamic_shared_ddr_ecc)
        )?;
        writeln!(
            f,
            "Constants:          static {} (ECC {}), dynamic {} (ECC {})",
            self.static_constants_size,
            yes_no(self.static_constants_ecc),
            self.dynamic_constants_size,
            yes_no(self.dynamic_constants_ecc)
        )?;
        writeln!(f, "Total DDR:          {} bytes", self.total_required_memory())?;
        writeln!(
            f,
            "Heap:               {} bytes ({:?} on deactivate)",
            self.network_heap_size, self.heap_behavior
        )?;
        writeln!(f, "Single VTCM page:   {}", yes_no(self.single_vtcm_page))?;
        writeln!(
            f,
            "Floating point:     HVX {}, HMX {}",
            yes_no(self.has_hvx_fp),
            yes_no(self.has_hmx_fp)
        )?;

        writeln!(f, "Host multicast:")?;
        for (id, e) in self.host_multicast_table.iter().enumerate() {
            writeln!(f, "  [{id:>2}] mask 0x{:04x} size {}", e.mask, e.size)?;
        }
        for (core, table) in self.nsp_multicast_tables.iter().enumerate() {
            writeln!(f, "Core {core} multicast:")?;
            for (id, e) in table.iter().enumerate() {
                writeln!(
                    f,
                    "  [{id:>2}] mask 0x{:04x} size {} {:?} +0x{:x}{}",
                    e.mask,
                    e.size,
                    e.addr_space,
                    e.base_offset,
                    if e.dynamic { " dynamic" } else { "" }
                )?;
            }
        }

        writeln!(f, "DMA requests:")?;
        for r in &self.dma_requests {
            writeln!(
                f,
                "  #{} {:?} port {} {:?}+0x{:x} mc {} size {} host +0x{:x}",
                r.num,
                r.direction,
                r.port_id,
                r.dev_addr_space,
                r.dev_offset,
                r.mc_id,
                r.size,
                r.host_offset
            )?;
            for op in &r.semaphore_ops {
                writeln!(f, "      {op}")?;
            }
            for op in &r.doorbell_ops {
                writeln!(
                    f,
                    "      doorbell mc {} +0x{:x} <- {} ({} bytes)",
                    op.mc_id,
                    op.offset,
                    op.data,
                    op.width.bytes()
                )?;
            }
        }

        writeln!(f, "Threads:")?;
        for t in &self.thread_descriptors {
            let kind = match t.type_mask {
                thread_type::HVX => "HVX",
                thread_type::HMX => "HMX",
                _ => "mixed",
            };
            writeln!(f, "  {kind} entry 0x{:x}", t.entry_point)?;
        }
        for m in &self.constant_mappings {
            writeln!(
                f,
                "Constants map:      mask 0x{:04x} +0x{:x} size {}",
                m.core_mask, m.base_offset, m.size
            )?;
        }
        for p in &self.ports {
            writeln!(f, "Port:               {} {:?}", p.id, p.port_type)?;
        }
        writeln!(
            f,
            "Exec context:       {} bytes, {} fields",
            self.exec_context.size,
            self.exec_context.fields.len()
        )?;
        write!(f, "Required fields:    {}", self.required_fields.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_memory_includes_padding() {
        let md = Metadata {
            static_shared_ddr_size: 1000,
            static_constants_size: 200,
            dynamic_shared_ddr_size: 30,
            dynamic_constants_size: 4,
            ..Metadata::default()
        };
        assert_eq!(md.total_required_memory(), 1234 + 8192);
    }

    #[test]
    fn doorbell_widths() {
        assert_eq!(DoorbellWidth::Bits8.bytes(), 1);
        assert_eq!(DoorbellWidth::Bits32.bytes(), 4);
        assert_eq!(DoorbellWidth::from_u8(1), Some(DoorbellWidth::Bits16));
        assert_eq!(DoorbellWidth::from_u8(3), None);
    }

    #[test]
    fn display_lists_requests() {
        let md = Metadata {
            network_name: "net".into(),
            dma_requests: vec![DmaRequest {
                num: 3,
                port_id: 100,
                semaphore_ops: vec![SemaphoreOp {
                    opcode: SemaphoreOpcode::WaitEq,
                    value: 2,
                    ..SemaphoreOp::default()
                }],
                ..DmaRequest::default()
            }],
            ..Metadata::default()
        };
        let text = md.to_string();
        assert!(text.contains("Network:            net"));
        assert!(text.contains("#3 In port 100"));
        assert!(text.contains("Pre WaitEq sem 0 value 2"));
    }
}
