//! Metadata schema.
//!
//! Field tags, the schema tree used to verify a decoded record, and the
//! mapping between [`Metadata`] and its wire record. Field names in the
//! schema are the names used by the required-fields introspection list,
//! joined with `->` from the root `Metadata`.

use crate::error::{FormatError, Result};
use crate::metadata::{
    ConstantMapping, ConstantsCaching, DmaAddrSpace, DmaDirection, DmaRequest, DoorbellOp,
    DoorbellWidth, ExecContext, ExecContextField, HeapBehavior, HostMulticastEntry, McAddrSpace,
    Metadata, NspMulticastEntry, Port, PortType, Region, SemaphoreOp, SemaphoreOpcode, SyncPoint,
    ThreadDescriptor,
};
use crate::wire::{Kind, Record, RecordWriter};

const WHAT: &str = "metadata";

/// Root name of every introspection path.
pub const ROOT: &str = "Metadata";

/// Features that have no field of their own but that a reader must opt in to.
pub const FEATURES: &[&str] = &["Metadata->dynamicSharedDDRSupported"];

/// Introspection names used by the writer.
pub mod field {
    /// The required-fields list itself
    pub const REQUIRED_FIELDS: &str = "Metadata->requiredFields";
    /// Network name
    pub const NETWORK_NAME: &str = "Metadata->networkName";
    /// Execution-context contract
    pub const EXEC_CONTEXT: &str = "Metadata->execContext";
    /// Dynamic shared DDR
    pub const DYNAMIC_SHARED_DDR: &str = "Metadata->dynamicSharedDDRSupported";
    /// Heap handling on deactivate
    pub const HEAP_BEHAVIOR: &str = "Metadata->networkHeapBehavior";
    /// Constants caching
    pub const CONSTANTS_CACHING: &str = "Metadata->QNNConfig->Constants";
}

/// One field of a schema record.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Tag on the wire
    pub tag: u16,
    /// Introspection name
    pub name: &'static str,
    /// Encoding
    pub kind: Kind,
    /// Verification fails when absent
    pub mandatory: bool,
    /// Schema of nested records
    pub nested: Option<&'static [FieldSpec]>,
}

const fn spec(tag: u16, name: &'static str, kind: Kind) -> FieldSpec {
    FieldSpec {
        tag,
        name,
        kind,
        mandatory: false,
        nested: None,
    }
}

const fn must(tag: u16, name: &'static str, kind: Kind) -> FieldSpec {
    FieldSpec {
        tag,
        name,
        kind,
        mandatory: true,
        nested: None,
    }
}

const fn tree(tag: u16, name: &'static str, kind: Kind, nested: &'static [FieldSpec]) -> FieldSpec {
    FieldSpec {
        tag,
        name,
        kind,
        mandatory: false,
        nested: Some(nested),
    }
}

mod tag {
    pub const VERSION_MAJOR: u16 = 1;
    pub const VERSION_MINOR: u16 = 2;
    pub const EXEC_CONTEXT_MAJOR: u16 = 3;
    pub const HW_VERSION_MAJOR: u16 = 4;
    pub const HW_VERSION_MINOR: u16 = 5;
    pub const EXIT_DOORBELL_OFFSET: u16 = 6;
    pub const NETWORK_NAME: u16 = 7;
    pub const NUM_NSPS: u16 = 8;
    pub const VTCM_SIZE: u16 = 9;
    pub const L2TCM_SIZE: u16 = 10;
    pub const NUM_SEMAPHORES: u16 = 11;
    pub const SEMAPHORE_INIT: u16 = 12;
    pub const L2TCM_INIT_SIZE: u16 = 13;
    pub const L2TCM_INIT_STATE: u16 = 14;
    pub const L2TCM_INIT_REGIONS: u16 = 15;
    pub const STATIC_DDR_SIZE: u16 = 16;
    pub const STATIC_DDR_ECC: u16 = 17;
    pub const DYNAMIC_DDR_SIZE: u16 = 18;
    pub const DYNAMIC_DDR_ECC: u16 = 19;
    pub const STATIC_CONST_SIZE: u16 = 20;
    pub const STATIC_CONST_ECC: u16 = 21;
    pub const DYNAMIC_CONST_SIZE: u16 = 22;
    pub const DYNAMIC_CONST_ECC: u16 = 23;
    pub const SINGLE_VTCM_PAGE: u16 = 24;
    pub const NSP_MC_TABLES: u16 = 25;
    pub const HOST_MC_TABLE: u16 = 26;
    pub const DMA_REQUESTS: u16 = 27;
    pub const THREADS: u16 = 28;
    pub const CONSTANT_MAPPINGS: u16 = 29;
    pub const PORTS: u16 = 30;
    pub const HEAP_SIZE: u16 = 31;
    pub const HEAP_BEHAVIOR: u16 = 32;
    pub const QNN_CONFIG: u16 = 33;
    pub const HAS_HVX_FP: u16 = 34;
    pub const HAS_HMX_FP: u16 = 35;
    pub const REQUIRED_FIELDS: u16 = 36;
    pub const RAW_LENGTH: u16 = 37;
    pub const EXEC_CONTEXT: u16 = 38;

    // Nested records restart at 1.
    pub const A: u16 = 1;
    pub const B: u16 = 2;
    pub const C: u16 = 3;
    pub const D: u16 = 4;
    pub const E: u16 = 5;
    pub const F: u16 = 6;
    pub const G: u16 = 7;
    pub const H: u16 = 8;
    pub const I: u16 = 9;
    pub const J: u16 = 10;
    pub const K: u16 = 11;
}

const REGION: &[FieldSpec] = &[
    must(tag::A, "start", Kind::U64),
    must(tag::B, "end", Kind::U64),
    must(tag::C, "size", Kind::U64),
];

const NSP_MC_ENTRY: &[FieldSpec] = &[
    spec(tag::A, "dynamic", Kind::Bool),
    must(tag::B, "mask", Kind::U32),
    must(tag::C, "size", Kind::U32),
    spec(tag::D, "addrSpace", Kind::U8),
    spec(tag::E, "baseAddrOffset", Kind::U64),
];

const NSP_MC_TABLE: &[FieldSpec] = &[tree(
    tag::A,
    "multicastEntries",
    Kind::RecordList,
    NSP_MC_ENTRY,
)];

const HOST_MC_ENTRY: &[FieldSpec] = &[
    must(tag::A, "mask", Kind::U32),
    must(tag::B, "size", Kind::U32),
];

const HOST_MC_TABLE: &[FieldSpec] = &[tree(
    tag::A,
    "multicastEntries",
    Kind::RecordList,
    HOST_MC_ENTRY,
)];

const SEM_OP: &[FieldSpec] = &[
    must(tag::A, "semOp", Kind::U8),
    must(tag::B, "semNum", Kind::U16),
    spec(tag::C, "semValue", Kind::U16),
    spec(tag::D, "preOrPost", Kind::U8),
    spec(tag::E, "inSyncFence", Kind::Bool),
    spec(tag::F, "outSyncFence", Kind::Bool),
];

const DB_OP: &[FieldSpec] = &[
    must(tag::A, "opSize", Kind::U8),
    spec(tag::B, "mcId", Kind::U16),
    must(tag::C, "offset", Kind::U64),
    spec(tag::D, "data", Kind::U32),
];

const DMA_REQUEST: &[FieldSpec] = &[
    must(tag::A, "num", Kind::U16),
    spec(tag::B, "hostOffset", Kind::U64),
    must(tag::C, "devAddrSpace", Kind::U8),
    spec(tag::D, "devOffset", Kind::U64),
    must(tag::E, "size", Kind::U32),
    must(tag::F, "inOut", Kind::U8),
    spec(tag::G, "portId", Kind::U16),
    spec(tag::H, "mcId", Kind::U16),
    tree(tag::I, "semaphoreOps", Kind::RecordList, SEM_OP),
    tree(tag::J, "doorbellOps", Kind::RecordList, DB_OP),
    spec(tag::K, "transactionId", Kind::U32),
];

const THREAD: &[FieldSpec] = &[
    must(tag::A, "entryPoint", Kind::U64),
    must(tag::B, "typeMask", Kind::U8),
];

const CONSTANT_MAPPING: &[FieldSpec] = &[
    must(tag::A, "coreMask", Kind::U32),
    spec(tag::B, "constantDataBaseOffset", Kind::U64),
    must(tag::C, "size", Kind::U32),
];

const PORT: &[FieldSpec] = &[
    must(tag::A, "portId", Kind::U16),
    spec(tag::B, "portType", Kind::U8),
];

const QNN_CONFIG: &[FieldSpec] = &[spec(tag::A, "Constants", Kind::U8)];

const EXEC_CONTEXT_FIELD: &[FieldSpec] = &[
    must(tag::A, "name", Kind::Str),
    must(tag::B, "size", Kind::U32),
    must(tag::C, "offset", Kind::U32),
    spec(tag::D, "required", Kind::Bool),
];

const EXEC_CONTEXT: &[FieldSpec] = &[
    must(tag::A, "execContextSize", Kind::U32),
    tree(tag::B, "fields", Kind::RecordList, EXEC_CONTEXT_FIELD),
];

/// Root record of the metadata document.
pub const METADATA: &[FieldSpec] = &[
    must(tag::VERSION_MAJOR, "versionMajor", Kind::U16),
    must(tag::VERSION_MINOR, "versionMinor", Kind::U16),
    spec(tag::EXEC_CONTEXT_MAJOR, "execContextMajorVersion", Kind::U16),
    must(tag::HW_VERSION_MAJOR, "hwVersionMajor", Kind::U16),
    must(tag::HW_VERSION_MINOR, "hwVersionMinor", Kind::U16),
    must(tag::EXIT_DOORBELL_OFFSET, "exitDoorbellOffset", Kind::U64),
    spec(tag::NETWORK_NAME, "networkName", Kind::Str),
    must(tag::NUM_NSPS, "numNSPs", Kind::U16),
    must(tag::VTCM_SIZE, "VTCMSize", Kind::U32),
    must(tag::L2TCM_SIZE, "L2TCMSize", Kind::U32),
    spec(tag::NUM_SEMAPHORES, "numSemaphores", Kind::U16),
    spec(tag::SEMAPHORE_INIT, "semaphoreInitState", Kind::U32List),
    spec(tag::L2TCM_INIT_SIZE, "L2TCMInitSize", Kind::U32),
    spec(tag::L2TCM_INIT_STATE, "L2TCMInitState", Kind::Bytes),
    tree(
        tag::L2TCM_INIT_REGIONS,
        "L2TCMInitStateNonZeroRegions",
        Kind::RecordList,
        REGION,
    ),
    spec(tag::STATIC_DDR_SIZE, "staticSharedDDRSize", Kind::U64),
    spec(tag::STATIC_DDR_ECC, "staticSharedDDRECCEnabled", Kind::Bool),
    spec(tag::DYNAMIC_DDR_SIZE, "dynamicSharedDDRSize", Kind::U64),
    spec(tag::DYNAMIC_DDR_ECC, "dynamicSharedDDRECCEnabled", Kind::Bool),
    spec(tag::STATIC_CONST_SIZE, "staticConstantsSize", Kind::U64),
    spec(tag::STATIC_CONST_ECC, "staticConstantsECCEnabled", Kind::Bool),
    spec(tag::DYNAMIC_CONST_SIZE, "dynamicConstantsSize", Kind::U64),
    spec(tag::DYNAMIC_CONST_ECC, "dynamicConstantsECCEnabled", Kind::Bool),
    spec(tag::SINGLE_VTCM_PAGE, "singleVTCMPage", Kind::Bool),
    tree(tag::NSP_MC_TABLES, "nspMulticastTables", Kind::RecordList, NSP_MC_TABLE),
    tree(tag::HOST_MC_TABLE, "hostMulticastTable", Kind::Record, HOST_MC_TABLE),
    tree(tag::DMA_REQUESTS, "dmaRequests", Kind::RecordList, DMA_REQUEST),
    tree(tag::THREADS, "threadDescriptors", Kind::RecordList, THREAD),
    tree(
        tag::CONSTANT_MAPPINGS,
        "constantMappings",
        Kind::RecordList,
        CONSTANT_MAPPING,
    ),
    tree(tag::PORTS, "portTable", Kind::RecordList, PORT),
    spec(tag::HEAP_SIZE, "networkHeapSize", Kind::U64),
    spec(tag::HEAP_BEHAVIOR, "networkHeapBehavior", Kind::U8),
    tree(tag::QNN_CONFIG, "QNNConfig", Kind::Record, QNN_CONFIG),
    spec(tag::HAS_HVX_FP, "hasHvxFP", Kind::Bool),
    spec(tag::HAS_HMX_FP, "hasHmxFP", Kind::Bool),
    spec(tag::REQUIRED_FIELDS, "requiredFields", Kind::StrList),
    spec(tag::RAW_LENGTH, "raw_struct_version_length", Kind::U64),
    tree(tag::EXEC_CONTEXT, "execContext", Kind::Record, EXEC_CONTEXT),
];

/// True if `name` is a schema path or a known feature.
///
/// Paths start at [`ROOT`] and separate nested fields with `->`, for
/// example `Metadata->hostMulticastTable->multicastEntries->mask`.
#[must_use]
pub fn is_known_field(name: &str) -> bool {
    if FEATURES.contains(&name) {
        return true;
    }
    let mut parts = name.split("->");
    if parts.next() != Some(ROOT) {
        return false;
    }
    let mut specs = METADATA;
    let mut matched = false;
    for part in parts {
        let Some(found) = specs.iter().find(|s| s.name == part) else {
            return false;
        };
        matched = true;
        specs = found.nested.unwrap_or(&[]);
    }
    matched
}

/// Verify a record against a schema, recursing into nested records.
///
/// Unknown tags are accepted and ignored. Known tags must carry their
/// schema kind, appear once, and mandatory fields must be present.
///
/// # Errors
///
/// Returns [`FormatError::Malformed`] describing the first violation.
pub fn verify(record: &Record<'_>, specs: &[FieldSpec], path: &str) -> Result<()> {
    let mut seen: Vec<u16> = Vec::with_capacity(record.fields().len());
    for f in record.fields() {
        let Some(s) = specs.iter().find(|s| s.tag == f.tag) else {
            continue;
        };
        if seen.contains(&f.tag) {
            return Err(FormatError::malformed(
                WHAT,
                format!("{path}->{} appears twice", s.name),
            ));
        }
        seen.push(f.tag);
        if f.kind != s.kind {
            return Err(FormatError::malformed(
                WHAT,
                format!("{path}->{}: expected {:?}, found {:?}", s.name, s.kind, f.kind),
            ));
        }
        if let Some(nested) = s.nested {
            let child = format!("{path}->{}", s.name);
            match f.kind {
                Kind::Record => verify(&f.as_record()?, nested, &child)?,
                Kind::RecordList => {
                    for r in f.as_records()? {
                        verify(&r, nested, &child)?;
                    }
                }
                _ => {}
            }
        }
    }
    if let Some(missing) = specs
        .iter()
        .find(|s| s.mandatory && !seen.contains(&s.tag))
    {
        return Err(FormatError::malformed(
            WHAT,
            format!("{path}->{} is missing", missing.name),
        ));
    }
    Ok(())
}

/// Encode a document as its root record.
#[must_use]
pub fn encode(md: &Metadata) -> Vec<u8> {
    let mut w = RecordWriter::new();
    w.u16(tag::VERSION_MAJOR, md.version_major)
        .u16(tag::VERSION_MINOR, md.version_minor)
        .u16(tag::EXEC_CONTEXT_MAJOR, md.exec_context_major_version)
        .u16(tag::HW_VERSION_MAJOR, md.hw_version_major)
        .u16(tag::HW_VERSION_MINOR, md.hw_version_minor)
        .u64(tag::EXIT_DOORBELL_OFFSET, md.exit_doorbell_offset)
        .str(tag::NETWORK_NAME, &md.network_name)
        .u16(tag::NUM_NSPS, md.num_nsps)
        .u32(tag::VTCM_SIZE, md.vtcm_size)
        .u32(tag::L2TCM_SIZE, md.l2tcm_size)
        .u16(tag::NUM_SEMAPHORES, md.num_semaphores)
        .u32_list(tag::SEMAPHORE_INIT, &md.semaphore_init_state)
        .u32(tag::L2TCM_INIT_SIZE, md.l2tcm_init_size)
        .bytes(tag::L2TCM_INIT_STATE, &md.l2tcm_init_state)
        .record_list(
            tag::L2TCM_INIT_REGIONS,
            md.l2tcm_init_regions.iter().map(|r| {
                let mut w = RecordWriter::new();
                w.u64(tag::A, r.start).u64(tag::B, r.end).u64(tag::C, r.size);
                w
            }),
        )
        .u64(tag::STATIC_DDR_SIZE, md.static_shared_ddr_size)
        .bool(tag::STATIC_DDR_ECC, md.static_shared_ddr_ecc)
        .u64(tag::DYNAMIC_DDR_SIZE, md.dynamic_shared_ddr_size)
        .bool(tag::DYNAMIC_DDR_ECC, md.dynamic_shared_ddr_ecc)
        .u64(tag::STATIC_CONST_SIZE, md.static_constants_size)
        .bool(tag::STATIC_CONST_ECC, md.static_constants_ecc)
        .u64(tag::DYNAMIC_CONST_SIZE, md.dynamic_constants_size)
        .bool(tag::DYNAMIC_CONST_ECC, md.dynamic_constants_ecc)
        .bool(tag::SINGLE_VTCM_PAGE, md.single_vtcm_page)
        .record_list(
            tag::NSP_MC_TABLES,
            md.nsp_multicast_tables.iter().map(|t| {
                let mut w = RecordWriter::new();
                w.record_list(tag::A, t.iter().map(encode_nsp_entry));
                w
            }),
        );

    let mut host = RecordWriter::new();
    host.record_list(
        tag::A,
        md.host_multicast_table.iter().map(|e| {
            let mut w = RecordWriter::new();
            w.u32(tag::A, e.mask).u32(tag::B, e.size);
            w
        }),
    );
    w.record(tag::HOST_MC_TABLE, host)
        .record_list(tag::DMA_REQUESTS, md.dma_requests.iter().map(encode_dma))
        .record_list(
            tag::THREADS,
            md.thread_descriptors.iter().map(|t| {
                let mut w = RecordWriter::new();
                w.u64(tag::A, t.entry_point).u8(tag::B, t.type_mask);
                w
            }),
        )
        .record_list(
            tag::CONSTANT_MAPPINGS,
            md.constant_mappings.iter().map(|m| {
                let mut w = RecordWriter::new();
                w.u32(tag::A, m.core_mask)
                    .u64(tag::B, m.base_offset)
                    .u32(tag::C, m.size);
                w
            }),
        )
        .record_list(
            tag::PORTS,
            md.ports.iter().map(|p| {
                let mut w = RecordWriter::new();
                w.u16(tag::A, p.id).u8(tag::B, p.port_type as u8);
                w
            }),
        )
        .u64(tag::HEAP_SIZE, md.network_heap_size)
        .u8(tag::HEAP_BEHAVIOR, md.heap_behavior as u8);

    let mut qnn = RecordWriter::new();
    qnn.u8(tag::A, md.constants_caching as u8);
    w.record(tag::QNN_CONFIG, qnn)
        .bool(tag::HAS_HVX_FP, md.has_hvx_fp)
        .bool(tag::HAS_HMX_FP, md.has_hmx_fp)
        .str_list(tag::REQUIRED_FIELDS, &md.required_fields)
        .u64(tag::RAW_LENGTH, md.raw_struct_version_length)
        .record(tag::EXEC_CONTEXT, encode_exec_context(&md.exec_context));
    w.finish()
}

fn encode_nsp_entry(e: &NspMulticastEntry) -> RecordWriter {
    let mut w = RecordWriter::new();
    w.bool(tag::A, e.dynamic)
        .u32(tag::B, e.mask)
        .u32(tag::C, e.size)
        .u8(tag::D, e.addr_space as u8)
        .u64(tag::E, e.base_offset);
    w
}

fn encode_dma(r: &DmaRequest) -> RecordWriter {
    let mut w = RecordWriter::new();
    w.u16(tag::A, r.num)
        .u64(tag::B, r.host_offset)
        .u8(tag::C, r.dev_addr_space as u8)
        .u64(tag::D, r.dev_offset)
        .u32(tag::E, r.size)
        .u8(tag::F, r.direction as u8)
        .u16(tag::G, r.port_id)
        .u16(tag::H, r.mc_id)
        .record_list(
            tag::I,
            r.semaphore_ops.iter().map(|op| {
                let mut w = RecordWriter::new();
                w.u8(tag::A, op.opcode as u8)
                    .u16(tag::B, op.sem_num)
                    .u16(tag::C, op.value)
                    .u8(tag::D, op.sync as u8)
                    .bool(tag::E, op.in_sync_fence)
                    .bool(tag::F, op.out_sync_fence);
                w
            }),
        )
        .record_list(
            tag::J,
            r.doorbell_ops.iter().map(|op| {
                let mut w = RecordWriter::new();
                w.u8(tag::A, op.width as u8)
                    .u16(tag::B, op.mc_id)
                    .u64(tag::C, op.offset)
                    .u32(tag::D, op.data);
                w
            }),
        )
        .u32(tag::K, r.transaction_id);
    w
}

/// Encode an execution-context contract as a record.
#[must_use]
pub fn encode_exec_context(ctx: &ExecContext) -> RecordWriter {
    let mut w = RecordWriter::new();
    w.u32(tag::A, ctx.size).record_list(
        tag::B,
        ctx.fields.iter().map(|f| {
            let mut w = RecordWriter::new();
            w.str(tag::A, &f.name)
                .u32(tag::B, f.size)
                .u32(tag::C, f.offset)
                .bool(tag::D, f.required);
            w
        }),
    );
    w
}

fn enum_value<T>(v: u8, parse: fn(u8) -> Option<T>, name: &str) -> Result<T> {
    parse(v).ok_or_else(|| FormatError::malformed(WHAT, format!("{name}: unknown value {v}")))
}

/// Decode a verified root record.
///
/// # Errors
///
/// Returns [`FormatError::Malformed`] if an enumerated field holds a value
/// this reader does not define.
pub fn decode(r: &Record<'_>) -> Result<Metadata> {
    let l2tcm_init_regions = r
        .records(tag::L2TCM_INIT_REGIONS)?
        .iter()
        .map(|x| {
            Ok(Region {
                start: x.u64(tag::A)?,
                end: x.u64(tag::B)?,
                size: x.u64(tag::C)?,
            })
        })
        .collect::<Result<_>>()?;

    let nsp_multicast_tables = r
        .records(tag::NSP_MC_TABLES)?
        .iter()
        .map(|t| {
            t.records(tag::A)?
                .iter()
                .map(|e| {
                    Ok(NspMulticastEntry {
                        dynamic: e.bool(tag::A)?,
                        mask: e.u32(tag::B)?,
                        size: e.u32(tag::C)?,
                        addr_space: enum_value(e.u8(tag::D)?, McAddrSpace::from_u8, "addrSpace")?,
                        base_offset: e.u64(tag::E)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<_>>()?;

    let host_multicast_table = match r.record(tag::HOST_MC_TABLE)? {
        Some(t) => t
            .records(tag::A)?
            .iter()
            .map(|e| {
                Ok(HostMulticastEntry {
                    mask: e.u32(tag::A)?,
                    size: e.u32(tag::B)?,
                })
            })
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };

    let dma_requests = r
        .records(tag::DMA_REQUESTS)?
        .iter()
        .map(decode_dma)
        .collect::<Result<_>>()?;

    let thread_descriptors = r
        .records(tag::THREADS)?
        .iter()
        .map(|t| {
            Ok(ThreadDescriptor {
                entry_point: t.u64(tag::A)?,
                type_mask: t.u8(tag::B)?,
            })
        })
        .collect::<Result<_>>()?;

    let constant_mappings = r
        .records(tag::CONSTANT_MAPPINGS)?
        .iter()
        .map(|m| {
            Ok(ConstantMapping {
                core_mask: m.u32(tag::A)?,
                base_offset: m.u64(tag::B)?,
                size: m.u32(tag::C)?,
            })
        })
        .collect::<Result<_>>()?;

    let ports = r
        .records(tag::PORTS)?
        .iter()
        .map(|p| {
            Ok(Port {
                id: p.u16(tag::A)?,
                port_type: enum_value(p.u8(tag::B)?, PortType::from_u8, "portType")?,
            })
        })
        .collect::<Result<_>>()?;

    let constants_caching = match r.record(tag::QNN_CONFIG)? {
        Some(q) => enum_value(q.u8(tag::A)?, ConstantsCaching::from_u8, "Constants")?,
        None => ConstantsCaching::default(),
    };

    let exec_context = match r.record(tag::EXEC_CONTEXT)? {
        Some(c) => decode_exec_context(&c)?,
        None => ExecContext::default(),
    };

    Ok(Metadata {
        version_major: r.u16(tag::VERSION_MAJOR)?,
        version_minor: r.u16(tag::VERSION_MINOR)?,
        exec_context_major_version: r.u16(tag::EXEC_CONTEXT_MAJOR)?,
        hw_version_major: r.u16(tag::HW_VERSION_MAJOR)?,
        hw_version_minor: r.u16(tag::HW_VERSION_MINOR)?,
        exit_doorbell_offset: r.u64(tag::EXIT_DOORBELL_OFFSET)?,
        network_name: r.str(tag::NETWORK_NAME)?.to_owned(),
        num_nsps: r.u16(tag::NUM_NSPS)?,
        vtcm_size: r.u32(tag::VTCM_SIZE)?,
        l2tcm_size: r.u32(tag::L2TCM_SIZE)?,
        num_semaphores: r.u16(tag::NUM_SEMAPHORES)?,
        semaphore_init_state: r.u32_list(tag::SEMAPHORE_INIT)?,
        l2tcm_init_size: r.u32(tag::L2TCM_INIT_SIZE)?,
        l2tcm_init_state: r.bytes(tag::L2TCM_INIT_STATE)?.to_vec(),
        l2tcm_init_regions,
        static_shared_ddr_size: r.u64(tag::STATIC_DDR_SIZE)?,
        static_shared_ddr_ecc: r.bool(tag::STATIC_DDR_ECC)?,
        dynamic_shared_ddr_size: r.u64(tag::DYNAMIC_DDR_SIZE)?,
        dynamic_shared_ddr_ecc: r.bool(tag::DYNAMIC_DDR_ECC)?,
        static_constants_size: r.u64(tag::STATIC_CONST_SIZE)?,
        static_constants_ecc: r.bool(tag::STATIC_CONST_ECC)?,
        dynamic_constants_size: r.u64(tag::DYNAMIC_CONST_SIZE)?,
        dynamic_constants_ecc: r.bool(tag::DYNAMIC_CONST_ECC)?,
        single_vtcm_page: r.bool(tag::SINGLE_VTCM_PAGE)?,
        nsp_multicast_tables,
        host_multicast_table,
        dma_requests,
        thread_descriptors,
        constant_mappings,
        ports,
        network_heap_size: r.u64(tag::HEAP_SIZE)?,
        heap_behavior: enum_value(
            r.u8(tag::HEAP_BEHAVIOR)?,
            HeapBehavior::from_u8,
            "networkHeapBehavior",
        )?,
        constants_caching,
        has_hvx_fp: r.bool(tag::HAS_HVX_FP)?,
        has_hmx_fp: r.bool(tag::HAS_HMX_FP)?,
        required_fields: r
            .str_list(tag::REQUIRED_FIELDS)?
            .into_iter()
            .map(str::to_owned)
            .collect(),
        raw_struct_version_length: r.u64(tag::RAW_LENGTH)?,
        exec_context,
    })
}

/// Format version of a verified root record.
///
/// # Errors
///
/// Returns an error if the version fields have the wrong kind.
pub fn version_of(r: &Record<'_>) -> Result<(u16, u16)> {
    Ok((r.u16(tag::VERSION_MAJOR)?, r.u16(tag::VERSION_MINOR)?))
}

fn decode_dma(r: &Record<'_>) -> Result<DmaRequest> {
    let semaphore_ops = r
        .records(tag::I)?
        .iter()
        .map(|op| {
            Ok(SemaphoreOp {
                opcode: enum_value(op.u8(tag::A)?, SemaphoreOpcode::from_u8, "semOp")?,
                sem_num: op.u16(tag::B)?,
                value: op.u16(tag::C)?,
                sync: if op.u8(tag::D)? == 0 {
                    SyncPoint::Pre
                } else {
                    SyncPoint::Post
                },
                in_sync_fence: op.bool(tag::E)?,
                out_sync_fence: op.bool(tag::F)?,
            })
        })
        .collect::<Result<_>>()?;
    let doorbell_ops = r
        .records(tag::J)?
        .iter()
        .map(|op| {
            Ok(DoorbellOp {
                width: enum_value(op.u8(tag::A)?, DoorbellWidth::from_u8, "opSize")?,
                mc_id: op.u16(tag::B)?,
                offset: op.u64(tag::C)?,
                data: op.u32(tag::D)?,
            })
        })
        .collect::<Result<_>>()?;
    Ok(DmaRequest {
        num: r.u16(tag::A)?,
        host_offset: r.u64(tag::B)?,
        dev_addr_space: enum_value(r.u8(tag::C)?, DmaAddrSpace::from_u8, "devAddrSpace")?,
        dev_offset: r.u64(tag::D)?,
        size: r.u32(tag::E)?,
        direction: enum_value(r.u8(tag::F)?, DmaDirection::from_u8, "inOut")?,
        port_id: r.u16(tag::G)?,
        mc_id: r.u16(tag::H)?,
        semaphore_ops,
        doorbell_ops,
        transaction_id: r.u32(tag::K)?,
    })
}

/// Decode an execution-context record.
///
/// # Errors
///
/// Returns an error if a field has the wrong kind.
pub fn decode_exec_context(r: &Record<'_>) -> Result<ExecContext> {
    let fields = r
        .records(tag::B)?
        .iter()
        .map(|f| {
            Ok(ExecContextField {
                name: f.str(tag::A)?.to_owned(),
                size: f.u32(tag::B)?,
                offset: f.u32(tag::C)?,
                required: f.bool(tag::D)?,
            })
        })
        .collect::<Result<_>>()?;
    Ok(ExecContext {
        size: r.u32(tag::A)?,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_field_paths() {
        assert!(is_known_field(field::REQUIRED_FIELDS));
        assert!(is_known_field(field::NETWORK_NAME));
        assert!(is_known_field(field::EXEC_CONTEXT));
        assert!(is_known_field(field::DYNAMIC_SHARED_DDR));
        assert!(is_known_field(field::HEAP_BEHAVIOR));
        assert!(is_known_field(field::CONSTANTS_CACHING));
        assert!(is_known_field(
            "Metadata->hostMulticastTable->multicastEntries->mask"
        ));
    }

    #[test]
    fn unknown_field_paths() {
        assert!(!is_known_field("Metadata"));
        assert!(!is_known_field("Metadata->warpDrive"));
        assert!(!is_known_field("networkName"));
        assert!(!is_known_field("Metadata->networkName->length"));
    }

    #[test]
    fn verify_rejects_kind_change() {
        let mut w = RecordWriter::new();
        w.u32(tag::VERSION_MAJOR, 2);
        let buf = w.finish();
        let r = Record::parse(&buf).unwrap();
        let err = verify(&r, METADATA, ROOT).unwrap_err();
        assert!(err.to_string().contains("versionMajor"));
    }

    #[test]
    fn verify_reports_missing_mandatory() {
        let buf = encode(&Metadata::default());
        let r = Record::parse(&buf).unwrap();
        verify(&r, METADATA, ROOT).unwrap();

        let mut w = RecordWriter::new();
        w.u16(tag::VERSION_MAJOR, 2);
        let buf = w.finish();
        let r = Record::parse(&buf).unwrap();
        let err = verify(&r, METADATA, ROOT).unwrap_err();
        assert!(err.to_string().contains("versionMinor is missing"));
    }

    #[test]
    fn verify_ignores_unknown_tags() {
        let mut bytes = encode(&Metadata::default());
        // Append a field from a newer writer and bump the count.
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) + 1;
        bytes[..4].copy_from_slice(&count.to_le_bytes());
        bytes.extend_from_slice(&900u16.to_le_bytes());
        bytes.extend_from_slice(&[Kind::U32 as u8, 0]);
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&7u32.to_le_bytes());
        let r = Record::parse(&bytes).unwrap();
        verify(&r, METADATA, ROOT).unwrap();
        assert_eq!(decode(&r).unwrap(), Metadata::default());
    }
}
