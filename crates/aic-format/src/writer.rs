//! Metadata document builder.

use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use crate::error::{FormatError, Result};
use crate::exec_context::default_exec_context;
use crate::init_state;
use crate::metadata::{
    ConstantMapping, ConstantsCaching, DmaAddrSpace, DmaRequest, ExecContext, HeapBehavior,
    HostMulticastEntry, Metadata, NspMulticastEntry, Port, ThreadDescriptor, VERSION_MAJOR,
    VERSION_MINOR,
};
use crate::reader::{MAGIC, TERMINATOR};
use crate::schema::{self, field};

/// Name given to networks that never set one.
pub const DEFAULT_NETWORK_NAME: &str = "unnamed";

/// Exit doorbell offset before one is set; never valid.
pub const EXIT_DOORBELL_UNSET: u64 = u64::MAX;

/// Incrementally builds a [`Metadata`] document.
///
/// The writer is consumed by [`finalize`](Self::finalize), so a document is
/// encoded exactly once.
#[derive(Debug, Clone)]
pub struct MetadataWriter {
    md: Metadata,
    exec_context_set: bool,
}

impl MetadataWriter {
    /// Start a document for the given hardware version.
    #[must_use]
    pub fn new(hw_version_major: u16, hw_version_minor: u16) -> Self {
        Self {
            md: Metadata {
                version_major: VERSION_MAJOR,
                version_minor: VERSION_MINOR,
                exec_context_major_version: aic_chip::context::MAJOR_VERSION,
                hw_version_major,
                hw_version_minor,
                exit_doorbell_offset: EXIT_DOORBELL_UNSET,
                ..Metadata::default()
            },
            exec_context_set: false,
        }
    }

    /// Document built so far.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.md
    }

    /// Set the core count. Resets the per-core multicast tables.
    pub fn set_num_nsps(&mut self, num_nsps: u16) {
        self.md.num_nsps = num_nsps;
        self.md.nsp_multicast_tables = vec![Vec::new(); usize::from(num_nsps)];
    }

    /// Set VTCM bytes per core.
    pub fn set_vtcm_size(&mut self, size: u32) {
        self.md.vtcm_size = size;
    }

    /// Set L2TCM bytes per core.
    pub fn set_l2tcm_size(&mut self, size: u32) {
        self.md.l2tcm_size = size;
    }

    /// Set the network name.
    pub fn set_network_name(&mut self, name: impl Into<String>) {
        self.md.network_name = name.into();
    }

    /// Declare `count` semaphores, all starting at zero.
    pub fn set_num_semaphores(&mut self, count: u16) {
        self.md.num_semaphores = count;
        self.md.semaphore_init_state = vec![0; usize::from(count)];
    }

    /// Set the initial value of a semaphore.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] if `sem` is not declared.
    pub fn init_semaphore(&mut self, sem: u16, value: u32) -> Result<()> {
        let slot = self
            .md
            .semaphore_init_state
            .get_mut(usize::from(sem))
            .ok_or_else(|| {
                FormatError::invalid_entry(format!(
                    "semaphore {sem} of {} declared",
                    self.md.num_semaphores
                ))
            })?;
        *slot = value;
        Ok(())
    }

    /// Resize the L2TCM init image, zero-filling new bytes.
    pub fn resize_l2tcm_init(&mut self, len: usize) {
        self.md.l2tcm_init_state.resize(len, 0);
    }

    /// Copy `data` into the init image at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] if the write runs past the image.
    pub fn write_l2tcm_init(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let len = self.md.l2tcm_init_state.len();
        let start = usize::try_from(offset).ok().filter(|s| s + data.len() <= len);
        let Some(start) = start else {
            return Err(FormatError::invalid_entry(format!(
                "init write of {} bytes at 0x{offset:x} exceeds image of {len} bytes",
                data.len()
            )));
        };
        self.md.l2tcm_init_state[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Set one byte of the init image.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] if `offset` is past the image.
    pub fn init_l2tcm_byte(&mut self, offset: u64, value: u8) -> Result<()> {
        self.write_l2tcm_init(offset, &[value])
    }

    /// Set one little-endian word of the init image.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] if the word is past the image.
    pub fn init_l2tcm_word(&mut self, offset: u64, value: u32) -> Result<()> {
        self.write_l2tcm_init(offset, &value.to_le_bytes())
    }

    /// Set the static shared DDR size.
    pub fn set_static_shared_ddr(&mut self, size: u64, ecc: bool) {
        self.md.static_shared_ddr_size = size;
        self.md.static_shared_ddr_ecc = ecc;
    }

    /// Set the dynamic shared DDR size.
    pub fn set_dynamic_shared_ddr(&mut self, size: u64, ecc: bool) {
        self.md.dynamic_shared_ddr_size = size;
        self.md.dynamic_shared_ddr_ecc = ecc;
    }

    /// Set the static constants size.
    pub fn set_static_constants(&mut self, size: u64, ecc: bool) {
        self.md.static_constants_size = size;
        self.md.static_constants_ecc = ecc;
    }

    /// Set the dynamic constants size.
    pub fn set_dynamic_constants(&mut self, size: u64, ecc: bool) {
        self.md.dynamic_constants_size = size;
        self.md.dynamic_constants_ecc = ecc;
    }

    /// Require VTCM to be one contiguous page.
    pub fn set_single_vtcm_page(&mut self, single: bool) {
        self.md.single_vtcm_page = single;
    }

    /// Set the network heap size.
    pub fn set_network_heap_size(&mut self, size: u64) {
        self.md.network_heap_size = size;
    }

    /// Choose what happens to the heap on deactivation.
    pub fn set_heap_behavior(&mut self, behavior: HeapBehavior) {
        self.md.heap_behavior = behavior;
        self.require(field::HEAP_BEHAVIOR);
    }

    /// Choose whether constants stay cached between activations.
    pub fn set_constants_caching(&mut self, caching: ConstantsCaching) {
        self.md.constants_caching = caching;
        self.require(field::CONSTANTS_CACHING);
    }

    /// Record floating-point use per thread type.
    pub fn set_fp_usage(&mut self, hvx: bool, hmx: bool) {
        self.md.has_hvx_fp = hvx;
        self.md.has_hmx_fp = hmx;
    }

    /// Register a DMA port.
    pub fn add_port(&mut self, port: Port) {
        self.md.ports.push(port);
    }

    /// Set the L2TCM offset of the exit doorbell.
    pub fn set_exit_doorbell_offset(&mut self, offset: u64) {
        self.md.exit_doorbell_offset = offset;
    }

    /// Append a DMA request.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] if an operation names an
    /// undeclared semaphore.
    pub fn add_dma_request(&mut self, request: DmaRequest) -> Result<()> {
        if let Some(op) = request
            .semaphore_ops
            .iter()
            .find(|op| op.sem_num >= self.md.num_semaphores)
        {
            return Err(FormatError::invalid_entry(format!(
                "DMA request {} uses semaphore {} of {}",
                request.num, op.sem_num, self.md.num_semaphores
            )));
        }
        if request.dev_addr_space == DmaAddrSpace::DdrDynamicShared && request.size > 0 {
            self.require(field::DYNAMIC_SHARED_DDR);
        }
        self.md.dma_requests.push(request);
        Ok(())
    }

    /// Append an entry to one core's multicast table.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] if `core` is out of range.
    pub fn add_nsp_multicast_entry(&mut self, core: u16, entry: NspMulticastEntry) -> Result<()> {
        let num_nsps = self.md.num_nsps;
        let table = self
            .md
            .nsp_multicast_tables
            .get_mut(usize::from(core))
            .ok_or_else(|| FormatError::invalid_entry(format!("core {core} of {num_nsps}")))?;
        table.push(entry);
        Ok(())
    }

    /// Append an entry to the host multicast table.
    pub fn add_host_multicast_entry(&mut self, entry: HostMulticastEntry) {
        self.md.host_multicast_table.push(entry);
    }

    /// Append a thread.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] for a zero entry point.
    pub fn add_thread_descriptor(&mut self, thread: ThreadDescriptor) -> Result<()> {
        if thread.entry_point == 0 {
            return Err(FormatError::invalid_entry("thread entry point is 0"));
        }
        self.md.thread_descriptors.push(thread);
        Ok(())
    }

    /// Map the constants segment onto a set of cores.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] if the cores overlap an
    /// existing mapping.
    pub fn add_constant_mapping(&mut self, mapping: ConstantMapping) -> Result<()> {
        if let Some(other) = self
            .md
            .constant_mappings
            .iter()
            .find(|m| m.core_mask & mapping.core_mask != 0)
        {
            return Err(FormatError::invalid_entry(format!(
                "constant mapping for cores 0x{:x} overlaps 0x{:x}",
                mapping.core_mask, other.core_mask
            )));
        }
        self.md.constant_mappings.push(mapping);
        Ok(())
    }

    /// Replace the default execution-context contract.
    pub fn set_exec_context(&mut self, ctx: ExecContext) {
        self.md.exec_context = ctx;
        self.exec_context_set = true;
        self.require(field::EXEC_CONTEXT);
    }

    /// Add a name to the required-fields list.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::UnknownField`] if the name is not a schema
    /// path or known feature. That is a bug in the caller, not bad input.
    pub fn add_required_field(&mut self, name: &str) -> Result<()> {
        if !schema::is_known_field(name) {
            return Err(FormatError::UnknownField {
                name: name.to_owned(),
            });
        }
        self.require_owned(name);
        Ok(())
    }

    fn require(&mut self, name: &'static str) {
        debug_assert!(schema::is_known_field(name), "{name}");
        self.require_owned(name);
    }

    fn require_owned(&mut self, name: &str) {
        if !self.md.requires(name) {
            self.md.required_fields.push(name.to_owned());
        }
    }

    /// Complete and encode the document.
    ///
    /// Fills in everything derived from the other fields: init-image
    /// regions, default name and execution context, the introspection list
    /// and the legacy size hint.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::IncompleteDocument`] if the core count, VTCM
    /// or L2TCM size was never set.
    pub fn finalize(mut self) -> Result<MetadataDocument> {
        if self.md.num_nsps == 0 {
            return Err(FormatError::IncompleteDocument { field: "numNSPs" });
        }
        if self.md.vtcm_size == 0 {
            return Err(FormatError::IncompleteDocument { field: "VTCMSize" });
        }
        if self.md.l2tcm_size == 0 {
            return Err(FormatError::IncompleteDocument { field: "L2TCMSize" });
        }

        self.require(field::REQUIRED_FIELDS);
        let init = &self.md.l2tcm_init_state;
        self.md.l2tcm_init_size = u32::try_from(init.len()).map_err(|_| {
            FormatError::invalid_entry(format!("L2TCM init image of {} bytes", init.len()))
        })?;
        self.md.l2tcm_init_regions = init_state::non_zero_regions(init);

        if self.md.network_name.is_empty() {
            self.md.network_name = DEFAULT_NETWORK_NAME.to_owned();
        }
        if !self.exec_context_set {
            self.set_exec_context(default_exec_context());
        }
        self.require(field::NETWORK_NAME);

        if self.md.raw_struct_version_length == 0 {
            self.md.raw_struct_version_length = 2 * schema::encode(&self.md).len() as u64;
        }

        let payload = schema::encode(&self.md);
        let mut out = Vec::with_capacity(TERMINATOR.len() + MAGIC.len() + payload.len());
        out.extend_from_slice(&TERMINATOR);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&payload);
        debug!(
            name = %self.md.network_name,
            bytes = out.len(),
            regions = self.md.l2tcm_init_regions.len(),
            "metadata finalized"
        );
        Ok(MetadataDocument {
            metadata: self.md,
            bytes: Bytes::from(out),
        })
    }
}

/// A finalized, immutable metadata document and its encoding.
#[derive(Debug, Clone)]
pub struct MetadataDocument {
    metadata: Metadata,
    bytes: Bytes,
}

impl MetadataDocument {
    /// Document contents.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Encoded document, terminator header included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the encoding.
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Encoded length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for a finalized document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the encoding to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DmaDirection;

    fn minimal() -> MetadataWriter {
        let mut w = MetadataWriter::new(2, 0);
        w.set_num_nsps(2);
        w.set_vtcm_size(1);
        w.set_l2tcm_size(4096);
        w
    }

    #[test]
    fn finalize_requires_core_count() {
        let mut w = MetadataWriter::new(2, 0);
        w.set_vtcm_size(1);
        w.set_l2tcm_size(1);
        assert!(matches!(
            w.finalize(),
            Err(FormatError::IncompleteDocument { field: "numNSPs" })
        ));
    }

    #[test]
    fn finalize_fills_defaults() {
        let doc = minimal().finalize().unwrap();
        let md = doc.metadata();
        assert_eq!(md.network_name, DEFAULT_NETWORK_NAME);
        assert!(md.requires(field::REQUIRED_FIELDS));
        assert!(md.requires(field::NETWORK_NAME));
        assert!(md.requires(field::EXEC_CONTEXT));
        assert!(!md.exec_context.fields.is_empty());
        assert_eq!(
            md.raw_struct_version_length,
            2 * (doc.len() - TERMINATOR.len() - MAGIC.len()) as u64
        );
        assert_eq!(&doc.as_bytes()[..4], &TERMINATOR);
    }

    #[test]
    fn semaphore_range_is_checked() {
        let mut w = minimal();
        w.set_num_semaphores(2);
        w.init_semaphore(1, 3).unwrap();
        assert!(w.init_semaphore(2, 1).is_err());
        assert_eq!(w.metadata().semaphore_init_state, vec![0, 3]);
    }

    #[test]
    fn init_image_writes_stay_in_bounds() {
        let mut w = minimal();
        w.resize_l2tcm_init(8);
        w.init_l2tcm_word(4, 0x8000_0000).unwrap();
        w.init_l2tcm_byte(0, 7).unwrap();
        assert!(w.init_l2tcm_word(6, 1).is_err());
        assert_eq!(w.metadata().l2tcm_init_state, vec![7, 0, 0, 0, 0, 0, 0, 0x80]);
    }

    #[test]
    fn overlapping_constant_mappings_rejected() {
        let mut w = minimal();
        let m = ConstantMapping {
            core_mask: 0b01,
            base_offset: 0,
            size: 64,
        };
        w.add_constant_mapping(m).unwrap();
        w.add_constant_mapping(ConstantMapping {
            core_mask: 0b10,
            ..m
        })
        .unwrap();
        assert!(w
            .add_constant_mapping(ConstantMapping {
                core_mask: 0b11,
                ..m
            })
            .is_err());
    }

    #[test]
    fn unknown_required_field_is_a_bug() {
        let mut w = minimal();
        assert!(matches!(
            w.add_required_field("Metadata->fluxCapacitor"),
            Err(FormatError::UnknownField { .. })
        ));
        w.add_required_field("Metadata->singleVTCMPage").unwrap();
        w.add_required_field("Metadata->singleVTCMPage").unwrap();
        let count = w
            .metadata()
            .required_fields
            .iter()
            .filter(|f| f.as_str() == "Metadata->singleVTCMPage")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn dynamic_shared_ddr_marks_feature() {
        let mut w = minimal();
        w.add_dma_request(DmaRequest {
            dev_addr_space: DmaAddrSpace::DdrDynamicShared,
            size: 0,
            ..DmaRequest::default()
        })
        .unwrap();
        assert!(!w.metadata().requires(field::DYNAMIC_SHARED_DDR));
        w.add_dma_request(DmaRequest {
            dev_addr_space: DmaAddrSpace::DdrDynamicShared,
            size: 64,
            direction: DmaDirection::Out,
            ..DmaRequest::default()
        })
        .unwrap();
        assert!(w.metadata().requires(field::DYNAMIC_SHARED_DDR));
    }

    #[test]
    fn zero_entry_point_rejected() {
        let mut w = minimal();
        assert!(w.add_thread_descriptor(ThreadDescriptor::default()).is_err());
    }

    #[test]
    fn multicast_core_range() {
        let mut w = minimal();
        w.add_nsp_multicast_entry(1, NspMulticastEntry::default())
            .unwrap();
        assert!(w
            .add_nsp_multicast_entry(2, NspMulticastEntry::default())
            .is_err());
    }
}
