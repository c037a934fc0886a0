//! Program planning.
//!
//! [`ComputeProgram`] turns a [`ProgramConfig`] into the artifacts a
//! compute program ships with, in one pass:
//!
//! 1. resolve and place every buffer (inputs, outputs, internal)
//! 2. route on-chip buffers through multicast groups
//! 3. assign doorbells and semaphore operations
//! 4. build the DMA requests
//! 5. append the UDMA descriptor ring
//! 6. encode the program descriptor, metadata and network descriptor
//!
//! Any invalid setting fails the whole plan; nothing is partially emitted.

use std::fs;
use std::path::Path;

use aic_chip::doorbell::{self, DB_SET, EXIT_SLOT};
use aic_chip::memory::AddressSpace;
use aic_chip::topology::{self, port, semaphore, MAX_NUM_CORES, SUPPORTED_HW_VERSION};
use aic_chip::udma;
use aic_format::container::segment;
use aic_format::metadata::{thread_type, ConstantMapping, PortType};
use aic_format::prelude::{DmaRequest, Port, ThreadDescriptor};
use aic_format::{
    BufferDesc, ConstantsDesc, Container, ContainerBuilder, MemLocation, MetadataDocument,
    MetadataWriter, ProgramDesc, Usage,
};
use bytes::Bytes;
use tracing::{debug, info};

use crate::config::{ProgramConfig, ThreadPlan};
use crate::dma::{self, DmaBuilder};
use crate::error::{PlanError, Result};
use crate::layout::{self, L2tcmReservation, LayoutPlanner, PlannedBuffer, ResourcePlan};
use crate::multicast::MulticastRouter;
use crate::netdesc::NetworkDescriptor;
use crate::sync::{BufferSync, SyncPlanner};

/// A program that can be planned and packaged.
pub trait Program {
    /// Network name.
    fn name(&self) -> &str;

    /// Build every artifact of the program.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be planned.
    fn generate(&self) -> Result<ProgramArtifacts>;

    /// Check a packaged container holds what this program needs.
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing images.
    fn validate_container(&self, container: &Container) -> Result<()> {
        container.validate()?;
        Ok(())
    }
}

/// Everything decided for a program before encoding.
#[derive(Debug, Clone)]
pub struct ProgramPlan {
    /// Thread counts
    pub threads: ThreadPlan,
    /// Fixed L2TCM reservation
    pub reservation: L2tcmReservation,
    /// Memory per address space
    pub resources: ResourcePlan,
    /// Buffers in processing order, the UDMA ring last
    pub buffers: Vec<PlannedBuffer>,
    /// Multicast group of each buffer, `None` in DDR
    pub groups: Vec<Option<u16>>,
    /// Multicast tables
    pub router: MulticastRouter,
    /// Doorbell and semaphore assignment
    pub sync: SyncPlanner,
    /// DMA requests in sequence order
    pub dma_requests: Vec<DmaRequest>,
    /// Loader view of the buffers
    pub program_desc: ProgramDesc,
}

impl ProgramPlan {
    /// Number of cores.
    #[must_use]
    pub const fn num_cores(&self) -> u32 {
        self.router.num_cores()
    }
}

/// Artifacts of a planned program.
#[derive(Debug, Clone)]
pub struct ProgramArtifacts {
    /// Metadata document (`metadata.bin`)
    pub metadata: MetadataDocument,
    /// Program descriptor
    pub program_desc: ProgramDesc,
    /// Encoded program descriptor (`constants.bin`)
    pub constants: Bytes,
    /// Constants descriptor (`constantsdesc.bin`)
    pub constants_desc: ConstantsDesc,
    /// Network descriptor (`networkdesc.bin`)
    pub network_desc: NetworkDescriptor,
}

impl ProgramArtifacts {
    /// Write the four artifact files into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        self.metadata.write_to_file(dir.join(segment::METADATA))?;
        fs::write(dir.join(segment::CONSTANTS), &self.constants)?;
        fs::write(dir.join(segment::CONSTANTS_DESC), self.constants_desc.to_bytes())?;
        fs::write(dir.join(segment::NETWORK_DESC), self.network_desc.to_bytes()?)?;
        info!(dir = %dir.display(), "artifacts written");
        Ok(())
    }

    /// Bundle the artifacts with the linked binary.
    ///
    /// The constants image gets an offset equal to its size, where the
    /// dynamic constants that follow it begin.
    ///
    /// # Errors
    ///
    /// Returns an error if the network descriptor cannot be encoded.
    pub fn container_builder(&self, elf: Bytes) -> Result<ContainerBuilder> {
        let mut b = ContainerBuilder::new();
        b.add_segment(segment::NETWORK_ELF, elf, 0)?;
        b.add_segment(segment::METADATA, self.metadata.bytes(), 0)?;
        b.add_segment(
            segment::CONSTANTS,
            self.constants.clone(),
            self.constants.len() as u64,
        )?;
        b.add_segment(
            segment::CONSTANTS_DESC,
            self.constants_desc.to_bytes().to_vec(),
            0,
        )?;
        b.add_segment(segment::NETWORK_DESC, self.network_desc.to_bytes()?, 0)?;
        Ok(b)
    }
}

/// The compute program planner.
#[derive(Debug, Clone)]
pub struct ComputeProgram {
    config: ProgramConfig,
    entry_point: u64,
}

fn narrow16(value: u32, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| PlanError::config(format!("{what} {value} exceeds 16 bits")))
}

fn narrow32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| PlanError::config(format!("{what} {value} exceeds 32 bits")))
}

fn mem_location(space: AddressSpace) -> MemLocation {
    match space {
        AddressSpace::L2tcm => MemLocation::L2tcm,
        AddressSpace::Vtcm => MemLocation::Vtcm,
        AddressSpace::Ddr => MemLocation::Ddr,
    }
}

fn buffer_desc(buf: &PlannedBuffer, group: Option<u16>, sync: Option<&BufferSync>) -> Result<BufferDesc> {
    let signalled = if sync.is_some() { DB_SET } else { 0 };
    Ok(BufferDesc {
        location: mem_location(buf.space),
        offset: narrow32(buf.start(), "buffer offset")?,
        size: buf.size,
        wait_db_num: sync.map_or(Ok(0), |s| narrow16(s.slot, "doorbell slot"))?,
        io_db_num: 0,
        wait_db_val: signalled,
        io_db_val: signalled,
        io_mc_id: 0,
        io_db_mc_id: 0,
        buff_mc_id: group.unwrap_or(0),
        nsp_mask: narrow16(buf.mask, "core mask")?,
        usage: buf.usage,
        allow_partial: buf.allow_partial,
    })
}

impl ComputeProgram {
    /// Planner for `config` whose threads start at `entry_point`.
    #[must_use]
    pub fn new(config: ProgramConfig, entry_point: u64) -> Self {
        Self {
            config,
            entry_point,
        }
    }

    /// Configuration being planned.
    #[must_use]
    pub const fn config(&self) -> &ProgramConfig {
        &self.config
    }

    /// Thread entry point.
    #[must_use]
    pub const fn entry_point(&self) -> u64 {
        self.entry_point
    }

    fn check_target(&self) -> Result<ThreadPlan> {
        let c = &self.config;
        if (c.hw_version_major, c.hw_version_minor) != SUPPORTED_HW_VERSION {
            return Err(PlanError::config(format!(
                "hardware version {}.{} not supported, only {}.{}",
                c.hw_version_major,
                c.hw_version_minor,
                SUPPORTED_HW_VERSION.0,
                SUPPORTED_HW_VERSION.1
            )));
        }
        if !(1..=MAX_NUM_CORES).contains(&c.num_nsps) {
            return Err(PlanError::config(format!(
                "numNSPs {} outside 1..={MAX_NUM_CORES}",
                c.num_nsps
            )));
        }
        c.thread_plan()
    }

    /// Plan layout, routing, handshake and DMA.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] for any setting the hardware cannot
    /// honour.
    pub fn plan(&self) -> Result<ProgramPlan> {
        let threads = self.check_target()?;
        let num_cores = self.config.num_nsps;
        let reservation = L2tcmReservation::new(threads.total);

        let classes = [
            (Usage::Input, &self.config.inputs),
            (Usage::Output, &self.config.outputs),
            (Usage::Internal, &self.config.internal_buffers),
        ];
        let mut buffers = Vec::new();
        for (usage, specs) in classes {
            for (index, spec) in specs.iter().enumerate() {
                buffers.push(layout::resolve(spec, usage, index, num_cores)?);
            }
        }

        let mut layout = LayoutPlanner::new(reservation);
        for buf in &buffers {
            layout.place(buf)?;
        }

        let mut router = MulticastRouter::new(num_cores, reservation.doorbell_space)?;
        let mut groups = Vec::with_capacity(buffers.len() + 1);
        for buf in &buffers {
            let group = if buf.space.is_on_chip() {
                Some(router.add_group(
                    buf.space,
                    buf.mask,
                    buf.size,
                    buf.base_offset,
                    buf.usage != Usage::Internal,
                )?)
            } else {
                None
            };
            groups.push(group);
        }

        let mut sync = SyncPlanner::new(&buffers)?;
        let mut dma = DmaBuilder::new();
        let mut program_desc = ProgramDesc::new(
            narrow16(EXIT_SLOT, "exit slot")?,
            semaphore::INPUT,
            semaphore::OUTPUT,
            threads.total,
        );
        for (buf, &group) in buffers.iter().zip(&groups) {
            let handshake = sync.assign(buf)?;
            dma.add(buf, group, &handshake)?;
            program_desc.add_buffer(buffer_desc(buf, group, Some(&handshake))?);
        }

        let ring = dma::ring_buffer(&reservation, num_cores, self.config.internal_buffers.len());
        let ring_group = router.add_group(ring.space, ring.mask, ring.size, ring.base_offset, false)?;
        program_desc.add_udma_desc_buffer(
            buffer_desc(&ring, Some(ring_group), None)?,
            narrow32(reservation.dummy_desc_offset, "dummy descriptor offset")?,
        );
        buffers.push(ring);
        groups.push(Some(ring_group));

        let resources = layout.plan();
        debug!(
            l2tcm = resources.l2tcm,
            vtcm = resources.vtcm,
            ddr = resources.ddr,
            groups = router.num_groups(),
            doorbells = sync.slots_used(),
            "program planned"
        );
        Ok(ProgramPlan {
            threads,
            reservation,
            resources,
            buffers,
            groups,
            router,
            sync,
            dma_requests: dma.into_requests(),
            program_desc,
        })
    }

    /// Encode the metadata document of a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if a table entry is rejected by the writer.
    pub fn write_metadata(&self, plan: &ProgramPlan, constants_len: u64) -> Result<MetadataDocument> {
        let c = &self.config;
        let mut w = MetadataWriter::new(
            narrow16(c.hw_version_major, "hwVersionMajor")?,
            narrow16(c.hw_version_minor, "hwVersionMinor")?,
        );
        let num_cores = plan.num_cores();
        w.set_network_name(c.name.clone());
        w.set_num_nsps(narrow16(num_cores, "numNSPs")?);

        w.set_num_semaphores(semaphore::COUNT);
        for (sem, value) in (0u16..).zip(plan.sync.semaphore_init_state()) {
            w.init_semaphore(sem, value)?;
        }

        let image_len = usize::try_from(plan.reservation.init_image_len())
            .map_err(|_| PlanError::config("L2TCM init image too large"))?;
        w.resize_l2tcm_init(image_len);
        plan.sync.write_doorbells(&mut w)?;
        w.write_l2tcm_init(plan.reservation.dummy_desc_offset, &udma::Descriptor::DUMMY.to_bytes())?;

        for id in [port::INPUT, port::OUTPUT] {
            w.add_port(Port {
                id,
                port_type: PortType::UserIo,
            });
        }
        w.set_exit_doorbell_offset(doorbell::slot_offset(EXIT_SLOT));

        for (core, table) in (0u16..).zip(plan.router.nsp_tables()) {
            for entry in table {
                w.add_nsp_multicast_entry(core, *entry)?;
            }
        }
        for entry in plan.router.host_table() {
            w.add_host_multicast_entry(*entry);
        }
        for request in &plan.dma_requests {
            w.add_dma_request(request.clone())?;
        }

        w.set_vtcm_size(narrow32(plan.resources.vtcm, "VTCM size")?);
        w.set_l2tcm_size(narrow32(plan.resources.l2tcm, "L2TCM size")?);
        w.set_static_shared_ddr(plan.resources.ddr, false);
        w.set_dynamic_shared_ddr(0, false);
        w.set_network_heap_size(c.heap_size);
        w.set_single_vtcm_page(c.single_vtcm_page);

        w.set_static_constants(constants_len, false);
        w.set_dynamic_constants(0, false);
        w.add_constant_mapping(ConstantMapping {
            core_mask: topology::all_cores_mask(num_cores),
            base_offset: 0,
            size: narrow32(constants_len, "constants size")?,
        })?;

        let hvx = (0..plan.threads.hvx()).map(|_| thread_type::HVX);
        let hmx = (0..plan.threads.hmx).map(|_| thread_type::HMX);
        for type_mask in hvx.chain(hmx) {
            w.add_thread_descriptor(ThreadDescriptor {
                entry_point: self.entry_point,
                type_mask,
            })?;
        }

        Ok(w.finalize()?)
    }

    /// Plan and encode the metadata document.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be planned.
    pub fn generate_metadata(&self) -> Result<MetadataDocument> {
        let plan = self.plan()?;
        let constants_len = plan.program_desc.encoded_len() as u64;
        self.write_metadata(&plan, constants_len)
    }

    /// Describe the program's I/O for the host.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] for invalid thread counts or partial
    /// inputs with more than one dimension.
    pub fn generate_network_descriptor(&self) -> Result<NetworkDescriptor> {
        NetworkDescriptor::from_config(&self.config)
    }
}

impl Program for ComputeProgram {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn generate(&self) -> Result<ProgramArtifacts> {
        let plan = self.plan()?;
        let network_desc = self.generate_network_descriptor()?;
        let constants = Bytes::from(plan.program_desc.to_bytes());
        let metadata = self.write_metadata(&plan, constants.len() as u64)?;
        let md = metadata.metadata();
        let constants_desc = ConstantsDesc {
            static_size: md.static_constants_size,
            dynamic_size: md.dynamic_constants_size,
            static_ecc: md.static_constants_ecc,
            dynamic_ecc: md.dynamic_constants_ecc,
        };
        info!(
            name = %md.network_name,
            cores = md.num_nsps,
            dma_requests = md.dma_requests.len(),
            metadata_bytes = metadata.len(),
            "program generated"
        );
        Ok(ProgramArtifacts {
            metadata,
            program_desc: plan.program_desc,
            constants,
            constants_desc,
            network_desc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferSpec, DataType, Destination};

    fn small() -> ProgramConfig {
        ProgramConfig {
            name: "small".into(),
            hw_version_major: 2,
            hw_version_minor: 0,
            num_nsps: 2,
            num_threads: 2,
            num_hmx_threads: 0,
            heap_size: 4096,
            single_vtcm_page: true,
            inputs: vec![BufferSpec::new(DataType::Float, vec![64], Destination::Vtcm)],
            outputs: vec![BufferSpec::new(DataType::Float, vec![8], Destination::L2tcm)
                .with_base_offset(4096)
                .with_nsps(vec![1])],
            internal_buffers: vec![BufferSpec::new(DataType::Int8, vec![128], Destination::Vtcm)
                .with_dev_offset(256)],
        }
    }

    #[test]
    fn plan_orders_buffers_and_groups() {
        let plan = ComputeProgram::new(small(), 0x1000).plan().unwrap();
        let usages: Vec<_> = plan.buffers.iter().map(|b| b.usage).collect();
        assert_eq!(usages, [Usage::Input, Usage::Output, Usage::Internal, Usage::Internal]);
        assert_eq!(plan.groups, [Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(plan.router.host_table().len(), 3);
        assert_eq!(plan.dma_requests.len(), 2);

        let ring = plan.program_desc.udma_desc_buff_num as usize;
        assert_eq!(ring, 3);
        assert_eq!(plan.program_desc.buffers[ring].offset, 1280);
        assert_eq!(plan.program_desc.udma_dummy_start_desc_offset, 1152);
        assert_eq!(plan.program_desc.exit_db, 280);
    }

    #[test]
    fn buffer_descs_carry_slots() {
        let plan = ComputeProgram::new(small(), 0x1000).plan().unwrap();
        let descs = &plan.program_desc.buffers;
        assert_eq!(descs[0].wait_db_num, 0);
        assert_eq!(descs[1].wait_db_num, 1);
        assert_eq!(descs[1].offset, 4096);
        assert_eq!(descs[1].nsp_mask, 0b10);
        assert_eq!(descs[2].offset, 256);
        assert_eq!(descs[3].wait_db_val, 0);
    }

    #[test]
    fn metadata_reflects_plan() {
        let doc = ComputeProgram::new(small(), 0x1000).generate_metadata().unwrap();
        let md = doc.metadata();
        assert_eq!(md.num_nsps, 2);
        assert_eq!(md.vtcm_size, 384);
        assert_eq!(md.l2tcm_size, 4128);
        assert_eq!(md.static_shared_ddr_size, 0);
        assert_eq!(md.network_heap_size, 4096);
        assert!(md.single_vtcm_page);
        assert_eq!(md.thread_descriptors.len(), 2);
        assert_eq!(md.semaphore_init_state, vec![0, 1]);
        assert_eq!(md.l2tcm_init_state[1159], 0x80);
        assert_eq!(md.ports.len(), 2);
    }

    #[test]
    fn rejects_unsupported_targets() {
        let edits: [fn(&mut ProgramConfig); 5] = [
            |c| c.hw_version_major = 3,
            |c| c.hw_version_minor = 1,
            |c| c.num_nsps = 0,
            |c| c.num_nsps = 17,
            |c| c.num_threads = 7,
        ];
        for edit in edits {
            let mut c = small();
            edit(&mut c);
            assert!(ComputeProgram::new(c, 0x1000).plan().unwrap_err().is_config());
        }
    }

    #[test]
    fn zero_entry_point_is_rejected() {
        let err = ComputeProgram::new(small(), 0).generate().unwrap_err();
        assert!(matches!(err, PlanError::Format { .. }));
    }
}
