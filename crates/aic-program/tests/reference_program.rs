//! Planning the reference program end to end.

mod common;

use aic_format::prelude::{DmaAddrSpace, DmaDirection, HostMulticastEntry, SemaphoreOpcode};
use aic_format::{read_metadata, ProgramDesc, Usage};
use aic_program::{ComputeProgram, Destination, Program, ProgramArtifacts};
use common::reference_config;

const MIB: u64 = 1024 * 1024;
const ENTRY: u64 = 0x0010_0040;

fn generate() -> ProgramArtifacts {
    ComputeProgram::new(reference_config(), ENTRY)
        .generate()
        .expect("reference program generates")
}

#[test]
fn reference_values_reproduce() {
    let artifacts = generate();
    let md = artifacts.metadata.metadata();

    assert_eq!(md.static_shared_ddr_size, 512 * MIB);
    assert_eq!(u64::from(md.vtcm_size), 8 * MIB);
    assert!(md.l2tcm_size > 1021 * 1024, "L2TCM is {}", md.l2tcm_size);
    assert_eq!(md.l2tcm_size, 1_046_528);
    assert_eq!(md.num_nsps, 14);
    assert_eq!(md.num_semaphores, 2);
    assert_eq!(md.exit_doorbell_offset, 1120);
    assert!(md.l2tcm_init_size > 128);
    assert_eq!(md.dma_requests.len(), 4);
    assert_eq!(md.thread_descriptors.len(), 5);
}

#[test]
fn metadata_reads_back_unchanged() {
    let artifacts = generate();
    let read = read_metadata(artifacts.metadata.as_bytes()).expect("document verifies");
    assert_eq!(&read, artifacts.metadata.metadata());
    assert_eq!(read.network_name, "reference");
}

#[test]
fn generation_is_deterministic() {
    let a = generate();
    let b = generate();
    assert_eq!(a.metadata.as_bytes(), b.metadata.as_bytes());
    assert_eq!(a.constants, b.constants);
    assert_eq!(
        a.network_desc.to_bytes().unwrap(),
        b.network_desc.to_bytes().unwrap()
    );
}

#[test]
fn semaphores_match_participation() {
    let artifacts = generate();
    let md = artifacts.metadata.metadata();
    // Inputs and the DDR output span all 14 cores.
    assert_eq!(md.semaphore_init_state, vec![0, 14]);

    let first_input = &md.dma_requests[0].semaphore_ops;
    assert_eq!(first_input.len(), 1);
    assert_eq!(first_input[0].opcode, SemaphoreOpcode::WaitEq);
    assert_eq!(first_input[0].value, 14);

    let last_input = &md.dma_requests[1].semaphore_ops;
    assert_eq!(last_input.len(), 2);
    assert_eq!(last_input[1].opcode, SemaphoreOpcode::Init);
    assert_eq!(last_input[1].value, 0);

    let last_output = &md.dma_requests[3].semaphore_ops;
    assert_eq!((last_output[0].sem_num, last_output[0].value), (1, 0));
    assert_eq!((last_output[1].opcode, last_output[1].value), (SemaphoreOpcode::Init, 14));
}

#[test]
fn doorbell_window_and_groups() {
    let artifacts = generate();
    let md = artifacts.metadata.metadata();

    assert_eq!(md.host_multicast_table[0], HostMulticastEntry { mask: 0x3fff, size: 1124 });
    // Doorbells, the VTCM input and the L2TCM output; the UDMA ring is not
    // host visible.
    assert_eq!(md.host_multicast_table.len(), 3);
    assert_eq!(md.host_multicast_table[2], HostMulticastEntry { mask: 1, size: 2048 });

    for (core, table) in md.nsp_multicast_tables.iter().enumerate() {
        assert_eq!(table.len(), 4);
        assert_eq!(table[0].mask, 0x3fff & !(1 << core));
        assert_eq!(table[0].size, 1124);
        let expected = if core == 0 { 2048 } else { 0 };
        assert_eq!(table[2].size, expected, "core {core}");
        assert_eq!(table[2].base_offset, 1_040_384);
    }

    let init = &md.l2tcm_init_state;
    assert_eq!(init.len(), 1168);
    assert_eq!(&init[1120..1124], &[0, 0, 0, 0]);
    // Output doorbells start set.
    assert_eq!(&init[8..12], &1u32.to_le_bytes());
    assert_eq!(&init[12..16], &1u32.to_le_bytes());
    assert_eq!(&init[0..8], &[0; 8]);
    assert_eq!(init[1159], 0x80);
}

#[test]
fn dma_requests_follow_buffers() {
    let artifacts = generate();
    let reqs = &artifacts.metadata.metadata().dma_requests;

    let nums: Vec<_> = reqs.iter().map(|r| r.num).collect();
    assert_eq!(nums, [0, 1, 2, 3]);

    assert_eq!(reqs[0].dev_addr_space, DmaAddrSpace::Ddr);
    assert_eq!(reqs[1].dev_addr_space, DmaAddrSpace::Multicast);
    assert_eq!(reqs[1].mc_id, 1);
    assert_eq!(reqs[2].dev_offset, 256 * MIB);
    assert_eq!(reqs[2].direction, DmaDirection::Out);
    assert_eq!(reqs[3].mc_id, 2);
    assert_eq!(reqs[3].dev_offset, 4096);
    assert_eq!(reqs[3].port_id, 101);
    assert!(reqs.iter().all(|r| r.doorbell_ops.len() == 1));
    assert_eq!(reqs[3].doorbell_ops[0].offset, 12);
}

#[test]
fn constants_hold_the_program_descriptor() {
    let artifacts = generate();
    let md = artifacts.metadata.metadata();
    let desc = ProgramDesc::from_bytes(&artifacts.constants).expect("descriptor decodes");

    assert_eq!(desc, artifacts.program_desc);
    assert_eq!(desc.buffers.len(), 5);
    assert_eq!((desc.num_inputs(), desc.num_outputs(), desc.num_internal()), (2, 2, 1));
    assert_eq!(desc.num_threads, 5);
    assert_eq!(desc.buffers[3].offset, 1_044_480);
    assert_eq!(desc.buffers[4].usage, Usage::Internal);
    assert_eq!(desc.udma_desc_buff_num, 4);

    assert_eq!(md.static_constants_size, artifacts.constants.len() as u64);
    assert_eq!(artifacts.constants_desc.static_size, md.static_constants_size);
    assert_eq!(md.constant_mappings.len(), 1);
    assert_eq!(md.constant_mappings[0].core_mask, 0x3fff);
}

#[test]
fn threads_share_the_entry_point() {
    let artifacts = generate();
    let threads = &artifacts.metadata.metadata().thread_descriptors;
    assert!(threads.iter().all(|t| t.entry_point == ENTRY));
    let kinds: Vec<_> = threads.iter().map(|t| t.type_mask).collect();
    assert_eq!(kinds, [1, 1, 1, 1, 2]);
    assert_eq!(artifacts.network_desc.thread_groups, [0, 0, 0, 0, 1]);
}

#[test]
fn multi_core_on_chip_output_is_rejected() {
    for dest in [Destination::L2tcm, Destination::Vtcm] {
        let mut config = reference_config();
        config.outputs[1].dest = dest;
        config.outputs[1].nsps = vec![0, 3];
        let err = ComputeProgram::new(config, ENTRY).generate().unwrap_err();
        assert!(err.is_config(), "{err}");
    }
}

#[test]
fn capacity_violations_are_rejected() {
    let mut vtcm = reference_config();
    vtcm.inputs[1].dev_offset = 1;
    assert!(ComputeProgram::new(vtcm, ENTRY).plan().unwrap_err().is_config());

    let mut l2tcm = reference_config();
    l2tcm.outputs[1].dims = vec![6144];
    assert!(ComputeProgram::new(l2tcm, ENTRY).plan().unwrap_err().is_config());

    let mut reserved = reference_config();
    reserved.outputs[1].base_addr_offset = 0;
    reserved.outputs[1].dev_offset = 2048;
    assert!(ComputeProgram::new(reserved, ENTRY).plan().unwrap_err().is_config());
}

#[test]
fn ddr_buffers_cannot_use_base_groups() {
    let mut config = reference_config();
    config.inputs[0].base_addr_offset = 4096;
    assert!(ComputeProgram::new(config, ENTRY).plan().unwrap_err().is_config());
}

#[test]
fn wrapping_offsets_are_rejected() {
    let mut config = reference_config();
    config.inputs[0].dev_offset = u64::MAX - 3;
    let err = ComputeProgram::new(config, ENTRY).plan().unwrap_err();
    assert!(err.is_config(), "{err}");
    assert!(err.to_string().contains("inputBuff_0"), "{err}");

    let text = common::REFERENCE_CONFIG.replace(
        r#""devOffset": 268435456"#,
        r#""devOffset": 18446744073709551612"#,
    );
    let config = aic_program::ProgramConfig::from_json(&text).unwrap();
    let err = ComputeProgram::new(config, ENTRY).generate().unwrap_err();
    assert!(err.is_config(), "{err}");
}
